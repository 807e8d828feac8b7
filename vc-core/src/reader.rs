//! Reader: decodes inbound wire frames and applies the inbound overflow
//! policy.

use vc_queue::BoundedQueue;
use vc_trace::{metrics::names, Metrics};
use vc_types::{CloseReason, InboundFrame, InboundItem};

/// Parses and schema-validates inbound frames, then applies per-kind
/// overflow handling when enqueueing onto a bounded inbound queue.
pub struct Reader {
    max_inbound_frame_bytes: usize,
}

impl Reader {
    /// Build a reader enforcing `max_inbound_frame_bytes` as the UTF-8
    /// byte-length ceiling for a single inbound frame.
    pub fn new(max_inbound_frame_bytes: usize) -> Self {
        Self {
            max_inbound_frame_bytes,
        }
    }

    /// Decode one raw inbound message.
    ///
    /// `Err(reason)` is fatal: the caller must publish
    /// `InboundItem::TransportClosed(reason)` and stop reading.
    /// `Ok(None)` means the frame parsed as JSON but failed schema
    /// validation; it is dropped and counted, the session stays open.
    pub fn decode(&self, raw: &str, metrics: &mut Metrics) -> Result<Option<InboundItem>, CloseReason> {
        if raw.len() > self.max_inbound_frame_bytes {
            return Err(CloseReason::FrameTooLarge);
        }

        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| CloseReason::BadJson)?;

        match serde_json::from_value::<InboundFrame>(value) {
            Ok(frame) => Ok(InboundItem::from_wire(frame)),
            Err(_) => {
                metrics.inc(names::BAD_SCHEMA_DROPPED_TOTAL, 1);
                Ok(None)
            }
        }
    }
}

/// Apply the per-kind inbound overflow policy and enqueue `item` onto
/// `queue`.
pub async fn enqueue_inbound(queue: &BoundedQueue<InboundItem>, item: InboundItem, metrics: &mut Metrics) {
    match item {
        InboundItem::TranscriptUpdate { .. } => {
            queue
                .drop_where(|x| matches!(x, InboundItem::TranscriptUpdate { .. }))
                .await;
            if !queue.put(item, None).await {
                metrics.inc(names::INBOUND_ITEM_DROPPED_TOTAL, 1);
            }
        }
        InboundItem::ResponseRequired { response_id, .. }
        | InboundItem::ReminderRequired { response_id, .. } => {
            queue
                .drop_where(|x| {
                    matches!(
                        x,
                        InboundItem::TranscriptUpdate { .. }
                            | InboundItem::Ping { .. }
                            | InboundItem::CallDetails { .. }
                    )
                })
                .await;
            let new_response_id = response_id;
            let accepted = queue
                .put(
                    item,
                    Some(&|x: &InboundItem| {
                        matches!(x, InboundItem::ResponseRequired { response_id: rid, .. } if *rid < new_response_id)
                            || matches!(x, InboundItem::ReminderRequired { response_id: rid, .. } if *rid < new_response_id)
                    }),
                )
                .await;
            if !accepted {
                metrics.inc(names::INBOUND_ITEM_DROPPED_TOTAL, 1);
            }
        }
        InboundItem::Ping { .. } => {
            let was_full = queue.len().await >= queue.maxsize();
            let accepted = queue
                .put(item, Some(&|x: &InboundItem| matches!(x, InboundItem::TranscriptUpdate { .. })))
                .await;
            if accepted && was_full {
                metrics.inc(names::INBOUND_QUEUE_EVICTIONS_TOTAL, 1);
            } else if !accepted {
                metrics.inc(names::INBOUND_ITEM_DROPPED_TOTAL, 1);
            }
        }
        InboundItem::Clear => {
            let was_full = queue.len().await >= queue.maxsize();
            let accepted = queue
                .put(item, Some(&|x: &InboundItem| matches!(x, InboundItem::TranscriptUpdate { .. })))
                .await;
            if accepted && was_full {
                metrics.inc(names::INBOUND_QUEUE_EVICTIONS_TOTAL, 1);
            } else if !accepted {
                metrics.inc(names::INBOUND_ITEM_DROPPED_TOTAL, 1);
            }
        }
        InboundItem::CallDetails { .. } => {
            if !queue.put(item, None).await {
                metrics.inc(names::INBOUND_ITEM_DROPPED_TOTAL, 1);
            }
        }
        InboundItem::TransportClosed(_) => {
            let _ = queue.put(item, None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_too_large_is_fatal() {
        let reader = Reader::new(8);
        let mut metrics = Metrics::new();
        let raw = json!({"interaction_type": "clear"}).to_string();
        assert!(raw.len() > 8);
        assert_eq!(reader.decode(&raw, &mut metrics), Err(CloseReason::FrameTooLarge));
    }

    #[test]
    fn bad_json_is_fatal() {
        let reader = Reader::new(1024);
        let mut metrics = Metrics::new();
        assert_eq!(reader.decode("not json", &mut metrics), Err(CloseReason::BadJson));
    }

    #[test]
    fn unknown_interaction_type_is_dropped_not_fatal() {
        let reader = Reader::new(1024);
        let mut metrics = Metrics::new();
        let raw = json!({"interaction_type": "something_unknown"}).to_string();
        let result = reader.decode(&raw, &mut metrics);
        assert_eq!(result, Ok(None));
        assert_eq!(metrics.get(names::BAD_SCHEMA_DROPPED_TOTAL), 1);
    }

    #[test]
    fn valid_frame_decodes() {
        let reader = Reader::new(1024);
        let mut metrics = Metrics::new();
        let raw = json!({"interaction_type": "ping_pong", "timestamp": 42}).to_string();
        let result = reader.decode(&raw, &mut metrics).unwrap();
        assert!(matches!(result, Some(InboundItem::Ping { timestamp: 42 })));
    }

    #[tokio::test]
    async fn transcript_update_keeps_only_latest() {
        let queue: BoundedQueue<InboundItem> = BoundedQueue::new(4);
        let mut metrics = Metrics::new();
        enqueue_inbound(
            &queue,
            InboundItem::TranscriptUpdate { transcript: vec![], turntaking: None },
            &mut metrics,
        )
        .await;
        enqueue_inbound(
            &queue,
            InboundItem::TranscriptUpdate { transcript: vec![], turntaking: None },
            &mut metrics,
        )
        .await;
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn ping_evicts_transcript_update_when_full() {
        let queue: BoundedQueue<InboundItem> = BoundedQueue::new(1);
        let mut metrics = Metrics::new();
        enqueue_inbound(
            &queue,
            InboundItem::TranscriptUpdate { transcript: vec![], turntaking: None },
            &mut metrics,
        )
        .await;
        enqueue_inbound(&queue, InboundItem::Ping { timestamp: 1 }, &mut metrics).await;
        assert_eq!(queue.len().await, 1);
        assert!(matches!(queue.get().await.unwrap(), InboundItem::Ping { .. }));
        assert_eq!(metrics.get(names::INBOUND_QUEUE_EVICTIONS_TOTAL), 1);
    }

    #[tokio::test]
    async fn call_details_dropped_when_full() {
        let queue: BoundedQueue<InboundItem> = BoundedQueue::new(1);
        let mut metrics = Metrics::new();
        enqueue_inbound(&queue, InboundItem::Ping { timestamp: 1 }, &mut metrics).await;
        enqueue_inbound(&queue, InboundItem::CallDetails { call: serde_json::Value::Null }, &mut metrics).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(metrics.get(names::INBOUND_ITEM_DROPPED_TOTAL), 1);
    }

    #[tokio::test]
    async fn response_required_evicts_older_smaller_response_id() {
        let queue: BoundedQueue<InboundItem> = BoundedQueue::new(1);
        let mut metrics = Metrics::new();
        enqueue_inbound(
            &queue,
            InboundItem::ResponseRequired { response_id: 1, transcript: vec![] },
            &mut metrics,
        )
        .await;
        enqueue_inbound(
            &queue,
            InboundItem::ResponseRequired { response_id: 2, transcript: vec![] },
            &mut metrics,
        )
        .await;
        assert_eq!(queue.len().await, 1);
        match queue.get().await.unwrap() {
            InboundItem::ResponseRequired { response_id, .. } => assert_eq!(response_id, 2),
            other => panic!("unexpected item: {other:?}"),
        }
    }
}
