//! Append-only, bounded event log used for deterministic replay and
//! post-hoc debugging. Every trace event hashes its payload rather than
//! storing it verbatim, so the log stays small and stable across runs that
//! only differ in wall-clock timing.

use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};
use vc_types::canon;

/// One recorded event: who/what/when, plus a content hash rather than the
/// raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    /// Logical time (ms) the event was recorded.
    pub t_ms: u64,
    /// Owning session.
    pub session_id: String,
    /// Owning call.
    pub call_id: String,
    /// Turn-handler-local turn id.
    pub turn_id: u64,
    /// Epoch this event belongs to.
    pub epoch: u64,
    /// Websocket/transport FSM state label at event time.
    pub ws_state: String,
    /// Conversation FSM state label at event time.
    pub conv_state: String,
    /// Event type label, e.g. `"segment_emitted"`, `"tool_call_result"`.
    pub event_type: String,
    /// SHA-256 hex digest of the event's canonical-JSON payload.
    pub payload_hash: String,
    /// Digest of the emitted segment's rendered text, for segment-type
    /// events.
    pub segment_hash: Option<String>,
}

/// Fields supplied to [`TraceSink::emit`]; `t_ms`/`seq` are assigned by the
/// sink.
pub struct TraceEventInput<'a, T: Serialize> {
    /// Logical time (ms) the event was recorded.
    pub t_ms: u64,
    /// Owning session.
    pub session_id: &'a str,
    /// Owning call.
    pub call_id: &'a str,
    /// Turn-handler-local turn id.
    pub turn_id: u64,
    /// Epoch this event belongs to.
    pub epoch: u64,
    /// Websocket/transport FSM state label at event time.
    pub ws_state: &'a str,
    /// Conversation FSM state label at event time.
    pub conv_state: &'a str,
    /// Event type label.
    pub event_type: &'a str,
    /// Payload to hash; never stored verbatim.
    pub payload: &'a T,
    /// Digest of the emitted segment's rendered text, if applicable.
    pub segment_hash: Option<String>,
}

struct Inner {
    seq: u64,
    events: VecDeque<TraceEvent>,
    max_events: usize,
    schema_violations_total: u64,
}

/// Bounded, shareable trace log with async waiters for tests and replay
/// tooling.
pub struct TraceSink {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl TraceSink {
    /// Construct a sink retaining at most `max_events` events.
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                seq: 0,
                events: VecDeque::new(),
                max_events,
                schema_violations_total: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Record one event, computing its payload hash and assigning the next
    /// sequence number.
    pub async fn emit<T: Serialize>(&self, input: TraceEventInput<'_, T>) {
        let payload_hash = canon::hash_payload(input.payload);
        let mut inner = self.inner.lock().await;
        inner.seq += 1;
        let ev = TraceEvent {
            seq: inner.seq,
            t_ms: input.t_ms,
            session_id: input.session_id.to_string(),
            call_id: input.call_id.to_string(),
            turn_id: input.turn_id,
            epoch: input.epoch,
            ws_state: input.ws_state.to_string(),
            conv_state: input.conv_state.to_string(),
            event_type: input.event_type.to_string(),
            payload_hash,
            segment_hash: input.segment_hash,
        };
        if !validate(&ev) {
            inner.schema_violations_total += 1;
        }
        if inner.events.len() >= inner.max_events {
            inner.events.pop_front();
        }
        inner.events.push_back(ev);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Snapshot of every currently retained event, oldest first.
    pub async fn events(&self) -> Vec<TraceEvent> {
        self.inner.lock().await.events.iter().cloned().collect()
    }

    /// Count of events that failed the well-formedness check at emit time.
    pub async fn schema_violations_total(&self) -> u64 {
        self.inner.lock().await.schema_violations_total
    }

    /// Block until at least `n` events have been recorded.
    pub async fn wait_for_len(&self, n: usize) {
        loop {
            let notified = self.notify.notified();
            {
                let inner = self.inner.lock().await;
                if inner.events.len() >= n {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Block until an event of `event_type` has been recorded, then return
    /// the first one.
    pub async fn wait_for_event_type(&self, event_type: &str) -> TraceEvent {
        loop {
            let notified = self.notify.notified();
            {
                let inner = self.inner.lock().await;
                if let Some(ev) = inner.events.iter().find(|e| e.event_type == event_type) {
                    return ev.clone();
                }
            }
            notified.await;
        }
    }

    /// A single digest over every retained event, in order. Two sinks that
    /// produced byte-identical event sequences produce the same digest
    /// regardless of wall-clock skew between the runs.
    pub async fn replay_digest(&self) -> String {
        let inner = self.inner.lock().await;
        let blob: String = inner
            .events
            .iter()
            .map(|e| {
                format!(
                    "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
                    e.seq,
                    e.t_ms,
                    e.session_id,
                    e.call_id,
                    e.turn_id,
                    e.epoch,
                    e.ws_state,
                    e.conv_state,
                    e.event_type,
                    e.payload_hash,
                    e.segment_hash.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("|");
        canon::sha256_hex(blob.as_bytes())
    }
}

fn validate(ev: &TraceEvent) -> bool {
    ev.seq > 0
        && !ev.session_id.is_empty()
        && !ev.call_id.is_empty()
        && !ev.ws_state.is_empty()
        && !ev.conv_state.is_empty()
        && !ev.event_type.is_empty()
        && !ev.payload_hash.is_empty()
        && ev.segment_hash.as_deref().is_none_or(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn emit_assigns_increasing_seq() {
        let sink = TraceSink::new(10);
        sink.emit(TraceEventInput {
            t_ms: 1,
            session_id: "s",
            call_id: "c",
            turn_id: 1,
            epoch: 1,
            ws_state: "open",
            conv_state: "listening",
            event_type: "ping",
            payload: &json!({"x": 1}),
            segment_hash: None,
        })
        .await;
        sink.emit(TraceEventInput {
            t_ms: 2,
            session_id: "s",
            call_id: "c",
            turn_id: 1,
            epoch: 1,
            ws_state: "open",
            conv_state: "listening",
            event_type: "pong",
            payload: &json!({"x": 2}),
            segment_hash: None,
        })
        .await;
        let events = sink.events().await;
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[1].seq, 2);
    }

    #[tokio::test]
    async fn bounded_sink_drops_oldest() {
        let sink = TraceSink::new(2);
        for i in 0..3 {
            sink.emit(TraceEventInput {
                t_ms: i,
                session_id: "s",
                call_id: "c",
                turn_id: 1,
                epoch: 1,
                ws_state: "open",
                conv_state: "listening",
                event_type: "e",
                payload: &json!({"i": i}),
                segment_hash: None,
            })
            .await;
        }
        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 2);
        assert_eq!(events[1].seq, 3);
    }

    #[tokio::test]
    async fn replay_digest_is_deterministic_and_order_sensitive() {
        let sink_a = TraceSink::new(10);
        let sink_b = TraceSink::new(10);
        for sink in [&sink_a, &sink_b] {
            sink.emit(TraceEventInput {
                t_ms: 1,
                session_id: "s",
                call_id: "c",
                turn_id: 1,
                epoch: 1,
                ws_state: "open",
                conv_state: "listening",
                event_type: "e",
                payload: &json!({"a": 1}),
                segment_hash: None,
            })
            .await;
        }
        assert_eq!(sink_a.replay_digest().await, sink_b.replay_digest().await);
    }

    #[tokio::test]
    async fn wait_for_event_type_unblocks_on_matching_emit() {
        let sink = Arc::new(TraceSink::new(10));
        let sink2 = sink.clone();
        let waiter = tokio::spawn(async move { sink2.wait_for_event_type("target").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        sink.emit(TraceEventInput {
            t_ms: 1,
            session_id: "s",
            call_id: "c",
            turn_id: 1,
            epoch: 1,
            ws_state: "open",
            conv_state: "listening",
            event_type: "other",
            payload: &json!({}),
            segment_hash: None,
        })
        .await;
        sink.emit(TraceEventInput {
            t_ms: 2,
            session_id: "s",
            call_id: "c",
            turn_id: 1,
            epoch: 1,
            ws_state: "open",
            conv_state: "listening",
            event_type: "target",
            payload: &json!({}),
            segment_hash: None,
        })
        .await;

        let ev = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter did not resolve")
            .unwrap();
        assert_eq!(ev.event_type, "target");
    }
}
