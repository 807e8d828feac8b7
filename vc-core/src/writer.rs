//! Writer: the only task allowed to emit outbound frames.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use vc_clock::Clock;
use vc_queue::BoundedQueue;
use vc_trace::{metrics::names, Metrics};
use vc_types::{wire::dumps_outbound, CloseReason, Envelope, Plane};

use crate::gate::GateRef;

/// The transport this writer emits serialized frames onto. Send failures
/// are out of scope for the core (the accept layer owns reconnection); a
/// sink that can't make progress is bounded by the writer's own deadline.
#[async_trait]
pub trait TransportSink: Send + Sync {
    /// Write one already-serialized frame.
    async fn send(&self, raw: &str);
}

/// Serializes and writes outbound envelopes, enforcing the gate, the
/// response-id invariant, and per-write deadlines.
pub struct Writer {
    clock: Arc<dyn Clock>,
    gate: Arc<GateRef>,
    sink: Arc<dyn TransportSink>,
    write_timeout_ms: u64,
    max_consecutive_write_timeouts: u32,
}

impl Writer {
    /// Build a writer bound to `gate` and `sink`.
    pub fn new(
        clock: Arc<dyn Clock>,
        gate: Arc<GateRef>,
        sink: Arc<dyn TransportSink>,
        write_timeout_ms: u64,
        max_consecutive_write_timeouts: u32,
    ) -> Self {
        Self {
            clock,
            gate,
            sink,
            write_timeout_ms,
            max_consecutive_write_timeouts,
        }
    }

    /// Drain `queue` until it closes or the writer hits its consecutive
    /// write-timeout budget. Returns the close reason in the latter case,
    /// `None` if the queue simply closed (a graceful shutdown elsewhere).
    pub async fn run(
        &self,
        queue: &BoundedQueue<Envelope>,
        metrics: &Mutex<Metrics>,
    ) -> Option<CloseReason> {
        let mut consecutive_timeouts: u32 = 0;

        loop {
            let env = match queue.get_prefer(|e: &Envelope| e.is_control()).await {
                Ok(env) => env,
                Err(_) => return None,
            };

            let gate_now = self.gate.snapshot();
            if !gate_now.matches(env.epoch, env.speak_gen) {
                metrics.lock().await.inc(names::OUTBOUND_STALE_DROPPED_TOTAL, 1);
                continue;
            }
            if let Some(rid) = env.response_id() {
                if rid != gate_now.epoch {
                    metrics.lock().await.inc(names::OUTBOUND_STALE_DROPPED_TOTAL, 1);
                    continue;
                }
            }

            if env.plane == Plane::Speech {
                match self.send_speech(env, queue, metrics).await {
                    SendOutcome::Sent => {
                        consecutive_timeouts = 0;
                    }
                    SendOutcome::Preempted | SendOutcome::Stale => {
                        // Requeued or dropped by the race below; no timeout.
                    }
                    SendOutcome::TimedOut => {
                        consecutive_timeouts += 1;
                        if consecutive_timeouts >= self.max_consecutive_write_timeouts {
                            return Some(CloseReason::WriteTimeoutBackpressure);
                        }
                    }
                }
            } else {
                let is_ping = matches!(env.msg, vc_types::OutboundFrame::PingPong { .. });
                let queue_delay_ms = self.clock.now_ms().saturating_sub(env.enqueued_at_ms);
                let raw = dumps_outbound(&env.msg);
                let deadline_ms = env.deadline_ms.unwrap_or(self.clock.now_ms() + self.write_timeout_ms);

                let sent = tokio::select! {
                    _ = self.sink.send(&raw) => true,
                    _ = self.clock.sleep_until_ms(deadline_ms) => false,
                };

                if sent {
                    consecutive_timeouts = 0;
                    if is_ping {
                        metrics
                            .lock()
                            .await
                            .observe(names::KEEPALIVE_PING_PONG_QUEUE_DELAY_MS, queue_delay_ms as i64);
                    }
                } else {
                    if is_ping {
                        metrics.lock().await.inc(names::WS_WRITE_TIMEOUT_TOTAL, 1);
                    }
                    consecutive_timeouts += 1;
                    if consecutive_timeouts >= self.max_consecutive_write_timeouts {
                        return Some(CloseReason::WriteTimeoutBackpressure);
                    }
                }
            }
        }
    }

    async fn send_speech(
        &self,
        env: Envelope,
        queue: &BoundedQueue<Envelope>,
        metrics: &Mutex<Metrics>,
    ) -> SendOutcome {
        let raw = dumps_outbound(&env.msg);
        let deadline_ms = env
            .deadline_ms
            .unwrap_or(self.clock.now_ms() + self.write_timeout_ms);
        let gate_at_send = self.gate.snapshot();

        tokio::select! {
            _ = self.sink.send(&raw) => SendOutcome::Sent,
            _ = self.clock.sleep_until_ms(deadline_ms) => {
                metrics.lock().await.inc(names::WS_WRITE_TIMEOUT_TOTAL, 1);
                SendOutcome::TimedOut
            }
            _ = self.gate.changed() => {
                metrics.lock().await.inc(names::OUTBOUND_STALE_DROPPED_TOTAL, 1);
                SendOutcome::Stale
            }
            _ = queue.wait_for_any(|e: &Envelope| e.is_control()) => {
                self.requeue_preempted(env, queue, &gate_at_send, metrics).await;
                SendOutcome::Preempted
            }
        }
    }

    async fn requeue_preempted(
        &self,
        env: Envelope,
        queue: &BoundedQueue<Envelope>,
        _gate_at_send: &vc_types::Gate,
        metrics: &Mutex<Metrics>,
    ) {
        let priority = env.priority;
        let accepted = queue
            .put(
                env,
                Some(&|other: &Envelope| {
                    if other.is_terminal_response() {
                        return false;
                    }
                    let gate_now = self.gate.snapshot();
                    let stale = !gate_now.matches(other.epoch, other.speak_gen);
                    stale || other.priority < priority
                }),
            )
            .await;
        if !accepted {
            metrics.lock().await.inc(names::OUTBOUND_QUEUE_EVICTIONS_TOTAL, 1);
        }
    }
}

enum SendOutcome {
    Sent,
    TimedOut,
    Stale,
    Preempted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as TokioMutex;
    use vc_clock::FakeClock;
    use vc_types::OutboundFrame;

    struct RecordingSink {
        sent: TokioMutex<Vec<String>>,
        delay_ms: u64,
        clock: Arc<FakeClock>,
    }

    #[async_trait]
    impl TransportSink for RecordingSink {
        async fn send(&self, raw: &str) {
            if self.delay_ms > 0 {
                self.clock.sleep_ms(self.delay_ms).await;
            }
            self.sent.lock().await.push(raw.to_string());
        }
    }

    fn ping_envelope(enqueued_at_ms: u64) -> Envelope {
        Envelope {
            msg: OutboundFrame::PingPong { timestamp: 1 },
            epoch: None,
            speak_gen: None,
            priority: vc_types::domain::priority::PING,
            plane: Plane::Control,
            enqueued_at_ms,
            deadline_ms: None,
        }
    }

    fn terminal_response(epoch: u64, speak_gen: u64) -> Envelope {
        Envelope {
            msg: OutboundFrame::Response {
                response_id: epoch,
                content: String::new(),
                content_complete: true,
                no_interruption_allowed: None,
                end_call: None,
                transfer_number: None,
                digit_to_press: None,
            },
            epoch: Some(epoch),
            speak_gen: Some(speak_gen),
            priority: vc_types::domain::priority::RESPONSE_TERMINAL,
            plane: Plane::Speech,
            enqueued_at_ms: 0,
            deadline_ms: None,
        }
    }

    #[tokio::test]
    async fn sends_control_frame_and_drains_on_close() {
        let clock = Arc::new(FakeClock::new(0));
        let gate = Arc::new(GateRef::new());
        let sink = Arc::new(RecordingSink { sent: TokioMutex::new(vec![]), delay_ms: 0, clock: clock.clone() });
        let writer = Writer::new(clock.clone(), gate, sink.clone(), 1_000, 3);
        let queue: BoundedQueue<Envelope> = BoundedQueue::new(4);
        queue.put(ping_envelope(0), None).await;
        queue.close().await;

        let metrics = TokioMutex::new(Metrics::new());
        let result = writer.run(&queue, &metrics).await;
        assert!(result.is_none());
        assert_eq!(sink.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn drops_stale_gate_mismatched_envelope() {
        let clock = Arc::new(FakeClock::new(0));
        let gate = Arc::new(GateRef::new());
        gate.set_epoch(5);
        let sink = Arc::new(RecordingSink { sent: TokioMutex::new(vec![]), delay_ms: 0, clock: clock.clone() });
        let writer = Writer::new(clock.clone(), gate, sink.clone(), 1_000, 3);
        let queue: BoundedQueue<Envelope> = BoundedQueue::new(4);
        queue.put(terminal_response(1, 0), None).await;
        queue.close().await;

        let metrics = TokioMutex::new(Metrics::new());
        writer.run(&queue, &metrics).await;
        assert_eq!(sink.sent.lock().await.len(), 0);
        assert_eq!(metrics.lock().await.get(names::OUTBOUND_STALE_DROPPED_TOTAL), 1);
    }

    #[tokio::test]
    async fn closes_session_after_consecutive_write_timeouts() {
        let clock = Arc::new(FakeClock::new(0));
        let gate = Arc::new(GateRef::new());
        let sink = Arc::new(RecordingSink { sent: TokioMutex::new(vec![]), delay_ms: 10_000, clock: clock.clone() });
        let writer = Arc::new(Writer::new(clock.clone(), gate, sink.clone(), 100, 2));
        let queue = Arc::new(BoundedQueue::<Envelope>::new(4));
        queue.put(ping_envelope(0), None).await;
        queue.put(ping_envelope(0), None).await;

        let metrics = Arc::new(TokioMutex::new(Metrics::new()));
        let task = tokio::spawn({
            let writer = writer.clone();
            let queue = queue.clone();
            let metrics = metrics.clone();
            async move { writer.run(&queue, &metrics).await }
        });

        tokio::task::yield_now().await;
        clock.advance(100).await;
        clock.advance(100).await;

        let result = task.await.unwrap();
        assert_eq!(result, Some(CloseReason::WriteTimeoutBackpressure));
    }
}
