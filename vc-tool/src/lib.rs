#![deny(missing_docs)]
//! Tool dispatch with absolute-deadline timeouts and latency-masking
//! fillers.
//!
//! [`ToolInvoker`] never touches the wire itself; it returns
//! [`ToolInvokerEvent`]s for the orchestrator to map onto outbound
//! envelopes, keeping tool execution decoupled from transport concerns.

pub mod error;

pub use error::ToolError;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use vc_clock::Clock;
use vc_types::{SessionId, ToolCallId, ToolCallRecord, ToolOutcome, ToolRequest};

/// Executes a single named tool call. Implementations are the pluggable
/// collaborator the core is indifferent to — business logic lives outside
/// this crate.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `name` with `arguments`, returning its result content.
    async fn call(&self, name: &str, arguments: &serde_json::Value) -> Result<String, ToolError>;
}

/// An observable effect produced while resolving one tool request. The
/// caller is responsible for turning these into wire frames.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvokerEvent {
    /// A tool call was dispatched (or matched from prefetch).
    Invocation {
        /// Correlates with the matching [`ToolInvokerEvent::Result`].
        tool_call_id: ToolCallId,
        /// Tool name.
        name: String,
        /// Canonical-JSON encoded arguments.
        arguments_json: String,
    },
    /// An interruptible latency-masking filler should be spoken.
    Filler {
        /// The in-flight tool call this filler is masking.
        tool_call_id: ToolCallId,
        /// 0-based filler index for this tool call.
        index: u32,
        /// The filler phrase text.
        phrase: String,
    },
    /// A tool call resolved, by completion, failure, or timeout.
    Result {
        /// Correlates with the originating [`ToolInvokerEvent::Invocation`].
        tool_call_id: ToolCallId,
        /// Result content, or the `tool_timeout` sentinel.
        content: String,
    },
}

const FILLER_PHRASES: &[&str] = &[
    "One moment while I check that for you.",
    "Still pulling that up, thanks for bearing with me.",
    "Almost there.",
];

fn filler_phrase(index: u32) -> &'static str {
    FILLER_PHRASES[(index as usize) % FILLER_PHRASES.len()]
}

/// Runs named tools with per-call absolute deadlines under a [`Clock`],
/// masking latency with bounded filler phrases. One invoker per session.
pub struct ToolInvoker {
    clock: Arc<dyn Clock>,
    executor: Arc<dyn ToolExecutor>,
    session_id: SessionId,
    tool_seq: AtomicU64,
    timeout_ms: u64,
    first_filler_delay_ms: u64,
    second_filler_delay_ms: u64,
    max_fillers_per_tool: u32,
}

impl ToolInvoker {
    /// Build an invoker for one session. `first_filler_delay_ms` and
    /// `second_filler_delay_ms` are both measured from the call's start,
    /// matching [`vc_types::SessionConfig`]'s fields of the same names.
    pub fn new(
        clock: Arc<dyn Clock>,
        executor: Arc<dyn ToolExecutor>,
        session_id: SessionId,
        timeout_ms: u64,
        first_filler_delay_ms: u64,
        second_filler_delay_ms: u64,
        max_fillers_per_tool: u32,
    ) -> Self {
        Self {
            clock,
            executor,
            session_id,
            tool_seq: AtomicU64::new(0),
            timeout_ms,
            first_filler_delay_ms,
            second_filler_delay_ms,
            max_fillers_per_tool,
        }
    }

    fn next_tool_call_id(&self) -> ToolCallId {
        let n = self.tool_seq.fetch_add(1, Ordering::Relaxed) + 1;
        ToolCallId::new(format!("{}:tool:{n}", self.session_id))
    }

    /// Resolve one tool request:
    ///
    /// 1. If `prefetch` matches `request`'s canonical key and completed OK,
    ///    emit invocation+result and skip execution.
    /// 2. Otherwise dispatch the executor under an absolute deadline
    ///    `started_at + timeout_ms`.
    /// 3. Race two filler deadlines against completion, emitting at most
    ///    `max_fillers_per_tool` interruptible fillers.
    /// 4. On completion, emit a result. On deadline, cancel and emit the
    ///    deterministic `tool_timeout` result.
    pub async fn invoke(
        &self,
        epoch: u64,
        request: ToolRequest,
        prefetch: Option<&ToolCallRecord>,
    ) -> (ToolCallRecord, Vec<ToolInvokerEvent>) {
        let mut events = Vec::new();
        let tool_call_id = self.next_tool_call_id();
        let started_at = self.clock.now_ms();
        let deadline_ms = started_at + self.timeout_ms;
        let canonical_key = request.canonical_key();

        events.push(ToolInvokerEvent::Invocation {
            tool_call_id: tool_call_id.clone(),
            name: request.name.clone(),
            arguments_json: vc_types::canon::canonical_json(&request.arguments),
        });

        if let Some(pre) = prefetch {
            if pre.canonical_key == canonical_key && pre.outcome == Some(ToolOutcome::Completed) {
                let mut record = ToolCallRecord::new(tool_call_id.clone(), epoch, request, deadline_ms);
                let content = pre.result.clone().unwrap_or_default();
                record.complete(content.clone());
                events.push(ToolInvokerEvent::Result { tool_call_id, content });
                return (record, events);
            }
        }

        let mut record = ToolCallRecord::new(tool_call_id.clone(), epoch, request, deadline_ms);
        let mut work = self.executor.call(&record.name, &record.arguments);

        let mut next_filler_at = (self.max_fillers_per_tool > 0)
            .then_some(started_at + self.first_filler_delay_ms);

        loop {
            let wake_at = next_filler_at.unwrap_or(deadline_ms).min(deadline_ms);
            tokio::select! {
                outcome = &mut work => {
                    let content = match outcome {
                        Ok(content) => { record.complete(content.clone()); content }
                        Err(err) => { let msg = err.to_string(); record.fail(msg.clone()); msg }
                    };
                    events.push(ToolInvokerEvent::Result { tool_call_id, content });
                    return (record, events);
                }
                _ = self.clock.sleep_until_ms(wake_at) => {
                    if self.clock.now_ms() >= deadline_ms {
                        record.time_out();
                        events.push(ToolInvokerEvent::Result {
                            tool_call_id,
                            content: "tool_timeout".to_string(),
                        });
                        return (record, events);
                    }

                    let index = record.fillers_emitted;
                    events.push(ToolInvokerEvent::Filler {
                        tool_call_id: tool_call_id.clone(),
                        index,
                        phrase: filler_phrase(index).to_string(),
                    });
                    record.fillers_emitted += 1;

                    next_filler_at = if record.fillers_emitted == 1 && self.max_fillers_per_tool > 1 {
                        Some(started_at + self.first_filler_delay_ms + self.second_filler_delay_ms)
                    } else {
                        None
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use vc_clock::FakeClock;

    struct ScriptedExecutor {
        clock: Arc<FakeClock>,
        ready_at_ms: u64,
        ok: bool,
        content: String,
        called: AtomicBool,
    }

    #[async_trait]
    impl ToolExecutor for ScriptedExecutor {
        async fn call(&self, name: &str, _arguments: &serde_json::Value) -> Result<String, ToolError> {
            self.called.store(true, AtomicOrdering::SeqCst);
            self.clock.sleep_until_ms(self.ready_at_ms).await;
            if self.ok {
                Ok(self.content.clone())
            } else {
                Err(ToolError::Failed {
                    name: name.to_string(),
                    message: self.content.clone(),
                })
            }
        }
    }

    fn request() -> ToolRequest {
        ToolRequest {
            name: "get_pricing".into(),
            arguments: json!({"zip": "90210"}),
        }
    }

    #[tokio::test]
    async fn completes_without_filler_when_fast() {
        let clock = Arc::new(FakeClock::new(0));
        let executor = Arc::new(ScriptedExecutor {
            clock: clock.clone(),
            ready_at_ms: 0,
            ok: true,
            content: "42".into(),
            called: AtomicBool::new(false),
        });
        let invoker = ToolInvoker::new(
            clock.clone(),
            executor,
            SessionId::new("s1"),
            8_000,
            1_200,
            3_500,
            2,
        );
        let (record, events) = invoker.invoke(1, request(), None).await;
        assert_eq!(record.outcome, Some(ToolOutcome::Completed));
        assert_eq!(record.result.as_deref(), Some("42"));
        assert_eq!(record.fillers_emitted, 0);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ToolInvokerEvent::Invocation { .. }));
        assert!(matches!(events[1], ToolInvokerEvent::Result { .. }));
    }

    #[tokio::test]
    async fn failed_tool_records_failure() {
        let clock = Arc::new(FakeClock::new(0));
        let executor = Arc::new(ScriptedExecutor {
            clock: clock.clone(),
            ready_at_ms: 0,
            ok: false,
            content: "boom".into(),
            called: AtomicBool::new(false),
        });
        let invoker = ToolInvoker::new(
            clock.clone(),
            executor,
            SessionId::new("s1"),
            8_000,
            1_200,
            3_500,
            2,
        );
        let (record, _events) = invoker.invoke(1, request(), None).await;
        assert_eq!(record.outcome, Some(ToolOutcome::Failed));
        assert!(record.result.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn prefetch_match_skips_execution() {
        let clock = Arc::new(FakeClock::new(0));
        let executor = Arc::new(ScriptedExecutor {
            clock: clock.clone(),
            ready_at_ms: 0,
            ok: true,
            content: "unused".into(),
            called: AtomicBool::new(false),
        });
        let invoker = ToolInvoker::new(
            clock.clone(),
            executor.clone(),
            SessionId::new("s1"),
            8_000,
            1_200,
            3_500,
            2,
        );
        let mut prefetched =
            ToolCallRecord::new(ToolCallId::new("s1:tool:0"), 1, request(), 8_000);
        prefetched.complete("prefetched-result".into());

        let (record, events) = invoker.invoke(1, request(), Some(&prefetched)).await;
        assert!(!executor.called.load(AtomicOrdering::SeqCst));
        assert_eq!(record.outcome, Some(ToolOutcome::Completed));
        assert_eq!(record.result.as_deref(), Some("prefetched-result"));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn times_out_when_executor_never_resolves() {
        let clock = Arc::new(FakeClock::new(0));
        let executor = Arc::new(ScriptedExecutor {
            clock: clock.clone(),
            ready_at_ms: 100_000,
            ok: true,
            content: "late".into(),
            called: AtomicBool::new(false),
        });
        let invoker = Arc::new(ToolInvoker::new(
            clock.clone(),
            executor,
            SessionId::new("s1"),
            1_000,
            10_000,
            10_000,
            0,
        ));
        let task = tokio::spawn({
            let invoker = invoker.clone();
            async move { invoker.invoke(1, request(), None).await }
        });
        tokio::task::yield_now().await;
        clock.advance(1_000).await;

        let (record, events) = task.await.unwrap();
        assert_eq!(record.outcome, Some(ToolOutcome::TimedOut));
        assert_eq!(record.result.as_deref(), Some("tool_timeout"));
        assert!(events
            .iter()
            .any(|e| matches!(e, ToolInvokerEvent::Result { content, .. } if content == "tool_timeout")));
    }

    #[tokio::test]
    async fn emits_filler_before_completion() {
        let clock = Arc::new(FakeClock::new(0));
        let executor = Arc::new(ScriptedExecutor {
            clock: clock.clone(),
            ready_at_ms: 2_000,
            ok: true,
            content: "done".into(),
            called: AtomicBool::new(false),
        });
        let invoker = Arc::new(ToolInvoker::new(
            clock.clone(),
            executor,
            SessionId::new("s1"),
            8_000,
            1_000,
            5_000,
            2,
        ));
        let task = tokio::spawn({
            let invoker = invoker.clone();
            async move { invoker.invoke(1, request(), None).await }
        });
        tokio::task::yield_now().await;
        clock.advance(1_000).await;
        clock.advance(1_000).await;

        let (record, events) = task.await.unwrap();
        assert_eq!(record.fillers_emitted, 1);
        assert_eq!(record.outcome, Some(ToolOutcome::Completed));
        assert!(events.iter().any(|e| matches!(e, ToolInvokerEvent::Filler { index: 0, .. })));
    }

    #[tokio::test]
    async fn caps_fillers_at_max_per_tool() {
        let clock = Arc::new(FakeClock::new(0));
        let executor = Arc::new(ScriptedExecutor {
            clock: clock.clone(),
            ready_at_ms: 7_000,
            ok: true,
            content: "done".into(),
            called: AtomicBool::new(false),
        });
        let invoker = Arc::new(ToolInvoker::new(
            clock.clone(),
            executor,
            SessionId::new("s1"),
            8_000,
            1_000,
            2_000,
            1,
        ));
        let task = tokio::spawn({
            let invoker = invoker.clone();
            async move { invoker.invoke(1, request(), None).await }
        });
        tokio::task::yield_now().await;
        clock.advance(1_000).await;
        clock.advance(6_000).await;

        let (record, events) = task.await.unwrap();
        assert_eq!(record.fillers_emitted, 1);
        let filler_count = events
            .iter()
            .filter(|e| matches!(e, ToolInvokerEvent::Filler { .. }))
            .count();
        assert_eq!(filler_count, 1);
    }
}
