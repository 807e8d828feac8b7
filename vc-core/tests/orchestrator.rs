//! End-to-end tests driving [`vc_core::Orchestrator::run`] against a
//! `FakeClock`, asserting on the two FSMs' observable effects rather than
//! internal state. `FakeClock` never advances on its own, so a hanging tool
//! call blocks forever unless the test forces the orchestrator's `select!`
//! to pick a different branch first — that's done with `yield_now()`,
//! mirroring the interleaving idiom in `gate.rs`'s own tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::yield_now;

use vc_clock::FakeClock;
use vc_core::{GateRef, Orchestrator, Speculator};
use vc_policy::{ActionType, DialogueAction, DialoguePolicy, SafetyAssessment};
use vc_queue::BoundedQueue;
use vc_tool::{ToolExecutor, ToolError, ToolInvoker};
use vc_trace::{metrics::names, Metrics, TraceSink};
use vc_types::{
    CallId, CloseReason, Envelope, InboundItem, SessionConfig, SessionId, SlotState,
    ToolRequest, TranscriptUtterance, UtteranceRole,
};

/// Never resolves. Stands in for a tool call that is in flight when the
/// orchestrator needs to move on to a new epoch.
struct HangingExecutor;

#[async_trait]
impl ToolExecutor for HangingExecutor {
    async fn call(&self, _name: &str, _arguments: &serde_json::Value) -> Result<String, ToolError> {
        std::future::pending().await
    }
}

/// Returns `Inform` with one tool request for every transcript, so every
/// `response_required` turn pushes an ACK then blocks on the hanging tool.
struct OneToolPolicy;

#[async_trait]
impl DialoguePolicy for OneToolPolicy {
    async fn decide_action(
        &self,
        _state: &SlotState,
        _transcript: &[String],
        _safety: &SafetyAssessment,
        _needs_apology: bool,
        _profile: &serde_json::Value,
    ) -> DialogueAction {
        let mut action = DialogueAction::new(ActionType::Inform, serde_json::json!({}));
        action.tool_requests = vec![ToolRequest {
            name: "lookup".to_string(),
            arguments: serde_json::json!({}),
        }];
        action
    }

    async fn evaluate_safety(&self, _text: &str) -> SafetyAssessment {
        SafetyAssessment::ok()
    }
}

fn utterance(text: &str) -> Vec<TranscriptUtterance> {
    vec![TranscriptUtterance {
        role: UtteranceRole::User,
        content: text.to_string(),
    }]
}

#[tokio::test]
async fn epoch_preemption_drops_stale_turn_output() {
    let clock = Arc::new(FakeClock::new(0));
    let gate = Arc::new(GateRef::new());
    let policy: Arc<dyn DialoguePolicy> = Arc::new(OneToolPolicy);
    let tool_invoker = Arc::new(ToolInvoker::new(
        clock.clone(),
        Arc::new(HangingExecutor),
        SessionId::new("sess-1"),
        8_000,
        1_200,
        3_500,
        2,
    ));
    let speculator = Arc::new(Speculator::new(policy.clone(), tool_invoker.clone()));
    let trace = Arc::new(TraceSink::new(2_048));
    let config = SessionConfig::default();

    let orchestrator = Orchestrator::new(
        SessionId::new("sess-1"),
        CallId::new("call-1"),
        config.clone(),
        clock,
        gate,
        policy,
        tool_invoker,
        speculator,
        trace,
    );

    let inbound: Arc<BoundedQueue<InboundItem>> =
        Arc::new(BoundedQueue::new(config.inbound_queue_capacity));
    let outbound: Arc<BoundedQueue<Envelope>> =
        Arc::new(BoundedQueue::new(config.outbound_queue_capacity));
    let metrics = Arc::new(Mutex::new(Metrics::new()));

    let run_handle = {
        let inbound = inbound.clone();
        let outbound = outbound.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            orchestrator
                .run(
                    inbound,
                    outbound,
                    metrics,
                    serde_json::json!({}),
                    serde_json::json!({}),
                    None,
                    None,
                )
                .await
        })
    };

    inbound
        .put(
            InboundItem::ResponseRequired { response_id: 1, transcript: utterance("hi") },
            None,
        )
        .await;
    // Let the orchestrator drain the item, spawn the turn task, and let
    // that task push the ACK SpeechPlan before blocking on the hanging
    // tool call.
    for _ in 0..4 {
        yield_now().await;
    }

    inbound
        .put(
            InboundItem::ResponseRequired { response_id: 2, transcript: utterance("still there") },
            None,
        )
        .await;
    for _ in 0..4 {
        yield_now().await;
    }

    inbound
        .put(InboundItem::TransportClosed(CloseReason::RemoteClosed), None)
        .await;

    let reason = tokio::time::timeout(std::time::Duration::from_secs(2), run_handle)
        .await
        .expect("orchestrator run did not terminate")
        .expect("run task panicked");
    assert_eq!(reason, CloseReason::RemoteClosed);

    let dropped = metrics.lock().await.get(names::OUTBOUND_STALE_DROPPED_TOTAL);
    assert!(
        dropped >= 1,
        "expected the stale ACK from epoch 1's turn_output to be counted as dropped, got {dropped}"
    );
}

#[tokio::test]
async fn barge_in_cancels_and_emits_bumped_terminal_response() {
    let clock = Arc::new(FakeClock::new(0));
    let gate = Arc::new(GateRef::new());
    let policy: Arc<dyn DialoguePolicy> = Arc::new(OneToolPolicy);
    let tool_invoker = Arc::new(ToolInvoker::new(
        clock.clone(),
        Arc::new(HangingExecutor),
        SessionId::new("sess-2"),
        8_000,
        1_200,
        3_500,
        2,
    ));
    let speculator = Arc::new(Speculator::new(policy.clone(), tool_invoker.clone()));
    let trace = Arc::new(TraceSink::new(2_048));
    let config = SessionConfig::default();

    let orchestrator = Orchestrator::new(
        SessionId::new("sess-2"),
        CallId::new("call-2"),
        config.clone(),
        clock,
        gate,
        policy,
        tool_invoker,
        speculator,
        trace,
    );

    let inbound: Arc<BoundedQueue<InboundItem>> =
        Arc::new(BoundedQueue::new(config.inbound_queue_capacity));
    let outbound: Arc<BoundedQueue<Envelope>> =
        Arc::new(BoundedQueue::new(config.outbound_queue_capacity));
    let metrics = Arc::new(Mutex::new(Metrics::new()));

    let run_handle = {
        let inbound = inbound.clone();
        let outbound = outbound.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            orchestrator
                .run(
                    inbound,
                    outbound,
                    metrics,
                    serde_json::json!({}),
                    serde_json::json!({}),
                    None,
                    None,
                )
                .await
        })
    };

    inbound
        .put(
            InboundItem::ResponseRequired { response_id: 1, transcript: utterance("hello") },
            None,
        )
        .await;
    // Drain through: inbound processed, turn task spawned, ACK pushed to
    // turn_output, ACK popped and handled (conv_state -> Speaking, ACK
    // envelope enqueued, segment_emitted_this_epoch -> true), then the
    // turn task blocks forever on the hanging tool.
    for _ in 0..6 {
        yield_now().await;
    }

    inbound.put(InboundItem::Clear, None).await;
    for _ in 0..4 {
        yield_now().await;
    }

    inbound
        .put(InboundItem::TransportClosed(CloseReason::RemoteClosed), None)
        .await;

    let reason = tokio::time::timeout(std::time::Duration::from_secs(2), run_handle)
        .await
        .expect("orchestrator run did not terminate")
        .expect("run task panicked");
    assert_eq!(reason, CloseReason::RemoteClosed);

    let terminal_bumped = {
        let mut found = false;
        while let Ok(env) = outbound.get().await {
            if let vc_types::OutboundFrame::Response {
                response_id,
                content,
                content_complete,
                ..
            } = &env.msg
            {
                if *response_id == 1
                    && *content_complete
                    && content.is_empty()
                    && env.speak_gen == Some(1)
                {
                    found = true;
                }
            }
        }
        found
    };
    assert!(
        terminal_bumped,
        "expected a bumped-speak_gen empty terminal response for epoch 1 after barge-in"
    );

    let dropped = metrics.lock().await.get(names::OUTBOUND_STALE_DROPPED_TOTAL);
    assert!(dropped >= 1, "expected the stale ACK envelope to be swept on barge-in, got {dropped}");

    let cancel_latencies = metrics.lock().await.get_hist(names::BARGE_IN_CANCEL_LATENCY_MS);
    assert!(!cancel_latencies.is_empty(), "expected a barge-in cancel latency sample");
}
