//! Orchestrator: the per-session actor owning the gate, slot state,
//! transcript window, and both FSMs.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vc_clock::Clock;
use vc_policy::{ActionType, DialogueAction, DialoguePolicy};
use vc_queue::BoundedQueue;
use vc_tool::ToolInvoker;
use vc_trace::trace::{TraceEventInput, TraceSink};
use vc_trace::{metrics::names, Metrics};
use vc_types::{
    domain::priority, CallId, CloseReason, Envelope, Gate, InboundItem, Plane, SessionConfig,
    SessionId, SlotBackup, SlotState, SpeechPlan, ToolCallRecord, TranscriptUtterance,
    TurnTaking, UtteranceRole,
};

use crate::gate::GateRef;
use crate::speculator::Speculator;
use crate::turn::{TurnHandler, TurnOutput};

/// Conversation FSM. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConvState {
    Listening,
    Processing,
    Speaking,
    Ended,
}

impl ConvState {
    fn label(self) -> &'static str {
        match self {
            ConvState::Listening => "listening",
            ConvState::Processing => "processing",
            ConvState::Speaking => "speaking",
            ConvState::Ended => "ended",
        }
    }
}

/// Transport FSM label recorded alongside every trace event. The core does
/// not own the transport itself; this only tracks the label the
/// orchestrator believes is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WsState {
    Open,
    Closing,
    Closed,
}

impl WsState {
    fn label(self) -> &'static str {
        match self {
            WsState::Open => "open",
            WsState::Closing => "closing",
            WsState::Closed => "closed",
        }
    }
}

/// Bookkeeping kept for the epoch a [`TurnHandler`] is currently running,
/// used to fill in fields `TurnOutput::Complete` doesn't carry.
struct ActiveTurn {
    epoch: u64,
    transfer_number: Option<String>,
    digit_to_press: Option<String>,
}

fn render_transcript(transcript: &[TranscriptUtterance]) -> Vec<String> {
    transcript
        .iter()
        .map(|u| {
            let role = match u.role {
                UtteranceRole::User => "user",
                UtteranceRole::Agent => "agent",
            };
            format!("{role}: {}", u.content)
        })
        .collect()
}

fn last_user_utterance(transcript: &[TranscriptUtterance]) -> Option<&str> {
    transcript
        .iter()
        .rev()
        .find(|u| u.role == UtteranceRole::User)
        .map(|u| u.content.as_str())
}

const LOW_SIGNAL_FRAGMENTS: &[&str] = &["ok", "okay", "yeah", "yep", "uh", "um", "mm-hm", "mhm"];

fn is_low_signal(utterance: &str) -> bool {
    let trimmed = utterance.trim();
    if trimmed.is_empty() {
        return true;
    }
    LOW_SIGNAL_FRAGMENTS.contains(&trimmed.to_lowercase().as_str())
}

/// Builds an outbound response envelope for `epoch`, inheriting the current
/// gate's `speak_gen`.
fn response_envelope(
    clock: &dyn Clock,
    gate_speak_gen: u64,
    epoch: u64,
    content: String,
    content_complete: bool,
    end_call: Option<bool>,
    transfer_number: Option<String>,
    digit_to_press: Option<String>,
) -> Envelope {
    let prio = if content_complete {
        priority::RESPONSE_TERMINAL
    } else {
        priority::RESPONSE_NON_TERMINAL
    };
    Envelope {
        msg: vc_types::OutboundFrame::Response {
            response_id: epoch,
            content,
            content_complete,
            no_interruption_allowed: None,
            end_call,
            transfer_number,
            digit_to_press,
        },
        epoch: Some(epoch),
        speak_gen: Some(gate_speak_gen),
        priority: prio,
        plane: Plane::Speech,
        enqueued_at_ms: clock.now_ms(),
        deadline_ms: None,
    }
}

/// Eviction predicate for a full outbound queue: never evict terminal
/// response frames; prefer evicting gate-stale envelopes;
/// control frames are never evicted to make room for speech; otherwise
/// prefer evicting the lower-priority item.
fn outbound_evict_predicate<'a>(
    gate: &'a Gate,
    new_priority: i32,
) -> impl Fn(&Envelope) -> bool + 'a {
    move |e: &Envelope| {
        if e.is_terminal_response() {
            return false;
        }
        if !gate.matches(e.epoch, e.speak_gen) {
            return true;
        }
        if e.plane == Plane::Control {
            return false;
        }
        e.priority < new_priority
    }
}

async fn enqueue(
    outbound: &BoundedQueue<Envelope>,
    gate: &Gate,
    env: Envelope,
    metrics: &Mutex<Metrics>,
) {
    let priority = env.priority;
    if !outbound
        .put(env, Some(&outbound_evict_predicate(gate, priority)))
        .await
    {
        metrics.lock().await.inc(names::OUTBOUND_QUEUE_EVICTIONS_TOTAL, 1);
    }
}

/// Owns one call's mutable session state: the gate, the slot state, the
/// transcript window, and both FSMs. Constructed once per call; `run`
/// drives its main loop until the transport closes or the call ends.
pub struct Orchestrator {
    session_id: SessionId,
    call_id: CallId,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    gate: Arc<GateRef>,
    policy: Arc<dyn DialoguePolicy>,
    tool_invoker: Arc<ToolInvoker>,
    speculator: Arc<Speculator>,
    trace: Arc<TraceSink>,
}

impl Orchestrator {
    /// Build an orchestrator for one call.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        call_id: CallId,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        gate: Arc<GateRef>,
        policy: Arc<dyn DialoguePolicy>,
        tool_invoker: Arc<ToolInvoker>,
        speculator: Arc<Speculator>,
        trace: Arc<TraceSink>,
    ) -> Self {
        Self {
            session_id,
            call_id,
            config,
            clock,
            gate,
            policy,
            tool_invoker,
            speculator,
            trace,
        }
    }

    async fn trace_event(
        &self,
        conv_state: ConvState,
        ws_state: WsState,
        turn_id: u64,
        epoch: u64,
        event_type: &str,
        payload: &serde_json::Value,
        segment_hash: Option<String>,
    ) {
        self.trace
            .emit(TraceEventInput {
                t_ms: self.clock.now_ms(),
                session_id: self.session_id.as_str(),
                call_id: self.call_id.as_str(),
                turn_id,
                epoch,
                ws_state: ws_state.label(),
                conv_state: conv_state.label(),
                event_type,
                payload,
                segment_hash,
            })
            .await;
    }

    /// Run the startup sequence and main loop. Returns the reason the
    /// session ended.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        inbound: Arc<BoundedQueue<InboundItem>>,
        outbound: Arc<BoundedQueue<Envelope>>,
        metrics: Arc<Mutex<Metrics>>,
        profile: serde_json::Value,
        platform_config: serde_json::Value,
        agent_config: Option<serde_json::Value>,
        opening: Option<SpeechPlan>,
    ) -> CloseReason {
        let mut conv_state = ConvState::Listening;
        let ws_state = WsState::Open;
        let mut current_epoch: u64 = 0;
        let mut needs_apology = false;
        let mut disclosure_given = false;
        let mut slot_state = SlotState::default();
        let mut backup: Option<SlotBackup> = Some(SlotBackup::capture(0, &slot_state));
        let mut transcript: Vec<String> = Vec::new();
        let mut segment_emitted_this_epoch = false;
        let mut turn_task: Option<JoinHandle<()>> = None;
        let mut turn_output: Option<Arc<BoundedQueue<TurnOutput>>> = None;
        let mut active_turn: Option<ActiveTurn> = None;
        let mut speculative_task: Option<JoinHandle<()>> = None;

        enqueue(
            &outbound,
            &self.gate.snapshot(),
            Envelope {
                msg: vc_types::OutboundFrame::Config { config: platform_config },
                epoch: None,
                speak_gen: None,
                priority: priority::CONFIG,
                plane: Plane::Control,
                enqueued_at_ms: self.clock.now_ms(),
                deadline_ms: None,
            },
            &metrics,
        )
        .await;
        if let Some(agent_config) = agent_config {
            enqueue(
                &outbound,
                &self.gate.snapshot(),
                Envelope {
                    msg: vc_types::OutboundFrame::UpdateAgent { agent_config },
                    epoch: None,
                    speak_gen: None,
                    priority: priority::UPDATE_AGENT,
                    plane: Plane::Control,
                    enqueued_at_ms: self.clock.now_ms(),
                    deadline_ms: None,
                },
                &metrics,
            )
            .await;
        }

        let ping_task = spawn_ping_task(
            self.clock.clone(),
            outbound.clone(),
            self.gate.clone(),
            self.config.ping_interval_ms,
            self.config.write_timeout_ms,
        );

        if let Some(plan) = opening {
            disclosure_given = plan.disclosure_included;
            self.emit_plan(&outbound, &self.gate.snapshot(), plan, &metrics).await;
        }
        enqueue(
            &outbound,
            &self.gate.snapshot(),
            response_envelope(self.clock.as_ref(), 0, 0, String::new(), true, None, None, None),
            &metrics,
        )
        .await;

        let mut last_activity_ms = self.clock.now_ms();

        let close_reason = loop {
            let idle_deadline = last_activity_ms + self.config.idle_watchdog_ms;

            tokio::select! {
                biased;

                inbound_result = inbound.get_prefer(InboundItem::is_control_inbound) => {
                    match inbound_result {
                        Ok(InboundItem::TransportClosed(reason)) => {
                            break reason;
                        }
                        Ok(item) => {
                            last_activity_ms = self.clock.now_ms();
                            self.handle_inbound(
                                item,
                                &outbound,
                                &metrics,
                                &mut conv_state,
                                ws_state,
                                &mut current_epoch,
                                &mut needs_apology,
                                &mut disclosure_given,
                                &mut slot_state,
                                &mut backup,
                                &mut transcript,
                                &mut segment_emitted_this_epoch,
                                &mut turn_task,
                                &mut turn_output,
                                &mut active_turn,
                                &mut speculative_task,
                                &profile,
                            )
                            .await;
                            if conv_state == ConvState::Ended {
                                break CloseReason::RemoteClosed;
                            }
                        }
                        Err(_) => break CloseReason::RemoteClosed,
                    }
                }

                _ = async {
                    if let Some(h) = speculative_task.as_mut() { let _ = h.await; }
                }, if speculative_task.is_some() => {
                    speculative_task = None;
                }

                turn_item = async {
                    match turn_output.as_ref() {
                        Some(q) => q.get().await,
                        None => std::future::pending().await,
                    }
                }, if turn_output.is_some() => {
                    match turn_item {
                        Ok(out) => {
                            self.handle_turn_output(
                                out,
                                &outbound,
                                &metrics,
                                &mut conv_state,
                                current_epoch,
                                &mut segment_emitted_this_epoch,
                                &mut backup,
                                &mut active_turn,
                            )
                            .await;
                        }
                        Err(_) => {
                            turn_output = None;
                            turn_task = None;
                            if conv_state == ConvState::Speaking {
                                conv_state = ConvState::Listening;
                            }
                        }
                    }
                }

                _ = self.clock.sleep_until_ms(idle_deadline) => {
                    warn!(session_id = %self.session_id, "idle watchdog fired");
                    self.trace_event(
                        conv_state,
                        ws_state,
                        0,
                        current_epoch,
                        "idle_watchdog",
                        &serde_json::json!({}),
                        None,
                    )
                    .await;
                    last_activity_ms = self.clock.now_ms();
                }
            }
        };

        info!(session_id = %self.session_id, %close_reason, "session ending");
        if let Some(task) = turn_task.take() {
            task.abort();
        }
        if let Some(task) = speculative_task.take() {
            task.abort();
        }
        ping_task.abort();
        inbound.close().await;
        outbound.close().await;
        self.trace_event(
            ConvState::Ended,
            WsState::Closed,
            0,
            current_epoch,
            "session_closed",
            &serde_json::json!({"reason": close_reason.to_string()}),
            None,
        )
        .await;
        close_reason
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_inbound(
        &self,
        item: InboundItem,
        outbound: &Arc<BoundedQueue<Envelope>>,
        metrics: &Arc<Mutex<Metrics>>,
        conv_state: &mut ConvState,
        ws_state: WsState,
        current_epoch: &mut u64,
        needs_apology: &mut bool,
        disclosure_given: &mut bool,
        slot_state: &mut SlotState,
        backup: &mut Option<SlotBackup>,
        transcript: &mut Vec<String>,
        segment_emitted_this_epoch: &mut bool,
        turn_task: &mut Option<JoinHandle<()>>,
        turn_output: &mut Option<Arc<BoundedQueue<TurnOutput>>>,
        active_turn: &mut Option<ActiveTurn>,
        speculative_task: &mut Option<JoinHandle<()>>,
        profile: &serde_json::Value,
    ) {
        match item {
            InboundItem::Ping { timestamp } => {
                enqueue(
                    outbound,
                    &self.gate.snapshot(),
                    Envelope {
                        msg: vc_types::OutboundFrame::PingPong { timestamp },
                        epoch: None,
                        speak_gen: None,
                        priority: priority::PING,
                        plane: Plane::Control,
                        enqueued_at_ms: self.clock.now_ms(),
                        deadline_ms: Some(self.clock.now_ms() + self.config.write_timeout_ms),
                    },
                    metrics,
                )
                .await;
            }
            InboundItem::CallDetails { call } => {
                self.trace_event(*conv_state, ws_state, 0, *current_epoch, "call_details", &call, None)
                    .await;
            }
            InboundItem::TranscriptUpdate { transcript: utterances, turntaking } => {
                if turntaking == Some(TurnTaking::UserTurn) {
                    self.barge_in(
                        outbound,
                        metrics,
                        conv_state,
                        *current_epoch,
                        segment_emitted_this_epoch,
                        backup,
                        slot_state,
                        turn_task,
                        turn_output,
                        needs_apology,
                    )
                    .await;

                    let window = render_transcript(&utterances);
                    if let Some(task) = speculative_task.take() {
                        task.abort();
                    }
                    let safety = self
                        .policy
                        .evaluate_safety(last_user_utterance(&utterances).unwrap_or(""))
                        .await;
                    let speculator = self.speculator.clone();
                    let epoch = *current_epoch;
                    let state_copy = slot_state.clone();
                    let profile_copy = profile.clone();
                    *speculative_task = Some(tokio::spawn(async move {
                        speculator
                            .speculate(epoch, window, state_copy, safety, profile_copy)
                            .await;
                    }));
                }
            }
            InboundItem::Clear => {
                self.barge_in(
                    outbound,
                    metrics,
                    conv_state,
                    *current_epoch,
                    segment_emitted_this_epoch,
                    backup,
                    slot_state,
                    turn_task,
                    turn_output,
                    needs_apology,
                )
                .await;
            }
            InboundItem::ResponseRequired { response_id, transcript: utterances } => {
                self.start_turn(
                    response_id,
                    utterances,
                    false,
                    outbound,
                    metrics,
                    conv_state,
                    current_epoch,
                    needs_apology,
                    disclosure_given,
                    slot_state,
                    backup,
                    transcript,
                    segment_emitted_this_epoch,
                    turn_task,
                    turn_output,
                    active_turn,
                    speculative_task,
                    profile,
                )
                .await;
            }
            InboundItem::ReminderRequired { response_id, transcript: utterances } => {
                self.start_turn(
                    response_id,
                    utterances,
                    true,
                    outbound,
                    metrics,
                    conv_state,
                    current_epoch,
                    needs_apology,
                    disclosure_given,
                    slot_state,
                    backup,
                    transcript,
                    segment_emitted_this_epoch,
                    turn_task,
                    turn_output,
                    active_turn,
                    speculative_task,
                    profile,
                )
                .await;
            }
            InboundItem::TransportClosed(_) => unreachable!("handled by caller"),
        }
    }

    /// Barge-in cancellation: the caller started speaking over an in-flight
    /// turn.
    #[allow(clippy::too_many_arguments)]
    async fn barge_in(
        &self,
        outbound: &Arc<BoundedQueue<Envelope>>,
        metrics: &Arc<Mutex<Metrics>>,
        conv_state: &mut ConvState,
        current_epoch: u64,
        segment_emitted_this_epoch: &mut bool,
        backup: &mut Option<SlotBackup>,
        slot_state: &mut SlotState,
        turn_task: &mut Option<JoinHandle<()>>,
        turn_output: &mut Option<Arc<BoundedQueue<TurnOutput>>>,
        needs_apology: &mut bool,
    ) {
        let trigger_ms = self.clock.now_ms();

        let speaking_or_queued = *conv_state == ConvState::Speaking
            || outbound
                .any_where(|e: &Envelope| {
                    matches!(
                        &e.msg,
                        vc_types::OutboundFrame::Response { response_id, content_complete: false, .. }
                            if *response_id == current_epoch
                    )
                })
                .await;
        if !speaking_or_queued {
            return;
        }

        let new_gen = self.gate.bump_speak_gen();
        let gate_now = self.gate.snapshot();
        let dropped = outbound
            .drop_where(|e: &Envelope| !gate_now.matches(e.epoch, e.speak_gen) && !e.is_terminal_response())
            .await;
        if dropped > 0 {
            metrics.lock().await.inc(names::OUTBOUND_STALE_DROPPED_TOTAL, dropped as i64);
        }

        if !*segment_emitted_this_epoch {
            if let Some(b) = backup.as_ref() {
                if b.epoch() == current_epoch {
                    b.restore_into(slot_state);
                }
            }
        }

        if let Some(task) = turn_task.take() {
            task.abort();
        }
        if let Some(q) = turn_output.take() {
            let remaining = q.len().await;
            if remaining > 0 {
                metrics.lock().await.inc(names::OUTBOUND_STALE_DROPPED_TOTAL, remaining as i64);
            }
        }

        debug!(epoch = current_epoch, speak_gen = new_gen, "barge-in cancel");
        enqueue(
            outbound,
            &gate_now,
            response_envelope(
                self.clock.as_ref(),
                new_gen,
                current_epoch,
                String::new(),
                true,
                None,
                None,
                None,
            ),
            metrics,
        )
        .await;

        *conv_state = ConvState::Listening;
        *needs_apology = true;
        metrics
            .lock()
            .await
            .observe(names::BARGE_IN_CANCEL_LATENCY_MS, self.clock.now_ms().saturating_sub(trigger_ms) as i64);
    }

    /// Start a turn for `response_id`.
    #[allow(clippy::too_many_arguments)]
    async fn start_turn(
        &self,
        response_id: u64,
        utterances: Vec<TranscriptUtterance>,
        is_reminder: bool,
        outbound: &Arc<BoundedQueue<Envelope>>,
        metrics: &Arc<Mutex<Metrics>>,
        conv_state: &mut ConvState,
        current_epoch: &mut u64,
        needs_apology: &mut bool,
        disclosure_given: &mut bool,
        slot_state: &mut SlotState,
        backup: &mut Option<SlotBackup>,
        transcript: &mut Vec<String>,
        segment_emitted_this_epoch: &mut bool,
        turn_task: &mut Option<JoinHandle<()>>,
        turn_output: &mut Option<Arc<BoundedQueue<TurnOutput>>>,
        active_turn: &mut Option<ActiveTurn>,
        speculative_task: &mut Option<JoinHandle<()>>,
        profile: &serde_json::Value,
    ) {
        let turn_started_at_ms = self.clock.now_ms();
        let old_epoch = *current_epoch;

        if let Some(task) = speculative_task.take() {
            task.abort();
        }

        if response_id != old_epoch {
            if !*segment_emitted_this_epoch {
                if let Some(b) = backup.as_ref() {
                    if b.epoch() == old_epoch {
                        b.restore_into(slot_state);
                    }
                }
            }
        }

        *current_epoch = response_id;
        self.gate.set_epoch(response_id);
        *segment_emitted_this_epoch = false;
        *backup = Some(SlotBackup::capture(response_id, slot_state));

        if let Some(task) = turn_task.take() {
            task.abort();
        }
        if let Some(q) = turn_output.take() {
            let remaining = q.len().await;
            if remaining > 0 {
                metrics.lock().await.inc(names::OUTBOUND_STALE_DROPPED_TOTAL, remaining as i64);
            }
        }
        let gate_now = self.gate.snapshot();
        let dropped = outbound
            .drop_where(|e: &Envelope| e.epoch.is_some_and(|ep| ep != response_id))
            .await;
        if dropped > 0 {
            metrics.lock().await.inc(names::OUTBOUND_STALE_DROPPED_TOTAL, dropped as i64);
        }

        let new_transcript = render_transcript(&utterances);
        let no_new_utterance = is_reminder && new_transcript == *transcript;
        *transcript = new_transcript.clone();

        let safety = self
            .policy
            .evaluate_safety(last_user_utterance(&utterances).unwrap_or(""))
            .await;

        let spec_hit = self.speculator.take_if_matches(&new_transcript).await;
        if spec_hit.is_some() {
            metrics.lock().await.inc(names::SPECULATIVE_HIT_TOTAL, 1);
        } else {
            metrics.lock().await.inc(names::SPECULATIVE_MISS_TOTAL, 1);
        }

        let (action, prefetched): (DialogueAction, Vec<ToolCallRecord>) = match spec_hit {
            Some(hit) => (hit.action, hit.tool_records),
            None => (
                self.policy
                    .decide_action(slot_state, &new_transcript, &safety, *needs_apology, profile)
                    .await,
                Vec::new(),
            ),
        };

        let low_signal = self.config.low_signal_turn_suppression
            && last_user_utterance(&utterances).is_some_and(is_low_signal);

        if no_new_utterance || low_signal || action.action_type == ActionType::Noop {
            enqueue(
                outbound,
                &gate_now,
                response_envelope(self.clock.as_ref(), gate_now.speak_gen, response_id, String::new(), true, None, None, None),
                metrics,
            )
            .await;
            *conv_state = ConvState::Listening;
            return;
        }

        let transfer_number = action
            .payload
            .get("transfer_number")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let digit_to_press = action
            .payload
            .get("digit_to_press")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        *active_turn = Some(ActiveTurn { epoch: response_id, transfer_number, digit_to_press });

        let disclosure_included = !*disclosure_given;
        *disclosure_given = true;
        let skip_ack = is_reminder;

        let handler = Arc::new(TurnHandler::new(
            self.tool_invoker.clone(),
            self.session_id.clone(),
            self.call_id.clone(),
            self.config.ack_budget_ms,
            self.config.markup_mode,
            self.config.dash_pause_scope,
        ));
        let output: Arc<BoundedQueue<TurnOutput>> = Arc::new(BoundedQueue::new(self.config.outbound_queue_capacity));
        *turn_output = Some(output.clone());

        let clock = self.clock.clone();
        let metrics_for_task = metrics.clone();
        let epoch = response_id;
        *turn_task = Some(tokio::spawn(async move {
            handler
                .run(
                    epoch,
                    turn_started_at_ms,
                    clock.as_ref(),
                    action,
                    skip_ack,
                    disclosure_included,
                    &prefetched,
                    &metrics_for_task,
                    &output,
                )
                .await;
        }));
        *conv_state = ConvState::Processing;
    }

    async fn handle_turn_output(
        &self,
        output: TurnOutput,
        outbound: &Arc<BoundedQueue<Envelope>>,
        metrics: &Arc<Mutex<Metrics>>,
        conv_state: &mut ConvState,
        current_epoch: u64,
        segment_emitted_this_epoch: &mut bool,
        backup: &mut Option<SlotBackup>,
        active_turn: &mut Option<ActiveTurn>,
    ) {
        let gate_now = self.gate.snapshot();
        match output {
            TurnOutput::SpeechPlan(plan) => {
                *segment_emitted_this_epoch = true;
                *conv_state = ConvState::Speaking;
                self.emit_plan(outbound, &gate_now, plan, metrics).await;
            }
            TurnOutput::ToolInvocation { tool_call_id, name, arguments_json } => {
                enqueue(
                    outbound,
                    &gate_now,
                    Envelope {
                        msg: vc_types::OutboundFrame::ToolCallInvocation {
                            tool_call_id: tool_call_id.to_string(),
                            name,
                            arguments: arguments_json,
                        },
                        epoch: Some(current_epoch),
                        speak_gen: Some(gate_now.speak_gen),
                        priority: priority::TOOL_WEAVING,
                        plane: Plane::Speech,
                        enqueued_at_ms: self.clock.now_ms(),
                        deadline_ms: None,
                    },
                    metrics,
                )
                .await;
            }
            TurnOutput::ToolResult { tool_call_id, content } => {
                enqueue(
                    outbound,
                    &gate_now,
                    Envelope {
                        msg: vc_types::OutboundFrame::ToolCallResult {
                            tool_call_id: tool_call_id.to_string(),
                            content,
                        },
                        epoch: Some(current_epoch),
                        speak_gen: Some(gate_now.speak_gen),
                        priority: priority::TOOL_WEAVING,
                        plane: Plane::Speech,
                        enqueued_at_ms: self.clock.now_ms(),
                        deadline_ms: None,
                    },
                    metrics,
                )
                .await;
            }
            TurnOutput::Complete { epoch, end_call } => {
                if *segment_emitted_this_epoch {
                    if let Some(b) = backup.as_ref() {
                        if b.epoch() == epoch {
                            *backup = None;
                        }
                    }
                }
                let (transfer_number, digit_to_press) = match active_turn.take() {
                    Some(t) if t.epoch == epoch => (t.transfer_number, t.digit_to_press),
                    _ => (None, None),
                };
                enqueue(
                    outbound,
                    &gate_now,
                    response_envelope(
                        self.clock.as_ref(),
                        gate_now.speak_gen,
                        epoch,
                        String::new(),
                        true,
                        Some(end_call),
                        transfer_number,
                        digit_to_press,
                    ),
                    metrics,
                )
                .await;
                *conv_state = if end_call { ConvState::Ended } else { ConvState::Listening };
            }
        }
    }

    async fn emit_plan(
        &self,
        outbound: &Arc<BoundedQueue<Envelope>>,
        gate_now: &Gate,
        plan: SpeechPlan,
        metrics: &Arc<Mutex<Metrics>>,
    ) {
        metrics.lock().await.observe(names::SEGMENT_COUNT_PER_TURN, plan.segments.len() as i64);
        for segment in plan.segments {
            metrics.lock().await.observe(names::SEGMENT_EXPECTED_DURATION_MS, segment.expected_ms as i64);
            let segment_hash = segment.segment_hash(plan.epoch, plan.turn_id);
            self.trace_event(
                ConvState::Speaking,
                WsState::Open,
                plan.turn_id,
                plan.epoch,
                "segment_emitted",
                &serde_json::json!({"plan_id": plan.plan_id, "purpose": segment.purpose}),
                Some(segment_hash),
            )
            .await;
            enqueue(
                outbound,
                gate_now,
                response_envelope(
                    self.clock.as_ref(),
                    gate_now.speak_gen,
                    plan.epoch,
                    segment.rendered_text,
                    false,
                    None,
                    None,
                    None,
                ),
                metrics,
            )
            .await;
        }
    }
}

fn spawn_ping_task(
    clock: Arc<dyn Clock>,
    outbound: Arc<BoundedQueue<Envelope>>,
    gate: Arc<GateRef>,
    interval_ms: u64,
    write_timeout_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timestamp: i64 = 0;
        loop {
            clock.sleep_ms(interval_ms).await;
            timestamp += 1;
            let env = Envelope {
                msg: vc_types::OutboundFrame::PingPong { timestamp },
                epoch: None,
                speak_gen: None,
                priority: priority::PING,
                plane: Plane::Control,
                enqueued_at_ms: clock.now_ms(),
                deadline_ms: Some(clock.now_ms() + write_timeout_ms),
            };
            let gate_now = gate.snapshot();
            if !outbound
                .put(env, Some(&outbound_evict_predicate(&gate_now, priority::PING)))
                .await
            {
                break;
            }
        }
    })
}
