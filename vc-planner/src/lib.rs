//! Deterministic text-to-speech-segment planner. The single entry point,
//! [`micro_chunk_text`], is a pure function: same input, same output, on
//! every run and every machine — the orchestrator relies on this for
//! trace replay to produce identical digests.

use std::collections::{HashMap, VecDeque};
use std::sync::{LazyLock, Mutex};

use regex::Regex;
use vc_types::speech::{
    DashPauseScope, MarkupMode, ProtectedSpan, ProtectedSpanKind, SegmentPurpose, SpeechPlan,
    SpeechSegment,
};
use vc_types::{PlanReason, SessionId};
use vc_trace::metrics::{names, Metrics};

/// All parameters to [`micro_chunk_text`]. Cheap to construct per call; the
/// planner does not hold onto one across calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MicroChunkInput {
    /// Raw text to chunk.
    pub text: String,
    /// Per-segment expected-duration budget, in milliseconds.
    pub max_expected_ms: u64,
    /// Pacing constant used to estimate spoken duration from character
    /// count.
    pub pace_ms_per_char: u64,
    /// What role the resulting segments play.
    pub purpose: SegmentPurpose,
    /// Whether the resulting segments may be interrupted.
    pub interruptible: bool,
    /// Whether the resulting segments assert a fact requiring tool
    /// evidence.
    pub requires_tool_evidence: bool,
    /// Tool call ids grounding the asserted fact, if any.
    pub tool_evidence_ids: Vec<String>,
    /// Cumulative-duration budget after which a monologue check-in segment
    /// is inserted. Only applies to [`SegmentPurpose::Content`].
    pub max_monologue_expected_ms: Option<u64>,
    /// How trailing pauses are rendered.
    pub markup_mode: MarkupMode,
    /// Milliseconds represented by one dash-pause unit.
    pub dash_pause_unit_ms: u64,
    /// Milliseconds represented by one digit-pause unit, used when reading
    /// protected spans slowly.
    pub digit_dash_pause_unit_ms: u64,
    /// Where dash-pause markup applies.
    pub dash_pause_scope: DashPauseScope,
    /// Whether the final segment also carries a trailing pause (set by
    /// streaming callers that know more text is still coming).
    pub include_trailing_pause: bool,
}

impl MicroChunkInput {
    /// Construct an input with the planner's conventional defaults,
    /// overriding only `text` and `purpose`.
    pub fn new(text: impl Into<String>, purpose: SegmentPurpose) -> Self {
        Self {
            text: text.into(),
            max_expected_ms: 1_800,
            pace_ms_per_char: 55,
            purpose,
            interruptible: true,
            requires_tool_evidence: false,
            tool_evidence_ids: Vec::new(),
            max_monologue_expected_ms: None,
            markup_mode: MarkupMode::DashPause,
            dash_pause_unit_ms: 200,
            digit_dash_pause_unit_ms: 150,
            dash_pause_scope: DashPauseScope::ProtectedOnly,
            include_trailing_pause: false,
        }
    }
}

#[derive(Debug, Clone)]
struct SegmentDraft {
    purpose: SegmentPurpose,
    plain_text: String,
    interruptible: bool,
    requires_tool_evidence: bool,
    tool_evidence_ids: Vec<String>,
}

fn normalize_whitespace(text: &str) -> String {
    static WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
    WS.replace_all(text.trim(), " ").into_owned()
}

fn split_clauses(text: &str) -> Vec<String> {
    static CLAUSE_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"([.!?;])\s+|,\s+|\s+(?:and|but|so)\s+").unwrap()
    });
    let mut parts = Vec::new();
    let mut last_end = 0;
    for cap in CLAUSE_SPLIT.captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let mut left = text[last_end..whole.start()].to_string();
        if let Some(punct) = cap.get(1) {
            left.push_str(punct.as_str());
        }
        parts.push(left);
        last_end = whole.end();
    }
    parts.push(text[last_end..].to_string());
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn det_break_ms(segment_index: usize) -> u64 {
    150 + ((segment_index as u64 * 77) % 251)
}

fn dash_pause(units: u32) -> String {
    if units == 0 {
        String::new()
    } else {
        " - ".repeat(units as usize)
    }
}

fn dash_pause_units_for_break(break_ms: u64, dash_pause_unit_ms: u64) -> u32 {
    if dash_pause_unit_ms == 0 {
        return 0;
    }
    let units = (break_ms + dash_pause_unit_ms / 2) / dash_pause_unit_ms;
    units.max(1) as u32
}

static PHONE_PAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{3})[\s\-)]*(\d{3})[\s\-]*(\d{4})\b").unwrap());
static PRICE_PAT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\s*\d+(?:\.\d+)?").unwrap());
static TIME_PAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d{1,2}(?::\d{2})?\s*(?:am|pm)\b").unwrap());
static DIGITS_PAT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

fn find_protected_spans(text: &str) -> Vec<ProtectedSpan> {
    let mut spans = Vec::new();

    for m in PHONE_PAT.find_iter(text) {
        spans.push(ProtectedSpan {
            kind: ProtectedSpanKind::Phone,
            start: m.start(),
            end: m.end(),
        });
    }
    for m in PRICE_PAT.find_iter(text) {
        spans.push(ProtectedSpan {
            kind: ProtectedSpanKind::Price,
            start: m.start(),
            end: m.end(),
        });
    }
    for m in TIME_PAT.find_iter(text) {
        spans.push(ProtectedSpan {
            kind: ProtectedSpanKind::Time,
            start: m.start(),
            end: m.end(),
        });
    }

    let mut covered = vec![false; text.len()];
    for s in &spans {
        for c in covered.iter_mut().take(s.end).skip(s.start) {
            *c = true;
        }
    }
    for m in DIGITS_PAT.find_iter(text) {
        if (m.start()..m.end()).any(|i| covered[i]) {
            continue;
        }
        spans.push(ProtectedSpan {
            kind: ProtectedSpanKind::Digits,
            start: m.start(),
            end: m.end(),
        });
    }

    spans.sort_by_key(|s| (s.start, s.end));
    spans
}

fn digit_pause_ms_for_spans(
    text: &str,
    spans: &[ProtectedSpan],
    purpose: SegmentPurpose,
    digit_dash_pause_unit_ms: u64,
) -> u64 {
    let mut extra = 0u64;
    for sp in spans {
        let applies = sp.kind == ProtectedSpanKind::Phone
            || (sp.kind == ProtectedSpanKind::Digits
                && matches!(purpose, SegmentPurpose::Confirm | SegmentPurpose::Repair));
        if !applies {
            continue;
        }
        let digits = text[sp.start..sp.end].chars().filter(|c| c.is_ascii_digit()).count() as u64;
        if digits > 0 {
            extra += (digits - 1) * digit_dash_pause_unit_ms;
        }
    }
    extra
}

fn apply_protected_span_formatting(
    text: &str,
    spans: &[ProtectedSpan],
    purpose: SegmentPurpose,
) -> String {
    if spans.is_empty() {
        return text.to_string();
    }
    let mut out = String::new();
    let mut cur = 0;
    for sp in spans {
        out.push_str(&text[cur..sp.start]);
        let chunk = &text[sp.start..sp.end];
        let applies = sp.kind == ProtectedSpanKind::Phone
            || (sp.kind == ProtectedSpanKind::Digits
                && matches!(purpose, SegmentPurpose::Confirm | SegmentPurpose::Repair));
        if applies {
            let digits: Vec<char> = chunk.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                out.push_str(chunk);
            } else {
                out.push_str(
                    &digits
                        .iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(" - "),
                );
            }
        } else {
            out.push_str(chunk);
        }
        cur = sp.end;
    }
    out.push_str(&text[cur..]);
    out
}

fn boundary_pause(mode: MarkupMode, break_ms: u64, dash_pause_unit_ms: u64) -> (String, u64) {
    match mode {
        MarkupMode::RawText => (String::new(), 0),
        MarkupMode::Ssml => (format!("<break time=\"{break_ms}ms\"/>"), break_ms),
        MarkupMode::DashPause => {
            let units = dash_pause_units_for_break(break_ms, dash_pause_unit_ms);
            (dash_pause(units), units as u64 * dash_pause_unit_ms)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn estimate_expected_ms(
    plain_text: &str,
    purpose: SegmentPurpose,
    pace_ms_per_char: u64,
    spans: &[ProtectedSpan],
    mode: MarkupMode,
    break_ms: u64,
    include_boundary_pause: bool,
    dash_pause_unit_ms: u64,
    digit_dash_pause_unit_ms: u64,
    dash_pause_scope: DashPauseScope,
) -> u64 {
    let base = plain_text.chars().count() as u64 * pace_ms_per_char;
    let digit_extra = digit_pause_ms_for_spans(plain_text, spans, purpose, digit_dash_pause_unit_ms);
    let boundary_ms = if include_boundary_pause
        && (mode == MarkupMode::Ssml
            || (mode == MarkupMode::DashPause && dash_pause_scope == DashPauseScope::SegmentBoundary))
    {
        boundary_pause(mode, break_ms, dash_pause_unit_ms).1
    } else {
        0
    };
    base + digit_extra + boundary_ms
}

fn est_candidate(plain: &str, next_index: usize, ctx: &MicroChunkInput) -> u64 {
    let spans = find_protected_spans(plain);
    estimate_expected_ms(
        plain,
        ctx.purpose,
        ctx.pace_ms_per_char,
        &spans,
        ctx.markup_mode,
        det_break_ms(next_index),
        true,
        ctx.dash_pause_unit_ms,
        ctx.digit_dash_pause_unit_ms,
        ctx.dash_pause_scope,
    )
}

fn flush_buf(buf: &mut Vec<String>, drafts: &mut Vec<SegmentDraft>, ctx: &MicroChunkInput) {
    if buf.is_empty() {
        return;
    }
    let plain = buf.join(" ").trim().to_string();
    if !plain.is_empty() {
        drafts.push(SegmentDraft {
            purpose: ctx.purpose,
            plain_text: plain,
            interruptible: ctx.interruptible,
            requires_tool_evidence: ctx.requires_tool_evidence,
            tool_evidence_ids: ctx.tool_evidence_ids.clone(),
        });
    }
    buf.clear();
}

fn add_part(part_text: &str, buf: &mut Vec<String>, drafts: &mut Vec<SegmentDraft>, ctx: &MicroChunkInput) {
    let part_text = part_text.trim();
    if part_text.is_empty() {
        return;
    }

    if buf.is_empty() {
        if est_candidate(part_text, drafts.len(), ctx) > ctx.max_expected_ms {
            let mut wbuf: Vec<String> = Vec::new();
            for w in part_text.split(' ').filter(|w| !w.is_empty()) {
                let mut cand = wbuf.clone();
                cand.push(w.to_string());
                let cand_text = cand.join(" ");
                if !wbuf.is_empty() && est_candidate(&cand_text, drafts.len(), ctx) > ctx.max_expected_ms {
                    *buf = std::mem::take(&mut wbuf);
                    flush_buf(buf, drafts, ctx);
                    wbuf = vec![w.to_string()];
                } else {
                    wbuf.push(w.to_string());
                }
            }
            if !wbuf.is_empty() {
                *buf = wbuf;
                flush_buf(buf, drafts, ctx);
            }
            return;
        }
        buf.push(part_text.to_string());
        return;
    }

    let mut cand = buf.clone();
    cand.push(part_text.to_string());
    let cand_text = cand.join(" ");
    if est_candidate(&cand_text, drafts.len(), ctx) > ctx.max_expected_ms {
        flush_buf(buf, drafts, ctx);
        buf.push(part_text.to_string());
    } else {
        buf.push(part_text.to_string());
    }
}

fn insert_checkins(
    drafts: Vec<SegmentDraft>,
    max_monologue_expected_ms: u64,
    pace_ms_per_char: u64,
    digit_dash_pause_unit_ms: u64,
) -> Vec<SegmentDraft> {
    if max_monologue_expected_ms == 0 {
        return drafts;
    }
    let mut out = Vec::with_capacity(drafts.len());
    let mut since_checkin = 0u64;
    for d in drafts {
        let spans = find_protected_spans(&d.plain_text);
        let expected_wo_boundary = d.plain_text.chars().count() as u64 * pace_ms_per_char
            + digit_pause_ms_for_spans(&d.plain_text, &spans, d.purpose, digit_dash_pause_unit_ms);
        if !out.is_empty() && since_checkin + expected_wo_boundary > max_monologue_expected_ms {
            out.push(SegmentDraft {
                purpose: SegmentPurpose::Clarify,
                plain_text: "Want me to keep going?".to_string(),
                interruptible: true,
                requires_tool_evidence: false,
                tool_evidence_ids: Vec::new(),
            });
            since_checkin = 0;
        }
        since_checkin += expected_wo_boundary;
        out.push(d);
    }
    out
}

fn render_segments(drafts: &[SegmentDraft], ctx: &MicroChunkInput) -> Vec<SpeechSegment> {
    let n = drafts.len();
    let mut segments = Vec::with_capacity(n);
    for (i, d) in drafts.iter().enumerate() {
        let plain = d.plain_text.clone();
        let spans = find_protected_spans(&plain);
        let body = apply_protected_span_formatting(&plain, &spans, d.purpose);
        let break_ms = det_break_ms(i);

        let mut include_pause = ctx.include_trailing_pause || i + 1 < n;
        match ctx.markup_mode {
            MarkupMode::RawText => include_pause = false,
            MarkupMode::DashPause if ctx.dash_pause_scope != DashPauseScope::SegmentBoundary => {
                include_pause = false
            }
            _ => {}
        }

        let (suffix, boundary_ms) = if include_pause {
            boundary_pause(ctx.markup_mode, break_ms, ctx.dash_pause_unit_ms)
        } else {
            (String::new(), 0)
        };

        let mut out_text = format!("{body}{suffix}");
        if ctx.markup_mode != MarkupMode::Ssml && i + 1 < n {
            let next_plain = drafts[i + 1].plain_text.trim_start();
            if let Some(next_char) = next_plain.chars().next() {
                let ends_nonspace = out_text.chars().last().is_some_and(|c| !c.is_whitespace());
                let next_is_word_start =
                    next_char.is_alphanumeric() || matches!(next_char, '$' | '(' | '[' | '"' | '\'');
                if ends_nonspace && next_is_word_start {
                    out_text.push(' ');
                }
            }
        }

        let digit_extra =
            digit_pause_ms_for_spans(&plain, &spans, d.purpose, ctx.digit_dash_pause_unit_ms);
        let expected_ms = plain.chars().count() as u64 * ctx.pace_ms_per_char + digit_extra + boundary_ms;

        segments.push(SpeechSegment {
            index: i,
            purpose: d.purpose,
            rendered_text: out_text,
            plain_text: plain,
            interruptible: d.interruptible,
            safe_interrupt_point: true,
            expected_ms,
            requires_tool_evidence: d.requires_tool_evidence,
            tool_evidence_ids: d.tool_evidence_ids.clone(),
            protected_spans: spans,
        });
    }
    segments
}

struct LruCache {
    capacity: usize,
    map: HashMap<MicroChunkInput, Vec<SpeechSegment>>,
    order: VecDeque<MicroChunkInput>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &MicroChunkInput) -> Option<Vec<SpeechSegment>> {
        let value = self.map.get(key)?.clone();
        self.order.retain(|k| k != key);
        self.order.push_back(key.clone());
        Some(value)
    }

    fn insert(&mut self, key: MicroChunkInput, value: Vec<SpeechSegment>) {
        if self.map.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key.clone());
        self.map.insert(key, value);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
    }
}

static MICRO_CHUNK_CACHE: LazyLock<Mutex<LruCache>> = LazyLock::new(|| Mutex::new(LruCache::new(1024)));

/// Split `input.text` into breath-group [`SpeechSegment`]s, each under
/// `input.max_expected_ms` of estimated spoken duration. Deterministic and
/// memoized: calling this twice with an identical `input` returns
/// byte-identical segments without recomputation.
pub fn micro_chunk_text(input: MicroChunkInput) -> Vec<SpeechSegment> {
    let cleaned = normalize_whitespace(&input.text);
    if cleaned.is_empty() {
        return Vec::new();
    }
    let mut cache_key = input.clone();
    cache_key.text = cleaned.clone();

    if let Some(cached) = MICRO_CHUNK_CACHE.lock().unwrap().get(&cache_key) {
        return cached;
    }

    let parts = split_clauses(&cleaned);
    let mut drafts: Vec<SegmentDraft> = Vec::new();
    let mut buf: Vec<String> = Vec::new();
    for part in &parts {
        add_part(part, &mut buf, &mut drafts, &input);
    }
    flush_buf(&mut buf, &mut drafts, &input);

    let drafts = if input.purpose == SegmentPurpose::Content {
        match input.max_monologue_expected_ms {
            Some(limit) => insert_checkins(drafts, limit, input.pace_ms_per_char, input.digit_dash_pause_unit_ms),
            None => drafts,
        }
    } else {
        drafts
    };

    let segments = render_segments(&drafts, &input);
    MICRO_CHUNK_CACHE.lock().unwrap().insert(cache_key, segments.clone());
    segments
}

/// Construct a [`SpeechPlan`] from pre-built segments, computing its
/// canonical `plan_id` and recording segment-count/duration histograms if
/// `metrics` is supplied.
pub fn build_plan(
    session_id: &SessionId,
    call_id: &str,
    turn_id: u64,
    epoch: u64,
    reason: PlanReason,
    segments: Vec<SpeechSegment>,
    disclosure_included: bool,
    metrics: Option<&mut Metrics>,
) -> SpeechPlan {
    let plan_id = SpeechPlan::compute_plan_id(
        session_id.as_str(),
        call_id,
        turn_id,
        epoch,
        reason,
        disclosure_included,
        &segments,
    );

    if let Some(metrics) = metrics {
        metrics.observe(names::SEGMENT_COUNT_PER_TURN, segments.len() as i64);
        for seg in &segments {
            metrics.observe(names::SEGMENT_EXPECTED_DURATION_MS, seg.expected_ms as i64);
        }
    }

    SpeechPlan {
        session_id: session_id.as_str().to_string(),
        call_id: call_id.to_string(),
        turn_id,
        epoch,
        plan_id,
        segments,
        reason,
        disclosure_included,
    }
}

/// If any segment in `plan` asserts a fact (`requires_tool_evidence`)
/// without a backing tool evidence id, replace the whole plan with a
/// deterministic apology-and-ask-for-detail fallback. This is the last line
/// of defense against the agent inventing facts it cannot ground.
pub fn enforce_tool_grounding_or_fallback(plan: SpeechPlan, metrics: &mut Metrics) -> SpeechPlan {
    let violates = plan
        .segments
        .iter()
        .any(|s| s.requires_tool_evidence && s.tool_evidence_ids.is_empty());
    if !violates {
        return plan;
    }

    metrics.inc(names::FACTUAL_SEGMENT_WITHOUT_TOOL_EVIDENCE_TOTAL, 1);
    metrics.inc(names::FALLBACK_USED_TOTAL, 1);

    let fallback_text =
        "I can check that for you, but I don't want to guess. Could I get a little more detail?";
    let fallback_segments = micro_chunk_text(MicroChunkInput {
        max_expected_ms: 1_200,
        pace_ms_per_char: 20,
        ..MicroChunkInput::new(fallback_text, SegmentPurpose::Content)
    });

    build_plan(
        &SessionId::new(plan.session_id.clone()),
        &plan.call_id,
        plan.turn_id,
        plan.epoch,
        PlanReason::Error,
        fallback_segments,
        plan.disclosure_included,
        Some(metrics),
    )
}

/// Incrementally accumulates streamed text (e.g. LLM token deltas) and
/// flushes it into [`SpeechSegment`]s using the same deterministic rules as
/// [`micro_chunk_text`], so streamed and non-streamed speech are rendered
/// identically.
#[derive(Debug, Clone)]
pub struct StreamingChunker {
    max_expected_ms: u64,
    pace_ms_per_char: u64,
    purpose: SegmentPurpose,
    interruptible: bool,
    requires_tool_evidence: bool,
    tool_evidence_ids: Vec<String>,
    markup_mode: MarkupMode,
    dash_pause_unit_ms: u64,
    digit_dash_pause_unit_ms: u64,
    dash_pause_scope: DashPauseScope,
    buf: String,
}

impl StreamingChunker {
    /// Construct a chunker with the planner's conventional defaults.
    pub fn new(purpose: SegmentPurpose) -> Self {
        let base = MicroChunkInput::new(String::new(), purpose);
        Self {
            max_expected_ms: base.max_expected_ms,
            pace_ms_per_char: base.pace_ms_per_char,
            purpose,
            interruptible: base.interruptible,
            requires_tool_evidence: base.requires_tool_evidence,
            tool_evidence_ids: base.tool_evidence_ids,
            markup_mode: base.markup_mode,
            dash_pause_unit_ms: base.dash_pause_unit_ms,
            digit_dash_pause_unit_ms: base.digit_dash_pause_unit_ms,
            dash_pause_scope: base.dash_pause_scope,
            buf: String::new(),
        }
    }

    /// Feed in the next delta. Returns any segments flushed as a result —
    /// usually empty, since most deltas just extend the buffer.
    pub fn push(&mut self, delta: &str) -> Vec<SpeechSegment> {
        if delta.is_empty() {
            return Vec::new();
        }
        self.buf.push_str(delta);
        if !self.should_flush() {
            return Vec::new();
        }
        self.flush(true)
    }

    /// Flush any remaining buffered text without a trailing pause, for use
    /// when the stream has ended.
    pub fn flush_final(&mut self) -> Vec<SpeechSegment> {
        self.flush(false)
    }

    fn buf_expected_ms(&self) -> u64 {
        let plain = normalize_whitespace(&self.buf);
        if plain.is_empty() {
            return 0;
        }
        let spans = find_protected_spans(&plain);
        let digit_extra =
            digit_pause_ms_for_spans(&plain, &spans, self.purpose, self.digit_dash_pause_unit_ms);
        plain.chars().count() as u64 * self.pace_ms_per_char + digit_extra
    }

    fn should_flush(&self) -> bool {
        let plain = self.buf.trim();
        if plain.is_empty() {
            return false;
        }
        if plain.ends_with(['.', '!', '?', ';']) {
            return true;
        }
        self.buf_expected_ms() >= self.max_expected_ms
    }

    fn flush(&mut self, include_trailing_pause: bool) -> Vec<SpeechSegment> {
        let plain = normalize_whitespace(&self.buf);
        self.buf.clear();
        if plain.is_empty() {
            return Vec::new();
        }
        micro_chunk_text(MicroChunkInput {
            text: plain,
            max_expected_ms: self.max_expected_ms,
            pace_ms_per_char: self.pace_ms_per_char,
            purpose: self.purpose,
            interruptible: self.interruptible,
            requires_tool_evidence: self.requires_tool_evidence,
            tool_evidence_ids: self.tool_evidence_ids.clone(),
            max_monologue_expected_ms: None,
            markup_mode: self.markup_mode,
            dash_pause_unit_ms: self.dash_pause_unit_ms,
            digit_dash_pause_unit_ms: self.digit_dash_pause_unit_ms,
            dash_pause_scope: self.dash_pause_scope,
            include_trailing_pause,
        })
    }
}
