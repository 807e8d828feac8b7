//! Policy-visible session state, captured and rolled back per epoch.

use serde_json::Value;
use std::collections::HashMap;

/// All policy-visible captured fields for the current call: intent, caller
/// identity fragments, confirmations, funnel stage, and free-form counters.
///
/// A full copy is taken at the start of each response-required turn
/// (`backup`); on rollback the backup fully overwrites the live value —
/// partial patching is deliberately not supported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotState {
    /// Current inferred intent, if any.
    pub intent: Option<String>,
    /// Caller's stated name, if captured.
    pub name: Option<String>,
    /// Caller's stated phone number, if captured.
    pub phone: Option<String>,
    /// Named confirmations the caller has given (e.g. "consent": true).
    pub confirmations: HashMap<String, bool>,
    /// Current funnel stage label.
    pub funnel_stage: Option<String>,
    /// Free-form named counters (e.g. repair attempts, objections raised).
    pub counters: HashMap<String, i64>,
    /// Opaque extension payload for fields the core doesn't need to
    /// understand but the external policy does.
    pub extra: Value,
}

impl SlotState {
    /// Increment a named counter, creating it at 1 if absent.
    pub fn bump_counter(&mut self, key: &str) -> i64 {
        let entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }
}

/// A per-epoch backup/rollback slot: if no segment was emitted for an
/// epoch before it was canceled, the backup is restored; otherwise it is
/// committed (discarded, keeping the live value).
#[derive(Debug, Clone)]
pub struct SlotBackup {
    epoch: u64,
    snapshot: SlotState,
}

impl SlotBackup {
    /// Snapshot `state` as the backup for `epoch`.
    pub fn capture(epoch: u64, state: &SlotState) -> Self {
        Self {
            epoch,
            snapshot: state.clone(),
        }
    }

    /// The epoch this backup was taken for.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Restore `state` from this backup.
    pub fn restore_into(&self, state: &mut SlotState) {
        *state = self.snapshot.clone();
    }
}
