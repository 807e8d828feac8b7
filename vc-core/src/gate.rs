//! [`GateRef`]: the mutable `(epoch, speak_gen, version)` pair with an
//! edge-triggered "changed" signal.

use std::sync::Mutex;
use tokio::sync::Notify;
use vc_types::Gate;

/// Shared, mutable gate with a `changed()` edge trigger: a single awaiter
/// observes exactly one change before re-arming, via `tokio::sync::Notify`'s
/// permit semantics (one stored permit, `notified()` consumes it).
pub struct GateRef {
    inner: Mutex<Gate>,
    changed: Notify,
}

impl GateRef {
    /// Start at epoch 0, speak_gen 0.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Gate::default()),
            changed: Notify::new(),
        }
    }

    /// Read the current gate value.
    pub fn snapshot(&self) -> Gate {
        *self.inner.lock().expect("gate poisoned")
    }

    /// Set a new epoch, resetting `speak_gen` to 0. Pulses `changed`.
    pub fn set_epoch(&self, epoch: u64) {
        {
            let mut g = self.inner.lock().expect("gate poisoned");
            g.epoch = epoch;
            g.speak_gen = 0;
            g.version += 1;
        }
        self.changed.notify_waiters();
        self.changed.notify_one();
    }

    /// Bump `speak_gen` within the current epoch. Pulses `changed`.
    pub fn bump_speak_gen(&self) -> u64 {
        let new_gen = {
            let mut g = self.inner.lock().expect("gate poisoned");
            g.speak_gen += 1;
            g.version += 1;
            g.speak_gen
        };
        self.changed.notify_waiters();
        self.changed.notify_one();
        new_gen
    }

    /// Resolve once the gate next changes after this call.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

impl Default for GateRef {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn set_epoch_resets_speak_gen() {
        let gate = GateRef::new();
        gate.bump_speak_gen();
        gate.bump_speak_gen();
        gate.set_epoch(5);
        let snap = gate.snapshot();
        assert_eq!(snap.epoch, 5);
        assert_eq!(snap.speak_gen, 0);
    }

    #[test]
    fn bump_speak_gen_increments_and_leaves_epoch() {
        let gate = GateRef::new();
        gate.set_epoch(3);
        let g1 = gate.bump_speak_gen();
        let g2 = gate.bump_speak_gen();
        assert_eq!(g1, 1);
        assert_eq!(g2, 2);
        assert_eq!(gate.snapshot().epoch, 3);
    }

    #[tokio::test]
    async fn changed_resolves_after_mutation() {
        let gate = Arc::new(GateRef::new());
        let waiter = gate.clone();
        let handle = tokio::spawn(async move {
            waiter.changed().await;
        });
        tokio::task::yield_now().await;
        gate.set_epoch(1);
        tokio::time::timeout(std::time::Duration::from_millis(500), handle)
            .await
            .expect("changed() should resolve")
            .unwrap();
    }
}
