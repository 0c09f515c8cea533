//! Cooperative control signalling between the control surface and live
//! scheduler tasks.
//!
//! One registry entry per live traversal; the entry doubles as the
//! "a traversal owns this execution id" marker that keeps resume from
//! double-spawning.

use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

/// Latest control command for a traversal. The scheduler reads it at its
/// suspension points; a newer command replaces an older unobserved one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSignal {
    #[default]
    Run,
    Pause,
    Terminate,
}

/// Receiver half handed to a scheduler task.
pub type ControlReceiver = watch::Receiver<ControlSignal>;

/// Maps execution id -> the sender for its live traversal.
#[derive(Default)]
pub struct ControlRegistry {
    inner: DashMap<Uuid, watch::Sender<ControlSignal>>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a traversal. Returns `None` (and registers nothing) when the
    /// execution already has a live traversal.
    pub fn register(&self, execution_id: Uuid) -> Option<ControlReceiver> {
        match self.inner.entry(execution_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(ControlSignal::Run);
                slot.insert(tx);
                Some(rx)
            }
        }
    }

    /// Drop the registry entry when a traversal ends.
    pub fn release(&self, execution_id: Uuid) {
        self.inner.remove(&execution_id);
    }

    /// Whether a traversal currently owns the id.
    pub fn is_live(&self, execution_id: Uuid) -> bool {
        self.inner.contains_key(&execution_id)
    }

    /// Deliver a signal to a live traversal. Returns false when none exists.
    pub fn signal(&self, execution_id: Uuid, signal: ControlSignal) -> bool {
        match self.inner.get(&execution_id) {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_register_is_rejected_until_release() {
        let registry = ControlRegistry::new();
        let id = Uuid::new_v4();

        let rx = registry.register(id).expect("first register succeeds");
        assert!(registry.register(id).is_none());
        assert!(registry.is_live(id));

        assert!(registry.signal(id, ControlSignal::Pause));
        assert_eq!(*rx.borrow(), ControlSignal::Pause);

        registry.release(id);
        assert!(!registry.is_live(id));
        assert!(!registry.signal(id, ControlSignal::Terminate));
        assert!(registry.register(id).is_some());
    }
}
