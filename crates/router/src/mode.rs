//! `ModeController` (`§4.1`): the CR's one-way INITIALIZATION→OPERATIONAL
//! transition and the barrier that gates it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

use crate::registry::EdgeRegistry;

/// Barrier timeout (`§5`): the supervising task transitions to OPERATIONAL
/// regardless of whether `expected_edge_count` edges ever registered.
pub const BARRIER_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Initialization,
    Operational,
}

/// Holds the CR's server mode and the registration barrier that releases
/// it. Mode transitions are one-way (`§3`, `§8` invariant 4).
pub struct ModeController {
    expected_edge_count: usize,
    registered_count: AtomicUsize,
    operational: AtomicBool,
    barrier: Notify,
}

impl ModeController {
    pub fn new(expected_edge_count: usize) -> Self {
        Self {
            expected_edge_count,
            registered_count: AtomicUsize::new(0),
            operational: AtomicBool::new(false),
            barrier: Notify::new(),
        }
    }

    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }

    /// Called once per accepted edge registration (`§4.2`). Releases the
    /// barrier the moment the expected count is reached, but only while
    /// still in INITIALIZATION — later registrations after the barrier has
    /// already fired must not re-notify.
    pub fn note_edge_registered(&self) {
        if self.is_operational() {
            return;
        }
        let count = self.registered_count.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.expected_edge_count {
            self.barrier.notify_one();
        }
    }

    /// Mark the mode OPERATIONAL. Idempotent and monotonic: a second call
    /// after the first is a no-op (`§8` invariant 4).
    fn transition_to_operational(&self) -> bool {
        self.operational
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The supervising task (`§4.1`): wait for the barrier or the timeout,
    /// whichever comes first, then transition to OPERATIONAL and advertise
    /// the mode to every edge currently registered.
    pub async fn run_barrier(&self, registry: &EdgeRegistry) {
        if self.expected_edge_count == 0 {
            // Nothing to wait for; become operational immediately.
        } else {
            tokio::select! {
                () = self.barrier.notified() => {
                    info!("router: initialization barrier released, expected edge count reached");
                },
                () = tokio::time::sleep(BARRIER_TIMEOUT) => {
                    info!("router: initialization barrier timed out, transitioning anyway");
                },
            }
        }

        if self.transition_to_operational() {
            for edge in registry.iter() {
                self.advertise_mode(&edge).await;
            }
        }
    }

    /// No-op unless OPERATIONAL (`§4.1`). Called both by the barrier task
    /// and by every subsequent registration/`FULL_SYNC` for the joining
    /// edge (`§4.1`, `§8` S6).
    pub async fn advertise_mode(&self, edge: &crate::registry::EdgeHandle) {
        if !self.is_operational() {
            return;
        }
        edge.send_server_mode_operational();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn advertise_mode_is_a_no_op_before_operational() {
        let controller = ModeController::new(1);
        let registry = EdgeRegistry::new();
        let edge = registry.register("e1".into(), test_sender(), false);
        controller.advertise_mode(&edge).await;
        assert!(!controller.is_operational());
    }

    #[tokio::test]
    async fn barrier_releases_once_expected_count_reached() {
        let controller = ModeController::new(2);
        controller.note_edge_registered();
        assert!(!controller.is_operational());
        controller.note_edge_registered();
        // The notify is fired; run_barrier (not exercised here directly)
        // would now return promptly rather than waiting for the timeout.
    }

    #[tokio::test]
    async fn zero_expected_edges_transitions_immediately() {
        let controller = ModeController::new(0);
        let registry = EdgeRegistry::new();
        controller.run_barrier(&registry).await;
        assert!(controller.is_operational());
    }

    fn test_sender() -> tokio::sync::mpsc::UnboundedSender<axum::extract::ws::Message> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        tx
    }
}
