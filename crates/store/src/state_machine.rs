//! The deployment status state machine.
//!
//! ```text
//!               enqueue
//!    (none) ──────────────▶ queued
//!    queued  ── start ────▶ building
//!    building ── ok ──────▶ running
//!    building ── fail ────▶ failed
//!    running ── close ────▶ destroying
//!    failed  ── close ────▶ destroying
//!    destroying── ok ─────▶ (deleted)
//!    destroying── fail ───▶ failed
//!    any non-terminal ── ttl ─▶ destroying  (via sweeper)
//! ```
//!
//! `failed` is non-terminal: a later `opened`/`reopened`/`synchronize`
//! returns it to `queued`.

use crate::model::DeploymentStatus;

/// Returns `true` if moving from `from` to `to` is one of the legal
/// transitions.
#[must_use]
pub fn is_legal_transition(from: DeploymentStatus, to: DeploymentStatus) -> bool {
    use DeploymentStatus::{Building, Destroying, Failed, Queued, Running, Stopped};

    matches!(
        (from, to),
        (Queued, Building)
            | (Building, Running)
            | (Building, Failed)
            | (Running, Destroying)
            | (Failed, Destroying)
            | (Failed, Queued)
            | (Destroying, Failed)
            // sweeper-driven TTL transition from any non-terminal state.
            | (Queued, Destroying)
            | (Building, Destroying)
    ) || matches!(from, Stopped if false) // Stopped is terminal; no transitions out.
}

/// Whether `status` is terminal from the controller's point of view (no
/// further writer ever mutates it in place; it is deleted instead).
#[must_use]
pub fn is_deletable_on_success(status: DeploymentStatus) -> bool {
    matches!(status, DeploymentStatus::Destroying)
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentStatus::{Building, Destroying, Failed, Queued, Running, Stopped};

    #[test]
    fn happy_path_is_legal() {
        assert!(is_legal_transition(Queued, Building));
        assert!(is_legal_transition(Building, Running));
        assert!(is_legal_transition(Running, Destroying));
    }

    #[test]
    fn failed_is_non_terminal() {
        assert!(is_legal_transition(Building, Failed));
        assert!(is_legal_transition(Failed, Queued));
        assert!(is_legal_transition(Failed, Destroying));
    }

    #[test]
    fn destroying_can_fail() {
        assert!(is_legal_transition(Destroying, Failed));
    }

    #[test]
    fn sweeper_can_jump_non_terminal_states_to_destroying() {
        assert!(is_legal_transition(Queued, Destroying));
        assert!(is_legal_transition(Building, Destroying));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert!(!is_legal_transition(Queued, Running));
        assert!(!is_legal_transition(Running, Building));
        assert!(!is_legal_transition(Destroying, Running));
        assert!(!is_legal_transition(Stopped, Queued));
    }
}
