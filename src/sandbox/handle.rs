//! Sandbox handle - tracks one live execution environment for a session
//!
//! Lifecycle per session key:
//! None -> Provisioning -> Active -> Expired (probe failure) or
//! Terminated (explicit release). A new handle may be created for the same
//! key after expiry or termination.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// State of a sandbox bound to a session key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxState {
    /// Creation requested, not yet usable
    Provisioning,
    /// Booted, probed alive, usable
    Active,
    /// Discovered dead by a liveness probe or budget expiry
    Expired,
    /// Explicitly destroyed via release
    Terminated,
}

/// One live (or formerly live) environment bound to a session key
pub struct LiveSandbox<H> {
    /// Opaque identifier assigned by the environment provider
    pub environment_id: String,
    /// Provider handle for issuing operations
    pub handle: H,
    pub state: SandboxState,
    /// When the environment was created (or adopted); anchors the budget
    pub created_at: Instant,
    /// Refreshed by every successful probe or acquire
    pub last_activity: Instant,
    /// Externally reachable preview URL, once a port has been exposed
    pub preview_address: Option<String>,
    /// Generation tag; a keep-alive timer only acts on its own generation
    pub generation: u64,
    /// Keep-alive task guarding this handle; aborted with handle removal
    pub keepalive: Option<JoinHandle<()>>,
}

impl<H> LiveSandbox<H> {
    pub fn new(environment_id: String, handle: H, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            environment_id,
            handle,
            state: SandboxState::Active,
            created_at: now,
            last_activity: now,
            preview_address: None,
            generation,
            keepalive: None,
        }
    }

    /// Time left before the lifetime budget elapses
    pub fn remaining_budget(&self, budget: Duration) -> Duration {
        budget.saturating_sub(self.created_at.elapsed())
    }

    pub fn refresh(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Abort the keep-alive task, if one is attached
    pub fn cancel_keepalive(&mut self) {
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
    }
}

impl<H> std::fmt::Debug for LiveSandbox<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSandbox")
            .field("environment_id", &self.environment_id)
            .field("state", &self.state)
            .field("age", &self.created_at.elapsed())
            .field("preview_address", &self.preview_address)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_budget_counts_down() {
        let live = LiveSandbox::new("env-1".to_string(), (), 0);
        let budget = Duration::from_secs(3600);
        let remaining = live.remaining_budget(budget);
        assert!(remaining <= budget);
        assert!(remaining > Duration::from_secs(3590));
    }

    #[test]
    fn test_new_handle_is_active() {
        let live = LiveSandbox::new("env-1".to_string(), (), 7);
        assert_eq!(live.state, SandboxState::Active);
        assert_eq!(live.generation, 7);
        assert!(live.preview_address.is_none());
        assert!(live.keepalive.is_none());
    }
}
