//! Reload trigger shared by the watcher, the target and the control loop.
//!
//! One trigger exists per child generation. It is never cleared: the process
//! that observes it exits, and the next generation starts with a fresh one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Edge-triggered "please reload" flag.
///
/// Cloning yields another handle to the same flag. `set` is synchronous and
/// can be called from plain threads as well as from async tasks.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ReloadTrigger {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Mark the trigger active. Idempotent.
    pub fn set(&self) {
        let newly_set = self.tx.send_if_modified(|set| {
            let was_set = *set;
            *set = true;
            !was_set
        });
        if newly_set {
            tracing::debug!("reload trigger set");
        }
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the trigger is set or `timeout` elapses.
    ///
    /// Returns whether the trigger is set. Never blocks past `timeout`, so
    /// callers can re-check their other exit conditions on a steady cadence.
    pub async fn wait_or_timeout(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let woke = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|set| *set)).await,
            Ok(Ok(_))
        );
        woke || self.is_set()
    }
}

impl Default for ReloadTrigger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_new_trigger_is_not_set() {
        assert!(!ReloadTrigger::new().is_set());
    }

    #[test]
    fn test_set_is_idempotent() {
        let trigger = ReloadTrigger::new();
        trigger.set();
        trigger.set();
        assert!(trigger.is_set());
    }

    #[test]
    fn test_clones_share_state() {
        let trigger = ReloadTrigger::new();
        let other = trigger.clone();
        other.set();
        assert!(trigger.is_set());
    }

    #[test]
    fn test_independent_triggers_do_not_interfere() {
        let a = ReloadTrigger::new();
        let b = ReloadTrigger::new();
        a.set();
        assert!(!b.is_set());
    }

    #[tokio::test]
    async fn test_wait_times_out_when_not_set() {
        let trigger = ReloadTrigger::new();
        let start = Instant::now();
        assert!(!trigger.wait_or_timeout(Duration::from_millis(50)).await);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_set() {
        let trigger = ReloadTrigger::new();
        trigger.set();
        let start = Instant::now();
        assert!(trigger.wait_or_timeout(Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_wait_wakes_when_set_from_plain_thread() {
        let trigger = ReloadTrigger::new();
        let setter = trigger.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            setter.set();
        });
        let start = Instant::now();
        assert!(trigger.wait_or_timeout(Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
