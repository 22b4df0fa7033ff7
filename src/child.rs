//! Child runner: the role taken by a process started with the role marker.
//!
//! Starting: the entry point is launched on its own thread, the source
//! watcher (if enabled) on a tokio task, and terminal echo is restored.
//! Running: the control loop wakes at least once per poll interval and
//! decides between exiting with the entry point's outcome, restarting, or
//! shutting down on Ctrl-C.

use crate::error::ReloaderError;
use crate::target::{
    spawn_target, EntryPoint, Invocation, Outcome, TargetHandle, PANIC_EXIT_CODE,
};
use crate::terminal::ensure_echo_enabled;
use crate::trigger::ReloadTrigger;
use crate::watcher::SourceWatcher;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// A callback run synchronously on the control loop.
pub type Hook = Box<dyn FnOnce() + Send + 'static>;

/// Callbacks run right before the child process terminates.
pub struct Hooks {
    /// Runs before a restart is requested. Blocks the restart until it returns.
    pub before_reload: Hook,
    /// Runs when Ctrl-C interrupts the child.
    pub before_exit: Hook,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            before_reload: Box::new(|| {}),
            before_exit: Box::new(|| {}),
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

/// How a child generation ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildDecision {
    /// Ask the supervisor for a new generation.
    Restart,
    /// The entry point finished; propagate its outcome.
    Exit(Outcome),
    /// Ctrl-C arrived while waiting.
    Interrupted,
}

impl ChildDecision {
    /// Exit status the child process terminates with.
    ///
    /// The OS keeps only the low byte of a status, so an entry point code
    /// outside `0..=255`, or one that lands on `restart_code` once
    /// truncated, is remapped to 1 rather than trigger a restart by accident.
    pub fn exit_code(&self, restart_code: i32) -> i32 {
        match self {
            ChildDecision::Restart => restart_code,
            ChildDecision::Exit(Outcome::Finished(code)) => finished_code(*code, restart_code),
            ChildDecision::Exit(Outcome::Panicked(_)) => PANIC_EXIT_CODE,
            ChildDecision::Interrupted => 0,
        }
    }
}

fn finished_code(code: i32, restart_code: i32) -> i32 {
    if code & 0xff == restart_code & 0xff {
        tracing::warn!(
            code,
            "entry point returned the reserved restart status, exiting with 1"
        );
        return 1;
    }
    if !(0..=255).contains(&code) {
        tracing::warn!(code, "entry point status out of range, exiting with 1");
        return 1;
    }
    code
}

/// Wait on the trigger until the target finishes, a reload is requested,
/// or `interrupt` resolves.
pub async fn control_loop<I>(
    mut target: TargetHandle,
    trigger: &ReloadTrigger,
    poll_interval: Duration,
    hooks: Hooks,
    interrupt: I,
) -> ChildDecision
where
    I: Future<Output = ()>,
{
    let Hooks {
        before_reload,
        before_exit,
    } = hooks;
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => {
                tracing::info!("interrupted, shutting down");
                before_exit();
                return ChildDecision::Interrupted;
            }
            _ = trigger.wait_or_timeout(poll_interval) => {}
        }

        // Once the supervised work is done the watcher no longer matters.
        if let Some(outcome) = target.try_outcome() {
            match &outcome {
                Outcome::Finished(code) => tracing::info!(code, "entry point finished"),
                Outcome::Panicked(message) => {
                    tracing::error!(message = %message, "entry point panicked")
                }
            }
            return ChildDecision::Exit(outcome);
        }

        if trigger.is_set() {
            tracing::info!("reloading");
            before_reload();
            return ChildDecision::Restart;
        }
    }
}

/// Resolves on the first Ctrl-C. Never resolves if the handler cannot be
/// installed.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Everything one child generation needs.
pub struct ChildRunner {
    entry: EntryPoint,
    args: Vec<String>,
    kwargs: BTreeMap<String, String>,
    hooks: Hooks,
    watcher: Option<(SourceWatcher, Duration)>,
    poll_interval: Duration,
    trigger: ReloadTrigger,
}

impl ChildRunner {
    pub fn new(entry: EntryPoint) -> Self {
        Self {
            entry,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            hooks: Hooks::default(),
            watcher: None,
            poll_interval: Duration::from_secs(1),
            trigger: ReloadTrigger::new(),
        }
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: BTreeMap<String, String>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Enable file watching with the given scan interval.
    pub fn watcher(mut self, watcher: SourceWatcher, interval: Duration) -> Self {
        self.watcher = Some((watcher, interval));
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Handle to this generation's trigger, for external reload requests.
    pub fn trigger(&self) -> ReloadTrigger {
        self.trigger.clone()
    }

    /// Start the entry point and the watcher, then run the control loop.
    pub async fn drive<I>(self, interrupt: I) -> Result<ChildDecision, ReloaderError>
    where
        I: Future<Output = ()>,
    {
        let invocation = Invocation {
            args: self.args,
            kwargs: self.kwargs,
            trigger: self.trigger.clone(),
        };
        let target = spawn_target(self.entry, invocation)?;
        tracing::debug!(pid = std::process::id(), "child started entry point");

        let watch_task = self.watcher.map(|(watcher, interval)| {
            tokio::spawn(watcher.run_loop(self.trigger.clone(), interval))
        });

        ensure_echo_enabled();

        let decision =
            control_loop(target, &self.trigger, self.poll_interval, self.hooks, interrupt).await;

        if let Some(task) = watch_task {
            task.abort();
        }
        Ok(decision)
    }
}
