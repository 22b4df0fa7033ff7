/// Running an external command as the supervised entry point.
///
/// The command is a grandchild of the supervisor. Restarts and Ctrl-C end
/// the child runner with `std::process::exit`, which would orphan it, so the
/// hooks returned by [`CommandTarget::terminator`] stop it first.
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Status reported when the command cannot be started, as shells do.
pub const NOT_FOUND_EXIT_CODE: i32 = 127;

#[derive(Debug, Clone)]
pub struct CommandTarget {
    role_env_var: String,
    grace: Duration,
    pid: Arc<Mutex<Option<u32>>>,
}

impl CommandTarget {
    pub fn new(role_env_var: impl Into<String>) -> Self {
        Self {
            role_env_var: role_env_var.into(),
            grace: Duration::from_secs(5),
            pid: Arc::new(Mutex::new(None)),
        }
    }

    /// How long a terminated command may take to exit before it is killed.
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run `command` (program followed by its arguments) to completion.
    ///
    /// Returns its exit code, `128 + signal` if it was killed, or
    /// [`NOT_FOUND_EXIT_CODE`] if it could not be started.
    pub fn run(&self, command: &[String]) -> i32 {
        let Some((program, args)) = command.split_first() else {
            tracing::error!("no command given");
            return NOT_FOUND_EXIT_CODE;
        };

        let mut child = match Command::new(program)
            .args(args)
            .env_remove(&self.role_env_var)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(command = %program, error = %e, "failed to start command");
                return NOT_FOUND_EXIT_CODE;
            }
        };
        tracing::info!(command = %program, pid = child.id(), "command started");
        *lock(&self.pid) = Some(child.id());

        let status = child.wait();
        *lock(&self.pid) = None;

        match status {
            Ok(status) => {
                let code = exit_code_of(status);
                tracing::info!(command = %program, code, "command exited");
                code
            }
            Err(e) => {
                tracing::error!(command = %program, error = %e, "failed to wait for command");
                1
            }
        }
    }

    /// A hook that stops the running command: SIGTERM, then SIGKILL after
    /// the grace period.
    pub fn terminator(&self) -> impl FnOnce() + Send + 'static {
        let slot = self.pid.clone();
        let grace = self.grace;
        move || terminate(&slot, grace)
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        lock(&self.pid).is_some()
    }
}

fn lock(slot: &Mutex<Option<u32>>) -> std::sync::MutexGuard<'_, Option<u32>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

fn terminate(slot: &Mutex<Option<u32>>, grace: Duration) {
    let Some(raw) = *lock(slot) else {
        return;
    };
    let Ok(raw) = i32::try_from(raw) else {
        return;
    };
    let pid = Pid::from_raw(raw);

    tracing::debug!(pid = raw, "stopping command");
    if kill(pid, Signal::SIGTERM).is_err() {
        return;
    }

    // The runner thread clears the slot once it has reaped the command.
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if lock(slot).is_none() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    if lock(slot).is_some() {
        tracing::warn!(pid = raw, "command ignored SIGTERM, killing it");
        let _ = kill(pid, Signal::SIGKILL);
    }
}
