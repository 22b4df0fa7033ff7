/// Process supervisor: respawns the program in child mode until a child
/// exits with anything other than the restart status.
use crate::error::ReloaderError;
use crate::status::{StatusTracker, SupervisorState};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

/// How a child process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Exited with a status code.
    Code(i32),
    /// Killed by a signal.
    Signal(i32),
}

impl ChildExit {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ChildExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ChildExit::Signal(signal);
            }
        }
        ChildExit::Code(1)
    }

    /// Raw encoding: the exit code, or `-signal` for a signalled child.
    pub fn raw(&self) -> i32 {
        match self {
            ChildExit::Code(code) => *code,
            ChildExit::Signal(signal) => -signal,
        }
    }
}

/// How to start a child: program, arguments and the role marker.
#[derive(Debug, Clone)]
pub struct ChildCommand {
    program: PathBuf,
    args: Vec<OsString>,
    role_env_var: String,
}

impl ChildCommand {
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
        role_env_var: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            role_env_var: role_env_var.into(),
        }
    }

    /// Re-run the current executable with the original arguments.
    pub fn current(role_env_var: impl Into<String>) -> Result<Self, ReloaderError> {
        let program =
            std::env::current_exe().map_err(|e| ReloaderError::CurrentExe { source: e })?;
        Ok(Self::new(program, std::env::args_os().skip(1), role_env_var))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(&self.role_env_var, "true")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

/// Whether this process was started as a child runner.
pub fn is_child_role(role_env_var: &str) -> bool {
    std::env::var(role_env_var).is_ok_and(|v| v == "true")
}

pub struct Supervisor {
    command: ChildCommand,
    restart_code: i32,
    status: Option<StatusTracker>,
}

impl Supervisor {
    pub fn new(command: ChildCommand, restart_code: i32) -> Self {
        Self {
            command,
            restart_code,
            status: None,
        }
    }

    pub fn with_status_file(mut self, path: PathBuf) -> Self {
        self.status = Some(StatusTracker::new(path));
        self
    }

    /// Spawn children until one exits without asking for a restart.
    ///
    /// Returns that child's exit. Spawn failures are fatal.
    pub async fn supervise(&mut self) -> Result<ChildExit, ReloaderError> {
        let mut generation: u64 = 0;
        loop {
            generation += 1;
            let exit = self.run_generation(generation).await?;

            if let Some(status) = self.status.as_mut() {
                status.set_last_exit(exit.raw());
            }

            if exit == ChildExit::Code(self.restart_code) {
                tracing::info!(generation, "child requested restart");
                self.update_status(SupervisorState::Restarting);
                continue;
            }

            tracing::info!(generation, exit = exit.raw(), "child exited");
            self.update_status(SupervisorState::Exited);
            return Ok(exit);
        }
    }

    async fn run_generation(&mut self, generation: u64) -> Result<ChildExit, ReloaderError> {
        if let Some(status) = self.status.as_mut() {
            status.set_generation(generation);
        }
        self.update_status(SupervisorState::Spawning);

        let mut child = self
            .command
            .build()
            .spawn()
            .map_err(|e| ReloaderError::Spawn {
                program: self.command.program().to_path_buf(),
                source: e,
            })?;
        let pid = child.id();
        tracing::info!(
            generation,
            pid = ?pid,
            program = %self.command.program().display(),
            "child started"
        );

        if let Some(status) = self.status.as_mut() {
            status.set_child_pid(pid);
        }
        self.update_status(SupervisorState::Running);

        let mut listen = true;
        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|e| ReloaderError::Wait { source: e })?;
                    return Ok(ChildExit::from_status(status));
                }
                interrupt = tokio::signal::ctrl_c(), if listen => {
                    match interrupt {
                        // The child got the same interrupt and reports its own status.
                        Ok(()) => tracing::debug!("interrupt received, waiting for child"),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                            listen = false;
                        }
                    }
                }
            }
        }
    }

    fn update_status(&self, state: SupervisorState) {
        if let Some(status) = &self.status {
            status.update(state);
        }
    }

    /// Remove the status file after a clean exit.
    pub fn finish(&self, exit: ChildExit) {
        if exit == ChildExit::Code(0) {
            if let Some(status) = &self.status {
                status.remove();
            }
        }
    }
}

/// Terminate the current process the way the child terminated.
///
/// A signalled child makes this process raise the same signal with its
/// default disposition; if that does not kill us, exit with `128 + signal`.
pub fn exit_like(exit: ChildExit) -> ! {
    match exit {
        ChildExit::Code(code) => std::process::exit(code),
        ChildExit::Signal(signal) => {
            #[cfg(unix)]
            raise_default(signal);
            std::process::exit(128 + signal)
        }
    }
}

#[cfg(unix)]
fn raise_default(signal: i32) {
    use nix::sys::signal::{raise, signal as set_handler, SigHandler, Signal};

    let Ok(sig) = Signal::try_from(signal) else {
        tracing::warn!(signal, "child died from an unknown signal");
        return;
    };
    // SAFETY: restores the default disposition; no Rust code runs as handler.
    if let Err(e) = unsafe { set_handler(sig, SigHandler::SigDfl) } {
        tracing::warn!(error = %e, "failed to reset signal disposition");
    }
    if let Err(e) = raise(sig) {
        tracing::warn!(error = %e, signal = %sig, "failed to re-raise child signal");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ChildCommand {
        ChildCommand::new("sh", ["-c", script], "RUN_MAIN_TEST")
    }

    #[test]
    fn test_raw_encoding() {
        assert_eq!(ChildExit::Code(0).raw(), 0);
        assert_eq!(ChildExit::Code(42).raw(), 42);
        assert_eq!(ChildExit::Signal(2).raw(), -2);
    }

    #[tokio::test]
    async fn test_real_exit_code_is_propagated() {
        let mut supervisor = Supervisor::new(sh("exit 42"), 3);
        assert_eq!(supervisor.supervise().await.unwrap(), ChildExit::Code(42));
    }

    #[tokio::test]
    async fn test_child_sees_role_marker() {
        let script = r#"[ "$RUN_MAIN_TEST" = "true" ] || exit 9"#;
        let mut supervisor = Supervisor::new(sh(script), 3);
        assert_eq!(supervisor.supervise().await.unwrap(), ChildExit::Code(0));
    }

    #[tokio::test]
    async fn test_restart_status_respawns_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let log = dir.path().join("log");
        // First generation asks for a restart, second exits 0.
        let script = format!(
            r#"echo "$RUN_MAIN_TEST" >> "{log}"; if [ -e "{marker}" ]; then exit 0; fi; touch "{marker}"; exit 3"#,
            log = log.display(),
            marker = marker.display()
        );
        let mut supervisor = Supervisor::new(sh(&script), 3);
        assert_eq!(supervisor.supervise().await.unwrap(), ChildExit::Code(0));

        let generations = std::fs::read_to_string(&log).unwrap();
        assert_eq!(generations.lines().collect::<Vec<_>>(), vec!["true", "true"]);
    }

    #[tokio::test]
    async fn test_custom_restart_code() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let script = format!(
            r#"if [ -e "{m}" ]; then exit 5; fi; touch "{m}"; exit 75"#,
            m = marker.display()
        );
        let mut supervisor = Supervisor::new(sh(&script), 75);
        assert_eq!(supervisor.supervise().await.unwrap(), ChildExit::Code(5));
    }

    #[tokio::test]
    async fn test_signalled_child_reports_negative_status() {
        let mut supervisor = Supervisor::new(sh("kill -TERM $$"), 3);
        let exit = supervisor.supervise().await.unwrap();
        assert_eq!(exit, ChildExit::Signal(15));
        assert_eq!(exit.raw(), -15);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let command = ChildCommand::new("/nonexistent-binary-xyz", Vec::<String>::new(), "R");
        let mut supervisor = Supervisor::new(command, 3);
        let err = supervisor.supervise().await.unwrap_err();
        assert!(matches!(err, ReloaderError::Spawn { .. }));
        assert!(err.to_string().contains("nonexistent-binary-xyz"));
    }

    #[tokio::test]
    async fn test_status_file_tracks_generations() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let status_path = dir.path().join("reloader.status");
        let script = format!(
            r#"if [ -e "{m}" ]; then exit 4; fi; touch "{m}"; exit 3"#,
            m = marker.display()
        );
        let mut supervisor =
            Supervisor::new(sh(&script), 3).with_status_file(status_path.clone());
        let exit = supervisor.supervise().await.unwrap();
        assert_eq!(exit, ChildExit::Code(4));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&status_path).unwrap()).unwrap();
        assert_eq!(json["state"], "exited");
        assert_eq!(json["generation"], 2);
        assert_eq!(json["last_exit"], 4);

        // Non-zero exits keep the file for inspection.
        supervisor.finish(exit);
        assert!(status_path.exists());
        supervisor.finish(ChildExit::Code(0));
        assert!(!status_path.exists());
    }

    /// Re-runs this test in a fresh test process, which supervises a child
    /// killed by SIGINT and then mirrors its exit.
    #[test]
    fn test_supervisor_dies_by_sigint_when_child_does() {
        use std::os::unix::process::ExitStatusExt;

        const MIRROR_VAR: &str = "RELOADER_MIRROR_SIGINT_TEST";
        if std::env::var_os(MIRROR_VAR).is_some() {
            use nix::sys::signal::{signal, SigHandler, Signal};
            // The child must not inherit an ignored SIGINT.
            unsafe { signal(Signal::SIGINT, SigHandler::SigDfl) }.unwrap();
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let mut supervisor = Supervisor::new(sh("kill -INT $$"), 3);
            let exit = runtime.block_on(supervisor.supervise()).unwrap();
            assert_eq!(exit.raw(), -2);
            drop(runtime);
            exit_like(exit);
        }

        let status = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "supervisor::tests::test_supervisor_dies_by_sigint_when_child_does",
                "--test-threads=1",
            ])
            .env(MIRROR_VAR, "1")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert_eq!(status.signal(), Some(2));
        assert_eq!(status.code(), None);
    }

    #[test]
    fn test_is_child_role() {
        std::env::set_var("RELOADER_ROLE_TEST_SET", "true");
        std::env::set_var("RELOADER_ROLE_TEST_OTHER", "1");
        assert!(is_child_role("RELOADER_ROLE_TEST_SET"));
        assert!(!is_child_role("RELOADER_ROLE_TEST_OTHER"));
        assert!(!is_child_role("RELOADER_ROLE_TEST_UNSET"));
    }

    #[test]
    fn test_current_command_reuses_executable() {
        let command = ChildCommand::current("RUN_MAIN").unwrap();
        assert_eq!(command.program(), std::env::current_exe().unwrap());
    }
}
