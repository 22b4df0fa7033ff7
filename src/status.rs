/// Status file: the supervisor writes its state as JSON on every transition.
///
/// Readers only ever see a complete document; it is renamed into place.
use crate::error::ReloaderError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Supervisor states written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Spawning,
    Running,
    Restarting,
    Exited,
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: SupervisorState,
    pub generation: u64,
    pub child_pid: Option<u32>,
    /// Raw exit status of the last child; negative values are signals.
    pub last_exit: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// Writes and removes the status file.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Replace the status file with `data` via a temp file in the same
    /// directory, so readers never see a partial document.
    pub fn write(&self, data: &StatusData) -> Result<(), ReloaderError> {
        let json = serde_json::to_vec_pretty(data).map_err(|e| self.error(e.into()))?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".reloader.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, &json).map_err(|e| self.error(e))?;
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(self.error(e));
        }
        Ok(())
    }

    fn error(&self, source: std::io::Error) -> ReloaderError {
        ReloaderError::Status {
            path: self.path.clone(),
            source,
        }
    }

    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Tracks supervisor progress and rewrites the status file on each update.
pub struct StatusTracker {
    file: StatusFile,
    pid: u32,
    generation: u64,
    child_pid: Option<u32>,
    last_exit: Option<i32>,
    started_at: DateTime<Utc>,
}

impl StatusTracker {
    pub fn new(status_path: PathBuf) -> Self {
        Self {
            file: StatusFile::new(status_path),
            pid: std::process::id(),
            generation: 0,
            child_pid: None,
            last_exit: None,
            started_at: Utc::now(),
        }
    }

    /// Update and write the status file with the given state.
    ///
    /// Write failures are logged; they never stop supervision.
    pub fn update(&self, state: SupervisorState) {
        let data = self.snapshot(state);
        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    pub fn snapshot(&self, state: SupervisorState) -> StatusData {
        StatusData {
            pid: self.pid,
            state,
            generation: self.generation,
            child_pid: self.child_pid,
            last_exit: self.last_exit,
            started_at: self.started_at,
            last_update: Utc::now(),
        }
    }

    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
        self.child_pid = None;
    }

    pub fn set_child_pid(&mut self, pid: Option<u32>) {
        self.child_pid = pid;
    }

    pub fn set_last_exit(&mut self, raw: i32) {
        self.last_exit = Some(raw);
        self.child_pid = None;
    }

    pub fn remove(&self) {
        self.file.remove();
    }
}
