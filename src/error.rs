/// Errors surfaced by the supervisor, the child runner and configuration loading.
use std::path::PathBuf;

#[derive(Debug)]
pub enum ReloaderError {
    /// Could not determine the path of the running executable.
    CurrentExe { source: std::io::Error },
    /// Failed to spawn a child process.
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    /// Failed while waiting for the child process to exit.
    Wait { source: std::io::Error },
    /// Failed to build the tokio runtime.
    Runtime { source: std::io::Error },
    /// Failed to start the thread that runs the target entry point.
    TargetThread { source: std::io::Error },
    /// Failed to read the config file.
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid TOML for `ReloaderConfig`.
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Failed to write the supervisor status file.
    Status {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A watch pattern is not a valid glob.
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },
}

impl std::fmt::Display for ReloaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReloaderError::CurrentExe { source } => {
                write!(f, "failed to locate current executable: {}", source)
            }
            ReloaderError::Spawn { program, source } => {
                write!(
                    f,
                    "failed to spawn child process {}: {}",
                    program.display(),
                    source
                )
            }
            ReloaderError::Wait { source } => {
                write!(f, "failed to wait for child process: {}", source)
            }
            ReloaderError::Runtime { source } => {
                write!(f, "failed to start async runtime: {}", source)
            }
            ReloaderError::TargetThread { source } => {
                write!(f, "failed to start target thread: {}", source)
            }
            ReloaderError::ConfigRead { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ReloaderError::ConfigParse { path, source } => {
                write!(f, "invalid config {}: {}", path.display(), source)
            }
            ReloaderError::Status { path, source } => {
                write!(
                    f,
                    "failed to update status file {}: {}",
                    path.display(),
                    source
                )
            }
            ReloaderError::InvalidPattern { pattern, source } => {
                write!(f, "invalid watch pattern {:?}: {}", pattern, source)
            }
        }
    }
}

impl std::error::Error for ReloaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReloaderError::CurrentExe { source } => Some(source),
            ReloaderError::Spawn { source, .. } => Some(source),
            ReloaderError::Wait { source } => Some(source),
            ReloaderError::Runtime { source } => Some(source),
            ReloaderError::TargetThread { source } => Some(source),
            ReloaderError::ConfigRead { source, .. } => Some(source),
            ReloaderError::ConfigParse { source, .. } => Some(source),
            ReloaderError::Status { source, .. } => Some(source),
            ReloaderError::InvalidPattern { source, .. } => Some(source),
        }
    }
}
