use crate::error::ReloaderError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, usually loaded from `reloader.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReloaderConfig {
    pub reloader: ProtocolConfig,
    pub watch: WatchConfig,
}

/// Supervisor/child protocol settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Environment variable marking a process as the child runner.
    pub role_env_var: String,
    /// Exit status a child uses to ask for a restart.
    pub restart_code: i32,
    /// How long the control loop waits on the reload trigger per wake.
    pub poll_interval_ms: u64,
    /// Start the source change watcher inside the child.
    pub watch_on_files: bool,
    /// Optional JSON status file written by the supervisor.
    pub status_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Pause between two scans.
    pub interval_ms: u64,
    /// Glob patterns of extra source files to track.
    pub paths: Vec<String>,
    /// Track the running executable itself, so a rebuild restarts the child.
    pub include_exe: bool,
    /// Compiled-artifact suffix rewrites applied before tracking a path.
    pub normalize: Vec<NormalizeRule>,
}

/// Maps a compiled artifact suffix onto the suffix of its source file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NormalizeRule {
    pub compiled: String,
    pub source: String,
}

impl NormalizeRule {
    pub fn new(compiled: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            compiled: compiled.into(),
            source: source.into(),
        }
    }
}

// --- Default implementations ---

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            role_env_var: "RUN_MAIN".to_string(),
            restart_code: 3,
            poll_interval_ms: 1000,
            watch_on_files: true,
            status_file: None,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            paths: Vec::new(),
            include_exe: true,
            normalize: vec![
                NormalizeRule::new(".pyc", ".py"),
                NormalizeRule::new(".pyo", ".py"),
                NormalizeRule::new("$py.class", ".py"),
            ],
        }
    }
}

impl ProtocolConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl WatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ReloaderConfig {
    /// Load the config from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ReloaderError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ReloaderError::ConfigRead {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::parse(&contents).map_err(|e| ReloaderError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let config = ReloaderConfig::default();
        assert_eq!(config.reloader.role_env_var, "RUN_MAIN");
        assert_eq!(config.reloader.restart_code, 3);
        assert_eq!(config.reloader.poll_interval(), Duration::from_secs(1));
        assert!(config.reloader.watch_on_files);
        assert_eq!(config.watch.interval(), Duration::from_secs(1));
        assert!(config.watch.include_exe);
        assert_eq!(config.watch.normalize.len(), 3);
    }

    #[test]
    fn test_parse_partial_config_keeps_defaults() {
        let config = ReloaderConfig::parse(
            r#"
[reloader]
watch_on_files = false

[watch]
paths = ["src/**/*.rs"]
"#,
        )
        .unwrap();
        assert!(!config.reloader.watch_on_files);
        assert_eq!(config.reloader.restart_code, 3);
        assert_eq!(config.watch.paths, vec!["src/**/*.rs".to_string()]);
        assert_eq!(config.watch.interval_ms, 1000);
    }

    #[test]
    fn test_parse_normalize_rules_replace_defaults() {
        let config = ReloaderConfig::parse(
            r#"
[[watch.normalize]]
compiled = ".o"
source = ".c"
"#,
        )
        .unwrap();
        assert_eq!(config.watch.normalize, vec![NormalizeRule::new(".o", ".c")]);
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        assert!(ReloaderConfig::parse("[reloader]\nrestart_code = \"three\"\n").is_err());
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReloaderConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.reloader.role_env_var, "RUN_MAIN");
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reloader.toml");
        std::fs::write(&path, "[reloader\n").unwrap();
        let err = ReloaderConfig::load(&path).unwrap_err();
        assert!(matches!(err, ReloaderError::ConfigParse { .. }));
        assert!(err.to_string().contains("reloader.toml"));
    }

    #[test]
    fn test_load_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reloader.toml");
        std::fs::write(&path, "[reloader]\nstatus_file = \"reloader.status\"\n").unwrap();
        let config = ReloaderConfig::load(&path).unwrap();
        assert_eq!(
            config.reloader.status_file,
            Some(PathBuf::from("reloader.status"))
        );
    }
}
