/// Registries that report which source files currently back the running program.
///
/// The watcher asks a registry for paths on every scan, so registries may
/// return a different set each time (new files matching a glob join in).
use crate::error::ReloaderError;
use std::path::{Path, PathBuf};

/// Supplies the set of source files the running program is built from.
pub trait SourceRegistry: Send + Sync {
    /// Paths of the currently loaded sources. Paths that do not exist are
    /// allowed; the watcher skips them.
    fn loaded_sources(&self) -> Vec<PathBuf>;
}

impl<F> SourceRegistry for F
where
    F: Fn() -> Vec<PathBuf> + Send + Sync,
{
    fn loaded_sources(&self) -> Vec<PathBuf> {
        self()
    }
}

/// A fixed list of paths.
#[derive(Debug, Clone, Default)]
pub struct StaticSources {
    paths: Vec<PathBuf>,
}

impl StaticSources {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl SourceRegistry for StaticSources {
    fn loaded_sources(&self) -> Vec<PathBuf> {
        self.paths.clone()
    }
}

/// Glob patterns, expanded again on every scan.
#[derive(Debug, Clone, Default)]
pub struct GlobSources {
    patterns: Vec<String>,
}

impl GlobSources {
    /// Validate and store the patterns.
    pub fn new(patterns: &[String]) -> Result<Self, ReloaderError> {
        for pattern in patterns {
            glob::Pattern::new(pattern).map_err(|e| ReloaderError::InvalidPattern {
                pattern: pattern.clone(),
                source: e,
            })?;
        }
        Ok(Self {
            patterns: patterns.to_vec(),
        })
    }
}

impl SourceRegistry for GlobSources {
    fn loaded_sources(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for pattern in &self.patterns {
            match glob::glob(pattern) {
                // Unreadable entries are skipped like missing files.
                Ok(entries) => paths.extend(entries.flatten()),
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "invalid watch pattern");
                }
            }
        }
        paths
    }
}

/// The executable of the running process.
///
/// Resolved once at construction: on Linux the `/proc/self/exe` link stops
/// pointing at the original path once the binary is replaced on disk.
#[derive(Debug, Clone)]
pub struct ExecutableSource {
    path: PathBuf,
}

impl ExecutableSource {
    pub fn current() -> Result<Self, ReloaderError> {
        let path =
            std::env::current_exe().map_err(|e| ReloaderError::CurrentExe { source: e })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceRegistry for ExecutableSource {
    fn loaded_sources(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

/// Union of several registries.
#[derive(Default)]
pub struct Sources {
    registries: Vec<Box<dyn SourceRegistry>>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, registry: impl SourceRegistry + 'static) -> Self {
        self.registries.push(Box::new(registry));
        self
    }

    pub fn push(&mut self, registry: Box<dyn SourceRegistry>) {
        self.registries.push(registry);
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

impl SourceRegistry for Sources {
    fn loaded_sources(&self) -> Vec<PathBuf> {
        self.registries
            .iter()
            .flat_map(|r| r.loaded_sources())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_sources_returns_paths() {
        let sources = StaticSources::new(["a.rs", "b.rs"]);
        assert_eq!(
            sources.loaded_sources(),
            vec![PathBuf::from("a.rs"), PathBuf::from("b.rs")]
        );
    }

    #[test]
    fn test_glob_sources_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.rs"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let pattern = format!("{}/*.rs", dir.path().display());
        let sources = GlobSources::new(&[pattern]).unwrap();
        assert_eq!(sources.loaded_sources(), vec![dir.path().join("one.rs")]);

        std::fs::write(dir.path().join("two.rs"), "").unwrap();
        let mut found = sources.loaded_sources();
        found.sort();
        assert_eq!(
            found,
            vec![dir.path().join("one.rs"), dir.path().join("two.rs")]
        );
    }

    #[test]
    fn test_glob_sources_rejects_bad_pattern() {
        let err = GlobSources::new(&["src/***/x".to_string()]).unwrap_err();
        assert!(matches!(err, ReloaderError::InvalidPattern { .. }));
    }

    #[test]
    fn test_executable_source_points_at_existing_file() {
        let exe = ExecutableSource::current().unwrap();
        assert!(exe.path().exists());
        assert_eq!(exe.loaded_sources(), vec![exe.path().to_path_buf()]);
    }

    #[test]
    fn test_closure_registry() {
        let registry = || vec![PathBuf::from("lib.rs")];
        assert_eq!(registry.loaded_sources(), vec![PathBuf::from("lib.rs")]);
    }

    #[test]
    fn test_sources_union() {
        let sources = Sources::new()
            .with(StaticSources::new(["a.rs"]))
            .with(StaticSources::new(["b.rs"]));
        assert!(!sources.is_empty());
        assert_eq!(
            sources.loaded_sources(),
            vec![PathBuf::from("a.rs"), PathBuf::from("b.rs")]
        );
    }
}
