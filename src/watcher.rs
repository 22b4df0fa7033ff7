//! Polling source change watcher.
//!
//! Each scan asks the [`SourceRegistry`] for the currently loaded sources,
//! compares their modification signatures against the previous baseline and
//! returns a new baseline. A detected change discards the whole baseline so
//! the next scan rebuilds it from scratch.

use crate::config::NormalizeRule;
use crate::sources::SourceRegistry;
use crate::trigger::ReloadTrigger;
use filetime::FileTime;
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Effective modification signature of a file, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature(i128);

impl Signature {
    pub fn from_filetime(time: FileTime) -> Self {
        Signature(filetime_nanos(time))
    }
}

fn filetime_nanos(time: FileTime) -> i128 {
    i128::from(time.unix_seconds()) * 1_000_000_000 + i128::from(time.nanoseconds())
}

/// Compute the signature used to compare two observations of a file.
///
/// On Windows the modification time is taken relative to the creation time;
/// everywhere else it is the plain modification time.
pub fn modification_signature(meta: &Metadata) -> Signature {
    let modified = Signature::from_filetime(FileTime::from_last_modification_time(meta));

    #[cfg(windows)]
    {
        if let Some(created) = FileTime::from_creation_time(meta) {
            return Signature(modified.0 - filetime_nanos(created));
        }
    }

    modified
}

/// Last observed signature of every tracked file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    entries: BTreeMap<PathBuf, Signature>,
}

impl Baseline {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<Signature> {
        self.entries.get(path).copied()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }
}

/// Result of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub changed: bool,
    /// The first file found with a differing signature.
    pub changed_path: Option<PathBuf>,
    /// Baseline for the next scan; empty after a change.
    pub baseline: Baseline,
}

/// Rewrite a compiled-artifact path to the path of its source file.
///
/// The first rule whose `compiled` suffix matches wins. Paths that are not
/// valid UTF-8 are returned unchanged.
pub fn normalize_path(path: &Path, rules: &[NormalizeRule]) -> PathBuf {
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    for rule in rules {
        if let Some(stem) = text.strip_suffix(rule.compiled.as_str()) {
            return PathBuf::from(format!("{stem}{}", rule.source));
        }
    }
    path.to_path_buf()
}

pub struct SourceWatcher {
    registry: Box<dyn SourceRegistry>,
    rules: Vec<NormalizeRule>,
}

impl SourceWatcher {
    pub fn new(registry: Box<dyn SourceRegistry>, rules: Vec<NormalizeRule>) -> Self {
        Self { registry, rules }
    }

    /// Scan the loaded sources once against `baseline`.
    pub fn scan_once(&self, baseline: &Baseline) -> ScanOutcome {
        let mut next = BTreeMap::new();

        for raw in self.registry.loaded_sources() {
            let path = normalize_path(&raw, &self.rules);
            if next.contains_key(&path) {
                continue;
            }
            // Missing or unreadable files (e.g. inside an archive) are not tracked.
            let meta = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let signature = modification_signature(&meta);

            match baseline.get(&path) {
                Some(previous) if previous != signature => {
                    tracing::debug!(path = %path.display(), "modification detected");
                    return ScanOutcome {
                        changed: true,
                        changed_path: Some(path),
                        baseline: Baseline::default(),
                    };
                }
                _ => {
                    next.insert(path, signature);
                }
            }
        }

        ScanOutcome {
            changed: false,
            changed_path: None,
            baseline: Baseline { entries: next },
        }
    }

    /// Scan forever, setting `trigger` whenever a change is detected.
    ///
    /// Runs until aborted; returns early only if a scan task panics.
    pub async fn run_loop(self, trigger: ReloadTrigger, interval: Duration) {
        let watcher = Arc::new(self);
        let mut baseline = Baseline::default();
        loop {
            // Registries glob and stat the filesystem; keep that off the workers.
            let scanner = watcher.clone();
            let previous = baseline;
            let outcome =
                match tokio::task::spawn_blocking(move || scanner.scan_once(&previous)).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(error = %e, "source scan failed, watcher stopped");
                        return;
                    }
                };
            if outcome.changed {
                tracing::info!(
                    path = ?outcome.changed_path,
                    "source change detected, requesting reload"
                );
                trigger.set();
            } else {
                tracing::trace!(tracked = outcome.baseline.len(), "scan complete");
            }
            baseline = outcome.baseline;
            tokio::time::sleep(interval).await;
        }
    }
}
