//! Run a program under an autoreloading supervisor.
//!
//! The first process becomes the supervisor: it re-executes the current
//! binary with a role marker in the environment and waits. The re-executed
//! child runs the entry point on a background thread, polls its source files
//! and exits with the restart status when one of them changes. The
//! supervisor then starts a fresh child; any other exit status (or a fatal
//! signal) is passed through as its own.
//!
//! ```no_run
//! use server_reloader::{Invocation, Reloader};
//!
//! fn serve(inv: Invocation) -> i32 {
//!     println!("serving on port {}", inv.kwarg("port").unwrap_or("8000"));
//!     0
//! }
//!
//! fn main() {
//!     let result = Reloader::new(serve)
//!         .kwarg("port", "8080")
//!         .before_reload(|| println!("reloading"))
//!         .run();
//!     if let Err(e) = result {
//!         eprintln!("{e}");
//!         std::process::exit(1);
//!     }
//! }
//! ```

pub mod child;
#[cfg(unix)]
pub mod command;
pub mod config;
pub mod error;
pub mod sources;
pub mod status;
pub mod supervisor;
pub mod target;
pub mod terminal;
pub mod trigger;
pub mod watcher;

pub use child::{ChildDecision, ChildRunner, Hooks};
pub use config::ReloaderConfig;
pub use error::ReloaderError;
pub use sources::{SourceRegistry, Sources};
pub use supervisor::{ChildCommand, ChildExit, Supervisor};
pub use target::{EntryPoint, Invocation, Outcome};
pub use trigger::ReloadTrigger;

use sources::{ExecutableSource, GlobSources};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::io::Write;
use watcher::SourceWatcher;

/// Builder for one supervised program.
pub struct Reloader {
    main_func: EntryPoint,
    args: Vec<String>,
    kwargs: BTreeMap<String, String>,
    hooks: Hooks,
    watch_on_files: Option<bool>,
    registries: Vec<Box<dyn SourceRegistry>>,
    config: ReloaderConfig,
}

impl Reloader {
    pub fn new<F>(main_func: F) -> Self
    where
        F: FnOnce(Invocation) -> i32 + Send + 'static,
    {
        Self {
            main_func: Box::new(main_func),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            hooks: Hooks::default(),
            watch_on_files: None,
            registries: Vec::new(),
            config: ReloaderConfig::default(),
        }
    }

    /// Positional arguments handed to the entry point.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add one keyword argument for the entry point.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn kwargs<I, K, V>(mut self, kwargs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.kwargs
            .extend(kwargs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Runs on the child's control loop right before a restart.
    pub fn before_reload(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.hooks.before_reload = Box::new(hook);
        self
    }

    /// Runs in the child when Ctrl-C interrupts it.
    pub fn before_exit(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.hooks.before_exit = Box::new(hook);
        self
    }

    /// Override `reloader.watch_on_files` from the config.
    pub fn watch_on_files(mut self, enabled: bool) -> Self {
        self.watch_on_files = Some(enabled);
        self
    }

    /// Add a registry of source files to watch, next to the ones the
    /// config describes.
    pub fn registry(mut self, registry: impl SourceRegistry + 'static) -> Self {
        self.registries.push(Box::new(registry));
        self
    }

    pub fn config(mut self, config: ReloaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether this process is a child runner rather than the supervisor.
    pub fn is_child(&self) -> bool {
        supervisor::is_child_role(&self.config.reloader.role_env_var)
    }

    /// Take the role this process was started in and run it to completion.
    ///
    /// Never returns on success: both roles end by exiting the process with
    /// the status the protocol prescribes.
    pub fn run(self) -> Result<Infallible, ReloaderError> {
        if self.is_child() {
            self.run_child()
        } else {
            self.run_supervisor()
        }
    }

    fn run_supervisor(self) -> Result<Infallible, ReloaderError> {
        let protocol = &self.config.reloader;
        let command = ChildCommand::current(protocol.role_env_var.clone())?;
        let mut supervisor = Supervisor::new(command, protocol.restart_code);
        if let Some(path) = &protocol.status_file {
            supervisor = supervisor.with_status_file(path.clone());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ReloaderError::Runtime { source: e })?;
        let exit = runtime.block_on(supervisor.supervise())?;
        drop(runtime);

        supervisor.finish(exit);
        supervisor::exit_like(exit)
    }

    fn run_child(self) -> Result<Infallible, ReloaderError> {
        let protocol = self.config.reloader.clone();
        let watch = self.config.watch.clone();
        let watch_on_files = self.watch_on_files.unwrap_or(protocol.watch_on_files);

        let mut runner = ChildRunner::new(self.main_func)
            .args(self.args)
            .kwargs(self.kwargs)
            .hooks(self.hooks)
            .poll_interval(protocol.poll_interval());

        if watch_on_files {
            let mut sources = Sources::new();
            if watch.include_exe {
                let exe = ExecutableSource::current()?;
                tracing::debug!(path = %exe.path().display(), "watching executable");
                sources.push(Box::new(exe));
            }
            if !watch.paths.is_empty() {
                sources.push(Box::new(GlobSources::new(&watch.paths)?));
            }
            for registry in self.registries {
                sources.push(registry);
            }
            if sources.is_empty() {
                tracing::warn!("no source files to watch, only explicit triggers will reload");
            }
            let watcher = SourceWatcher::new(Box::new(sources), watch.normalize.clone());
            runner = runner.watcher(watcher, watch.interval());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ReloaderError::Runtime { source: e })?;
        let decision = runtime.block_on(runner.drive(child::ctrl_c()))?;

        let code = decision.exit_code(protocol.restart_code);
        tracing::debug!(?decision, code, "child exiting");
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        // The entry point thread may still be running; exit without waiting.
        std::process::exit(code)
    }
}

impl std::fmt::Debug for Reloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reloader")
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .field("watch_on_files", &self.watch_on_files)
            .field("registries", &self.registries.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_arguments() {
        let reloader = Reloader::new(|_inv| 0)
            .args(["serve", "--fast"])
            .kwarg("port", "8080")
            .kwargs([("host", "localhost")])
            .watch_on_files(false);
        assert_eq!(reloader.args, vec!["serve", "--fast"]);
        assert_eq!(reloader.kwargs.get("port").map(String::as_str), Some("8080"));
        assert_eq!(
            reloader.kwargs.get("host").map(String::as_str),
            Some("localhost")
        );
        assert_eq!(reloader.watch_on_files, Some(false));
    }

    #[test]
    fn test_role_follows_configured_marker() {
        let mut config = ReloaderConfig::default();
        config.reloader.role_env_var = "RELOADER_LIB_TEST_ROLE".to_string();
        let reloader = Reloader::new(|_inv| 0).config(config.clone());
        assert!(!reloader.is_child());

        std::env::set_var("RELOADER_LIB_TEST_ROLE", "true");
        let reloader = Reloader::new(|_inv| 0).config(config);
        assert!(reloader.is_child());
    }

    #[test]
    fn test_debug_output_omits_closures() {
        let reloader = Reloader::new(|_inv| 0).registry(sources::StaticSources::new(["a.rs"]));
        let debug = format!("{:?}", reloader);
        assert!(debug.contains("registries: 1"));
    }
}
