use clap::Parser;
use server_reloader::command::CommandTarget;
use server_reloader::{Invocation, Reloader, ReloaderConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Run a command and restart it whenever the watched source files change.
#[derive(Parser, Debug)]
#[command(name = "server-reloader", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "reloader.toml")]
    config: PathBuf,

    /// Glob pattern of files to watch (repeatable, added to the config's)
    #[arg(short, long = "watch", value_name = "GLOB")]
    watch: Vec<String>,

    /// Only restart on explicit triggers, never on file changes
    #[arg(long)]
    no_watch: bool,

    /// Scan interval in milliseconds (overrides config)
    #[arg(long, value_name = "MS")]
    interval: Option<u64>,

    /// Write supervisor status as JSON to this file (overrides config)
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Seconds the command gets to exit after SIGTERM before it is killed
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    grace: u64,

    /// Print the resolved configuration and exit
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (scans, hook execution)
    #[arg(short, long)]
    verbose: bool,

    /// Command to supervise, followed by its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Fold command-line overrides into the loaded config.
fn resolve_config(cli: &Cli) -> Result<ReloaderConfig, server_reloader::ReloaderError> {
    let mut config = ReloaderConfig::load(&cli.config)?;
    config.watch.paths.extend(cli.watch.iter().cloned());
    if cli.no_watch {
        config.reloader.watch_on_files = false;
    }
    if let Some(interval) = cli.interval {
        config.watch.interval_ms = interval;
    }
    if let Some(path) = &cli.status_file {
        config.reloader.status_file = Some(path.clone());
    }
    Ok(config)
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match resolve_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if cli.dry_run {
        println!("{config:#?}");
        println!("command: {:?}", cli.command);
        return;
    }

    let target = CommandTarget::new(config.reloader.role_env_var.clone())
        .grace_period(Duration::from_secs(cli.grace));
    let runner = target.clone();
    let result = Reloader::new(move |inv: Invocation| runner.run(&inv.args))
        .args(cli.command)
        .before_reload(target.terminator())
        .before_exit(target.terminator())
        .config(config)
        .run();

    if let Err(e) = result {
        tracing::error!(error = %e, "reloader failed");
        std::process::exit(1);
    }
}
