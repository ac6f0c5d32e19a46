//! rmwatch CLI
//!
//! Usage: rmwatch <COMMAND>
//!
//! Commands:
//!   watch    Watch directories and convert notebooks as they change
//!   convert  Convert notebooks once and exit

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rmwatch::watch::{WatchEventSource, WatchRoot, WatcherEngine};
use rmwatch::{Config, ConversionDispatcher};

/// rmwatch - convert reMarkable notebook pages to PDF
#[derive(Parser, Debug)]
#[command(name = "rmwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (otherwise $RMWATCH_CONFIG, then ./rmwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch directories and convert notebooks as they change
    Watch {
        /// Directories to watch
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// Directory the PDFs are written to
        #[arg(short, long)]
        output: PathBuf,

        /// Seconds a file must stay unchanged before it is converted
        #[arg(long)]
        delay: Option<f64>,

        /// Only watch the top level of each directory
        #[arg(long)]
        no_recursive: bool,

        /// Directory for temporary backend output
        #[arg(long)]
        staging: Option<PathBuf>,

        /// Don't convert notebooks that changed while rmwatch was not running
        #[arg(long)]
        no_catch_up: bool,
    },

    /// Convert notebooks once and exit (non-zero if any conversion failed)
    Convert {
        /// Notebook files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Directory the PDFs are written to
        #[arg(short, long)]
        output: PathBuf,

        /// Only scan the top level of each directory
        #[arg(long)]
        no_recursive: bool,

        /// Directory for temporary backend output
        #[arg(long)]
        staging: Option<PathBuf>,
    },
}

impl Commands {
    /// Fold command-line flags into the loaded configuration.
    fn apply_overrides(&self, config: &mut Config) {
        match self {
            Commands::Watch {
                delay,
                no_recursive,
                staging,
                no_catch_up,
                ..
            } => {
                if let Some(delay) = delay {
                    config.watch.delay_secs = *delay;
                }
                if *no_recursive {
                    config.watch.recursive = false;
                }
                if *no_catch_up {
                    config.watch.catch_up = false;
                }
                if staging.is_some() {
                    config.output.staging_dir = staging.clone();
                }
            }
            Commands::Convert {
                no_recursive, staging, ..
            } => {
                if *no_recursive {
                    config.watch.recursive = false;
                }
                if staging.is_some() {
                    config.output.staging_dir = staging.clone();
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    cli.command.apply_overrides(&mut config);
    config.validate()?;

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.logging.level.as_str()),
    )
    .init();

    match cli.command {
        Commands::Watch { dirs, output, .. } => run_watch(config, dirs, output).await,
        Commands::Convert { paths, output, .. } => run_convert(config, paths, output).await,
    }
}

async fn run_watch(config: Config, dirs: Vec<PathBuf>, output: PathBuf) -> Result<ExitCode> {
    log::info!("Starting rmwatch v{}", env!("CARGO_PKG_VERSION"));

    let roots = dirs
        .into_iter()
        .map(|dir| WatchRoot::new(dir, config.watch.recursive).validate())
        .collect::<rmwatch::Result<Vec<_>>>()?;

    std::fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create output directory {}", output.display()))?;

    for root in &roots {
        log::info!(
            "Watching {}{}",
            root.path.display(),
            if root.recursive { " (recursive)" } else { "" }
        );
    }
    log::info!("Output: {}", output.display());
    log::info!("Debounce: {:?}", config.delay());

    let dispatcher = Arc::new(ConversionDispatcher::from_config(&config));
    let source = WatchEventSource::subscribe(&roots)?;
    let mut engine = WatcherEngine::new(roots, &output, dispatcher, config.delay())
        .with_shutdown_policy(config.shutdown.in_flight, config.shutdown_timeout());

    if config.watch.catch_up {
        match engine.catch_up() {
            Ok(0) => {}
            Ok(count) => log::info!("Catching up on {} notebook(s)", count),
            Err(e) => log::warn!("catch-up scan failed: {}", e),
        }
    }

    log::info!("Watching for changes (Ctrl+C to stop)");
    let summary = engine.run(source, shutdown_signal()).await;
    log::info!("Stopped: {}", summary);
    Ok(ExitCode::SUCCESS)
}

async fn run_convert(config: Config, paths: Vec<PathBuf>, output: PathBuf) -> Result<ExitCode> {
    std::fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create output directory {}", output.display()))?;

    let dispatcher = Arc::new(ConversionDispatcher::from_config(&config));
    let summary = WatcherEngine::convert_once(&paths, &output, config.watch.recursive, dispatcher).await;

    println!("{}", summary);
    if !summary.has_failures() {
        return Ok(ExitCode::SUCCESS);
    }

    println!("Failed:");
    for failure in &summary.failures {
        println!("  {}: {}", failure.source.display(), failure.reason);
    }
    Ok(ExitCode::FAILURE)
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    log::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_flags_override_config() {
        let cli = Cli::try_parse_from([
            "rmwatch", "watch", "/w", "--output", "/o", "--delay", "2.5", "--no-recursive", "--no-catch-up",
            "--staging", "/s",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.command.apply_overrides(&mut config);
        assert_eq!(config.watch.delay_secs, 2.5);
        assert!(!config.watch.recursive);
        assert!(!config.watch.catch_up);
        assert_eq!(config.output.staging_dir, Some(PathBuf::from("/s")));
    }

    #[test]
    fn test_convert_keeps_config_defaults() {
        let cli = Cli::try_parse_from(["rmwatch", "convert", "a.rm", "b", "-o", "/o"]).unwrap();
        let mut config = Config::default();
        cli.command.apply_overrides(&mut config);
        assert!(config.watch.recursive);
        assert_eq!(config.output.staging_dir, None);

        match cli.command {
            Commands::Convert { paths, output, .. } => {
                assert_eq!(paths, vec![PathBuf::from("a.rm"), PathBuf::from("b")]);
                assert_eq!(output, PathBuf::from("/o"));
            }
            other => panic!("expected convert, got {:?}", other),
        }
    }

    #[test]
    fn test_watch_requires_output() {
        assert!(Cli::try_parse_from(["rmwatch", "watch", "/w"]).is_err());
        assert!(Cli::try_parse_from(["rmwatch", "convert", "--output", "/o"]).is_err());
    }
}
