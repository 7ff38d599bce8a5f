use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use vrepwatch::aggregator::StreamAggregator;
use vrepwatch::api::{StreamSource, VtadminClient};
use vrepwatch::config::Config;
use vrepwatch::notify::reporter_from_config;
use vrepwatch::render::{render_snapshot, render_stream_detail};

/// Command-line arguments for the workflow stream viewer
#[derive(Parser)]
#[command(
    name = "vrepwatch",
    about = "Workflow replication stream viewer for a cluster administration API",
    long_about = "Lists the replication streams of every cluster known to the administration API, \
                  one cluster at a time, and reports request failures to the configured \
                  error-reporting backends."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// List cluster identifiers
    Clusters,

    /// Show the merged stream table of all clusters
    Streams {
        /// Refresh every SECS seconds until interrupted
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,

        /// Exit on failure instead of offering a retry
        #[arg(long)]
        no_prompt: bool,
    },

    /// Show one stream's detail document
    Stream {
        #[arg(long)]
        cluster: String,

        #[arg(long)]
        id: String,
    },
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in Config::load
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if let Command::Streams { watch: Some(0), .. } = self.command {
            return Err("Watch interval must be at least one second".to_string());
        }

        Ok(())
    }
}

/// Wait for the next tick, or forever without a watch interval
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Forward each line typed on stdin; the reader thread ends with stdin
fn spawn_prompt_reader() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            if line.is_err() || tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

async fn show_streams(
    client: Arc<VtadminClient>,
    watch: Option<u64>,
    no_prompt: bool,
) -> anyhow::Result<()> {
    let mut aggregator = StreamAggregator::new(client);
    let mut updates = aggregator.subscribe();

    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), cancelling");
        let _ = shutdown_tx.send(());
    })
    .context("Error setting SIGINT handler")?;

    let prompt = !no_prompt && std::io::stdin().is_terminal();
    let mut retries = if prompt {
        spawn_prompt_reader()
    } else {
        mpsc::unbounded_channel().1
    };

    let mut ticker = watch.map(|secs| {
        let period = Duration::from_secs(secs);
        tokio::time::interval_at(Instant::now() + period, period)
    });

    aggregator.refresh();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                println!("{}", render_snapshot(&snapshot));

                if snapshot.is_loading() {
                    continue;
                }
                if snapshot.is_error() && prompt {
                    println!("Press Enter to retry, Ctrl-C to quit");
                } else if watch.is_none() {
                    return match &snapshot.error {
                        Some(e) => Err(anyhow!("Failed to load workflows: {}", e)),
                        None => Ok(()),
                    };
                }
            }
            Some(()) = shutdown_rx.recv() => {
                aggregator.cancel();
                break;
            }
            Some(()) = retries.recv() => {
                let snapshot = aggregator.snapshot();
                if snapshot.is_error() && !snapshot.is_loading() {
                    info!("Retrying");
                    aggregator.refresh();
                }
            }
            _ = next_tick(&mut ticker) => {
                if !aggregator.is_running() {
                    aggregator.refresh();
                }
            }
        }
    }

    Ok(())
}

async fn run(command: Command, client: Arc<VtadminClient>) -> anyhow::Result<()> {
    match command {
        Command::Clusters => {
            for cluster in client.fetch_clusters().await? {
                println!("{}", cluster);
            }
            Ok(())
        }
        Command::Streams { watch, no_prompt } => show_streams(client, watch, no_prompt).await,
        Command::Stream { cluster, id } => {
            let detail = client
                .fetch_stream(&cluster, &id)
                .await
                .with_context(|| format!("Failed to load stream {} in {}", id, cluster))?;
            print!("{}", render_stream_detail(&detail));
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Reporting is up before any request goes out
    let reporter = match reporter_from_config(config.clone()) {
        Ok(reporter) => Arc::new(reporter),
        Err(e) => {
            error!("Failed to initialize error reporting: {}", e);
            std::process::exit(1);
        }
    };
    reporter.initialize();
    info!("Error reporting backends: {:?}", reporter.backend_names());

    let client = match VtadminClient::new(&config) {
        Ok(client) => Arc::new(client.with_reporter(reporter)),
        Err(e) => {
            error!("Failed to create API client: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, client).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
