//! artifact-publisher -- publish artifacts to an S3-compatible store and
//! check submission payloads from the command line.
//!
//! Uploads run on the bounded worker pool; SIGTERM/SIGINT stop waiting
//! for results but still drain every queued upload before exiting, so no
//! object is left half-written.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use artifact_publisher::config::{Config, LoggingConfig};
use artifact_publisher::submission::{CheckInProtectedReportsValidator, SubmissionPayload};
use artifact_publisher::ObjectStorePublisher;

/// Read when `--config` is not given; a missing file here means defaults.
const DEFAULT_CONFIG_PATH: &str = "artifact-publisher.yaml";

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "artifact-publisher",
    version,
    about = "Publish artifacts to an S3-compatible object store"
)]
struct Cli {
    /// Path to the YAML configuration file [default: artifact-publisher.yaml].
    #[arg(short, long)]
    config: Option<String>,

    /// Override the object store backend (s3 or memory).
    #[arg(long)]
    backend: Option<String>,

    /// Override the upload worker count.
    #[arg(long)]
    workers: Option<usize>,

    /// Print Prometheus metrics to stdout before exiting.
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files (directories are walked recursively).
    Publish {
        /// Files or directories to publish.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Key prefix; defaults to the configured list path.
        #[arg(long)]
        prefix: Option<String>,
    },
    /// List stored keys.
    List {
        /// Key prefix; defaults to the configured list path.
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Delete objects by key.
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Check a JSON submission payload's check-in protected reports.
    Verify {
        /// Path to the JSON payload.
        payload: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_configuration(cli.config.as_deref())?;
    if let Some(backend) = cli.backend.clone() {
        config.object_store.backend = backend;
    }
    if let Some(workers) = cli.workers {
        config.object_store.max_number_of_workers = workers;
    }
    artifact_publisher::config::validate(&config)?;

    init_tracing(&config.logging);
    info!("Configuration: {:?}", config.object_store);

    if config.observability.metrics {
        artifact_publisher::metrics::init_metrics()?;
        artifact_publisher::metrics::describe_metrics();
    }

    let result = run(cli.command, &config).await;

    if cli.print_metrics {
        if let Some(rendered) = artifact_publisher::metrics::render() {
            println!("{rendered}");
        }
    }

    result
}

/// Load the configuration file.  Only the default path may be absent;
/// an explicit `--config` that does not exist is an error.
fn load_configuration(explicit: Option<&str>) -> anyhow::Result<Config> {
    let path = match explicit {
        Some(path) => path,
        None if !Path::new(DEFAULT_CONFIG_PATH).exists() => {
            return Ok(Config::default());
        }
        None => DEFAULT_CONFIG_PATH,
    };
    artifact_publisher::config::load_config(path)
        .with_context(|| format!("loading configuration from {path}"))
}

async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Verify { payload } => verify(&payload),
        Command::Publish { paths, prefix } => {
            let publisher = ObjectStorePublisher::from_config(config).await?;
            let prefix = prefix.unwrap_or_else(|| config.publishing.list_path.clone());
            let result = publish(&publisher, &paths, &prefix).await;
            publisher.shutdown().await;
            result
        }
        Command::List { prefix } => {
            let publisher = ObjectStorePublisher::from_config(config).await?;
            let prefix = prefix.unwrap_or_else(|| config.publishing.list_path.clone());
            let result = publisher.client().list_keys(&prefix).await;
            publisher.shutdown().await;
            for key in result? {
                println!("{key}");
            }
            Ok(())
        }
        Command::Delete { keys } => {
            let publisher = ObjectStorePublisher::from_config(config).await?;
            let mut failed = 0usize;
            for key in &keys {
                match publisher.client().delete(key).await {
                    Ok(()) => info!("Deleted {}", key),
                    Err(e) => {
                        error!("{}", e);
                        failed += 1;
                    }
                }
            }
            publisher.shutdown().await;
            if failed > 0 {
                anyhow::bail!("{failed} of {} deletions failed", keys.len());
            }
            Ok(())
        }
    }
}

fn verify(path: &Path) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading payload {}", path.display()))?;
    let payload: SubmissionPayload = serde_json::from_str(&contents)
        .with_context(|| format!("parsing payload {}", path.display()))?;

    let outcome = CheckInProtectedReportsValidator::new().verify(&payload);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    outcome.into_result()?;
    info!(
        "Payload accepted: {} check-in report(s)",
        payload.check_in_protected_reports.len()
    );
    Ok(())
}

async fn publish(publisher: &ObjectStorePublisher, paths: &[PathBuf], prefix: &str) -> anyhow::Result<()> {
    let mut handles = Vec::new();
    for (key, file) in collect_artifacts(paths, prefix)? {
        let payload = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
        handles.push(publisher.publish(key, Bytes::from(payload))?);
    }
    info!("Queued {} artifact(s) under '{}'", handles.len(), prefix);

    let total = handles.len();
    let wait_all = async {
        let mut failed = 0usize;
        for handle in handles {
            match handle.wait().await {
                Ok(receipt) => info!(
                    "Published {} ({} bytes, {} attempt(s))",
                    receipt.object_key, receipt.bytes, receipt.attempts
                ),
                Err(e) => {
                    error!("{}", e);
                    failed += 1;
                }
            }
        }
        failed
    };

    let failed = tokio::select! {
        failed = wait_all => failed,
        _ = shutdown_signal() => {
            warn!("Interrupted; draining queued uploads before exit");
            publisher.shutdown().await;
            anyhow::bail!("interrupted before all uploads were confirmed");
        }
    };

    if failed > 0 {
        anyhow::bail!("{failed} of {total} uploads failed");
    }
    Ok(())
}

/// Map files to object keys: `<prefix>/<path relative to the argument>`.
fn collect_artifacts(paths: &[PathBuf], prefix: &str) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let prefix = prefix.trim_end_matches('/');
    let mut artifacts = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut files = Vec::new();
            walk(path, &mut files)?;
            for file in files {
                let relative = file.strip_prefix(path)?;
                artifacts.push((object_key(prefix, relative), file));
            }
        } else {
            let name = path
                .file_name()
                .with_context(|| format!("{} has no file name", path.display()))?;
            artifacts.push((object_key(prefix, Path::new(name)), path.clone()));
        }
    }
    Ok(artifacts)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.path());
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn object_key(prefix: &str, relative: &Path) -> String {
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if prefix.is_empty() {
        relative
    } else {
        format!("{prefix}/{relative}")
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
