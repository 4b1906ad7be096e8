//! netsyncd entry point.
//!
//! Runs one sync job over the configured inventory and prints the run
//! report. The exit code is non-zero when the run aborted or recorded
//! failures.

use anyhow::Context;
use clap::{Parser, Subcommand};
use netsync_extract::MappingTable;
use netsync_syncd::{
    CommandExecutor, Dispatcher, JobParams, JobRunner, MemoryDatastore, NetsyncConfig,
    ReplayExecutor, ShellCommandExecutor, SyncDevices, SyncJob, SyncNetworkData,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Network source-of-truth sync daemon
#[derive(Parser, Debug)]
#[command(name = "netsyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = netsync_syncd::config_file::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Compute and report the diff without applying it
    #[arg(long)]
    dry_run: bool,

    /// Only run against these inventory addresses
    #[arg(long, value_delimiter = ',')]
    hosts: Vec<String>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    job: Job,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Job {
    /// Onboard devices: manufacturer, platform, device type, device and
    /// management address
    SyncDevices,
    /// Sync software version, VLANs, VRFs, interfaces and addresses of
    /// onboarded devices
    SyncNetworkData,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("netsyncd: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!(error = %format!("{:#}", e), "netsyncd failed");
            ExitCode::FAILURE
        }
    }
}

/// Structured logging to stderr; `RUST_LOG` overrides `--log-level`.
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log level")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init()
        .context("failed to install the log subscriber")?;
    Ok(())
}

/// Runs the selected job. Returns whether the run was clean.
async fn run(args: Args) -> anyhow::Result<bool> {
    let config = NetsyncConfig::load_or_default(&args.config)?;
    config.validate()?;

    let mappings = MappingTable::layered(config.mappings.override_dir.as_deref())
        .context("failed to load mapping tables")?;
    let executor: Arc<dyn CommandExecutor> = match &config.dispatcher.replay_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Replaying captured command output");
            Arc::new(ReplayExecutor::new(dir))
        }
        None => Arc::new(ShellCommandExecutor::new(
            config.dispatcher.connect_command.clone(),
            config.command_timeout(),
        )),
    };
    let dispatcher = Dispatcher::new(executor, config.dispatcher.max_workers);

    let snapshot = &config.datastore.snapshot_path;
    let datastore = Arc::new(MemoryDatastore::load_or_default(snapshot)?);

    let hosts: Vec<_> = config
        .inventory
        .iter()
        .filter(|h| args.hosts.is_empty() || args.hosts.contains(&h.address))
        .cloned()
        .collect();
    info!(hosts = hosts.len(), job = ?args.job, dry_run = args.dry_run, "Starting run");

    let params = JobParams::new(config.sync.clone());
    let job: Box<dyn SyncJob> = match args.job {
        Job::SyncDevices => Box::new(SyncDevices::new()),
        Job::SyncNetworkData => Box::new(SyncNetworkData::new(params)),
    };

    let runner = JobRunner::new(mappings, dispatcher, datastore.clone(), config.sync.clone())
        .with_dry_run(args.dry_run);
    let report = runner.run(job.as_ref(), &hosts).await;

    if !args.dry_run && report.error.is_none() {
        datastore
            .save(snapshot)
            .with_context(|| format!("failed to save {}", snapshot.display()))?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render_text());
    }
    Ok(report.is_clean())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "netsyncd",
            "--dry-run",
            "--hosts",
            "10.0.0.1,10.0.0.2",
            "sync-network-data",
        ])
        .unwrap();
        assert!(args.dry_run);
        assert_eq!(args.hosts, vec!["10.0.0.1", "10.0.0.2"]);
        assert!(matches!(args.job, Job::SyncNetworkData));
        assert_eq!(
            args.config,
            PathBuf::from(netsync_syncd::config_file::DEFAULT_CONFIG_PATH)
        );
    }

    #[test]
    fn test_job_is_required() {
        assert!(Args::try_parse_from(["netsyncd"]).is_err());
    }
}
