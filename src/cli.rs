//! Command line interface.
//!
//! Every invocation builds a fresh worker over the configured storage,
//! [restores](ServiceWorker::restore) whatever an earlier invocation left
//! behind, and runs one lifecycle event against it.

use crate::error::{ErrorKind, Result};
use clap::{ArgAction, Parser, Subcommand};
use exn::ResultExt;
use shellsync_config::Config;
use shellsync_fetch::HttpFetcher;
use shellsync_storage::backend::LocalStorage;
use shellsync_worker::{
    CacheStatus, Command, Deployment, Generations, InterceptDecision, Origin, ServiceWorker, Source, WorkerState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Versioned offline cache for a static web application.
#[derive(Parser, Debug)]
#[command(name = "shellsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log debug output (also see RUST_LOG)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SHELLSYNC_CONFIG_FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stage the application shell of the deployment
    Install,
    /// Reconcile caches against the deployment and start serving it
    Activate,
    /// Install, then activate
    Update,
    /// Show how a request would be served
    Resolve {
        url: String,
    },
    /// Serve a request, filling the cache on a miss
    Fetch {
        url: String,
        /// Write the body here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Cache every resource of the deployment for offline use
    DownloadOffline,
    /// Post a client command (`skipWaiting`, `downloadOffline`)
    Message {
        token: String,
    },
    /// Report the state of every cache generation
    Status,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Update => "update",
            Self::Resolve { .. } => "resolve",
            Self::Fetch { .. } => "fetch",
            Self::DownloadOffline => "download-offline",
            Self::Message { .. } => "message",
            Self::Status => "status",
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let mut worker = build_worker(&config).await?;
    let state = worker.restore().await.or_raise(|| ErrorKind::Command("restore"))?;
    tracing::debug!(%state, "Restored worker");
    dispatch(cli.command, &mut worker).await
}

async fn build_worker(config: &Config) -> Result<ServiceWorker> {
    let origin = Origin::parse(&config.origin).or_raise(|| ErrorKind::Config)?;
    let root = config.storage_root().or_raise(|| ErrorKind::Config)?;
    let storage = LocalStorage::new("local", &root).or_raise(|| ErrorKind::Setup("cache storage"))?;
    let fetcher = HttpFetcher::new(config.fetch.timeout()).or_raise(|| ErrorKind::Setup("HTTP client"))?;
    let deployment = Deployment::load(&config.deployment).await.or_raise(|| ErrorKind::Setup("deployment"))?;
    let generations = Generations {
        durable: config.buckets.durable.clone(),
        staging: config.buckets.staging.clone(),
        manifest: config.buckets.manifest.clone(),
    };
    tracing::debug!(root = %root.display(), resources = deployment.resources.len(), "Built worker");
    Ok(ServiceWorker::new(Arc::new(storage), Arc::new(fetcher), origin, generations, deployment))
}

async fn dispatch(command: Commands, worker: &mut ServiceWorker) -> Result<()> {
    let name = command.name();
    let failed = || ErrorKind::Command(name);
    match command {
        Commands::Install => {
            worker.install().await.or_raise(failed)?;
            println!("Staged {} shell resources", worker.deployment().core.len());
        },
        Commands::Activate => activate(worker).await.or_raise(failed)?,
        Commands::Update => {
            worker.install().await.or_raise(failed)?;
            activate(worker).await.or_raise(failed)?;
        },
        Commands::Resolve { url } => match worker.resolve(&url) {
            InterceptDecision::ServeFromCache(key) => println!("cache {key}"),
            InterceptDecision::PassThrough => println!("network"),
        },
        Commands::Fetch { url, output } => {
            let handled = worker.fetch(&url).await.or_raise(failed)?;
            let source = handled.source;
            let response = handled.finish().await.or_raise(failed)?;
            tracing::info!(status = response.status, cached = source == Source::Cache, "Fetched {url}");
            write_body(output, &response.body).await?;
        },
        Commands::DownloadOffline => worker.message(Command::DownloadOffline).await.or_raise(failed)?,
        Commands::Message { token } => {
            let command = token.parse::<Command>().or_raise(failed)?;
            worker.message(command).await.or_raise(failed)?;
            println!("Handled {command}; worker is {}", worker.state());
        },
        Commands::Status => {
            let status = worker.status().await.or_raise(failed)?;
            print_status(worker.state(), &status);
        },
    }
    Ok(())
}

async fn activate(worker: &mut ServiceWorker) -> shellsync_worker::error::Result<()> {
    let outcome = worker.activate().await?;
    println!(
        "Activated: kept {}, evicted {}, promoted {}{}",
        outcome.kept,
        outcome.evicted,
        outcome.promoted,
        if outcome.reset { " (reset)" } else { "" },
    );
    Ok(())
}

async fn write_body(output: Option<PathBuf>, body: &[u8]) -> Result<()> {
    match output {
        Some(path) => tokio::fs::write(&path, body).await.or_raise(|| ErrorKind::Output),
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(body).await.or_raise(|| ErrorKind::Output)?;
            stdout.flush().await.or_raise(|| ErrorKind::Output)
        },
    }
}

fn print_status(state: WorkerState, status: &CacheStatus) {
    println!("state:    {state}");
    println!("record:   {}", if status.record.is_some() { "present" } else { "absent" });
    println!("durable:  {} entries", status.durable_entries);
    println!("staging:  {} entries", status.staging_entries);
    println!("cached:   {} resources", status.cached.len());
    println!("missing:  {} resources", status.missing.len());
    for key in &status.missing {
        println!("  {key}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from(["shellsync", "-v", "fetch", "https://app.example.com/", "-o", "index.html"]).unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Fetch { url, output } => {
                assert_eq!(url, "https://app.example.com/");
                assert_eq!(output, Some(PathBuf::from("index.html")));
            },
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_subcommand_names() {
        for (args, name) in [
            (vec!["shellsync", "download-offline"], "download-offline"),
            (vec!["shellsync", "message", "skipWaiting"], "message"),
            (vec!["shellsync", "--config", "shellsync.toml", "status"], "status"),
        ] {
            assert_eq!(Cli::try_parse_from(args).unwrap().command.name(), name);
        }
    }
}
