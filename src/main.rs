//! NDB Operator - reconciles MySQL NDB Cluster deployments on Kubernetes

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ndb_operator::config::{
    ControllerConfig, DEFAULT_ACCEPT_REQUEUE, DEFAULT_POLL_INTERVAL, DEFAULT_RESYNC_PERIOD,
    DEFAULT_WORKERS,
};
use ndb_operator::controller::{
    run_workers, spawn_watches, EventRouter, KubeClusterClient, KubeWorkloadClient, SyncEngine,
    WatchScope,
};
use ndb_operator::crd::NdbCluster;
use ndb_operator::events::KubeEventPublisher;
use ndb_operator::retry::{retry_with_backoff, RetryConfig};
use ndb_operator::webhook::{serve, webhook_router, NdbClusterAdmission, WebhookConfig};
use ndb_operator::FIELD_MANAGER;

/// NDB Operator - staged rollouts of NdbCluster resources
#[derive(Parser, Debug)]
#[command(name = "ndb-operator", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sync controller (default mode)
    ///
    /// Installs the NdbCluster CRD, watches NdbClusters and the workloads
    /// they own, and converges each cluster one staged step at a time.
    Controller(ControllerArgs),

    /// Serve the NdbCluster admission webhook
    Webhook(WebhookArgs),

    /// Print the NdbCluster CRD as YAML and exit
    Crd,
}

/// Controller mode arguments
#[derive(Args, Debug)]
struct ControllerArgs {
    /// Number of concurrent sync workers
    #[arg(long, env = "NDB_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Seconds between passes while a rollout is in progress
    #[arg(long, env = "NDB_POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    poll_interval_secs: u64,

    /// Milliseconds before the pass that follows accepting a new generation
    #[arg(
        long,
        env = "NDB_ACCEPT_REQUEUE_MS",
        default_value_t = DEFAULT_ACCEPT_REQUEUE.as_millis() as u64
    )]
    accept_requeue_ms: u64,

    /// Seconds between resyncs of every known NdbCluster; 0 disables resync
    #[arg(long, env = "NDB_RESYNC_SECS", default_value_t = DEFAULT_RESYNC_PERIOD.as_secs())]
    resync_secs: u64,

    /// Only watch this namespace
    #[arg(long, env = "NDB_WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// First failure backoff in milliseconds
    #[arg(long, env = "NDB_BACKOFF_BASE_MS", default_value_t = 5)]
    backoff_base_ms: u64,

    /// Failure backoff cap in seconds
    #[arg(long, env = "NDB_BACKOFF_MAX_SECS", default_value_t = 1000)]
    backoff_max_secs: u64,

    /// Attempts for a status write that keeps hitting conflicts
    #[arg(long, env = "NDB_STATUS_WRITE_ATTEMPTS", default_value_t = 5)]
    status_write_attempts: u32,
}

impl ControllerArgs {
    fn into_config(self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            accept_requeue: Duration::from_millis(self.accept_requeue_ms),
            resync_period: (self.resync_secs > 0).then(|| Duration::from_secs(self.resync_secs)),
            namespace: self.namespace,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
            status_write_attempts: self.status_write_attempts,
        }
    }
}

/// Webhook mode arguments
#[derive(Args, Debug)]
struct WebhookArgs {
    /// Address to listen on
    #[arg(long, env = "NDB_WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    addr: SocketAddr,

    /// PEM certificate for TLS
    #[arg(long, env = "NDB_WEBHOOK_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for TLS
    #[arg(long, env = "NDB_WEBHOOK_TLS_KEY")]
    tls_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube and axum-server link different rustls providers; pick one
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("failed to install the rustls crypto provider: {e:?}");
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Crd) => {
            let crd = serde_yaml::to_string(&NdbCluster::crd())
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("{crd}");
            Ok(())
        }
        Some(Commands::Webhook(args)) => run_webhook(args).await,
        Some(Commands::Controller(args)) => run_controller(args.into_config()).await,
        None => run_controller(ControllerConfig::default()).await,
    }
}

/// Cancel `token` on SIGINT or SIGTERM
fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        token.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("Shutdown signal received");
        token.cancel();
    });
}

/// Install or update the NdbCluster CRD with server-side apply
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let crd = NdbCluster::crd();
    let name = crd.metadata.name.clone().unwrap_or_default();
    let patch = Patch::Apply(&crd);

    tracing::info!(crd = %name, "Installing NdbCluster CRD...");
    retry_with_backoff(
        &RetryConfig::with_max_attempts(5),
        "install_crd",
        |e: &kube::Error| !matches!(e, kube::Error::Api(r) if r.code < 500 && r.code != 429),
        || crds.patch(&name, &params, &patch),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install NdbCluster CRD: {}", e))?;
    Ok(())
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    config.validate()?;
    tracing::info!(
        workers = config.workers,
        namespace = ?config.namespace,
        resync = ?config.resync_period,
        "NDB controller starting..."
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let queue = config.work_queue();
    let engine = SyncEngine::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        Arc::new(KubeWorkloadClient::new(client.clone())),
        Arc::new(KubeEventPublisher::new(client.clone(), FIELD_MANAGER)),
        config.sync_settings(),
    );

    let (events_tx, events_rx) = mpsc::channel(1024);
    let scope = WatchScope::new(client, config.namespace.clone());
    let watches = spawn_watches(&scope, config.resync_period, events_tx, shutdown.clone());
    let router = tokio::spawn(EventRouter::new(queue.clone()).run(events_rx));
    let workers = run_workers(config.workers, &queue, &engine);

    shutdown.cancelled().await;

    // Watches stop first; the router exits once their senders are dropped
    for watch in watches {
        let _ = watch.await;
    }
    let _ = router.await;

    // Workers finish the passes in progress and drain what is queued
    queue.shut_down();
    for worker in workers {
        let _ = worker.await;
    }

    tracing::info!("NDB controller stopped");
    Ok(())
}

async fn run_webhook(args: WebhookArgs) -> anyhow::Result<()> {
    let config = WebhookConfig {
        addr: args.addr,
        tls_cert: args.tls_cert,
        tls_key: args.tls_key,
    };
    config.validate()?;

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let router = webhook_router(Arc::new(NdbClusterAdmission::new()));
    serve(&config, router, shutdown).await?;

    tracing::info!("NDB admission webhook stopped");
    Ok(())
}
