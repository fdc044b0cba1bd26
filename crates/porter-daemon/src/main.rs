//! Porter daemon.
//!
//! Usage:
//!     porterd --config ~/.config/porter/config.toml --socket /tmp/porter.sock

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use porter_core::capabilities::Capabilities;
use porter_core::config::{DaemonConfig, expand_tilde};
use porter_core::logging::RecentLogs;
use porter_core::notify::TracingNotifier;
use porter_core::persistence::{OperationStore, TaskStore};
use porter_core::pipeline::PipelineRunner;
use porter_core::provider::ProviderRegistry;
use porter_core::{ControlMethods, ControlServer, SqliteStore, TaskQueue, UndoLedger};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser, Debug)]
#[command(name = "porterd", version, about = "Porter file-automation daemon")]
struct Args {
    /// Configuration file; falls back to $PORTER_CONFIG, then ~/.config/porter/config.toml
    #[arg(long, env = "PORTER_CONFIG")]
    config: Option<PathBuf>,

    /// Control socket path, overriding the configuration file
    #[arg(long, env = "PORTER_SOCKET")]
    socket: Option<PathBuf>,

    /// Task database path, overriding the configuration file
    #[arg(long, env = "PORTER_DATABASE")]
    database: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = DaemonConfig::load(args.config.as_deref()).context("load configuration")?;
    if let Some(socket) = &args.socket {
        config.daemon.socket_path = expand_tilde(socket);
    }
    if let Some(database) = &args.database {
        config.daemon.database_path = expand_tilde(database);
    }

    let recent_logs = RecentLogs::new(config.logging.recent_capacity);
    let default_filter = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .with(recent_logs.clone())
        .init();

    tracing::info!(
        socket = %config.daemon.socket_path.display(),
        database = %config.daemon.database_path.display(),
        "starting porter daemon"
    );

    let store = Arc::new(
        SqliteStore::open(&config.daemon.database_path).context("open task database")?,
    );
    store.migrate_to_latest().context("migrate task database")?;

    let config = Arc::new(config);
    let queue = TaskQueue::new(
        store.clone() as Arc<dyn TaskStore>,
        config.queue.to_queue_config(),
    );
    let ledger = UndoLedger::with_retention(
        store.clone() as Arc<dyn OperationStore>,
        config.undo.retention(),
    );

    // No concrete LLM clients ship with the daemon; extension rules still
    // classify without one.
    let mut providers = ProviderRegistry::new();
    providers.set_default(config.llm.default_provider.clone());
    let capabilities = Arc::new(Capabilities::new(Arc::new(providers), &config));
    let notifier = Arc::new(TracingNotifier::new(
        config.notifications.enabled,
        config.notifications.show_previews,
    ));
    let pipelines = Arc::new(PipelineRunner::new(
        capabilities.clone(),
        ledger.clone(),
        notifier,
        &config,
    ));

    capabilities
        .register_handlers(&queue)
        .context("register capability handlers")?;
    pipelines
        .register_handlers(&queue)
        .context("register pipeline handlers")?;
    queue.start().await.context("start task queue")?;

    let shutdown = CancellationToken::new();
    let cleanup = tokio::spawn(run_cleanup(
        queue.clone(),
        ledger.clone(),
        config.queue.history_retention(),
        shutdown.child_token(),
    ));

    let methods = ControlMethods::new(
        queue.clone(),
        ledger,
        store,
        config.clone(),
        recent_logs,
    );
    let server = ControlServer::new(config.daemon.socket_path.clone(), methods);
    let listener = server.bind().context("bind control socket")?;
    let server_shutdown = shutdown.child_token();
    let server_task = tokio::spawn(async move { server.serve(listener, server_shutdown).await });

    wait_for_signal().await;
    tracing::info!("shutdown requested");

    shutdown.cancel();
    if let Err(error) = server_task.await {
        tracing::error!(error = %error, "control server task failed");
    }
    queue.stop().await;
    let _ = cleanup.await;

    tracing::info!("porter daemon stopped");
    Ok(())
}

async fn run_cleanup(
    queue: TaskQueue,
    ledger: UndoLedger,
    history_retention: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }

        match ledger.cleanup().await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "expired undo operations removed"),
            Err(error) => tracing::warn!(error = %error, "undo ledger cleanup failed"),
        }
        match queue.prune_finished(history_retention).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "finished tasks pruned"),
            Err(error) => tracing::warn!(error = %error, "task history pruning failed"),
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(error) => tracing::warn!(error = %error, "failed to install SIGTERM handler"),
        }
    }

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "failed to listen for ctrl-c");
    }
}
