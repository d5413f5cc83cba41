//! Crossroute executor - runs the steps of a quoted route with a local key
//!
//! Loads a route from JSON, resumes it from the execution store when a
//! snapshot exists, and drives every step through its chain family's
//! executor. Each ledger update is persisted so an interrupted run picks up
//! from its last checkpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crossroute_executor::chain::{ChainId, ChainRegistry, ChainType};
use crossroute_executor::config::Settings;
use crossroute_executor::error::ExecutionResult;
use crossroute_executor::evm::{
    local_wallet_for, EvmClientRegistry, EvmPublicClient, EvmStepExecutor, EvmWallet, GasEstimator,
    LocalWalletClient, RpcClient,
};
use crossroute_executor::executor::{ExecutorSet, StepExecutor};
use crossroute_executor::interaction::{ExecutionOptions, UserInteraction};
use crossroute_executor::metrics::MetricsServer;
use crossroute_executor::pipeline::ExecutionServices;
use crossroute_executor::quote::HttpStepService;
use crossroute_executor::state::{
    ExecutionStore, MemoryExecutionStore, PgExecutionStore, RouteRegistry, StatusLedger,
};
use crossroute_executor::step::{ExecutionStatus, Route};

#[derive(Parser, Debug)]
#[command(name = "crossroute-executor", version, about)]
struct Args {
    /// Route JSON as returned by the quote service
    #[arg(long)]
    route: PathBuf,

    /// Execute only this step
    #[arg(long)]
    step: Option<String>,

    /// Pause at the first signature instead of signing
    #[arg(long)]
    no_interaction: bool,

    /// Continue when a refreshed quote returns less than the original
    #[arg(long)]
    accept_rate_updates: bool,
}

/// Interaction layer backed by the local key: switching chains reconnects
/// the same key to the target chain's RPC
struct LocalInteraction {
    base: LocalWalletClient,
    rpcs: Vec<Arc<RpcClient>>,
    accept_rate_updates: bool,
}

#[async_trait]
impl UserInteraction for LocalInteraction {
    async fn switch_chain(&self, chain_id: ChainId) -> Option<Arc<dyn EvmWallet>> {
        match local_wallet_for(&self.base, &self.rpcs, chain_id) {
            Ok(wallet) => Some(Arc::new(wallet)),
            Err(e) => {
                warn!("Cannot switch to chain {}: {}", chain_id, e);
                None
            }
        }
    }

    async fn accept_exchange_rate_update(&self, old_to_amount: &str, new_to_amount: &str) -> bool {
        info!(
            "Quote changed: {} -> {} ({})",
            old_to_amount,
            new_to_amount,
            if self.accept_rate_updates { "accepted" } else { "declined" }
        );
        self.accept_rate_updates
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();
    info!("Starting Crossroute executor v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load().context("Failed to load configuration")?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let store: Arc<dyn ExecutionStore> = match &settings.database {
        Some(database) => {
            let store = PgExecutionStore::connect(database)
                .await
                .context("Failed to connect to the execution store")?;
            store.run_migrations().await?;
            store.health_check().await?;
            info!("Execution store ready");
            Arc::new(store)
        }
        None => {
            warn!("No database configured - executions are not persisted across restarts");
            Arc::new(MemoryExecutionStore::new())
        }
    };

    let route = load_route(&args.route, store.as_ref()).await?;
    let route_id = route.id.clone();

    let chains = Arc::new(ChainRegistry::from_settings(&settings));
    let rpcs = EvmClientRegistry::connect(&settings)?;
    for rpc in &rpcs {
        if !rpc.health_check().await {
            warn!("RPC for chain {} failed its health check", rpc.chain_id());
        }
    }

    let home = rpcs
        .iter()
        .find(|r| r.chain_id() == route.from_chain_id)
        .or_else(|| rpcs.first())
        .cloned()
        .context("No EVM chain enabled")?;
    let gas = GasEstimator::new(settings.executor.gas_limit_buffer_percent);
    let wallet = LocalWalletClient::from_env(&settings.wallet.private_key_env, home.clone(), gas)?;

    let interaction = Arc::new(LocalInteraction {
        base: wallet.on_chain(home),
        rpcs: rpcs.clone(),
        accept_rate_updates: args.accept_rate_updates,
    });

    let routes = Arc::new(RouteRegistry::new());
    routes.insert(route.clone());

    // Every ledger write is forwarded to the store
    let (updates, mut pending) = mpsc::unbounded_channel::<Route>();
    let persister = tokio::spawn({
        let store = store.clone();
        async move {
            while let Some(route) = pending.recv().await {
                if let Err(e) = store.save_route(&route).await {
                    warn!("Failed to persist route {}: {}", route.id, e);
                }
            }
        }
    });

    let ledger = Arc::new(StatusLedger::new(routes.clone()).with_hook(Arc::new(
        move |route: &Route| {
            let _ = updates.send(route.clone());
        },
    )));
    let services = Arc::new(ExecutionServices::new(
        ledger,
        chains.clone(),
        Arc::new(HttpStepService::new(&settings.api)?),
        interaction,
        settings.executor.clone(),
    ));

    let executors = ExecutorSet::new();
    executors.register(Arc::new(EvmStepExecutor::new(
        services,
        Arc::new(EvmClientRegistry::from_clients(&rpcs)),
        Arc::new(wallet),
    )));

    let options = if args.no_interaction {
        ExecutionOptions::non_interactive()
    } else {
        ExecutionOptions::default()
    };

    let run = run_route(executors, chains, route, args.step, options);
    tokio::select! {
        result = run => {
            if let Err(e) = result {
                error!("Route {} stopped: {}", route_id, e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, saving progress...");
        }
    }

    // The ledger (and its sender) went away with the run; drain what is queued
    if tokio::time::timeout(Duration::from_secs(5), persister).await.is_err() {
        warn!("Timed out flushing route updates");
    }
    if let Some(snapshot) = routes.route(&route_id) {
        store.save_route(&snapshot).await?;
        if snapshot.is_finished() {
            info!("Route {} finished", route_id);
        }
    }

    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Crossroute executor stopped");
    Ok(())
}

/// The saved snapshot wins over the file so a rerun resumes instead of restarting
async fn load_route(path: &Path, store: &dyn ExecutionStore) -> Result<Route> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read route file: {:?}", path))?;
    let route: Route = serde_json::from_str(&raw).context("Failed to parse route")?;

    match store.load_route(&route.id).await? {
        Some(saved) => {
            info!("Resuming route {} from saved state", saved.id);
            Ok(saved)
        }
        None => {
            info!("Starting route {} ({} steps)", route.id, route.steps.len());
            Ok(route)
        }
    }
}

/// Run the route's steps in order, stopping at the first step that does not finish
async fn run_route(
    executors: ExecutorSet,
    chains: Arc<ChainRegistry>,
    route: Route,
    only: Option<String>,
    options: ExecutionOptions,
) -> ExecutionResult<()> {
    for step in &route.steps {
        if only.as_deref().map(|id| id != step.id).unwrap_or(false) {
            continue;
        }
        if step.execution.as_ref().map(|e| e.status.is_done()).unwrap_or(false) {
            info!("Step {} already done", step.id);
            continue;
        }

        let family: ChainType = chains.chain_type(step.action.from_chain_id);
        let executor = executors.get(family)?;
        let execution = executor.execute_with_retry(&step.id, options.clone()).await?;

        match execution.status {
            ExecutionStatus::Done => info!("Step {} done", step.id),
            ExecutionStatus::ActionRequired => {
                info!("Step {} paused - rerun to continue", step.id);
                return Ok(());
            }
            status => {
                warn!("Step {} stopped in status {:?}", step.id, status);
                return Ok(());
            }
        }
    }
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,crossroute_executor=debug,sqlx=warn,hyper=warn")
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
