use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use overseer_core::approval::ApprovalCoordinator;
use overseer_core::caller::UnconfiguredToolCaller;
use overseer_core::config::ControllerConfig;
use overseer_core::events::TracingEventRecorder;
use overseer_core::executor::ToolExecutor;
use overseer_core::humanlayer::{HttpHumanLayerFactory, HumanLayerFactory};
use overseer_core::machine::StateMachine;
use overseer_core::reconciler::{Controller, Reconciler};
use overseer_core::store::{InMemoryStore, ObjectStore};
use overseer_core::trace::Tracer;
use overseer_core::webhook::{self, WebhookState};

/// Drives outstanding tool calls through execution, approval, delegation,
/// and human contact until each settles.
#[derive(Debug, Parser)]
#[command(name = "overseer", version, about)]
struct Args {
    /// Address the webhook intake listens on.
    #[arg(long, default_value = "127.0.0.1:8484")]
    listen: SocketAddr,

    /// Maximum concurrent reconciliations.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Human-layer API base URL.
    #[arg(long, env = "HUMANLAYER_API_BASE")]
    humanlayer_api_base: Option<String>,

    /// Log filter, e.g. "info,overseer_core=debug".
    #[arg(long, env = "OVERSEER_LOG")]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match args.log_filter.as_deref() {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store: Arc<dyn ObjectStore> = Arc::new(InMemoryStore::new());
    let humanlayer: Arc<dyn HumanLayerFactory> = Arc::new(
        args.humanlayer_api_base
            .as_deref()
            .map(HttpHumanLayerFactory::with_api_base)
            .unwrap_or_default(),
    );
    let caller = Arc::new(UnconfiguredToolCaller);
    let events = Arc::new(TracingEventRecorder);

    let config = ControllerConfig {
        workers: args.workers,
        ..Default::default()
    };

    let machine = StateMachine::new(
        store.clone(),
        ToolExecutor::new(store.clone(), caller.clone(), humanlayer.clone()),
        ApprovalCoordinator::new(store.clone(), humanlayer),
        events,
        config.clone(),
    );
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        machine,
        Tracer::new(),
        config.clone(),
    ));
    let controller = Controller::spawn(reconciler, &config);

    let router = webhook::router(WebhookState {
        store,
        controller: Some(controller.handle()),
    });

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(listen = %args.listen, workers = config.workers, "Overseer controller started");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    controller.shutdown().await;
    info!("Overseer controller stopped");
    Ok(())
}
