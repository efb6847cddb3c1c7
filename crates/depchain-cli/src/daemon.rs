//! The `serve` command: scheduler daemon plus HTTP API.

use crate::config::{DaemonConfig, LogFormat};
use depchain_api::AppState;
use depchain_db::Database;
use depchain_nats::NatsEventBus;
use depchain_scheduler::memory::{MemoryBuildStore, MemoryEventBus, MemoryPendingStore};
use depchain_scheduler::{SchedulerConfig, SchedulerPorts, SchedulerSet};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
    }
}

fn memory_ports() -> SchedulerPorts {
    let store = Arc::new(MemoryBuildStore::new());
    SchedulerPorts {
        buildsets: store.clone(),
        pending: Arc::new(MemoryPendingStore::new()),
        executor: store.clone(),
        completer: store.clone(),
        event_bus: Arc::new(MemoryEventBus::new()),
        source_stamps: store,
    }
}

async fn persistent_ports(
    config: &DaemonConfig,
) -> Result<(SchedulerPorts, NatsEventBus), Box<dyn std::error::Error>> {
    let url = config
        .database_url
        .as_deref()
        .ok_or("database_url is not set; set DATABASE_URL or run with --memory")?;

    let db = Database::connect(url, config.max_connections).await?;
    db.migrate().await?;

    let bus = NatsEventBus::connect_with_config(config.nats.to_nats_config()).await?;
    let buildsets = Arc::new(db.buildsets());

    let ports = SchedulerPorts {
        buildsets: buildsets.clone(),
        pending: Arc::new(db.pending()),
        executor: buildsets.clone(),
        completer: buildsets,
        event_bus: Arc::new(bus.clone()),
        source_stamps: Arc::new(db.source_stamps()),
    };
    Ok((ports, bus))
}

pub async fn serve(config: DaemonConfig) -> Result<(), Box<dyn std::error::Error>> {
    let schedulers = SchedulerConfig::from_file(&config.schedulers)?;
    let addr = config.listen_addr()?;

    let (ports, nats) = if config.memory {
        warn!("Running with in-memory stores; state is lost on exit");
        (memory_ports(), None)
    } else {
        let (ports, bus) = persistent_ports(&config).await?;
        (ports, Some(bus))
    };

    let set = Arc::new(SchedulerSet::build(&schedulers, ports)?);
    let summary = set.start().await?;
    info!(
        schedulers = set.names().len(),
        examined = summary.examined,
        admitted = summary.admitted,
        expired = summary.expired,
        "Schedulers started"
    );

    let mut state = AppState::new(set.clone());
    if let Some(bus) = &nats {
        state = state.with_nats(bus.clone());
    }

    let served = depchain_api::serve(addr, Arc::new(state), shutdown_signal()).await;

    set.stop().await;
    if let Some(bus) = nats {
        bus.shutdown().await?;
    }
    info!("Shutdown complete");

    Ok(served?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
