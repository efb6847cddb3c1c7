//! Test context wiring containers into scheduler ports.

use crate::containers::{NatsContainer, PostgresContainer};
use depchain_db::Database;
use depchain_nats::{NatsConfig, NatsEventBus};
use depchain_scheduler::{SchedulerConfig, SchedulerPorts, SchedulerSet};
use std::sync::Arc;

/// Postgres-backed stores plus a JetStream event bus.
///
/// Drop this to stop all containers.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub nats: NatsContainer,
    pub db: Database,
    pub event_bus: NatsEventBus,
}

impl TestContext {
    /// Start both containers and connect to them.
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let (postgres, nats) = tokio::try_join!(PostgresContainer::start(), NatsContainer::start())?;

        let db = Database::connect(postgres.connection_string(), 5).await?;
        db.migrate().await?;

        let event_bus = connect_bus(nats.url()).await?;

        Ok(Self {
            postgres,
            nats,
            db,
            event_bus,
        })
    }

    /// Create context with only PostgreSQL.
    pub async fn postgres_only() -> anyhow::Result<PostgresOnlyContext> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let db = Database::connect(postgres.connection_string(), 5).await?;
        db.migrate().await?;

        Ok(PostgresOnlyContext { postgres, db })
    }

    /// Create context with only NATS.
    pub async fn nats_only() -> anyhow::Result<NatsOnlyContext> {
        crate::init_test_logging();

        let nats = NatsContainer::start().await?;
        let event_bus = connect_bus(nats.url()).await?;

        Ok(NatsOnlyContext { nats, event_bus })
    }

    /// Scheduler ports over the containers.
    pub fn ports(&self) -> SchedulerPorts {
        let buildsets = Arc::new(self.db.buildsets());
        SchedulerPorts {
            buildsets: buildsets.clone(),
            pending: Arc::new(self.db.pending()),
            executor: buildsets.clone(),
            completer: buildsets,
            event_bus: Arc::new(self.event_bus.clone()),
            source_stamps: Arc::new(self.db.source_stamps()),
        }
    }

    /// Build a scheduler set from YAML over the containers.
    pub fn scheduler_set(&self, yaml: &str) -> anyhow::Result<Arc<SchedulerSet>> {
        let config = SchedulerConfig::from_yaml(yaml)?;
        Ok(Arc::new(SchedulerSet::build(&config, self.ports())?))
    }

    pub fn db_url(&self) -> &str {
        self.postgres.connection_string()
    }

    pub fn nats_url(&self) -> &str {
        self.nats.url()
    }
}

async fn connect_bus(url: &str) -> anyhow::Result<NatsEventBus> {
    let config = NatsConfig::new(url).with_max_reconnects(3);
    Ok(NatsEventBus::connect_with_config(config).await?)
}

/// Minimal context with only PostgreSQL.
pub struct PostgresOnlyContext {
    pub postgres: PostgresContainer,
    pub db: Database,
}

impl PostgresOnlyContext {
    pub fn db_url(&self) -> &str {
        self.postgres.connection_string()
    }
}

/// Minimal context with only NATS.
pub struct NatsOnlyContext {
    pub nats: NatsContainer,
    pub event_bus: NatsEventBus,
}

impl NatsOnlyContext {
    pub fn nats_url(&self) -> &str {
        self.nats.url()
    }
}
