//! Postgres and NATS containers backing the scheduler stores and event bus.
//!
//! Image tags default to the versions the daemon is deployed against and can
//! be overridden with `DEPCHAIN_TEST_POSTGRES_TAG` / `DEPCHAIN_TEST_NATS_TAG`.

use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::{nats::Nats, postgres::Postgres};
use tracing::debug;

const DEFAULT_POSTGRES_TAG: &str = "16-alpine";
const DEFAULT_NATS_TAG: &str = "2.10-alpine";

/// Database, role and password created inside the Postgres container.
pub const DATABASE: &str = "depchain";

fn image_tag(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

/// Postgres holding sourcestamps, buildsets and pending requests.
pub struct PostgresContainer {
    #[allow(dead_code)] // dropped with the context
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

impl PostgresContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let tag = image_tag("DEPCHAIN_TEST_POSTGRES_TAG", DEFAULT_POSTGRES_TAG);
        let container = Postgres::default()
            .with_db_name(DATABASE)
            .with_user(DATABASE)
            .with_password(DATABASE)
            .with_tag(tag.as_str())
            .start()
            .await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;
        let connection_string = format!(
            "postgres://{user}:{user}@{host}:{port}/{user}",
            user = DATABASE
        );
        debug!(%tag, %host, port, "Postgres container started");

        Ok(Self {
            container,
            connection_string,
        })
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

/// NATS server with JetStream enabled, for the completion event stream.
pub struct NatsContainer {
    #[allow(dead_code)] // dropped with the context
    container: ContainerAsync<Nats>,
    url: String,
}

impl NatsContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let tag = image_tag("DEPCHAIN_TEST_NATS_TAG", DEFAULT_NATS_TAG);
        let container = Nats::default()
            .with_tag(tag.as_str())
            .with_cmd(["-js", "-sd", "/tmp/jetstream"])
            .start()
            .await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(4222).await?;
        let url = format!("nats://{}:{}", host, port);
        debug!(%tag, %url, "NATS container started");

        Ok(Self { container, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
