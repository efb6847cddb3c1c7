//! Integration test infrastructure for depchain.
//!
//! This crate provides testcontainers-based infrastructure for running
//! integration tests against real services (PostgreSQL, NATS).
//!
//! # Usage
//!
//! ```ignore
//! use depchain_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new().await.unwrap();
//!     let set = ctx.scheduler_set(depchain_tests::fixtures::CHAIN_CONFIG).unwrap();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,depchain_scheduler=debug,depchain_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
