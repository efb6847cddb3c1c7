//! Repository implementations for PostgreSQL.

mod buildset;
mod pending;
mod sourcestamp;

pub use buildset::PgBuildsetRepository;
pub use pending::PgPendingRepository;
pub use sourcestamp::PgSourceStampRepository;
