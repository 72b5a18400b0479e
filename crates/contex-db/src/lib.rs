//! # contex-db
//!
//! PostgreSQL adapters for the Contex routing engine: connection pool,
//! schema bootstrap, the per-project event log, the pgvector-backed context
//! node index, the FTS keyword index, and the agent registration repository.

pub mod events;
pub mod keyword;
pub mod migrations;
pub mod nodes;
pub mod pool;
pub mod registrations;
pub mod test_fixtures;

pub use events::PgEventLog;
pub use keyword::PgKeywordIndex;
pub use migrations::run_migrations;
pub use nodes::PgVectorIndex;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use registrations::PgRegistrationRepository;
