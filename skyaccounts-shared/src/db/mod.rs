/// Storage layer for the accounts service
///
/// # Modules
///
/// - `pool`: connection descriptor and PostgreSQL pool with health checks
/// - `schema`: collections, their columns, and idempotent index creation
/// - `pipeline`: typed aggregation stages compiled to SQL over `jsonb`
/// - `aggregate`: executing pipelines and counting documents
///
/// Records and their queries live in the crate-level `models` module.

pub mod aggregate;
pub mod pipeline;
pub mod pool;
pub mod schema;

pub use schema::{Collection, SortDirection};
