//! # Skynet Accounts Shared Library
//!
//! Core of the accounts service: storage, query pipelines and billing
//! synchronization, shared by the API server and its tests.
//!
//! ## Module Organization
//!
//! - `db`: connection pool, schema provisioning, aggregation pipelines
//! - `models`: users, skylinks, uploads, downloads and registry activity
//! - `billing`: plan catalog, subscription reconciliation, tier saga, webhooks
//! - `auth`: password hashing and bearer tokens
//! - `context`: request cancellation and deadlines
//! - `error`: common error type

pub mod auth;
pub mod billing;
pub mod context;
pub mod db;
pub mod error;
pub mod models;

/// Current version of the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
