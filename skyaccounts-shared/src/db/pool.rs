/// Database connection pool management
///
/// This module builds the PostgreSQL connection URL from a
/// [`ConnectionDescriptor`] and opens a `sqlx` pool with health checks.
///
/// # Example
///
/// ```no_run
/// use skyaccounts_shared::db::pool::{create_pool, ConnectionDescriptor, DatabaseConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let descriptor = ConnectionDescriptor {
///         host: "localhost".to_string(),
///         port: 5432,
///         user: "skynet".to_string(),
///         password: "p@ss:word".to_string(),
///     };
///     let config = DatabaseConfig {
///         url: descriptor.connection_url()?,
///         ..Default::default()
///     };
///
///     let pool = create_pool(config).await?;
///     Ok(())
/// }
/// ```

use reqwest::Url;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the service database
pub const DB_NAME: &str = "skynet";

/// Application name reported to the server
pub const DB_APPLICATION_NAME: &str = "skynet-accounts";

/// Acknowledge commits only once they are durable
pub const DB_SYNCHRONOUS_COMMIT: &str = "on";

/// Upper bound, in milliseconds, on how long a write waits for row locks
pub const DB_LOCK_TIMEOUT_MS: u64 = 1000;

/// Everything needed to reach the database
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    /// Database host
    pub host: String,

    /// Database port
    pub port: u16,

    /// Login user (escaped when embedded in the URL)
    pub user: String,

    /// Login password (escaped when embedded in the URL)
    pub password: String,
}

impl ConnectionDescriptor {
    /// Builds the connection URL
    ///
    /// Credentials are percent-escaped; the fixed session policy is appended
    /// as connection parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not form a valid URL.
    pub fn connection_url(&self) -> Result<String, sqlx::Error> {
        let invalid = |what: &str| sqlx::Error::Configuration(format!("invalid {}", what).into());

        let mut url = Url::parse(&format!("postgresql://{}:{}/{}", self.host, self.port, DB_NAME))
            .map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;
        url.set_username(&self.user).map_err(|_| invalid("database user"))?;
        url.set_password(Some(&self.password))
            .map_err(|_| invalid("database password"))?;
        url.query_pairs_mut()
            .append_pair("application_name", DB_APPLICATION_NAME)
            .append_pair(
                "options",
                &format!(
                    "-c synchronous_commit={} -c lock_timeout={}",
                    DB_SYNCHRONOUS_COMMIT, DB_LOCK_TIMEOUT_MS
                ),
            );

        Ok(url.to_string())
    }
}

/// Configuration for the database connection pool
///
/// All timeouts are specified in seconds for ease of configuration from environment variables.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of idle connections to maintain
    pub min_connections: u32,

    /// Timeout for acquiring a connection from the pool (seconds)
    pub connect_timeout_seconds: u64,

    /// How long a connection can remain idle before being closed (seconds)
    pub idle_timeout_seconds: Option<u64>,

    /// Maximum lifetime of a connection before forced recycling (seconds)
    pub max_lifetime_seconds: Option<u64>,

    /// Whether to test connections before returning them from the pool
    pub test_before_acquire: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_seconds: 30,
            idle_timeout_seconds: Some(600),
            max_lifetime_seconds: Some(1800),
            test_before_acquire: true,
        }
    }
}

/// Creates and initializes a PostgreSQL connection pool
///
/// The pool is health-checked before it is returned.
///
/// # Errors
///
/// Returns an error if the URL is invalid, the database is unreachable, or
/// the health check fails.
pub async fn create_pool(config: DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_seconds = config.connect_timeout_seconds,
        "Creating database connection pool"
    );

    let mut pool_options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .test_before_acquire(config.test_before_acquire);

    if let Some(idle_timeout) = config.idle_timeout_seconds {
        pool_options = pool_options.idle_timeout(Duration::from_secs(idle_timeout));
        debug!(idle_timeout_seconds = idle_timeout, "Set idle timeout");
    }

    if let Some(max_lifetime) = config.max_lifetime_seconds {
        pool_options = pool_options.max_lifetime(Duration::from_secs(max_lifetime));
        debug!(max_lifetime_seconds = max_lifetime, "Set max lifetime");
    }

    let pool = pool_options.connect(&config.url).await?;

    health_check(&pool).await?;

    info!("Database connection pool created successfully");
    Ok(pool)
}

/// Performs a health check on the database connection
///
/// # Errors
///
/// Returns an error if the health check query fails
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    debug!("Performing database health check");

    let result: (i32,) = sqlx::query_as("SELECT 1").fetch_one(pool).await?;

    if result.0 == 1 {
        debug!("Database health check passed");
        Ok(())
    } else {
        warn!("Database health check returned unexpected value: {}", result.0);
        Err(sqlx::Error::Protocol(
            "Health check returned unexpected value".into(),
        ))
    }
}

/// Gracefully closes the connection pool
pub async fn close_pool(pool: PgPool) {
    info!("Closing database connection pool");
    pool.close().await;
    info!("Database connection pool closed");
}
