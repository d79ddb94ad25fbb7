/// Configuration management for the API server
///
/// Configuration comes from environment variables; a `.env` file is read in
/// development.
///
/// # Environment Variables
///
/// - `API_HOST`: Host to bind to (default: 0.0.0.0)
/// - `API_PORT`: Port to bind to (default: 8080)
/// - `CORS_ORIGINS`: Comma-separated allowed origins (default: *)
/// - `REQUEST_TIMEOUT_SECONDS`: Deadline of each request's storage and billing calls (default: 10)
/// - `SKYNET_DB_HOST`, `SKYNET_DB_PORT` (default: 5432), `SKYNET_DB_USER`, `SKYNET_DB_PASS`
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
/// - `JWT_SECRET`: Secret key for JWT validation (required, at least 32 characters)
/// - `STRIPE_API_KEY`: Billing provider secret key (required)
/// - `STRIPE_WEBHOOK_SECRET`: Webhook signing secret (required)
/// - `STRIPE_API_BASE`: Billing provider base URL (default: https://api.stripe.com/v1)
/// - `STRIPE_PLANS`: Plan catalog override, `prod_a=1,prod_b=2`
/// - `RUST_LOG`: Log filter
///
/// # Example
///
/// ```no_run
/// use skyaccounts_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use skyaccounts_shared::billing::plans::PlanCatalog;
use skyaccounts_shared::billing::stripe::DEFAULT_API_BASE;
use skyaccounts_shared::db::pool::ConnectionDescriptor;
use std::env;
use std::time::Duration;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub stripe: StripeConfig,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    pub request_timeout_seconds: u64,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret key for JWT validation
    ///
    /// Must be kept secret and be at least 32 bytes.
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,
}

/// Billing provider configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub api_base: String,

    /// Catalog override; the built-in catalog is used when absent
    pub plans: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is
    /// invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", key))
        };

        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let cors_origins = or_default("CORS_ORIGINS", "*")
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            api: ApiConfig {
                host: or_default("API_HOST", "0.0.0.0"),
                port: or_default("API_PORT", "8080").parse()?,
                cors_origins,
                request_timeout_seconds: or_default("REQUEST_TIMEOUT_SECONDS", "10").parse()?,
            },
            database: DatabaseConfig {
                host: required("SKYNET_DB_HOST")?,
                port: or_default("SKYNET_DB_PORT", "5432").parse()?,
                user: required("SKYNET_DB_USER")?,
                password: required("SKYNET_DB_PASS")?,
                max_connections: or_default("DATABASE_MAX_CONNECTIONS", "10").parse()?,
            },
            jwt: JwtConfig { secret: jwt_secret },
            stripe: StripeConfig {
                api_key: required("STRIPE_API_KEY")?,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
                api_base: or_default("STRIPE_API_BASE", DEFAULT_API_BASE),
                plans: lookup("STRIPE_PLANS").filter(|plans| !plans.trim().is_empty()),
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_seconds)
    }

    pub fn connection_descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: self.database.host.clone(),
            port: self.database.port,
            user: self.database.user.clone(),
            password: self.database.password.clone(),
        }
    }

    /// The configured plan catalog
    pub fn plan_catalog(&self) -> anyhow::Result<PlanCatalog> {
        match &self.stripe.plans {
            Some(plans) => Ok(PlanCatalog::parse(plans)?),
            None => Ok(PlanCatalog::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyaccounts_shared::models::user::Tier;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("JWT_SECRET", "test-secret-key-at-least-32-bytes-long".to_string()),
            ("SKYNET_DB_HOST", "db.internal".to_string()),
            ("SKYNET_DB_USER", "skynet".to_string()),
            ("SKYNET_DB_PASS", "p@ss".to_string()),
            ("STRIPE_API_KEY", "sk_test_123".to_string()),
            ("STRIPE_WEBHOOK_SECRET", "whsec_123".to_string()),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> anyhow::Result<Config> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.api.cors_origins, vec!["*".to_string()]);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.stripe.api_base, "https://api.stripe.com/v1");
        assert_eq!(config.plan_catalog().unwrap(), PlanCatalog::default());
    }

    #[test]
    fn test_missing_required_variable() {
        let mut vars = base_env();
        vars.remove("STRIPE_WEBHOOK_SECRET");
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("STRIPE_WEBHOOK_SECRET"));
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let mut vars = base_env();
        vars.insert("JWT_SECRET", "short".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_plan_override() {
        let mut vars = base_env();
        vars.insert("STRIPE_PLANS", "prod_a=2,prod_b=3".to_string());
        let catalog = load(&vars).unwrap().plan_catalog().unwrap();
        assert_eq!(catalog.tier_for_plan("prod_b"), Tier::Premium20);
        assert_eq!(catalog.plan_for_tier(Tier::Free), None);
    }

    #[test]
    fn test_connection_descriptor() {
        let config = load(&base_env()).unwrap();
        let descriptor = config.connection_descriptor();
        assert_eq!(descriptor.host, "db.internal");
        assert_eq!(descriptor.password, "p@ss");
    }
}
