/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use skyaccounts_api::{app::AppState, config::Config};
/// use skyaccounts_shared::billing::stripe::StripeClient;
/// use sqlx::PgPool;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.connection_descriptor().connection_url()?).await?;
/// let billing = StripeClient::new(
///     config.stripe.api_key.clone(),
///     config.stripe.api_base.clone(),
///     config.request_timeout(),
/// )?;
/// let catalog = config.plan_catalog()?;
/// let state = AppState::new(pool, config, catalog, Arc::new(billing));
/// let app = skyaccounts_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{config::Config, error::ApiError};
use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post, put},
    Router,
};
use skyaccounts_shared::auth::jwt::{self, Claims};
use skyaccounts_shared::billing::plans::PlanCatalog;
use skyaccounts_shared::billing::ports::{BillingProvider, PgUserStore, UserStore};
use skyaccounts_shared::billing::webhook::MAX_PAYLOAD_BYTES;
use skyaccounts_shared::billing::{SubscriptionReconciler, TierSync, WebhookProcessor};
use skyaccounts_shared::context::OpContext;
use skyaccounts_shared::models::user::User;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Application configuration
    pub config: Arc<Config>,

    pub catalog: Arc<PlanCatalog>,

    /// Service-initiated tier changes
    pub tier_sync: Arc<TierSync>,

    /// Billing webhook dispatch
    pub webhooks: Arc<WebhookProcessor>,
}

/// The authenticated user, inserted by the JWT layer
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl AppState {
    /// Wires the billing services around `db` and `billing`
    pub fn new(
        db: PgPool,
        config: Config,
        catalog: PlanCatalog,
        billing: Arc<dyn BillingProvider>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(db.clone()));
        let reconciler = Arc::new(SubscriptionReconciler::new(users.clone(), catalog.clone()));

        Self {
            db,
            config: Arc::new(config),
            tier_sync: Arc::new(TierSync::new(users, billing.clone(), catalog.clone())),
            webhooks: Arc::new(WebhookProcessor::new(reconciler, billing)),
            catalog,
        }
    }

    /// Gets JWT secret for token operations
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }

    /// Context for the storage and billing calls of one request
    pub fn request_context(&self) -> OpContext {
        OpContext::with_timeout(self.config.request_timeout())
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── GET  /health                        # Health check (public)
/// └── /v1/
///     ├── POST /users                     # Register (bearer token, no account yet)
///     ├── POST /stripe/webhook            # Billing events (signed)
///     ├── /user/                          # Authenticated
///     │   ├── GET  /                      # Current user
///     │   ├── PUT  /tier                  # Change tier
///     │   ├── GET  /uploads               # Paginated uploads
///     │   ├── GET  /downloads             # Paginated downloads
///     │   └── GET  /stats                 # Activity counts
///     └── /track/                         # Authenticated
///         ├── POST /upload/:skylink
///         ├── POST /download/:skylink
///         ├── POST /registry/read
///         └── POST /registry/write
/// ```
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let public_routes = Router::new()
        .route("/users", post(routes::users::register))
        .route(
            "/stripe/webhook",
            post(routes::stripe::webhook).layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES)),
        );

    let authenticated_routes = Router::new()
        .route("/user", get(routes::users::current_user))
        .route("/user/tier", put(routes::users::assign_tier))
        .route("/user/uploads", get(routes::activity::list_uploads))
        .route("/user/downloads", get(routes::activity::list_downloads))
        .route("/user/stats", get(routes::activity::stats))
        .route("/track/upload/:skylink", post(routes::track::track_upload))
        .route("/track/download/:skylink", post(routes::track::track_download))
        .route("/track/registry/read", post(routes::track::track_registry_read))
        .route("/track/registry/write", post(routes::track::track_registry_write))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_layer,
        ));

    let v1_routes = Router::new()
        .merge(public_routes)
        .merge(authenticated_routes);

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.iter().any(|origin| origin == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}

/// Validates the bearer token in `headers`
pub(crate) fn bearer_claims(headers: &HeaderMap, secret: &str) -> Result<Claims, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Expected Bearer token".to_string()))?;

    Ok(jwt::validate_token(token, secret)?)
}

/// JWT authentication middleware layer
///
/// Validates the bearer token, loads the user named by its subject and
/// injects [`CurrentUser`] into request extensions.
async fn jwt_auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = bearer_claims(req.headers(), state.jwt_secret())?;

    let ctx = state.request_context();
    let user = ctx
        .run("load authenticated user", User::find_by_sub(&state.db, &claims.sub))
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;

    req.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(req).await)
}
