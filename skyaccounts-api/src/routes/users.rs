/// User endpoints
///
/// # Endpoints
///
/// - `POST /v1/users` - Register the account of the token's subject
/// - `GET /v1/user` - Current user
/// - `PUT /v1/user/tier` - Change the current user's tier

use crate::{
    app::{bearer_claims, AppState, CurrentUser},
    error::{ApiError, ApiResult},
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde::Deserialize;
use skyaccounts_shared::{
    auth::password,
    context::OpContext,
    models::user::{CreateUser, Tier, User},
};
use tracing::{info, warn};
use validator::Validate;

/// Register request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(length(max = 100, message = "First name must be at most 100 characters"))]
    pub first_name: String,

    #[serde(default)]
    #[validate(length(max = 100, message = "Last name must be at most 100 characters"))]
    pub last_name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(
        min = 8,
        max = 256,
        message = "Password must be between 8 and 256 characters"
    ))]
    pub password: String,
}

/// Tier change request
#[derive(Debug, Deserialize)]
pub struct AssignTierRequest {
    pub tier: Tier,
}

/// Registers the subject of the bearer token
///
/// The account starts on the free tier and is registered as a billing
/// customer. A billing failure does not fail the registration; the
/// customer is created on the first tier change instead.
///
/// # Errors
///
/// - `401 Unauthorized`: Missing or invalid token
/// - `409 Conflict`: The subject is already registered
/// - `422 Unprocessable Entity`: Validation failed
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let claims = bearer_claims(&headers, state.jwt_secret())?;
    req.validate()?;

    let password_hash = password::hash_password(&req.password)?;

    let ctx = state.request_context();
    let mut user = ctx
        .run(
            "create user",
            User::create(
                &state.db,
                CreateUser {
                    sub: claims.sub,
                    first_name: req.first_name,
                    last_name: req.last_name,
                    email: req.email,
                    password_hash,
                },
            ),
        )
        .await?;

    info!(user_id = %user.id, sub = %user.sub, "Registered user");

    if let Err(e) = ensure_customer(&state, &ctx, &mut user).await {
        warn!(user_id = %user.id, error = %e, "Creating billing customer failed");
    }

    Ok((StatusCode::CREATED, Json(user)))
}

/// Returns the authenticated user
pub async fn current_user(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<User> {
    Json(user)
}

/// Moves the authenticated user to another tier
///
/// Tier changes are self-service: any authenticated user may pick any tier
/// with a billing plan, paid ones included. The plan is set on the user's
/// own billing customer, which the provider charges from then on.
///
/// The change runs in its own task so that a client disconnect cannot
/// interrupt the billing plan revert.
///
/// # Errors
///
/// - `400 Bad Request`: The tier has no billing plan
/// - `502 Bad Gateway`: The billing provider failed
/// - `500 Internal Server Error`: Storing the tier failed
pub async fn assign_tier(
    State(state): State<AppState>,
    Extension(CurrentUser(mut user)): Extension<CurrentUser>,
    Json(req): Json<AssignTierRequest>,
) -> ApiResult<Json<User>> {
    let ctx = state.request_context();

    let task = tokio::spawn(async move {
        ensure_customer(&state, &ctx, &mut user).await?;
        state.tier_sync.assign_tier(&ctx, &mut user, req.tier).await?;
        Ok::<_, ApiError>(user)
    });

    let user = task
        .await
        .map_err(|e| ApiError::InternalError(format!("tier change task failed: {}", e)))??;

    Ok(Json(user))
}

/// Registers `user` as a billing customer unless it already is one
async fn ensure_customer(state: &AppState, ctx: &OpContext, user: &mut User) -> ApiResult<()> {
    if user.stripe_customer_id.is_some() {
        return Ok(());
    }

    let customer_id = state.tier_sync.create_customer(ctx, user).await?;
    ctx.run(
        "store billing customer id",
        User::set_stripe_customer_id(&state.db, user.id, &customer_id),
    )
    .await?;

    info!(user_id = %user.id, customer_id = %customer_id, "Created billing customer");
    user.stripe_customer_id = Some(customer_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> RegisterRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_valid_request() {
        let req = request(json!({
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "ada@example.com",
            "password": "correct horse"
        }));
        assert!(req.validate().is_ok());
        assert_eq!(req.first_name, "Ada");
    }

    #[test]
    fn test_names_are_optional() {
        let req = request(json!({"email": "ada@example.com", "password": "correct horse"}));
        assert!(req.validate().is_ok());
        assert!(req.last_name.is_empty());
    }

    #[test]
    fn test_invalid_email_and_short_password() {
        let req = request(json!({"email": "not-an-email", "password": "short"}));
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));

        match ApiError::from(errors) {
            ApiError::ValidationError(details) => assert_eq!(details.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_tier_request_decodes_numeric_tier() {
        let req: AssignTierRequest = serde_json::from_value(json!({"tier": 3})).unwrap();
        assert_eq!(req.tier, Tier::Premium20);
        assert!(serde_json::from_value::<AssignTierRequest>(json!({"tier": 42})).is_err());
    }
}
