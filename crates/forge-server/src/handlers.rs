//! HTTP Handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use forge_billing::{
    hash_password, verify_password, BillingError, Offering, RegistrationRequest,
    SessionVerification, User, UserProjection,
};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub stripe_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProjection,
}

type ErrorReply = (StatusCode, Json<ErrorResponse>);

fn error_reply(err: &BillingError) -> ErrorReply {
    let status = match err {
        BillingError::Validation(_)
        | BillingError::InvalidIdentifier(_)
        | BillingError::UnknownPlan(_)
        | BillingError::Signature(_) => StatusCode::BAD_REQUEST,
        BillingError::Conflict(_) => StatusCode::CONFLICT,
        BillingError::NotFound(_) => StatusCode::NOT_FOUND,
        BillingError::Upstream(_)
        | BillingError::Persistence(_)
        | BillingError::Config(_)
        | BillingError::Credential(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
            code: err.code().into(),
        }),
    )
}

fn unauthorized() -> ErrorReply {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "Invalid credentials".into(),
            code: "INVALID_CREDENTIALS".into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        stripe_configured: state.stripe_configured,
    })
}

/// List active priced offerings
pub async fn list_pricing(
    State(state): State<AppState>,
) -> Result<Json<Vec<Offering>>, ErrorReply> {
    let offerings = state.gateway.list_active_offerings().await.map_err(|err| {
        tracing::error!(error = %err, "pricing lookup failed");
        error_reply(&err)
    })?;
    Ok(Json(offerings))
}

/// Create a hosted checkout session
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(payload): Json<RegistrationRequest>,
) -> Result<Json<CheckoutResponse>, ErrorReply> {
    let session = state.checkout.create_session(&payload).await.map_err(|err| {
        tracing::warn!(error = %err, email = %payload.email, "checkout creation failed");
        error_reply(&err)
    })?;

    Ok(Json(CheckoutResponse { url: session.url }))
}

/// Post-redirect session verification
pub async fn verify_checkout_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionVerification>, ErrorReply> {
    let verification = state
        .checkout
        .verify_session(&session_id)
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, session_id = %session_id, "session verification failed");
            error_reply(&err)
        })?;

    Ok(Json(verification))
}

/// Inbound provider webhook
///
/// Raw body, never JSON-extracted: the signature covers the exact bytes.
pub async fn provider_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ErrorReply> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("webhook missing signature header");
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Missing signature header".into(),
                    code: "MISSING_SIGNATURE".into(),
                }),
            )
        })?;

    state
        .webhooks
        .process(&body, signature)
        .await
        .map_err(|err| error_reply(&err))?;

    Ok(StatusCode::OK)
}

/// Direct registration
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ErrorReply> {
    if payload.first_name.trim().is_empty()
        || payload.last_name.trim().is_empty()
        || payload.email.trim().is_empty()
        || payload.password.is_empty()
    {
        return Err(error_reply(&BillingError::Validation(
            "missing required fields".into(),
        )));
    }

    let password_hash = hash_password(&payload.password).map_err(|err| error_reply(&err))?;

    let mut user = User::new(&payload.first_name, &payload.last_name, &payload.email);
    user.password_hash = Some(password_hash);

    let user = state.store.insert_user(user).map_err(|err| {
        tracing::warn!(error = %err, email = %payload.email, "registration failed");
        error_reply(&err)
    })?;

    let token = state.signer.issue(&user).map_err(|err| error_reply(&err))?;
    tracing::info!(email = %user.email, "new user registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: UserProjection::of(&user),
        }),
    ))
}

/// Login with email and password
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ErrorReply> {
    let user = state
        .store
        .find_user_by_email(&payload.email)
        .map_err(|err| error_reply(&err))?
        .ok_or_else(unauthorized)?;

    // Accounts provisioned by checkout have no password until one is set
    let hash = user.password_hash.as_ref().ok_or_else(unauthorized)?;
    let matches = verify_password(hash, &payload.password).map_err(|err| error_reply(&err))?;
    if !matches {
        return Err(unauthorized());
    }

    let token = state.signer.issue(&user).map_err(|err| error_reply(&err))?;

    Ok(Json(AuthResponse {
        token,
        user: UserProjection::of(&user),
    }))
}
