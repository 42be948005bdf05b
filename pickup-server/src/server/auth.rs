use axum::extract::State;
use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use pickup_shared::api::{AuthReq, AuthResp};
use pickup_shared::auth::Role;
use pickup_shared::jwt::{self, JwtClaims};
use tracing::{info, warn};

use super::password::verify_password_blocking;
use super::{AppError, AppState};
use crate::storage::models::Identity;

/// Identity attached to a request once its bearer token verifies.
#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub username: String,
    pub role: Role,
}

impl From<JwtClaims> for AuthCtx {
    fn from(claims: JwtClaims) -> Self {
        Self {
            username: claims.sub,
            role: claims.role,
        }
    }
}

/// Missing or malformed header is `Unauthorized`; a token that fails
/// signature or expiry checks is `InvalidToken`.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let header_str = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    let token = header_str
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized)?;

    let claims = jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()).map_err(|e| {
        warn!(error = %e, "auth: jwt decode failed");
        AppError::InvalidToken
    })?;

    req.extensions_mut().insert(AuthCtx::from(claims));
    Ok(next.run(req).await)
}

pub fn issue_token(state: &AppState, username: &str, role: Role) -> Result<String, AppError> {
    let claims = JwtClaims::issue_now(username, role);
    jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        tracing::error!(username, error = %e, "login: jwt encode failed");
        AppError::internal(e)
    })
}

/// Resolves the username across both account tables, checks the password and
/// issues a token. Every credential failure is the same `InvalidCredentials`.
pub async fn login(state: &AppState, req: AuthReq) -> Result<AuthResp, AppError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        warn!("login: empty username or password");
        return Err(AppError::InvalidCredentials);
    }

    let Some(identity) = state.store.lookup_identity(username).await? else {
        verify_password_blocking(req.password, state.dummy_hash.to_string()).await?;
        warn!(username = %username, "login: unknown username");
        return Err(AppError::InvalidCredentials);
    };

    let ok = verify_password_blocking(req.password, identity.password_hash().to_string()).await?;
    if !ok {
        warn!(username = %username, "login: invalid password");
        return Err(AppError::InvalidCredentials);
    }

    if let Identity::Child(child) = &identity
        && let Some(device_token) = req.device_token.as_deref().map(str::trim)
        && !device_token.is_empty()
    {
        state
            .store
            .set_device_token(child.id, Some(device_token))
            .await?;
    }

    let role = identity.role();
    let token = issue_token(state, identity.username(), role)?;
    info!(username = %identity.username(), role = %role, "login: success");
    Ok(AuthResp {
        message: "Login successful".to_string(),
        role,
        token,
    })
}
