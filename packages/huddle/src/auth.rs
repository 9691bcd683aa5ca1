//! Authentication: argon2 credential verification and bearer-token sessions.
//!
//! Login exchanges a username/password for an opaque session token; the
//! middleware resolves the token into an [`AuthUser`] request extension.
//! Handlers opt into enforcement through the extractors; routes without an
//! `AuthUser` argument stay reachable anonymously, which is what the
//! signaling-only WebSocket clients rely on.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;

use crate::models::{Role, User};
use crate::store::Store;

/// Verified identity attached to a request (and handed to the WebSocket
/// layer at connect time).
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
    pub roles: Vec<Role>,
}

impl AuthUser {
    pub fn from_user(user: &User) -> Self {
        AuthUser {
            user_id: user.id.clone(),
            username: user.username.clone(),
            roles: user.roles.clone(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_super_admin(&self) -> bool {
        self.has_role(Role::SuperAdmin)
    }

    /// Route-level role gate, mirroring the `authorize([...])` checks of the
    /// HTTP layer: any one of `required` suffices.
    pub fn require_any_role(&self, required: &[Role]) -> Result<(), AuthError> {
        if required.iter().any(|r| self.has_role(*r)) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

/// Optional identity for endpoints that work with or without auth.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("invalid or expired session token")]
    InvalidToken,
    #[error("not authorized")]
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Unauthenticated | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Shared state for the token-resolving middleware.
#[derive(Clone)]
pub struct AuthState {
    pub store: Arc<Store>,
}

// =============================================================================
// Password hashing
// =============================================================================

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

// =============================================================================
// Middleware
// =============================================================================

/// Resolve a `Authorization: Bearer <token>` header into an [`AuthUser`]
/// extension. Requests without the header pass through anonymously; a token
/// that is present but unknown or expired is rejected here rather than
/// silently downgraded.
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    if let Some(token) = token {
        match auth_state.store.resolve_session(&token, Utc::now()).await {
            Some(user) => {
                request.extensions_mut().insert(AuthUser::from_user(&user));
            }
            None => return AuthError::InvalidToken.into_response(),
        }
    }

    next.run(request).await
}

// =============================================================================
// Extractors
// =============================================================================

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}

impl<S> axum::extract::FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(parts.extensions.get::<AuthUser>().cloned()))
    }
}
