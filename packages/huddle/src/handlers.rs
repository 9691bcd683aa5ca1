//! HTTP route handlers: accounts, groups, channels, message history, and the
//! WebSocket upgrade into the real-time layer.

use axum::{
    Json,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::AppState;
use crate::auth::{self, AuthError, AuthUser, MaybeAuthUser};
use crate::metrics::HealthStatus;
use crate::models::{ChatMessage, Channel, Group, GroupMember, Role, User};
use crate::store::StoreError;
use crate::ws;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("authentication required")]
    Unauthenticated,
    #[error("not authorized")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::InvalidCredentials | ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UsernameTaken | StoreError::RoleAlreadyHeld => {
                ApiError::BadRequest(err.to_string())
            }
            StoreError::UserNotFound | StoreError::GroupNotFound | StoreError::ChannelNotFound => {
                ApiError::NotFound(err.to_string())
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated | AuthError::InvalidToken => ApiError::Unauthenticated,
            AuthError::Forbidden => ApiError::Forbidden,
        }
    }
}

/// Group management gate: the group's admins or a super admin.
fn can_manage_group(user: &AuthUser, group: &Group) -> bool {
    user.is_super_admin() || group.is_admin(&user.user_id)
}

// =============================================================================
// Accounts
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .store
        .find_user_by_username(&req.username)
        .await
        .ok_or(ApiError::InvalidCredentials)?;
    if !auth::verify_password(&user.password_hash, &req.password) {
        warn!(username = %req.username, "failed login attempt");
        return Err(ApiError::InvalidCredentials);
    }
    let session = state
        .store
        .insert_session(&user.id, state.auth_config.session_ttl_secs)
        .await;
    info!(username = %user.username, "logged in");
    Ok(Json(LoginResponse {
        token: session.token,
        user,
    }))
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<User>, ApiError> {
    if !state.auth_config.allow_registration {
        return Err(ApiError::Forbidden);
    }
    if req.username.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "username and password are required".into(),
        ));
    }
    let hash = auth::hash_password(&req.password).map_err(|e| {
        error!("password hashing failed: {e}");
        ApiError::Internal
    })?;
    let user = state
        .store
        .create_user(req.username.trim(), hash, vec![Role::User])
        .await?;
    info!(username = %user.username, "registered");
    Ok(Json(user))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if let Some(token) = token {
        state.store.remove_session(token).await;
    }
    StatusCode::NO_CONTENT
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<User>>, ApiError> {
    user.require_any_role(&[Role::SuperAdmin])?;
    Ok(Json(state.store.list_users().await))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteRequest {
    pub user_id: String,
    pub new_role: Role,
}

pub async fn promote_user(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<PromoteRequest>,
) -> Result<Json<User>, ApiError> {
    user.require_any_role(&[Role::SuperAdmin])?;
    let promoted = state.store.promote_user(&req.user_id, req.new_role).await?;
    info!(user_id = %req.user_id, role = ?req.new_role, "promoted user");
    Ok(Json(promoted))
}

/// Users may delete themselves; super admins may delete anyone.
pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if user.user_id != id && !user.is_super_admin() {
        return Err(ApiError::Forbidden);
    }
    if state.store.delete_user(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("user not found".into()))
    }
}

// =============================================================================
// Groups and channels
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

pub async fn list_groups(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Json<Vec<Group>> {
    Json(state.store.list_groups().await)
}

pub async fn create_group(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<NameRequest>,
) -> Result<Json<Group>, ApiError> {
    user.require_any_role(&[Role::GroupAdmin, Role::SuperAdmin])?;
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("group name is required".into()));
    }
    let group = state.store.create_group(req.name.trim(), &user.user_id).await;
    info!(group_id = %group.id, name = %group.name, "created group");
    Ok(Json(group))
}

pub async fn delete_group(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let group = state
        .store
        .get_group(&id)
        .await
        .ok_or_else(|| ApiError::NotFound("group not found".into()))?;
    if !can_manage_group(&user, &group) {
        return Err(ApiError::Forbidden);
    }
    state.store.delete_group(&id).await;
    info!(group_id = %id, "deleted group");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_channel(
    State(state): State<AppState>,
    user: AuthUser,
    Path(group_id): Path<String>,
    Json(req): Json<NameRequest>,
) -> Result<Json<Channel>, ApiError> {
    let group = state
        .store
        .get_group(&group_id)
        .await
        .ok_or_else(|| ApiError::NotFound("group not found".into()))?;
    if !can_manage_group(&user, &group) {
        return Err(ApiError::Forbidden);
    }
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("channel name is required".into()));
    }
    let channel = state.store.create_channel(&group_id, req.name.trim()).await?;
    info!(group_id = %group_id, channel_id = %channel.id, "created channel");
    Ok(Json(channel))
}

pub async fn delete_channel(
    State(state): State<AppState>,
    user: AuthUser,
    Path((group_id, channel_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let group = state
        .store
        .get_group(&group_id)
        .await
        .ok_or_else(|| ApiError::NotFound("group not found".into()))?;
    if !can_manage_group(&user, &group) {
        return Err(ApiError::Forbidden);
    }
    state.store.delete_channel(&group_id, &channel_id).await?;
    info!(group_id = %group_id, channel_id = %channel_id, "deleted channel");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: String,
    #[serde(default)]
    pub role: Option<Role>,
}

pub async fn add_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path(group_id): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> Result<StatusCode, ApiError> {
    let group = state
        .store
        .get_group(&group_id)
        .await
        .ok_or_else(|| ApiError::NotFound("group not found".into()))?;
    if !can_manage_group(&user, &group) {
        return Err(ApiError::Forbidden);
    }
    if state.store.get_user(&req.user_id).await.is_none() {
        return Err(ApiError::NotFound("user not found".into()));
    }
    state
        .store
        .add_member(
            &group_id,
            GroupMember {
                user_id: req.user_id,
                role: req.role.unwrap_or(Role::User),
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<ChatMessage>,
}

pub async fn channel_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel_id): Path<String>,
) -> Result<Json<MessagesResponse>, ApiError> {
    if !state
        .store
        .can_access_channel(&user.user_id, &channel_id)
        .await
    {
        return Err(ApiError::Forbidden);
    }
    let messages = state
        .store
        .messages(&channel_id, state.config.chat.history_limit)
        .await;
    Ok(Json(MessagesResponse { messages }))
}

// =============================================================================
// Real-time upgrade
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session token; browsers cannot set headers on WebSocket requests.
    pub token: Option<String>,
}

/// Upgrade into the real-time layer. Identity is optional: anonymous
/// connections may use call signaling but cannot join channels.
pub async fn ws_handler(
    State(state): State<AppState>,
    maybe_user: MaybeAuthUser,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user = match maybe_user.0 {
        Some(user) => Some(user),
        None => match query.token {
            Some(token) => match state.store.resolve_session(&token, Utc::now()).await {
                Some(user) => Some(AuthUser::from_user(&user)),
                None => return AuthError::InvalidToken.into_response(),
            },
            None => None,
        },
    };

    let hub = state.hub.clone();
    let store = state.store.clone();
    let metrics = state.metrics.clone();
    ws.on_upgrade(move |socket| ws::handle_chat_ws(socket, hub, store, metrics, user))
}

// =============================================================================
// Health
// =============================================================================

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        connections: state.hub.connection_count().await as u64,
        uptime_secs: state.metrics.uptime_secs(),
    })
}

pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    Json(state.metrics.snapshot()).into_response()
}
