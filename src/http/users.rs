use super::AppState;
use super::response::{ApiResponse, ApiResult};
use crate::account::{Caller, IssuedToken, Role, User, require_admin};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterBody {
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Serialize)]
pub struct Registration {
    pub user: User,
    pub credentials: IssuedToken,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleBody {
    pub role: Role,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockBody {
    pub blocked: bool,
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterBody>, JsonRejection>,
) -> ApiResult<Registration> {
    let Json(body) = payload?;
    let (user, credentials) = state.accounts.register(&body.email, &body.name, body.role)?;
    Ok(ApiResponse::created(Registration { user, credentials }).message("Account created"))
}

pub async fn me(State(state): State<AppState>, caller: Caller) -> ApiResult<User> {
    Ok(ApiResponse::ok(state.accounts.get(&caller.user_id)?))
}

pub async fn issue_token(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<IssuedToken> {
    require_admin(&caller)?;
    state.accounts.get(&id)?;
    Ok(ApiResponse::created(state.accounts.issue_token(&id)?))
}

pub async fn set_role(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<RoleBody>, JsonRejection>,
) -> ApiResult<User> {
    let Json(body) = payload?;
    Ok(ApiResponse::ok(state.accounts.set_role(&caller, &id, body.role)?))
}

pub async fn set_blocked(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<BlockBody>, JsonRejection>,
) -> ApiResult<User> {
    let Json(body) = payload?;
    Ok(ApiResponse::ok(state.accounts.set_blocked(&caller, &id, body.blocked)?))
}

pub async fn verify_email(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<User> {
    Ok(ApiResponse::ok(state.accounts.verify_email(&caller, &id)?))
}
