use super::AppState;
use super::response::{ApiResponse, ApiResult};
use crate::account::Caller;
use crate::notification::Notification;
use axum::extract::{Path, Query, State, rejection::QueryRejection};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListParams {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Serialize)]
pub struct Marked {
    pub updated: usize,
}

pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Vec<Notification>> {
    let Query(params) = params?;
    Ok(ApiResponse::ok(
        state.notifications.list(&caller, params.unread_only)?,
    ))
}

pub async fn mark_read(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Notification> {
    Ok(ApiResponse::ok(state.notifications.mark_read(&caller, &id)?))
}

pub async fn mark_all_read(State(state): State<AppState>, caller: Caller) -> ApiResult<Marked> {
    let updated = state.notifications.mark_all_read(&caller)?;
    Ok(ApiResponse::ok(Marked { updated }))
}
