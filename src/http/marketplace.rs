use super::AppState;
use super::response::{ApiResponse, ApiResult};
use crate::account::Caller;
use crate::marketplace::ListingUpdate;
use crate::project::Project;
use crate::visibility::{Page, ProjectQuery};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use serde::Deserialize;

/// `POST /marketplace`: the project to list plus optional listing fields.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ListingRequest {
    pub project_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<u64>,
    pub contact_email: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<ListingRequest>, JsonRejection>,
) -> ApiResult<Project> {
    let Json(request) = payload?;
    let changes = ListingUpdate {
        title: request.title,
        description: request.description,
        price: request.price,
        contact_email: request.contact_email,
    };
    let project = state.marketplace.list(&caller, &request.project_id, changes)?;
    Ok(ApiResponse::created(project).message("Project listed for sale"))
}

pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<ListingUpdate>, JsonRejection>,
) -> ApiResult<Project> {
    let Json(changes) = payload?;
    Ok(ApiResponse::ok(state.marketplace.update_listing(&caller, &id, changes)?))
}

pub async fn unlist(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Project> {
    let project = state.marketplace.unlist(&caller, &id)?;
    Ok(ApiResponse::ok(project).message("Listing removed"))
}

pub async fn buy(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Project> {
    let project = state.marketplace.purchase(&caller, &id)?;
    Ok(ApiResponse::ok(project).message("Purchase completed"))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Project> {
    Ok(ApiResponse::ok(state.marketplace.get_listing(&id)?))
}

pub async fn browse(
    State(state): State<AppState>,
    query: Result<Query<ProjectQuery>, QueryRejection>,
) -> ApiResult<Page<Project>> {
    let Query(query) = query?;
    Ok(ApiResponse::ok(state.marketplace.browse(&query)?))
}
