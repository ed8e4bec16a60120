use super::AppState;
use super::auth::MaybeCaller;
use super::response::{ApiResponse, ApiResult};
use crate::account::Caller;
use crate::project::{Project, ProjectDraft};
use crate::review::{NewReview, Review, ReviewSummary};
use crate::visibility::{Page, ProjectQuery};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RejectBody {
    pub reason: String,
}

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<ProjectDraft>, JsonRejection>,
) -> ApiResult<Project> {
    let Json(draft) = payload?;
    let project = state.projects.create(&caller, draft)?;
    Ok(ApiResponse::created(project).message("Project created"))
}

pub async fn edit(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<ProjectDraft>, JsonRejection>,
) -> ApiResult<Project> {
    let Json(draft) = payload?;
    Ok(ApiResponse::ok(state.projects.edit(&caller, &id, draft)?))
}

pub async fn submit(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Project> {
    let project = state.projects.submit(&caller, &id)?;
    Ok(ApiResponse::ok(project).message("Project submitted for review"))
}

pub async fn approve(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Project> {
    let project = state.projects.approve(&caller, &id)?;
    Ok(ApiResponse::ok(project).message("Project approved"))
}

pub async fn reject(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<RejectBody>, JsonRejection>,
) -> ApiResult<Project> {
    let Json(body) = payload?;
    let project = state.projects.reject(&caller, &id, &body.reason)?;
    Ok(ApiResponse::ok(project).message("Project rejected"))
}

pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Project> {
    let project = state.projects.delete(&caller, &id)?;
    Ok(ApiResponse::ok(project).message("Project deleted"))
}

pub async fn get(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
) -> ApiResult<Project> {
    Ok(ApiResponse::ok(state.projects.get(caller.as_ref(), &id)?))
}

pub async fn list(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    query: Result<Query<ProjectQuery>, QueryRejection>,
) -> ApiResult<Page<Project>> {
    let Query(query) = query?;
    Ok(ApiResponse::ok(state.projects.list(caller.as_ref(), &query)?))
}

pub async fn create_review(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<NewReview>, JsonRejection>,
) -> ApiResult<Review> {
    let Json(review) = payload?;
    let review = state.reviews.create(&caller, &id, review)?;
    Ok(ApiResponse::created(review).message("Review added"))
}

pub async fn list_reviews(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ReviewSummary> {
    Ok(ApiResponse::ok(state.reviews.list(&id)?))
}
