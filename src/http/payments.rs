use super::AppState;
use super::response::{ApiResponse, ApiResult};
use crate::account::Caller;
use crate::order::{BillingDetails, Order};
use crate::payment::{Receipt, SIGNATURE_HEADER, SettlementOutcome};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateOrderBody {
    pub project_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PayBody {
    pub order_id: String,
    pub token: String,
    pub billing: Option<BillingDetails>,
}

#[derive(Serialize)]
pub struct SettlementAck {
    pub outcome: SettlementOutcome,
}

/// 201 for a new order, 200 when the caller's open order is returned again.
pub async fn create_order(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<CreateOrderBody>, JsonRejection>,
) -> ApiResult<Order> {
    let Json(body) = payload?;
    let (order, created) = state.payments.create_order(&caller, &body.project_id)?;
    Ok(if created {
        ApiResponse::created(order).message("Order created")
    } else {
        ApiResponse::ok(order).message("Existing order returned")
    })
}

pub async fn pay(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<PayBody>, JsonRejection>,
) -> ApiResult<Receipt> {
    let Json(body) = payload?;
    let receipt = state
        .payments
        .pay(&caller, &body.order_id, &body.token, body.billing)
        .await?;
    Ok(ApiResponse::ok(receipt).message("Payment completed"))
}

pub async fn get_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Order> {
    Ok(ApiResponse::ok(state.payments.get_order(&caller, &id)?))
}

pub async fn list_orders(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<Order>> {
    Ok(ApiResponse::ok(state.payments.list_orders(&caller)?))
}

/// Gateway settlement notification. The raw body is taken as bytes so the
/// signature is checked over exactly what was sent.
pub async fn settlement_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<SettlementAck> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let outcome = state.payments.settle_notification(&body, signature).await?;
    Ok(ApiResponse::ok(SettlementAck { outcome }))
}
