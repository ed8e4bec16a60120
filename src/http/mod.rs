//! HTTP surface: routing, authentication extractors and the JSON envelope.
//! Handlers stay thin; every rule lives in the services.
pub mod auth;
mod marketplace;
mod notifications;
mod payments;
mod projects;
pub mod response;
mod users;

use crate::account::AccountService;
use crate::config::MarketConfig;
use crate::gateway::PaymentGateway;
use crate::lifecycle::ProjectService;
use crate::marketplace::MarketplaceService;
use crate::notification::NotificationService;
use crate::payment::PaymentService;
use crate::review::ReviewService;
use crate::store::Store;
use axum::{
    Json, Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountService>,
    pub projects: Arc<ProjectService>,
    pub marketplace: Arc<MarketplaceService>,
    pub payments: Arc<PaymentService>,
    pub reviews: Arc<ReviewService>,
    pub notifications: Arc<NotificationService>,
}

impl AppState {
    pub fn new(store: Store, gateway: Arc<dyn PaymentGateway>, config: &MarketConfig) -> Self {
        let notifications = NotificationService::new(store.clone());
        Self {
            accounts: Arc::new(AccountService::new(store.clone(), config.auth.token_ttl())),
            projects: Arc::new(
                ProjectService::new(store.clone(), notifications.clone())
                    .with_default_currency(config.payments.currency),
            ),
            marketplace: Arc::new(MarketplaceService::new(store.clone(), notifications.clone())),
            payments: Arc::new(PaymentService::new(
                store.clone(),
                gateway,
                notifications.clone(),
                config.payments.timeout(),
                &config.payments.webhook_secret,
            )),
            reviews: Arc::new(ReviewService::new(store)),
            notifications: Arc::new(notifications),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // accounts
        .route("/users", post(users::register))
        .route("/users/me", get(users::me))
        .route("/users/:id/tokens", post(users::issue_token))
        .route("/users/:id/role", put(users::set_role))
        .route("/users/:id/block", put(users::set_blocked))
        .route("/users/:id/verify", put(users::verify_email))
        // lifecycle
        .route("/projects", get(projects::list).post(projects::create))
        .route(
            "/projects/:id",
            get(projects::get).put(projects::edit).delete(projects::delete),
        )
        .route("/projects/:id/submit", post(projects::submit))
        .route("/projects/:id/approve", put(projects::approve))
        .route("/projects/:id/reject", put(projects::reject))
        .route(
            "/projects/:id/reviews",
            get(projects::list_reviews).post(projects::create_review),
        )
        // marketplace
        .route("/marketplace", get(marketplace::browse).post(marketplace::list))
        .route("/marketplace/search", get(marketplace::browse))
        .route(
            "/marketplace/:id",
            get(marketplace::get)
                .put(marketplace::update)
                .delete(marketplace::unlist),
        )
        .route("/marketplace/:id/buy", post(marketplace::buy))
        // payments
        .route(
            "/payments/orders",
            get(payments::list_orders).post(payments::create_order),
        )
        .route("/payments/orders/:id", get(payments::get_order))
        .route("/payments/pay", post(payments::pay))
        .route("/payments/ins", post(payments::settlement_notification))
        // notifications
        .route("/notifications", get(notifications::list))
        .route("/notifications/read-all", put(notifications::mark_all_read))
        .route("/notifications/:id/read", put(notifications::mark_read))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
