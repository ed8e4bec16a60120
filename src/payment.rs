//! Payment reconciliation.
//!
//! Two paths can finish a sale: the synchronous charge made while the buyer
//! waits, and the gateway's asynchronous settlement notification (INS). Both
//! end in [`PaymentService::finalize`], one store transaction that marks the
//! order paid and the project sold together, and both tolerate running more
//! than once for the same event.
use super::account::Caller;
use super::error::{FieldError, MarketError, MarketResult};
use super::gateway::{ChargeRequest, GatewayError, PaymentGateway};
use super::marketplace::{announce_sale, ensure_purchasable, sell};
use super::notification::{NotificationKind, NotificationService};
use super::order::{
    BillingDetails, GatewayLogEntry, OpenOrder, Order, OrderStatus, SettledTransaction,
};
use super::project::Project;
use super::store::{OPEN_ORDERS, ORDERS, PROJECTS, Store, TRANSACTIONS, abort, tx_get, tx_put};
use super::types::TimeStamp;
use super::utils;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw notification body.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Settlement notification as posted by the gateway.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettlementNotice {
    pub event: String,
    pub order_ref: String,
    pub transaction_id: String,
    pub amount: Option<u64>,
}

impl SettlementNotice {
    pub fn is_settlement(&self) -> bool {
        matches!(self.event.as_str(), "payment.settled" | "payment.deposited")
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SettlementOutcome {
    Settled,
    AlreadySettled,
    /// The listing was gone when the money arrived; the charge was refunded.
    Refunded,
    /// As `Refunded`, but the refund itself failed and needs manual follow-up.
    RefundFailed,
    Ignored,
}

/// Result of a successful payment: the paid order and the sold project.
#[derive(Serialize, Debug, Clone)]
pub struct Receipt {
    pub order: Order,
    pub project: Project,
}

enum Finalized {
    Settled(Order, Project),
    AlreadySettled(Order),
    /// Nothing written: the project can no longer be sold to this buyer.
    Unavailable(MarketError),
}

/// Computes the hex signature a gateway attaches to `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> MarketResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|err| MarketError::Unexpected(anyhow::anyhow!("invalid webhook key: {err}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex HMAC-SHA256 signature. An empty secret
/// verifies nothing.
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub struct PaymentService {
    store: Store,
    gateway: Arc<dyn PaymentGateway>,
    notifications: NotificationService,
    timeout: Duration,
    webhook_secret: Vec<u8>,
}

impl PaymentService {
    pub fn new(
        store: Store,
        gateway: Arc<dyn PaymentGateway>,
        notifications: NotificationService,
        timeout: Duration,
        webhook_secret: &str,
    ) -> Self {
        Self {
            store,
            gateway,
            notifications,
            timeout,
            webhook_secret: webhook_secret.as_bytes().to_vec(),
        }
    }

    /// Returns the caller's open order for this project, or creates a new
    /// pending one priced from the stored project. The flag is `true` when a
    /// new order was created.
    pub fn create_order(&self, caller: &Caller, project_id: &str) -> MarketResult<(Order, bool)> {
        let fresh_id = utils::new_uuid_to_bech32("order_")?;
        let index_key = OpenOrder::key_for(&caller.user_id, project_id);

        let (order, created) = self.store.transact(&[PROJECTS, ORDERS, OPEN_ORDERS], |trees| {
            let (projects, orders, open) = (&trees[0], &trees[1], &trees[2]);

            let project: Project = tx_get(projects, project_id)?
                .ok_or_else(|| abort(MarketError::not_found("project", project_id)))?;
            ensure_purchasable(&project, &caller.user_id).map_err(abort)?;

            if let Some(index) = tx_get::<OpenOrder>(open, &index_key)? {
                if let Some(existing) = tx_get::<Order>(orders, &index.order_id)? {
                    if existing.status.is_open() {
                        return Ok((existing, false));
                    }
                }
            }

            let now = TimeStamp::new();
            let order = Order {
                id: fresh_id.clone(),
                buyer: caller.user_id.clone(),
                project: project.id.clone(),
                amount: project.price,
                currency: project.currency,
                status: OrderStatus::Pending,
                transaction_id: None,
                billing: None,
                gateway_log: vec![],
                created_at: now.clone(),
                updated_at: now,
                paid_at: None,
            };
            tx_put(orders, &order)?;
            tx_put(
                open,
                &OpenOrder {
                    key: index_key.clone(),
                    order_id: order.id.clone(),
                },
            )?;
            Ok((order, true))
        })?;

        if created {
            tracing::info!(order_id = %order.id, project_id, amount = order.amount, "order created");
        }
        Ok((order, created))
    }

    /// Visible to the buyer and to admins.
    pub fn get_order(&self, caller: &Caller, order_id: &str) -> MarketResult<Order> {
        let order = self.store.fetch::<Order>(order_id)?;
        if caller.is(&order.buyer) || caller.is_admin() {
            Ok(order)
        } else {
            Err(MarketError::Forbidden("order belongs to another user".into()))
        }
    }

    pub fn list_orders(&self, caller: &Caller) -> MarketResult<Vec<Order>> {
        let mut orders = self
            .store
            .scan::<Order, _>(|o| o.buyer == caller.user_id)?;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    /// Charges the order through the gateway and finalizes the sale.
    pub async fn pay(
        &self,
        caller: &Caller,
        order_id: &str,
        token: &str,
        billing: Option<BillingDetails>,
    ) -> MarketResult<Receipt> {
        let token = token.trim();
        if token.is_empty() {
            return Err(MarketError::validation(vec![FieldError::new(
                "token",
                "A payment token is required",
            )]));
        }
        if let Some(billing) = &billing {
            billing.validate()?;
        }

        let order = self.begin_charge(caller, order_id, billing.clone())?;

        let request = ChargeRequest {
            merchant_order_id: order.id.clone(),
            amount: order.amount,
            currency: order.currency,
            token: token.to_string(),
            billing,
        };
        let outcome = match tokio::time::timeout(self.timeout, self.gateway.charge(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::Timeout),
        };

        let receipt = match outcome {
            Ok(receipt) => receipt,
            Err(err) => return Err(self.fail_charge(&order, err)),
        };
        tracing::info!(order_id, transaction_id = %receipt.transaction_id, "gateway approved charge");

        match self.finalize(order_id, &receipt.transaction_id, "charge.approved", &receipt.raw) {
            Ok(Finalized::Settled(order, project)) => {
                announce_sale(&self.notifications, &project, &order.buyer);
                Ok(Receipt { order, project })
            }
            Ok(Finalized::AlreadySettled(order)) => {
                let project = self.store.fetch::<Project>(&order.project)?;
                Ok(Receipt { order, project })
            }
            Ok(Finalized::Unavailable(reason)) => {
                self.compensate(&order, &receipt.transaction_id, &reason).await;
                Err(MarketError::Conflict(reason.to_string()))
            }
            Err(err) => {
                // leave the order reconcilable by the settlement notification
                self.mark_failed(order_id, GatewayLogEntry::new("finalize.error", err.to_string()));
                Err(err)
            }
        }
    }

    /// Moves the order to `processing`. Only one submission can hold that
    /// state; a stale `processing` left by a crashed attempt can be retaken.
    fn begin_charge(
        &self,
        caller: &Caller,
        order_id: &str,
        billing: Option<BillingDetails>,
    ) -> MarketResult<Order> {
        let lease = chrono::Duration::from_std(self.timeout * 2)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        let current = self.store.fetch::<Order>(order_id)?;
        if !caller.is(&current.buyer) {
            return Err(MarketError::Forbidden("order belongs to another user".into()));
        }
        if matches!(current.status, OrderStatus::Pending | OrderStatus::Failed) {
            let available = self
                .store
                .get::<Project>(&current.project)?
                .ok_or_else(|| MarketError::Conflict(format!("project {} no longer exists", current.project)))
                .and_then(|project| ensure_purchasable(&project, &caller.user_id));
            if let Err(err) = available {
                self.close_unavailable(order_id, &err);
                return Err(err);
            }
        }

        self.store.update_with::<Order, _>(order_id, |mut order| {
            match order.status {
                OrderStatus::Pending | OrderStatus::Failed => {}
                OrderStatus::Processing
                    if order.updated_at.to_datetime_utc() + lease < Utc::now() => {}
                OrderStatus::Processing => {
                    return Err(MarketError::Conflict(format!(
                        "payment for order {} is already in progress",
                        order.id
                    )));
                }
                OrderStatus::Paid => {
                    return Err(MarketError::Conflict(format!(
                        "order {} has already been paid",
                        order.id
                    )));
                }
                OrderStatus::Refunded => {
                    return Err(MarketError::Conflict(format!(
                        "order {} has been refunded",
                        order.id
                    )));
                }
            }
            order.status = OrderStatus::Processing;
            order.billing = billing.clone().or(order.billing);
            order.log(GatewayLogEntry::new("charge.started", format!("amount={}", order.amount)));
            Ok(order)
        })
    }

    /// The listing went away before any money moved: close the order.
    fn close_unavailable(&self, order_id: &str, reason: &MarketError) {
        let res = self.store.update_with::<Order, _>(order_id, |mut order| {
            if order.status == OrderStatus::Pending {
                order.status = OrderStatus::Failed;
                order.log(GatewayLogEntry::new("listing.unavailable", reason.to_string()));
            }
            Ok(order)
        });
        if let Err(err) = res {
            tracing::error!(order_id, error = %err, "could not close order");
        }
    }

    fn fail_charge(&self, order: &Order, err: GatewayError) -> MarketError {
        tracing::warn!(order_id = %order.id, error = %err, "gateway charge failed");
        self.mark_failed(&order.id, GatewayLogEntry::new("charge.failed", err.diagnostic()));
        self.notifications.notify(
            &order.buyer,
            NotificationKind::PaymentFailed,
            &order.id,
            format!("Your payment could not be completed: {}", err.client_message()),
        );
        MarketError::Gateway {
            category: err.category(),
            message: err.client_message(),
        }
    }

    /// `processing → failed`. Any other state is left untouched, so a
    /// settlement that landed meanwhile is never undone.
    fn mark_failed(&self, order_id: &str, entry: GatewayLogEntry) {
        let res = self.store.update_with::<Order, _>(order_id, |mut order| {
            if order.status == OrderStatus::Processing {
                order.status = OrderStatus::Failed;
                order.log(entry.clone());
            }
            Ok(order)
        });
        if let Err(err) = res {
            tracing::error!(order_id, error = %err, "could not record failed payment");
        }
    }

    /// The gateway took the money but the sale could not be recorded (the
    /// listing went away meanwhile). Refund and close the order; returns the
    /// status the order was left in.
    async fn compensate(&self, order: &Order, transaction_id: &str, reason: &MarketError) -> OrderStatus {
        tracing::warn!(order_id = %order.id, transaction_id, reason = %reason, "charge captured for unavailable listing, refunding");

        let refund = tokio::time::timeout(
            self.timeout,
            self.gateway.refund(transaction_id, order.amount, order.currency),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout));

        let (status, entry) = match refund {
            Ok(reference) => (
                OrderStatus::Refunded,
                GatewayLogEntry::new("refund.completed", format!("{transaction_id} -> {reference}")),
            ),
            Err(err) => {
                tracing::error!(order_id = %order.id, transaction_id, error = %err, "refund failed, manual follow-up required");
                (
                    OrderStatus::Failed,
                    GatewayLogEntry::new("refund.failed", format!("{transaction_id}: {}", err.diagnostic())),
                )
            }
        };

        let res = self.store.update_with::<Order, _>(&order.id, |mut order| {
            if !matches!(order.status, OrderStatus::Paid | OrderStatus::Refunded) {
                order.status = status;
                order.log(entry.clone());
            }
            Ok(order)
        });
        match res {
            Ok(stored) => stored.status,
            Err(err) => {
                tracing::error!(order_id = %order.id, error = %err, "could not record refund outcome");
                status
            }
        }
    }

    /// Marks the order paid and its project sold in one transaction. A
    /// project that can no longer be sold yields `Unavailable` with nothing
    /// written; any later failure aborts the whole transaction.
    fn finalize(
        &self,
        order_id: &str,
        transaction_id: &str,
        event: &str,
        detail: &str,
    ) -> MarketResult<Finalized> {
        self.store
            .transact(&[ORDERS, PROJECTS, TRANSACTIONS, OPEN_ORDERS], |trees| {
                let (orders, projects, settled, open) = (&trees[0], &trees[1], &trees[2], &trees[3]);

                let mut order: Order = tx_get(orders, order_id)?
                    .ok_or_else(|| abort(MarketError::not_found("order", order_id)))?;
                match order.status {
                    OrderStatus::Paid => return Ok(Finalized::AlreadySettled(order)),
                    OrderStatus::Refunded => {
                        return Err(abort(MarketError::Conflict(format!(
                            "order {order_id} has been refunded"
                        ))));
                    }
                    OrderStatus::Pending | OrderStatus::Processing | OrderStatus::Failed => {}
                }

                if let Some(existing) = tx_get::<SettledTransaction>(settled, transaction_id)? {
                    if existing.order_id != order.id {
                        return Err(abort(MarketError::Conflict(format!(
                            "transaction {transaction_id} already settled order {}",
                            existing.order_id
                        ))));
                    }
                }

                let project = match tx_get::<Project>(projects, &order.project)? {
                    Some(project) => sell(project, &order.buyer),
                    None => Err(MarketError::Conflict(format!(
                        "project {} no longer exists",
                        order.project
                    ))),
                };
                let project = match project {
                    Ok(project) => project,
                    Err(reason) => return Ok(Finalized::Unavailable(reason)),
                };

                let now = TimeStamp::new();
                order.status = OrderStatus::Paid;
                order.transaction_id = Some(transaction_id.to_string());
                order.paid_at = Some(now);
                order.log(GatewayLogEntry::new(event, detail));
                tx_put(orders, &order)?;
                tx_put(projects, &project)?;

                tx_put(
                    settled,
                    &SettledTransaction {
                        transaction_id: transaction_id.to_string(),
                        order_id: order.id.clone(),
                    },
                )?;
                let index_key = OpenOrder::key_for(&order.buyer, &order.project);
                if tx_get::<OpenOrder>(open, &index_key)?.is_some_and(|i| i.order_id == order.id) {
                    open.remove(index_key.as_bytes())?;
                }

                Ok(Finalized::Settled(order, project))
            })
            .inspect(|outcome| {
                if let Finalized::Settled(order, _) = outcome {
                    tracing::info!(order_id = %order.id, project_id = %order.project, buyer = %order.buyer, transaction_id, "sale finalized");
                }
            })
    }

    /// Handles the gateway's settlement notification. Verifies the signature
    /// over the raw body before trusting any of it; safe to deliver twice.
    /// Money settled for a listing that is gone is refunded and acknowledged.
    pub async fn settle_notification(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> MarketResult<SettlementOutcome> {
        let signature = signature
            .ok_or_else(|| MarketError::Unauthorized("missing notification signature".into()))?;
        if !verify_signature(&self.webhook_secret, body, signature) {
            tracing::warn!("settlement notification with invalid signature rejected");
            return Err(MarketError::Unauthorized(
                "invalid notification signature".into(),
            ));
        }

        let notice: SettlementNotice = serde_json::from_slice(body).map_err(|err| {
            MarketError::validation(vec![FieldError::new("body", format!("malformed notification: {err}"))])
        })?;
        if !notice.is_settlement() {
            tracing::debug!(event = %notice.event, order_id = %notice.order_ref, "notification ignored");
            return Ok(SettlementOutcome::Ignored);
        }

        let order = self.store.fetch::<Order>(&notice.order_ref)?;
        if notice.amount.is_some_and(|amount| amount != order.amount) {
            tracing::warn!(order_id = %order.id, expected = order.amount, got = ?notice.amount, "settlement amount mismatch");
            return Err(MarketError::Conflict(format!(
                "settled amount does not match order {}",
                order.id
            )));
        }

        if order.status == OrderStatus::Refunded {
            tracing::debug!(order_id = %order.id, "settlement for refunded order acknowledged");
            return Ok(SettlementOutcome::Refunded);
        }

        let detail = serde_json::to_string(&notice)
            .map_err(|err| MarketError::Unexpected(err.into()))?;
        match self.finalize(&order.id, &notice.transaction_id, "ins.settled", &detail)? {
            Finalized::Settled(order, project) => {
                announce_sale(&self.notifications, &project, &order.buyer);
                Ok(SettlementOutcome::Settled)
            }
            Finalized::AlreadySettled(order) => {
                tracing::debug!(order_id = %order.id, "duplicate settlement notification");
                Ok(SettlementOutcome::AlreadySettled)
            }
            Finalized::Unavailable(reason) => {
                match self.compensate(&order, &notice.transaction_id, &reason).await {
                    OrderStatus::Refunded => Ok(SettlementOutcome::Refunded),
                    _ => Ok(SettlementOutcome::RefundFailed),
                }
            }
        }
    }
}
