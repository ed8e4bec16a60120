//! Payment gateway adapter.
//!
//! The gateway is an external collaborator reached over HTTPS. In sandbox mode
//! two magic tokens short-circuit to deterministic outcomes without any
//! network traffic, which is what test environments run against.
use super::error::GatewayCategory;
use super::order::BillingDetails;
use super::types::Currency;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub const SANDBOX_APPROVED_TOKEN: &str = "tok_sandbox_approved";
pub const SANDBOX_DECLINED_TOKEN: &str = "tok_sandbox_declined";

pub type GatewayResult<T> = Result<T, GatewayError>;
pub type GatewayFuture<T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send>>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("charge declined ({code}): {message}")]
    Declined {
        code: String,
        message: String,
        raw: String,
    },
    #[error("gateway timed out")]
    Timeout,
    #[error("gateway transport failure: {0}")]
    Transport(String),
    #[error("unexpected gateway response: {0}")]
    Protocol(String),
}

impl GatewayError {
    pub fn category(&self) -> GatewayCategory {
        match self {
            Self::Declined { .. } => GatewayCategory::Declined,
            Self::Timeout => GatewayCategory::Timeout,
            Self::Transport(_) | Self::Protocol(_) => GatewayCategory::Unavailable,
        }
    }

    /// What the buyer is told. Only the gateway's own declared message
    /// survives; transport internals never leave the server.
    pub fn client_message(&self) -> String {
        match self {
            Self::Declined { message, .. } => message.chars().take(200).collect(),
            Self::Timeout => "The payment provider did not respond in time".into(),
            Self::Transport(_) | Self::Protocol(_) => {
                "The payment provider is currently unavailable".into()
            }
        }
    }

    /// Full diagnostic text for the order's gateway log.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Declined { raw, .. } if !raw.is_empty() => format!("{self}; raw={raw}"),
            _ => self.to_string(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    pub merchant_order_id: String,
    pub amount: u64,
    pub currency: Currency,
    pub token: String,
    pub billing: Option<BillingDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub transaction_id: String,
    pub raw: String,
}

pub trait PaymentGateway: Send + Sync {
    fn charge(&self, request: ChargeRequest) -> GatewayFuture<ChargeReceipt>;

    /// Returns the gateway's refund reference.
    fn refund(&self, transaction_id: &str, amount: u64, currency: Currency) -> GatewayFuture<String>;
}

/// Deterministic sandbox outcome for the magic tokens, `None` otherwise.
pub fn sandbox_outcome(request: &ChargeRequest) -> Option<GatewayResult<ChargeReceipt>> {
    match request.token.as_str() {
        SANDBOX_APPROVED_TOKEN => {
            let digest = sha256::digest(request.merchant_order_id.as_str());
            Some(Ok(ChargeReceipt {
                transaction_id: format!("sandbox_{}", &digest[..24]),
                raw: format!(
                    "{{\"status\":\"approved\",\"sandbox\":true,\"amount\":{}}}",
                    request.amount
                ),
            }))
        }
        SANDBOX_DECLINED_TOKEN => Some(Err(GatewayError::Declined {
            code: "card_declined".into(),
            message: "The card was declined".into(),
            raw: "{\"status\":\"declined\",\"sandbox\":true}".into(),
        })),
        _ => None,
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChargeResponse {
    status: String,
    transaction_id: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RefundResponse {
    refund_id: String,
}

/// JSON-over-HTTPS gateway client.
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    sandbox: bool,
}

impl HttpGateway {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration, sandbox: bool) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            sandbox,
        })
    }

    pub fn shared(self) -> Arc<dyn PaymentGateway> {
        Arc::new(self)
    }
}

fn transport(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err.to_string())
    }
}

impl PaymentGateway for HttpGateway {
    fn charge(&self, request: ChargeRequest) -> GatewayFuture<ChargeReceipt> {
        if self.sandbox {
            if let Some(outcome) = sandbox_outcome(&request) {
                tracing::debug!(order_id = %request.merchant_order_id, "sandbox charge short-circuited");
                return Box::pin(async move { outcome });
            }
        }

        let call = self
            .client
            .post(format!("{}/charges", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&request);

        Box::pin(async move {
            let response = call.send().await.map_err(transport)?;
            let status = response.status();
            let raw = response.text().await.map_err(transport)?;

            if status.is_server_error() {
                return Err(GatewayError::Transport(format!("gateway returned {status}")));
            }
            let body: ChargeResponse = serde_json::from_str(&raw)
                .map_err(|err| GatewayError::Protocol(format!("{status}: {err}")))?;

            match (body.status.as_str(), body.transaction_id) {
                ("approved", Some(transaction_id)) if status.is_success() => {
                    Ok(ChargeReceipt { transaction_id, raw })
                }
                ("approved", None) => Err(GatewayError::Protocol(
                    "approved charge without transaction id".into(),
                )),
                _ => Err(GatewayError::Declined {
                    code: body.code.unwrap_or_else(|| "declined".into()),
                    message: body
                        .message
                        .unwrap_or_else(|| "The payment was declined".into()),
                    raw,
                }),
            }
        })
    }

    fn refund(&self, transaction_id: &str, amount: u64, currency: Currency) -> GatewayFuture<String> {
        if self.sandbox && transaction_id.starts_with("sandbox_") {
            let reference = format!("sandbox_refund_{}", &transaction_id["sandbox_".len()..]);
            return Box::pin(async move { Ok(reference) });
        }

        let call = self
            .client
            .post(format!("{}/refunds", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "transactionId": transaction_id,
                "amount": amount,
                "currency": currency,
            }));

        Box::pin(async move {
            let response = call.send().await.map_err(transport)?;
            let status = response.status();
            if !status.is_success() {
                return Err(GatewayError::Transport(format!("refund returned {status}")));
            }
            let body: RefundResponse = response
                .json()
                .await
                .map_err(|err| GatewayError::Protocol(err.to_string()))?;
            Ok(body.refund_id)
        })
    }
}
