//! Hosted checkout A: session-based checkout with signed webhooks.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::http::{read_json, GuardedClient};
use super::{
    minor_units, signature, CallbackEvent, CheckoutContext, GatewayError, GatewayOutcome,
    Initiation, PaymentGateway,
};
use crate::config::GatewayAConfig;
use crate::domain::{PaymentMethod, Transaction};

pub const SIGNATURE_HEADER: &str = "gateway-a-signature";
/// Callbacks signed further than this from now are refused.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    client_reference_id: String,
    amount: i64,
    currency: String,
    success_url: &'a str,
    cancel_url: &'a str,
    metadata: HashMap<&'static str, String>,
}

/// Checkout session as returned by gateway A.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
}

impl CheckoutSession {
    pub fn outcome(&self) -> GatewayOutcome {
        if self.payment_status.as_deref() == Some("paid") {
            return GatewayOutcome::Completed;
        }
        match self.status.as_deref() {
            Some("expired") => GatewayOutcome::Cancelled("checkout session expired".to_string()),
            _ => GatewayOutcome::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: CheckoutSession,
}

pub struct GatewayAClient {
    http: GuardedClient,
    config: GatewayAConfig,
}

impl GatewayAClient {
    pub fn new(config: GatewayAConfig) -> Self {
        Self {
            http: GuardedClient::new(),
            config,
        }
    }

    pub fn with_http(config: GatewayAConfig, http: GuardedClient) -> Self {
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    pub async fn create_session(
        &self,
        tx: &Transaction,
        ctx: &CheckoutContext,
    ) -> Result<CheckoutSession, GatewayError> {
        let body = CreateSessionRequest {
            client_reference_id: tx.id.to_string(),
            amount: minor_units(&tx.amount)?,
            currency: tx.currency.as_str().to_lowercase(),
            success_url: &ctx.success_url,
            cancel_url: &ctx.cancel_url,
            metadata: HashMap::from([
                ("transaction_id", tx.id.to_string()),
                ("user_id", tx.user_id.to_string()),
                ("plan_id", tx.plan_id.clone()),
            ]),
        };

        let request = self
            .http
            .client()
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", tx.id.to_string())
            .json(&body);

        self.http
            .call(async move { read_json::<CheckoutSession>(request.send().await?).await })
            .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<CheckoutSession, GatewayError> {
        let request = self
            .http
            .client()
            .get(self.url(&format!("/v1/checkout/sessions/{session_id}")))
            .bearer_auth(&self.config.api_key);

        self.http
            .call(async move { read_json::<CheckoutSession>(request.send().await?).await })
            .await
    }
}

#[async_trait]
impl PaymentGateway for GatewayAClient {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::GatewayA
    }

    async fn initiate(
        &self,
        tx: &Transaction,
        ctx: &CheckoutContext,
    ) -> Result<Initiation, GatewayError> {
        let session = self.create_session(tx, ctx).await?;
        let checkout_url = session.url.ok_or_else(|| {
            GatewayError::UnexpectedPayload("checkout session without url".to_string())
        })?;

        Ok(Initiation::Redirect {
            checkout_url,
            external_reference: session.id,
        })
    }

    async fn query_status(&self, tx: &Transaction) -> Result<GatewayOutcome, GatewayError> {
        let session_id = tx.external_reference.as_deref().ok_or_else(|| {
            GatewayError::Validation("transaction has no checkout session".to_string())
        })?;
        Ok(self.get_session(session_id).await?.outcome())
    }

    async fn cancel(&self, tx: &Transaction) -> Result<(), GatewayError> {
        let Some(session_id) = tx.external_reference.as_deref() else {
            return Ok(());
        };

        let request = self
            .http
            .client()
            .post(self.url(&format!("/v1/checkout/sessions/{session_id}/expire")))
            .bearer_auth(&self.config.api_key);

        let session = self
            .http
            .call(async move { read_json::<CheckoutSession>(request.send().await?).await })
            .await?;

        // A session that got paid in the meantime cannot be expired.
        match session.outcome() {
            GatewayOutcome::Completed => Err(GatewayError::Rejected(
                "checkout session is already paid".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn parse_callback(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Option<CallbackEvent>, GatewayError> {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(GatewayError::InvalidSignature)?;
        if !signature::verify_timestamped(
            &self.config.webhook_secret,
            body,
            header,
            SIGNATURE_TOLERANCE_SECS,
        ) {
            return Err(GatewayError::InvalidSignature);
        }

        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| GatewayError::UnexpectedPayload(e.to_string()))?;
        let session = event.data.object;

        let outcome = match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                session.outcome()
            }
            "checkout.session.async_payment_failed" => {
                GatewayOutcome::Failed("payment failed".to_string())
            }
            "checkout.session.expired" => {
                GatewayOutcome::Cancelled("checkout session expired".to_string())
            }
            other => {
                tracing::debug!(event_type = other, "Ignoring gateway_a event");
                return Ok(None);
            }
        };

        Ok(Some(CallbackEvent {
            external_reference: session.id,
            outcome,
        }))
    }
}
