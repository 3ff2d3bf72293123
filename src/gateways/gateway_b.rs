//! Hosted checkout B: token-based checkout form with signed requests and callbacks.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use super::http::{read_json, GuardedClient};
use super::{
    signature, CallbackEvent, CheckoutContext, GatewayError, GatewayOutcome, Initiation,
    PaymentGateway,
};
use crate::config::GatewayBConfig;
use crate::domain::{PaymentMethod, PlanType, Transaction};

pub const SIGNATURE_HEADER: &str = "x-gateway-b-signature";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeRequest {
    locale: &'static str,
    conversation_id: String,
    price: String,
    paid_price: String,
    currency: String,
    basket_id: String,
    payment_group: &'static str,
    callback_url: String,
    buyer_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveRequest<'a> {
    token: &'a str,
    conversation_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub status: String,
    pub token: Option<String>,
    pub payment_page_url: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetail {
    pub status: String,
    pub payment_status: Option<String>,
    pub error_message: Option<String>,
}

impl PaymentDetail {
    pub fn outcome(&self) -> GatewayOutcome {
        map_payment_status(self.payment_status.as_deref(), self.error_message.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackPayload {
    token: String,
    status: String,
    error_message: Option<String>,
}

fn map_payment_status(status: Option<&str>, error: Option<&str>) -> GatewayOutcome {
    match status.map(str::to_ascii_uppercase).as_deref() {
        Some("SUCCESS") => GatewayOutcome::Completed,
        Some("FAILURE") => GatewayOutcome::Failed(error.unwrap_or("payment failed").to_string()),
        _ => GatewayOutcome::Pending,
    }
}

pub struct GatewayBClient {
    http: GuardedClient,
    config: GatewayBConfig,
}

impl GatewayBClient {
    pub fn new(config: GatewayBConfig) -> Self {
        Self {
            http: GuardedClient::new(),
            config,
        }
    }

    pub fn with_http(config: GatewayBConfig, http: GuardedClient) -> Self {
        Self { http, config }
    }

    async fn post_signed<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| GatewayError::Validation(format!("cannot encode request: {e}")))?;
        let request = self
            .http
            .client()
            .post(format!(
                "{}{}",
                self.config.base_url.trim_end_matches('/'),
                path
            ))
            .header("x-api-key", &self.config.api_key)
            .header(SIGNATURE_HEADER, signature::sign(&self.config.secret_key, &payload))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);

        self.http
            .call(async move { read_json::<T>(request.send().await?).await })
            .await
    }

    pub async fn retrieve(&self, tx: &Transaction, token: &str) -> Result<PaymentDetail, GatewayError> {
        let detail: PaymentDetail = self
            .post_signed(
                "/payment/checkoutform/auth/ecom/detail",
                &RetrieveRequest {
                    token,
                    conversation_id: tx.id.to_string(),
                },
            )
            .await?;

        if !detail.status.eq_ignore_ascii_case("success") {
            return Err(GatewayError::Rejected(
                detail
                    .error_message
                    .unwrap_or_else(|| "payment detail request failed".to_string()),
            ));
        }
        Ok(detail)
    }
}

#[async_trait]
impl PaymentGateway for GatewayBClient {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::GatewayB
    }

    async fn initiate(
        &self,
        tx: &Transaction,
        ctx: &CheckoutContext,
    ) -> Result<Initiation, GatewayError> {
        let price = tx.amount.with_scale(2).to_string();
        let request = InitializeRequest {
            locale: "tr",
            conversation_id: tx.id.to_string(),
            price: price.clone(),
            paid_price: price,
            currency: tx.currency.as_str().to_string(),
            basket_id: tx.id.to_string(),
            payment_group: match tx.package_type {
                PlanType::Package => "PRODUCT",
                PlanType::Subscription => "SUBSCRIPTION",
            },
            callback_url: ctx.callback_url.clone(),
            buyer_id: tx.user_id.to_string(),
        };

        let response: InitializeResponse = self
            .post_signed("/payment/checkoutform/initialize", &request)
            .await?;

        if !response.status.eq_ignore_ascii_case("success") {
            return Err(GatewayError::Rejected(
                response
                    .error_message
                    .unwrap_or_else(|| "checkout form initialization failed".to_string()),
            ));
        }

        match (response.token, response.payment_page_url) {
            (Some(token), Some(url)) => Ok(Initiation::Redirect {
                checkout_url: url,
                external_reference: token,
            }),
            _ => Err(GatewayError::UnexpectedPayload(
                "checkout form without token or page url".to_string(),
            )),
        }
    }

    async fn query_status(&self, tx: &Transaction) -> Result<GatewayOutcome, GatewayError> {
        let token = tx.external_reference.as_deref().ok_or_else(|| {
            GatewayError::Validation("transaction has no checkout token".to_string())
        })?;
        Ok(self.retrieve(tx, token).await?.outcome())
    }

    /// The hosted form has no cancel call. An issued token stays payable until it
    /// expires, so the transaction is left for callbacks and the sweep to resolve.
    async fn cancel(&self, tx: &Transaction) -> Result<(), GatewayError> {
        if tx.external_reference.is_none() {
            return Ok(());
        }
        Err(GatewayError::Rejected(
            "checkout form cannot be cancelled, it stays open until it expires".to_string(),
        ))
    }

    fn parse_callback(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Option<CallbackEvent>, GatewayError> {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(GatewayError::InvalidSignature)?;
        if !signature::verify(&self.config.secret_key, body, provided) {
            return Err(GatewayError::InvalidSignature);
        }

        let payload: CallbackPayload = serde_json::from_slice(body)
            .map_err(|e| GatewayError::UnexpectedPayload(e.to_string()))?;

        let outcome = map_payment_status(Some(&payload.status), payload.error_message.as_deref());
        if outcome == GatewayOutcome::Pending {
            return Ok(None);
        }

        Ok(Some(CallbackEvent {
            external_reference: payload.token,
            outcome,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, PlanQuote};
    use axum::http::HeaderValue;
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    fn config(base_url: String) -> GatewayBConfig {
        GatewayBConfig {
            base_url,
            api_key: "api_test".to_string(),
            secret_key: "secret_test".to_string(),
        }
    }

    fn tx() -> Transaction {
        Transaction::pending(
            Uuid::new_v4(),
            PlanQuote {
                plan_id: "pro".to_string(),
                plan_type: PlanType::Package,
                amount: BigDecimal::from(400),
                currency: Currency::Try,
                credits: 50,
            },
            PaymentMethod::GatewayB,
            None,
        )
    }

    #[tokio::test]
    async fn test_initiate_returns_payment_page() {
        let mut server = mockito::Server::new_async().await;
        let tx = tx();
        let mock = server
            .mock("POST", "/payment/checkoutform/initialize")
            .match_header("x-api-key", "api_test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "conversationId": tx.id.to_string(),
                "price": "400.00",
                "currency": "TRY",
                "paymentGroup": "PRODUCT",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"success","token":"tok_1","paymentPageUrl":"https://pay.test/tok_1"}"#)
            .create_async()
            .await;

        let client = GatewayBClient::new(config(server.url()));
        let ctx = CheckoutContext::for_transaction("http://localhost:3000", &tx);
        let initiation = client.initiate(&tx, &ctx).await.unwrap();

        assert_eq!(
            initiation,
            Initiation::Redirect {
                checkout_url: "https://pay.test/tok_1".to_string(),
                external_reference: "tok_1".to_string(),
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_initiate_failure_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/payment/checkoutform/initialize")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"failure","errorMessage":"invalid price"}"#)
            .create_async()
            .await;

        let client = GatewayBClient::new(config(server.url()));
        let tx = tx();
        let ctx = CheckoutContext::for_transaction("http://localhost:3000", &tx);

        match client.initiate(&tx, &ctx).await {
            Err(GatewayError::Rejected(msg)) => assert_eq!(msg, "invalid price"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_status_maps_payment_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/payment/checkoutform/auth/ecom/detail")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"success","paymentStatus":"FAILURE","errorMessage":"card declined"}"#)
            .create_async()
            .await;

        let client = GatewayBClient::new(config(server.url()));
        let mut tx = tx();
        tx.external_reference = Some("tok_1".to_string());

        assert_eq!(
            client.query_status(&tx).await.unwrap(),
            GatewayOutcome::Failed("card declined".to_string())
        );
    }

    #[tokio::test]
    async fn test_cancel_refuses_issued_token() {
        let mut server = mockito::Server::new_async().await;
        let detail = server
            .mock("POST", "/payment/checkoutform/auth/ecom/detail")
            .expect(0)
            .create_async()
            .await;

        let client = GatewayBClient::new(config(server.url()));
        let mut tx = tx();
        tx.external_reference = Some("tok_9".to_string());

        assert!(matches!(
            client.cancel(&tx).await,
            Err(GatewayError::Rejected(_))
        ));
        detail.assert_async().await;

        tx.external_reference = None;
        assert!(client.cancel(&tx).await.is_ok());
    }

    #[test]
    fn test_payment_status_mapping() {
        assert_eq!(map_payment_status(Some("SUCCESS"), None), GatewayOutcome::Completed);
        assert_eq!(
            map_payment_status(Some("failure"), None),
            GatewayOutcome::Failed("payment failed".to_string())
        );
        assert_eq!(map_payment_status(Some("INIT_THREEDS"), None), GatewayOutcome::Pending);
        assert_eq!(map_payment_status(None, None), GatewayOutcome::Pending);
    }

    #[test]
    fn test_parse_callback() {
        let client = GatewayBClient::new(config("http://unused".to_string()));
        let body = br#"{"token":"tok_1","status":"SUCCESS"}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&signature::sign("secret_test", body)).unwrap(),
        );

        let event = client.parse_callback(&headers, body).unwrap().unwrap();
        assert_eq!(event.external_reference, "tok_1");
        assert_eq!(event.outcome, GatewayOutcome::Completed);

        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("deadbeef"));
        assert!(matches!(
            client.parse_callback(&headers, body),
            Err(GatewayError::InvalidSignature)
        ));
    }
}
