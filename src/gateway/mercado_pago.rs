use crate::error::{ApiError, Result};
use crate::gateway::{Preapproval, PreapprovalClient, PreapprovalStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Configuration for the Mercado Pago client.
#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for MercadoPagoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mercadopago.com".to_string(),
            timeout_seconds: 10,
        }
    }
}

/// Live [`PreapprovalClient`] over the Mercado Pago REST API.
#[derive(Clone)]
pub struct MercadoPagoClient {
    http: reqwest::Client,
    access_token: SecretString,
    base_url: String,
}

impl std::fmt::Debug for MercadoPagoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MercadoPagoClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MercadoPagoClient {
    pub fn new(config: MercadoPagoConfig, access_token: impl Into<String>) -> Result<Self> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(ApiError::internal(
                "Mercado Pago access token must not be empty",
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ApiError::internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            access_token: SecretString::from(access_token),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn preapproval_url(&self, preapproval_id: &str) -> String {
        format!("{}/preapproval/{}", self.base_url, preapproval_id)
    }
}

#[async_trait]
impl PreapprovalClient for MercadoPagoClient {
    async fn get_preapproval(&self, preapproval_id: &str) -> Result<Preapproval> {
        let response = self
            .http
            .get(self.preapproval_url(preapproval_id))
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await?;
        let response = gateway_status(response, "fetch preapproval").await?;

        let payload: PreapprovalPayload = response.json().await?;
        Ok(payload.into())
    }

    async fn cancel_preapproval(&self, preapproval_id: &str) -> Result<Preapproval> {
        let response = self
            .http
            .put(self.preapproval_url(preapproval_id))
            .bearer_auth(self.access_token.expose_secret())
            .json(&json!({ "status": "cancelled" }))
            .send()
            .await?;
        let response = gateway_status(response, "cancel preapproval").await?;

        let payload: PreapprovalPayload = response.json().await?;
        Ok(payload.into())
    }
}

/// Wire shape of a preapproval resource.
#[derive(Debug, Deserialize)]
struct PreapprovalPayload {
    id: String,
    status: String,
    #[serde(default)]
    payer_email: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    next_payment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    reason: Option<String>,
}

impl From<PreapprovalPayload> for Preapproval {
    fn from(payload: PreapprovalPayload) -> Self {
        Self {
            id: payload.id,
            status: PreapprovalStatus::from_gateway(&payload.status),
            payer_email: payload.payer_email,
            external_reference: payload.external_reference,
            next_payment_date: payload.next_payment_date,
            reason: payload.reason,
        }
    }
}

async fn gateway_status(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!(
        status = %status,
        action = %action,
        body = %body,
        "Mercado Pago request failed"
    );
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ApiError::not_found("Preapproval not found at gateway"));
    }
    Err(ApiError::service_unavailable(format!(
        "Gateway {action} failed with status {status}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_converts_with_offset_timestamps() {
        let payload: PreapprovalPayload = serde_json::from_value(serde_json::json!({
            "id": "mp_123",
            "status": "authorized",
            "payer_email": "producer@example.com",
            "external_reference": "user_1",
            "next_payment_date": "2024-07-01T11:22:33.000-04:00",
            "reason": "PROD.AI Plus"
        }))
        .unwrap();

        let preapproval: Preapproval = payload.into();
        assert_eq!(preapproval.status, PreapprovalStatus::Authorized);
        assert_eq!(preapproval.external_reference.as_deref(), Some("user_1"));
        let next = preapproval.next_payment_date.unwrap();
        assert_eq!(next.to_rfc3339(), "2024-07-01T15:22:33+00:00");
    }

    #[test]
    fn test_payload_tolerates_sparse_fields() {
        let payload: PreapprovalPayload = serde_json::from_value(serde_json::json!({
            "id": "mp_123",
            "status": "something_new"
        }))
        .unwrap();

        let preapproval: Preapproval = payload.into();
        assert_eq!(preapproval.status, PreapprovalStatus::Paused);
        assert!(preapproval.next_payment_date.is_none());
    }

    #[test]
    fn test_empty_access_token_is_rejected() {
        assert!(MercadoPagoClient::new(MercadoPagoConfig::default(), "").is_err());
        assert!(MercadoPagoClient::new(MercadoPagoConfig::default(), "APP_USR-1").is_ok());
    }

    #[test]
    fn test_preapproval_url_shape() {
        let client = MercadoPagoClient::new(
            MercadoPagoConfig {
                base_url: "https://api.mercadopago.com/".to_string(),
                timeout_seconds: 10,
            },
            "APP_USR-1",
        )
        .unwrap();
        assert_eq!(
            client.preapproval_url("mp_123"),
            "https://api.mercadopago.com/preapproval/mp_123"
        );
    }
}
