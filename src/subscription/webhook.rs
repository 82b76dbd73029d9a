//! Gateway webhook processing.
//!
//! Mercado Pago notifies through signed HTTP calls. The notification itself
//! is only a trigger: after the signature checks out, the preapproval is
//! fetched from the gateway and routed by its current status, so a forged or
//! reordered payload cannot inject state.

use crate::error::{ApiError, Result};
use crate::gateway::{PreapprovalClient, PreapprovalStatus};
use crate::store::UserStore;
use crate::subscription::manager::{ActivationOutcome, CancellationSync, LifecycleManager};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// One gateway notification, already pulled out of the HTTP request.
#[derive(Debug, Clone)]
pub struct GatewayNotification {
    /// `data.id` query parameter: the preapproval id.
    pub data_id: String,
    /// `type` (or legacy `topic`) query parameter.
    pub topic: String,
    /// `x-request-id` header, when delivered.
    pub request_id: Option<String>,
    /// Raw `x-signature` header.
    pub signature: String,
}

/// What processing a notification did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Preapproval authorized; the user record was switched to plus.
    Activated,
    /// Redelivery of an agreement the record already holds; nothing written.
    AlreadyActive,
    /// Gateway-side cancellation written to the record.
    CancellationRecorded,
    /// No record matches the preapproval; acknowledged and dropped.
    NoMatchingUser,
    /// Nothing to do: foreign topic, inert status, or stale agreement.
    Ignored,
}

/// Verifies and applies gateway notifications.
pub struct WebhookProcessor<S: UserStore, G: PreapprovalClient> {
    manager: Arc<LifecycleManager<S, G>>,
    gateway: G,
    secret: SecretString,
    tolerance_seconds: i64,
}

impl<S: UserStore, G: PreapprovalClient> WebhookProcessor<S, G> {
    pub fn new(
        manager: Arc<LifecycleManager<S, G>>,
        gateway: G,
        secret: impl Into<String>,
        tolerance_seconds: i64,
    ) -> Self {
        Self {
            manager,
            gateway,
            secret: SecretString::from(secret.into()),
            tolerance_seconds,
        }
    }

    /// Verify the `x-signature` header against the notification contents.
    ///
    /// Rejects timestamps outside the replay window and compares digests in
    /// constant time.
    pub fn verify_signature(
        &self,
        notification: &GatewayNotification,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let parts = parse_signature_header(&notification.signature)?;

        let age = (now.timestamp() - parts.timestamp).abs();
        if age > self.tolerance_seconds {
            return Err(ApiError::unauthorized(
                "Webhook timestamp outside tolerance",
            ));
        }

        let manifest = signed_manifest(
            &notification.data_id,
            notification.request_id.as_deref(),
            parts.timestamp,
        );

        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| ApiError::internal("Webhook secret rejected by HMAC"))?;
        mac.update(manifest.as_bytes());
        let expected = mac.finalize().into_bytes();

        let provided = hex::decode(&parts.signature_hex)
            .map_err(|_| ApiError::unauthorized("Webhook signature is not valid hex"))?;

        if expected.as_slice().ct_eq(provided.as_slice()).unwrap_u8() != 1 {
            return Err(ApiError::unauthorized("Webhook signature mismatch"));
        }

        Ok(())
    }

    /// Process one notification end to end.
    ///
    /// Signature first, then topic filter, then a fresh fetch of the
    /// preapproval, then routing by status. A gateway fetch failure bubbles
    /// up as an error so the resulting 5xx makes the gateway redeliver.
    pub async fn process(
        &self,
        notification: &GatewayNotification,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        self.verify_signature(notification, now)?;

        if notification.topic != "subscription_preapproval" {
            tracing::debug!(topic = %notification.topic, "ignoring webhook topic");
            return Ok(WebhookOutcome::Ignored);
        }

        let preapproval = match self.gateway.get_preapproval(&notification.data_id).await {
            Ok(preapproval) => preapproval,
            Err(ApiError::NotFound(_)) => {
                tracing::warn!(
                    preapproval_id = %notification.data_id,
                    "notified preapproval no longer exists, ignoring"
                );
                return Ok(WebhookOutcome::Ignored);
            }
            Err(e) => return Err(e),
        };

        match preapproval.status {
            PreapprovalStatus::Authorized => {
                match self.manager.activate_from_gateway(&preapproval).await? {
                    Some(ActivationOutcome::Activated) => Ok(WebhookOutcome::Activated),
                    Some(ActivationOutcome::AlreadyActive) => Ok(WebhookOutcome::AlreadyActive),
                    None => Ok(WebhookOutcome::NoMatchingUser),
                }
            }
            PreapprovalStatus::Cancelled => {
                match self.manager.cancellation_from_gateway(&preapproval).await? {
                    CancellationSync::Recorded => Ok(WebhookOutcome::CancellationRecorded),
                    CancellationSync::NoMatchingUser => Ok(WebhookOutcome::NoMatchingUser),
                    CancellationSync::AlreadyRecorded | CancellationSync::StaleAgreement => {
                        Ok(WebhookOutcome::Ignored)
                    }
                }
            }
            PreapprovalStatus::Pending | PreapprovalStatus::Paused => {
                tracing::debug!(
                    preapproval_id = %preapproval.id,
                    status = %preapproval.status,
                    "inert preapproval status, ignoring"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }
}

struct SignatureParts {
    timestamp: i64,
    signature_hex: String,
}

/// Parse the `ts=...,v1=...` signature header.
fn parse_signature_header(header: &str) -> Result<SignatureParts> {
    let mut timestamp = None;
    let mut signature_hex = None;

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key.trim() {
            "ts" => timestamp = value.trim().parse::<i64>().ok(),
            "v1" => signature_hex = Some(value.trim().to_string()),
            _ => {}
        }
    }

    match (timestamp, signature_hex) {
        (Some(timestamp), Some(signature_hex)) => Ok(SignatureParts {
            timestamp,
            signature_hex,
        }),
        _ => Err(ApiError::unauthorized("Malformed webhook signature header")),
    }
}

/// Signed manifest per the gateway's template:
/// `id:{data.id};request-id:{x-request-id};ts:{ts};` with the id lowercased.
/// Segments whose value was not delivered are omitted.
fn signed_manifest(data_id: &str, request_id: Option<&str>, timestamp: i64) -> String {
    let mut manifest = format!("id:{};", data_id.to_lowercase());
    if let Some(request_id) = request_id {
        if !request_id.is_empty() {
            manifest.push_str(&format!("request-id:{request_id};"));
        }
    }
    manifest.push_str(&format!("ts:{timestamp};"));
    manifest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test::{MockPreapprovalClient, authorized_preapproval};
    use crate::store::record::{Plan, SubscriptionStatus, UserRecord};
    use crate::store::test::InMemoryUserStore;
    use chrono::TimeZone;

    const SECRET: &str = "whsec_test";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn sign(data_id: &str, request_id: Option<&str>, timestamp: i64) -> String {
        let manifest = signed_manifest(data_id, request_id, timestamp);
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        format!("ts={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn notification(data_id: &str, topic: &str, now: DateTime<Utc>) -> GatewayNotification {
        GatewayNotification {
            data_id: data_id.to_string(),
            topic: topic.to_string(),
            request_id: Some("req_1".to_string()),
            signature: sign(data_id, Some("req_1"), now.timestamp()),
        }
    }

    fn setup() -> (
        WebhookProcessor<InMemoryUserStore, MockPreapprovalClient>,
        InMemoryUserStore,
        MockPreapprovalClient,
    ) {
        let store = InMemoryUserStore::new();
        let gateway = MockPreapprovalClient::new();
        let manager = Arc::new(LifecycleManager::new(store.clone(), gateway.clone(), 10));
        let processor = WebhookProcessor::new(manager, gateway.clone(), SECRET, 300);
        (processor, store, gateway)
    }

    fn seed_user(store: &InMemoryUserStore) {
        store.seed(UserRecord::new_free("user_1", "producer@example.com", 10));
    }

    // ============ Signature tests ============

    #[test]
    fn test_valid_signature_passes() {
        let (processor, _, _) = setup();
        let notification = notification("mp_1", "subscription_preapproval", t0());
        processor.verify_signature(&notification, t0()).unwrap();
    }

    #[test]
    fn test_tampered_data_id_fails() {
        let (processor, _, _) = setup();
        let mut notification = notification("mp_1", "subscription_preapproval", t0());
        notification.data_id = "mp_2".to_string();
        assert!(processor.verify_signature(&notification, t0()).is_err());
    }

    #[test]
    fn test_stale_timestamp_fails() {
        let (processor, _, _) = setup();
        let signed_at = t0() - chrono::Duration::seconds(301);
        let notification = notification("mp_1", "subscription_preapproval", signed_at);
        assert!(processor.verify_signature(&notification, t0()).is_err());
    }

    #[test]
    fn test_malformed_header_fails() {
        let (processor, _, _) = setup();
        let mut notification = notification("mp_1", "subscription_preapproval", t0());
        notification.signature = "v2=deadbeef".to_string();
        assert!(processor.verify_signature(&notification, t0()).is_err());
    }

    #[test]
    fn test_non_hex_signature_fails() {
        let (processor, _, _) = setup();
        let mut notification = notification("mp_1", "subscription_preapproval", t0());
        notification.signature = format!("ts={},v1=zzzz", t0().timestamp());
        assert!(processor.verify_signature(&notification, t0()).is_err());
    }

    #[test]
    fn test_data_id_is_matched_case_insensitively() {
        let (processor, _, _) = setup();
        // signed over the lowercased id, delivered uppercased
        let mut notification = notification("mp_abc", "subscription_preapproval", t0());
        notification.data_id = "MP_ABC".to_string();
        processor.verify_signature(&notification, t0()).unwrap();
    }

    #[test]
    fn test_missing_request_id_omits_manifest_segment() {
        let (processor, _, _) = setup();
        let notification = GatewayNotification {
            data_id: "mp_1".to_string(),
            topic: "subscription_preapproval".to_string(),
            request_id: None,
            signature: sign("mp_1", None, t0().timestamp()),
        };
        processor.verify_signature(&notification, t0()).unwrap();
    }

    // ============ Processing tests ============

    #[tokio::test]
    async fn test_authorized_notification_activates() {
        let (processor, store, gateway) = setup();
        seed_user(&store);
        let next_payment = t0() + chrono::Duration::days(30);
        gateway.add_preapproval(authorized_preapproval(
            "mp_1",
            "producer@example.com",
            "user_1",
            next_payment,
        ));

        let outcome = processor
            .process(&notification("mp_1", "subscription_preapproval", t0()), t0())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Activated);

        let stored = store.stored("user_1").unwrap();
        assert_eq!(stored.plan, Plan::Plus);
        assert_eq!(stored.expires_at, Some(next_payment));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_absorbed() {
        let (processor, store, gateway) = setup();
        seed_user(&store);
        gateway.add_preapproval(authorized_preapproval(
            "mp_1",
            "producer@example.com",
            "user_1",
            t0() + chrono::Duration::days(30),
        ));

        let note = notification("mp_1", "subscription_preapproval", t0());
        assert_eq!(
            processor.process(&note, t0()).await.unwrap(),
            WebhookOutcome::Activated
        );
        assert_eq!(
            processor.process(&note, t0()).await.unwrap(),
            WebhookOutcome::AlreadyActive
        );
    }

    #[tokio::test]
    async fn test_cancelled_notification_records_grace() {
        let (processor, store, gateway) = setup();
        seed_user(&store);
        let next_payment = t0() + chrono::Duration::days(30);
        let mut preapproval =
            authorized_preapproval("mp_1", "producer@example.com", "user_1", next_payment);
        gateway.add_preapproval(preapproval.clone());

        // user activates, then cancels from the gateway's side
        processor
            .process(&notification("mp_1", "subscription_preapproval", t0()), t0())
            .await
            .unwrap();
        preapproval.status = crate::gateway::PreapprovalStatus::Cancelled;
        gateway.add_preapproval(preapproval);

        let outcome = processor
            .process(&notification("mp_1", "subscription_preapproval", t0()), t0())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::CancellationRecorded);

        let stored = store.stored("user_1").unwrap();
        assert_eq!(stored.plan, Plan::Plus);
        assert_eq!(
            stored.subscription_status,
            Some(SubscriptionStatus::Cancelled)
        );
        assert_eq!(stored.expires_at, Some(next_payment));
    }

    #[tokio::test]
    async fn test_unknown_user_acknowledged_without_mutation() {
        let (processor, store, gateway) = setup();
        seed_user(&store);
        let before = store.stored("user_1").unwrap();
        gateway.add_preapproval(authorized_preapproval(
            "mp_1",
            "stranger@example.com",
            "nobody",
            t0() + chrono::Duration::days(30),
        ));

        let outcome = processor
            .process(&notification("mp_1", "subscription_preapproval", t0()), t0())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::NoMatchingUser);
        assert_eq!(store.stored("user_1").unwrap(), before);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_topic_is_ignored() {
        let (processor, _, _) = setup();
        // no preapproval seeded: an ignored topic must not reach the gateway
        let outcome = processor
            .process(&notification("pay_1", "payment", t0()), t0())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_inert_status_is_ignored() {
        let (processor, store, gateway) = setup();
        seed_user(&store);
        let mut preapproval = authorized_preapproval(
            "mp_1",
            "producer@example.com",
            "user_1",
            t0() + chrono::Duration::days(30),
        );
        preapproval.status = crate::gateway::PreapprovalStatus::Pending;
        gateway.add_preapproval(preapproval);

        let outcome = processor
            .process(&notification("mp_1", "subscription_preapproval", t0()), t0())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
        assert_eq!(store.stored("user_1").unwrap().plan, Plan::Free);
    }

    #[tokio::test]
    async fn test_vanished_preapproval_is_ignored() {
        let (processor, _, _) = setup();
        let outcome = processor
            .process(&notification("mp_404", "subscription_preapproval", t0()), t0())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_gateway_outage_bubbles_for_redelivery() {
        let (processor, _, gateway) = setup();
        gateway.set_unavailable(true);

        let result = processor
            .process(&notification("mp_1", "subscription_preapproval", t0()), t0())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_before_any_work() {
        let (processor, _, gateway) = setup();
        gateway.set_unavailable(true);

        let mut note = notification("mp_1", "subscription_preapproval", t0());
        note.signature = format!("ts={},v1=00", t0().timestamp());

        // an unavailable gateway is never consulted for an unsigned call
        let err = processor.process(&note, t0()).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
