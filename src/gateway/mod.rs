//! Payment gateway integration.
//!
//! The lifecycle manager drives Mercado Pago preapprovals (recurring payment
//! agreements) through the [`PreapprovalClient`] trait. Production wires in
//! [`MercadoPagoClient`]; tests use the mock.

pub mod mercado_pago;

// Gateway exports
pub use mercado_pago::{MercadoPagoClient, MercadoPagoConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Client seam for the payment gateway.
///
/// None of these calls retry internally: a failure surfaces to the caller
/// with the user record untouched, and the whole operation is safe to run
/// again.
#[async_trait]
pub trait PreapprovalClient: Send + Sync {
    /// Fetch a preapproval by id.
    async fn get_preapproval(&self, preapproval_id: &str) -> Result<Preapproval>;

    /// Mark a preapproval cancelled at the gateway.
    ///
    /// Cancelling an already-cancelled preapproval succeeds and returns the
    /// current state.
    async fn cancel_preapproval(&self, preapproval_id: &str) -> Result<Preapproval>;
}

/// Preapproval (recurring payment agreement) state at the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preapproval {
    pub id: String,
    pub status: PreapprovalStatus,
    pub payer_email: Option<String>,
    /// User id recorded at checkout; links the agreement back to a record.
    pub external_reference: Option<String>,
    /// When the next charge would run; doubles as the paid-through instant.
    pub next_payment_date: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// Lifecycle state of a preapproval at the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreapprovalStatus {
    Pending,
    Authorized,
    Paused,
    Cancelled,
}

impl PreapprovalStatus {
    /// Parse a gateway status string.
    ///
    /// Unknown values map to `Paused`: a status this service does not
    /// recognize must neither grant nor revoke access.
    #[must_use]
    pub fn from_gateway(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "authorized" => Self::Authorized,
            "paused" => Self::Paused,
            "cancelled" => Self::Cancelled,
            _ => Self::Paused,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authorized => "authorized",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PreapprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Test double for the gateway seam.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use crate::error::ApiError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, RwLock};

    #[derive(Default)]
    struct MockPreapprovalClientInner {
        preapprovals: RwLock<HashMap<String, Preapproval>>,
        unavailable: AtomicBool,
    }

    /// In-memory gateway double. Clones share state.
    #[derive(Clone, Default)]
    pub struct MockPreapprovalClient {
        inner: Arc<MockPreapprovalClientInner>,
    }

    impl MockPreapprovalClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_preapproval(&self, preapproval: Preapproval) {
            self.inner
                .preapprovals
                .write()
                .unwrap()
                .insert(preapproval.id.clone(), preapproval);
        }

        /// Make every call fail until switched back.
        pub fn set_unavailable(&self, unavailable: bool) {
            self.inner.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// Snapshot of a stored preapproval.
        pub fn preapproval(&self, id: &str) -> Option<Preapproval> {
            self.inner.preapprovals.read().unwrap().get(id).cloned()
        }

        fn check_available(&self) -> Result<()> {
            if self.inner.unavailable.load(Ordering::SeqCst) {
                return Err(ApiError::service_unavailable("Gateway unavailable"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PreapprovalClient for MockPreapprovalClient {
        async fn get_preapproval(&self, preapproval_id: &str) -> Result<Preapproval> {
            self.check_available()?;
            self.inner
                .preapprovals
                .read()
                .unwrap()
                .get(preapproval_id)
                .cloned()
                .ok_or_else(|| ApiError::not_found(format!("No preapproval {preapproval_id}")))
        }

        async fn cancel_preapproval(&self, preapproval_id: &str) -> Result<Preapproval> {
            self.check_available()?;
            let mut preapprovals = self.inner.preapprovals.write().unwrap();
            let preapproval = preapprovals
                .get_mut(preapproval_id)
                .ok_or_else(|| ApiError::not_found(format!("No preapproval {preapproval_id}")))?;
            preapproval.status = PreapprovalStatus::Cancelled;
            Ok(preapproval.clone())
        }
    }

    /// Authorized preapproval fixture.
    pub fn authorized_preapproval(
        id: &str,
        payer_email: &str,
        external_reference: &str,
        next_payment_date: DateTime<Utc>,
    ) -> Preapproval {
        Preapproval {
            id: id.to_string(),
            status: PreapprovalStatus::Authorized,
            payer_email: Some(payer_email.to_string()),
            external_reference: Some(external_reference.to_string()),
            next_payment_date: Some(next_payment_date),
            reason: Some("PROD.AI Plus".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::{MockPreapprovalClient, authorized_preapproval};
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unknown_status_is_inert() {
        assert_eq!(
            PreapprovalStatus::from_gateway("under_review"),
            PreapprovalStatus::Paused
        );
        assert_eq!(
            PreapprovalStatus::from_gateway(""),
            PreapprovalStatus::Paused
        );
    }

    #[test]
    fn test_known_statuses_round_trip() {
        for status in [
            PreapprovalStatus::Pending,
            PreapprovalStatus::Authorized,
            PreapprovalStatus::Paused,
            PreapprovalStatus::Cancelled,
        ] {
            assert_eq!(PreapprovalStatus::from_gateway(status.as_str()), status);
        }
    }

    #[tokio::test]
    async fn test_mock_cancel_is_idempotent() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let client = MockPreapprovalClient::new();
        client.add_preapproval(authorized_preapproval("mp_1", "a@example.com", "user_1", now));

        let first = client.cancel_preapproval("mp_1").await.unwrap();
        assert_eq!(first.status, PreapprovalStatus::Cancelled);

        let second = client.cancel_preapproval("mp_1").await.unwrap();
        assert_eq!(second.status, PreapprovalStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_mock_unavailability_toggle() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let client = MockPreapprovalClient::new();
        client.add_preapproval(authorized_preapproval("mp_1", "a@example.com", "user_1", now));

        client.set_unavailable(true);
        assert!(client.get_preapproval("mp_1").await.is_err());

        client.set_unavailable(false);
        assert!(client.get_preapproval("mp_1").await.is_ok());
    }
}
