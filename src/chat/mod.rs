//! Chat access metering.
//!
//! Sits in front of the chat pipeline: every message asks the guard before
//! the model is called. Plus passes unmetered; free spends one unit of the
//! daily quota and is refused once it runs out. A lapsed grace window is
//! downgraded on the spot, so a cancelled subscriber cannot ride the paid
//! plan past the period already paid for.

use crate::error::Result;
use crate::gateway::PreapprovalClient;
use crate::store::{Plan, UserStore};
use crate::subscription::SubscriptionError;
use crate::subscription::manager::LifecycleManager;
use crate::subscription::transition;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Access decision for one chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAccess {
    pub plan: Plan,
    /// Messages left today after this one; `None` on unmetered plans.
    pub remaining_messages: Option<u32>,
}

/// Per-message gate in front of the chat pipeline.
pub struct MessageGuard<S: UserStore, G: PreapprovalClient> {
    store: S,
    manager: Arc<LifecycleManager<S, G>>,
}

impl<S: UserStore, G: PreapprovalClient> MessageGuard<S, G> {
    pub fn new(store: S, manager: Arc<LifecycleManager<S, G>>) -> Self {
        Self { store, manager }
    }

    /// Authorize and meter one chat message for the caller.
    ///
    /// Provisions a record on first contact and folds in a lapsed grace
    /// window before the plan rules run, so the decision is always made
    /// against current entitlement.
    pub async fn authorize(
        &self,
        user_id: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatAccess> {
        self.manager.ensure_record(user_id, email).await?;
        let record = self
            .manager
            .ensure_current(user_id, now)
            .await?
            .ok_or_else(|| SubscriptionError::record_not_found(user_id))?;

        if record.plan.is_paid() {
            return Ok(ChatAccess {
                plan: record.plan,
                remaining_messages: None,
            });
        }

        if record.remaining_messages == 0 {
            return Err(SubscriptionError::quota_exhausted(user_id).into());
        }

        let patch = transition::consume_message(&record);
        self.store.merge(user_id, &patch).await?;

        let remaining = record.remaining_messages.saturating_sub(1);
        tracing::debug!(user_id = %user_id, remaining, "free message spent");
        Ok(ChatAccess {
            plan: record.plan,
            remaining_messages: Some(remaining),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::gateway::test::MockPreapprovalClient;
    use crate::store::record::{SubscriptionStatus, UserRecord};
    use crate::store::test::InMemoryUserStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (
        MessageGuard<InMemoryUserStore, MockPreapprovalClient>,
        InMemoryUserStore,
    ) {
        let store = InMemoryUserStore::new();
        let gateway = MockPreapprovalClient::new();
        let manager = Arc::new(LifecycleManager::new(store.clone(), gateway, 10));
        let guard = MessageGuard::new(store.clone(), manager);
        (guard, store)
    }

    #[tokio::test]
    async fn test_plus_passes_unmetered() {
        let (guard, store) = setup();
        let mut record = UserRecord::new_free("user_1", "producer@example.com", 10);
        record.plan = Plan::Plus;
        record.is_plus = true;
        record.remaining_messages = 3;
        store.seed(record);

        let access = guard
            .authorize("user_1", "producer@example.com", t0())
            .await
            .unwrap();
        assert_eq!(access.plan, Plan::Plus);
        assert_eq!(access.remaining_messages, None);
        // the stored counter is untouched
        assert_eq!(store.stored("user_1").unwrap().remaining_messages, 3);
    }

    #[tokio::test]
    async fn test_free_message_spends_quota() {
        let (guard, store) = setup();
        store.seed(UserRecord::new_free("user_1", "producer@example.com", 10));

        let access = guard
            .authorize("user_1", "producer@example.com", t0())
            .await
            .unwrap();
        assert_eq!(access.plan, Plan::Free);
        assert_eq!(access.remaining_messages, Some(9));
        assert_eq!(store.stored("user_1").unwrap().remaining_messages, 9);
    }

    #[tokio::test]
    async fn test_exhausted_quota_is_refused() {
        let (guard, store) = setup();
        store.seed(UserRecord::new_free("user_1", "producer@example.com", 0));

        let err = guard
            .authorize("user_1", "producer@example.com", t0())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TooManyRequests(_)));
        assert_eq!(store.stored("user_1").unwrap().remaining_messages, 0);
    }

    #[tokio::test]
    async fn test_first_contact_provisions_record() {
        let (guard, store) = setup();
        assert!(store.is_empty());

        let access = guard
            .authorize("user_1", "Producer@Example.com", t0())
            .await
            .unwrap();
        assert_eq!(access.remaining_messages, Some(9));

        let stored = store.stored("user_1").unwrap();
        assert_eq!(stored.email, "producer@example.com");
        assert_eq!(stored.remaining_messages, 9);
    }

    #[tokio::test]
    async fn test_lapsed_grace_downgrades_before_metering() {
        let (guard, store) = setup();
        let mut record = UserRecord::new_free("user_1", "producer@example.com", 10);
        record.plan = Plan::Plus;
        record.is_plus = true;
        record.subscription_status = Some(SubscriptionStatus::Cancelled);
        record.external_agreement_id = Some("mp_1".to_string());
        record.expires_at = Some(t0() - chrono::Duration::hours(1));
        record.remaining_messages = 0;
        store.seed(record);

        let access = guard
            .authorize("user_1", "producer@example.com", t0())
            .await
            .unwrap();
        // downgraded to free with a fresh quota, then metered as free
        assert_eq!(access.plan, Plan::Free);
        assert_eq!(access.remaining_messages, Some(9));

        let stored = store.stored("user_1").unwrap();
        assert_eq!(stored.plan, Plan::Free);
        assert!(!stored.is_plus);
        assert_eq!(stored.previous_plan, Some(Plan::Plus));
    }

    #[tokio::test]
    async fn test_quota_runs_down_across_messages() {
        let (guard, store) = setup();
        store.seed(UserRecord::new_free("user_1", "producer@example.com", 2));

        for expected in [1u32, 0] {
            let access = guard
                .authorize("user_1", "producer@example.com", t0())
                .await
                .unwrap();
            assert_eq!(access.remaining_messages, Some(expected));
        }

        let err = guard
            .authorize("user_1", "producer@example.com", t0())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TooManyRequests(_)));
        assert_eq!(store.stored("user_1").unwrap().remaining_messages, 0);
    }
}
