//! User record persistence.
//!
//! The lifecycle manager talks to storage through the [`UserStore`] trait.
//! Production wires in the Firestore adapter; tests use the in-memory store.

pub mod firestore;
pub mod record;

// Store exports
pub use firestore::{FirestoreConfig, FirestoreUserStore};
pub use record::{Plan, RecordPatch, SubscriptionStatus, UserRecord};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage seam for user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a record by user id.
    async fn get(&self, user_id: &str) -> Result<Option<UserRecord>>;

    /// Fetch the first record whose email matches, case-insensitively.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// Create a record. Fails if one already exists for the id.
    async fn insert(&self, record: &UserRecord) -> Result<()>;

    /// Merge-write a patch into an existing record.
    ///
    /// Fails with not-found when the record is missing. Merge semantics are
    /// those of [`RecordPatch::apply`]: set fields written, clear flags
    /// clearing, everything else untouched.
    async fn merge(&self, user_id: &str, patch: &RecordPatch) -> Result<()>;

    /// Records on the plus plan whose expiry is at or before `now`.
    async fn expired_plus(&self, now: DateTime<Utc>) -> Result<Vec<UserRecord>>;
}

/// Test double for the storage seam.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    #[derive(Default)]
    struct InMemoryUserStoreInner {
        records: RwLock<HashMap<String, UserRecord>>,
    }

    /// HashMap-backed [`UserStore`] with the same merge semantics as the live
    /// adapter. Clones share state, so a test can hold one handle while the
    /// manager owns another.
    #[derive(Clone, Default)]
    pub struct InMemoryUserStore {
        inner: Arc<InMemoryUserStoreInner>,
    }

    impl InMemoryUserStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a record directly, bypassing insert-conflict checks.
        pub fn seed(&self, record: UserRecord) {
            self.inner
                .records
                .write()
                .unwrap()
                .insert(record.id.clone(), record);
        }

        /// Snapshot of a stored record.
        pub fn stored(&self, user_id: &str) -> Option<UserRecord> {
            self.inner.records.read().unwrap().get(user_id).cloned()
        }

        pub fn len(&self) -> usize {
            self.inner.records.read().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl UserStore for InMemoryUserStore {
        async fn get(&self, user_id: &str) -> Result<Option<UserRecord>> {
            Ok(self.inner.records.read().unwrap().get(user_id).cloned())
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
            Ok(self
                .inner
                .records
                .read()
                .unwrap()
                .values()
                .find(|r| r.email.eq_ignore_ascii_case(email))
                .cloned())
        }

        async fn insert(&self, record: &UserRecord) -> Result<()> {
            let mut records = self.inner.records.write().unwrap();
            if records.contains_key(&record.id) {
                return Err(crate::error::ApiError::bad_request(format!(
                    "Record already exists: {}",
                    record.id
                )));
            }
            records.insert(record.id.clone(), record.clone());
            Ok(())
        }

        async fn merge(&self, user_id: &str, patch: &RecordPatch) -> Result<()> {
            let mut records = self.inner.records.write().unwrap();
            let record = records.get_mut(user_id).ok_or_else(|| {
                crate::error::ApiError::not_found(format!("No record for user {user_id}"))
            })?;
            patch.apply(record);
            Ok(())
        }

        async fn expired_plus(&self, now: DateTime<Utc>) -> Result<Vec<UserRecord>> {
            Ok(self
                .inner
                .records
                .read()
                .unwrap()
                .values()
                .filter(|r| r.plan == Plan::Plus && r.is_expired(now))
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::InMemoryUserStore;
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, email: &str) -> UserRecord {
        UserRecord::new_free(id, email, 10)
    }

    #[tokio::test]
    async fn test_insert_then_get() {
        let store = InMemoryUserStore::new();
        store.insert(&record("user_1", "a@example.com")).await.unwrap();

        let found = store.get("user_1").await.unwrap().unwrap();
        assert_eq!(found.email, "a@example.com");
        assert!(store.get("user_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_conflict_fails() {
        let store = InMemoryUserStore::new();
        store.insert(&record("user_1", "a@example.com")).await.unwrap();

        let result = store.insert(&record("user_1", "b@example.com")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_find_by_email_ignores_case() {
        let store = InMemoryUserStore::new();
        store
            .insert(&record("user_1", "Producer@Example.com"))
            .await
            .unwrap();

        let found = store.find_by_email("producer@example.com").await.unwrap();
        assert_eq!(found.unwrap().id, "user_1");
    }

    #[tokio::test]
    async fn test_merge_missing_record_fails() {
        let store = InMemoryUserStore::new();
        let patch = RecordPatch {
            is_plus: Some(true),
            ..Default::default()
        };

        let result = store.merge("ghost", &patch).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_expired_plus_filters_by_plan_and_expiry() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let store = InMemoryUserStore::new();

        let mut expired = record("expired", "x@example.com");
        expired.plan = Plan::Plus;
        expired.is_plus = true;
        expired.expires_at = Some(now - chrono::Duration::hours(1));
        store.seed(expired);

        let mut current = record("current", "c@example.com");
        current.plan = Plan::Plus;
        current.is_plus = true;
        current.expires_at = Some(now + chrono::Duration::hours(1));
        store.seed(current);

        let mut free_expired = record("free", "f@example.com");
        free_expired.expires_at = Some(now - chrono::Duration::hours(1));
        store.seed(free_expired);

        let hits = store.expired_plus(now).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "expired");
    }
}
