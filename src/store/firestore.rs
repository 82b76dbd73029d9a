//! Firestore REST adapter for the user record store.
//!
//! Documents live under `{collection}/{user_id}`. Merge-writes use `PATCH`
//! with `updateMask.fieldPaths`: a field named in the mask but absent from
//! the body is deleted, which is how [`RecordPatch`] clear flags reach the
//! wire. Lookups beyond get-by-id go through `:runQuery`.

use crate::error::{ApiError, Result};
use crate::store::UserStore;
use crate::store::record::{Plan, RecordPatch, SubscriptionStatus, UserRecord};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};
use std::time::Duration;

/// Configuration for the Firestore REST adapter.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub collection: String,
    /// Override for the emulator; defaults to the public endpoint.
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            collection: "users".to_string(),
            base_url: "https://firestore.googleapis.com/v1".to_string(),
            timeout_seconds: 10,
        }
    }
}

/// Firestore-backed [`UserStore`].
#[derive(Clone)]
pub struct FirestoreUserStore {
    http: reqwest::Client,
    token: SecretString,
    documents_url: String,
    collection: String,
}

impl std::fmt::Debug for FirestoreUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirestoreUserStore")
            .field("documents_url", &self.documents_url)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl FirestoreUserStore {
    pub fn new(config: FirestoreConfig, token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(ApiError::internal("Firestore token must not be empty"));
        }
        if config.project_id.is_empty() {
            return Err(ApiError::internal("Firestore project id must not be empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ApiError::internal(format!("Failed to build HTTP client: {e}")))?;

        let documents_url = format!(
            "{}/projects/{}/databases/(default)/documents",
            config.base_url.trim_end_matches('/'),
            config.project_id
        );

        Ok(Self {
            http,
            token: SecretString::from(token),
            documents_url,
            collection: config.collection,
        })
    }

    fn doc_url(&self, user_id: &str) -> String {
        format!("{}/{}/{}", self.documents_url, self.collection, user_id)
    }

    async fn run_query(&self, query: Value) -> Result<Vec<UserRecord>> {
        let url = format!("{}:runQuery", self.documents_url);
        let response = self
            .http
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .json(&query)
            .send()
            .await?;
        let response = error_for_status(response, "query").await?;

        let rows: Vec<QueryRow> = response.json().await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.document)
            .map(|doc| record_from_document(&doc))
            .collect())
    }
}

#[async_trait]
impl UserStore for FirestoreUserStore {
    async fn get(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let response = self
            .http
            .get(self.doc_url(user_id))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = error_for_status(response, "get").await?;

        let doc: Document = response.json().await?;
        Ok(Some(record_from_document(&doc)))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        // Emails are normalized to lowercase at provisioning time, so an
        // exact match on the normalized form is a case-insensitive lookup.
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": self.collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": "email" },
                        "op": "EQUAL",
                        "value": { "stringValue": email.to_lowercase() }
                    }
                },
                "limit": 1
            }
        });

        let hits = self.run_query(query).await?;
        Ok(hits.into_iter().next())
    }

    async fn insert(&self, record: &UserRecord) -> Result<()> {
        let mut url = parse_url(&self.doc_url(&record.id))?;
        url.query_pairs_mut()
            .append_pair("currentDocument.exists", "false");

        let response = self
            .http
            .patch(url)
            .bearer_auth(self.token.expose_secret())
            .json(&json!({ "fields": record_to_fields(record) }))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(ApiError::bad_request(format!(
                "Record already exists: {}",
                record.id
            )));
        }
        error_for_status(response, "insert").await?;
        Ok(())
    }

    async fn merge(&self, user_id: &str, patch: &RecordPatch) -> Result<()> {
        let (fields, mask) = patch_to_parts(patch);
        if mask.is_empty() {
            return Ok(());
        }

        let mut url = parse_url(&self.doc_url(user_id))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("currentDocument.exists", "true");
            for path in &mask {
                pairs.append_pair("updateMask.fieldPaths", path);
            }
        }

        let response = self
            .http
            .patch(url)
            .bearer_auth(self.token.expose_secret())
            .json(&json!({ "fields": fields }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::not_found(format!("No record for user {user_id}")));
        }
        error_for_status(response, "merge").await?;
        Ok(())
    }

    async fn expired_plus(&self, now: DateTime<Utc>) -> Result<Vec<UserRecord>> {
        // Requires the composite (plan ASC, expiresAt ASC) index.
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": self.collection }],
                "where": {
                    "compositeFilter": {
                        "op": "AND",
                        "filters": [
                            {
                                "fieldFilter": {
                                    "field": { "fieldPath": "plan" },
                                    "op": "EQUAL",
                                    "value": { "stringValue": Plan::Plus.as_str() }
                                }
                            },
                            {
                                "fieldFilter": {
                                    "field": { "fieldPath": "expiresAt" },
                                    "op": "LESS_THAN_OR_EQUAL",
                                    "value": timestamp_value(now)
                                }
                            }
                        ]
                    }
                }
            }
        });

        self.run_query(query).await
    }
}

#[derive(Debug, serde::Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, serde::Deserialize)]
struct QueryRow {
    document: Option<Document>,
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| ApiError::internal(format!("Invalid Firestore URL {raw}: {e}")))
}

async fn error_for_status(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!(
        status = %status,
        action = %action,
        body = %body,
        "Firestore request failed"
    );
    Err(ApiError::internal(format!(
        "Firestore {action} failed with status {status}"
    )))
}

fn string_value(s: &str) -> Value {
    json!({ "stringValue": s })
}

fn bool_value(b: bool) -> Value {
    json!({ "booleanValue": b })
}

fn integer_value(n: u32) -> Value {
    // Firestore integers travel as strings
    json!({ "integerValue": n.to_string() })
}

fn timestamp_value(at: DateTime<Utc>) -> Value {
    json!({ "timestampValue": at.to_rfc3339_opts(SecondsFormat::Micros, true) })
}

fn as_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)?
        .get("stringValue")?
        .as_str()
        .map(str::to_string)
}

fn as_bool(fields: &Map<String, Value>, key: &str) -> Option<bool> {
    fields.get(key)?.get("booleanValue")?.as_bool()
}

fn as_u32(fields: &Map<String, Value>, key: &str) -> Option<u32> {
    fields.get(key)?.get("integerValue")?.as_str()?.parse().ok()
}

fn as_timestamp(fields: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let raw = fields.get(key)?.get("timestampValue")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Decode a Firestore document into a record. The document name carries the
/// user id; unknown or missing fields degrade to free-tier defaults.
fn record_from_document(doc: &Document) -> UserRecord {
    let id = doc
        .name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    let fields = &doc.fields;

    let plan = as_string(fields, "plan")
        .map(|v| Plan::from_stored(&v))
        .unwrap_or_default();

    UserRecord {
        id,
        email: as_string(fields, "email").unwrap_or_default(),
        plan,
        is_plus: as_bool(fields, "isPlus").unwrap_or_else(|| plan.is_paid()),
        subscription_status: as_string(fields, "subscriptionStatus")
            .and_then(|v| SubscriptionStatus::from_stored(&v)),
        external_agreement_id: as_string(fields, "externalAgreementId"),
        expires_at: as_timestamp(fields, "expiresAt"),
        cancelled_at: as_timestamp(fields, "cancelledAt"),
        upgraded_at: as_timestamp(fields, "upgradedAt"),
        downgraded_at: as_timestamp(fields, "downgradedAt"),
        previous_plan: as_string(fields, "previousPlan").map(|v| Plan::from_stored(&v)),
        remaining_messages: as_u32(fields, "remainingMessages").unwrap_or(0),
    }
}

fn record_to_fields(record: &UserRecord) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("email".to_string(), string_value(&record.email));
    fields.insert("plan".to_string(), string_value(record.plan.as_str()));
    fields.insert("isPlus".to_string(), bool_value(record.is_plus));
    if let Some(status) = record.subscription_status {
        fields.insert(
            "subscriptionStatus".to_string(),
            string_value(status.as_str()),
        );
    }
    if let Some(id) = &record.external_agreement_id {
        fields.insert("externalAgreementId".to_string(), string_value(id));
    }
    if let Some(at) = record.expires_at {
        fields.insert("expiresAt".to_string(), timestamp_value(at));
    }
    if let Some(at) = record.cancelled_at {
        fields.insert("cancelledAt".to_string(), timestamp_value(at));
    }
    if let Some(at) = record.upgraded_at {
        fields.insert("upgradedAt".to_string(), timestamp_value(at));
    }
    if let Some(at) = record.downgraded_at {
        fields.insert("downgradedAt".to_string(), timestamp_value(at));
    }
    if let Some(plan) = record.previous_plan {
        fields.insert("previousPlan".to_string(), string_value(plan.as_str()));
    }
    fields.insert(
        "remainingMessages".to_string(),
        integer_value(record.remaining_messages),
    );
    fields
}

/// Translate a patch into a field body plus update mask. Cleared fields go in
/// the mask only.
fn patch_to_parts(patch: &RecordPatch) -> (Map<String, Value>, Vec<String>) {
    let mut fields = Map::new();
    let mut mask = Vec::new();

    if let Some(plan) = patch.plan {
        fields.insert("plan".to_string(), string_value(plan.as_str()));
        mask.push("plan".to_string());
    }
    if let Some(is_plus) = patch.is_plus {
        fields.insert("isPlus".to_string(), bool_value(is_plus));
        mask.push("isPlus".to_string());
    }
    if patch.clear_subscription_status {
        mask.push("subscriptionStatus".to_string());
    } else if let Some(status) = patch.subscription_status {
        fields.insert(
            "subscriptionStatus".to_string(),
            string_value(status.as_str()),
        );
        mask.push("subscriptionStatus".to_string());
    }
    if let Some(id) = &patch.external_agreement_id {
        fields.insert("externalAgreementId".to_string(), string_value(id));
        mask.push("externalAgreementId".to_string());
    }
    if patch.clear_expires_at {
        mask.push("expiresAt".to_string());
    } else if let Some(at) = patch.expires_at {
        fields.insert("expiresAt".to_string(), timestamp_value(at));
        mask.push("expiresAt".to_string());
    }
    if let Some(at) = patch.cancelled_at {
        fields.insert("cancelledAt".to_string(), timestamp_value(at));
        mask.push("cancelledAt".to_string());
    }
    if let Some(at) = patch.upgraded_at {
        fields.insert("upgradedAt".to_string(), timestamp_value(at));
        mask.push("upgradedAt".to_string());
    }
    if let Some(at) = patch.downgraded_at {
        fields.insert("downgradedAt".to_string(), timestamp_value(at));
        mask.push("downgradedAt".to_string());
    }
    if let Some(plan) = patch.previous_plan {
        fields.insert("previousPlan".to_string(), string_value(plan.as_str()));
        mask.push("previousPlan".to_string());
    }
    if let Some(remaining) = patch.remaining_messages {
        fields.insert("remainingMessages".to_string(), integer_value(remaining));
        mask.push("remainingMessages".to_string());
    }

    (fields, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(name: &str, fields: Value) -> Document {
        serde_json::from_value(json!({ "name": name, "fields": fields })).unwrap()
    }

    // ============ Decoding tests ============

    #[test]
    fn test_document_decodes_to_record() {
        let doc = doc(
            "projects/p/databases/(default)/documents/users/user_1",
            json!({
                "email": { "stringValue": "producer@example.com" },
                "plan": { "stringValue": "plus" },
                "isPlus": { "booleanValue": true },
                "subscriptionStatus": { "stringValue": "cancelled" },
                "externalAgreementId": { "stringValue": "mp_123" },
                "expiresAt": { "timestampValue": "2024-07-01T00:00:00Z" },
                "remainingMessages": { "integerValue": "7" }
            }),
        );

        let record = record_from_document(&doc);
        assert_eq!(record.id, "user_1");
        assert_eq!(record.email, "producer@example.com");
        assert_eq!(record.plan, Plan::Plus);
        assert!(record.is_plus);
        assert_eq!(
            record.subscription_status,
            Some(SubscriptionStatus::Cancelled)
        );
        assert_eq!(record.external_agreement_id.as_deref(), Some("mp_123"));
        assert_eq!(record.remaining_messages, 7);
        assert_eq!(
            record.expires_at,
            Some(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_sparse_document_degrades_to_free_defaults() {
        let doc = doc(
            "projects/p/databases/(default)/documents/users/user_2",
            json!({ "email": { "stringValue": "old@example.com" } }),
        );

        let record = record_from_document(&doc);
        assert_eq!(record.plan, Plan::Free);
        assert!(!record.is_plus);
        assert_eq!(record.remaining_messages, 0);
        assert!(record.subscription_status.is_none());
    }

    #[test]
    fn test_missing_is_plus_derives_from_plan() {
        let doc = doc(
            "projects/p/databases/(default)/documents/users/user_3",
            json!({ "plan": { "stringValue": "plus" } }),
        );

        let record = record_from_document(&doc);
        assert!(record.is_plus);
    }

    // ============ Encoding tests ============

    #[test]
    fn test_integer_fields_travel_as_strings() {
        let mut record = UserRecord::new_free("user_1", "a@example.com", 10);
        record.remaining_messages = 3;

        let fields = record_to_fields(&record);
        assert_eq!(
            fields["remainingMessages"],
            json!({ "integerValue": "3" })
        );
    }

    #[test]
    fn test_patch_mask_covers_set_fields_only() {
        let patch = RecordPatch {
            plan: Some(Plan::Plus),
            is_plus: Some(true),
            external_agreement_id: Some("mp_1".to_string()),
            ..Default::default()
        };

        let (fields, mask) = patch_to_parts(&patch);
        assert_eq!(mask.len(), 3);
        assert!(mask.contains(&"plan".to_string()));
        assert!(mask.contains(&"isPlus".to_string()));
        assert!(mask.contains(&"externalAgreementId".to_string()));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn test_cleared_fields_are_masked_without_values() {
        let patch = RecordPatch {
            clear_subscription_status: true,
            clear_expires_at: true,
            ..Default::default()
        };

        let (fields, mask) = patch_to_parts(&patch);
        assert!(mask.contains(&"subscriptionStatus".to_string()));
        assert!(mask.contains(&"expiresAt".to_string()));
        assert!(fields.is_empty());
    }

    #[test]
    fn test_empty_patch_produces_empty_mask() {
        let (fields, mask) = patch_to_parts(&RecordPatch::default());
        assert!(mask.is_empty());
        assert!(fields.is_empty());
    }

    // ============ Construction tests ============

    #[test]
    fn test_empty_credentials_are_rejected() {
        let config = FirestoreConfig {
            project_id: "prodai".to_string(),
            ..Default::default()
        };
        assert!(FirestoreUserStore::new(config.clone(), "").is_err());

        let blank_project = FirestoreConfig::default();
        assert!(FirestoreUserStore::new(blank_project, "token").is_err());

        assert!(FirestoreUserStore::new(config, "token").is_ok());
    }
}
