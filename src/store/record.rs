use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Commercial tier of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Plus,
    /// Written by earlier revisions of the product. Parsed for compatibility,
    /// never written back, and carries no entitlement.
    Cancelled,
}

impl Plan {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Plus => "plus",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored plan value; unknown values fall back to free.
    #[must_use]
    pub fn from_stored(value: &str) -> Self {
        match value {
            "plus" => Self::Plus,
            "cancelled" => Self::Cancelled,
            _ => Self::Free,
        }
    }

    /// Whether this plan grants paid access.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Plus)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gateway-facing subscription status recorded on the user document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
}

impl SubscriptionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored status value.
    #[must_use]
    pub fn from_stored(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One user document in the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub is_plus: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<SubscriptionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_agreement_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgraded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgraded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_plan: Option<Plan>,
    #[serde(default)]
    pub remaining_messages: u32,
}

impl UserRecord {
    /// Fresh free-tier record for a first-time user.
    #[must_use]
    pub fn new_free(id: impl Into<String>, email: impl Into<String>, daily_quota: u32) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            plan: Plan::Free,
            is_plus: false,
            subscription_status: None,
            external_agreement_id: None,
            expires_at: None,
            cancelled_at: None,
            upgraded_at: None,
            downgraded_at: None,
            previous_plan: None,
            remaining_messages: daily_quota,
        }
    }

    /// Whether paid access has lapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Partial update applied to a user record with merge semantics.
///
/// `Some` fields are written, `None` fields are left untouched. Clearing an
/// optional record field is a distinct operation a plain `Option` cannot
/// express, so it is requested through the explicit `clear_*` flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub plan: Option<Plan>,
    pub is_plus: Option<bool>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub clear_subscription_status: bool,
    pub external_agreement_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub clear_expires_at: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub upgraded_at: Option<DateTime<Utc>>,
    pub downgraded_at: Option<DateTime<Utc>>,
    pub previous_plan: Option<Plan>,
    pub remaining_messages: Option<u32>,
}

impl RecordPatch {
    /// Apply to an in-memory record, mirroring the store's merge semantics.
    pub fn apply(&self, record: &mut UserRecord) {
        if let Some(plan) = self.plan {
            record.plan = plan;
        }
        if let Some(is_plus) = self.is_plus {
            record.is_plus = is_plus;
        }
        if self.clear_subscription_status {
            record.subscription_status = None;
        } else if let Some(status) = self.subscription_status {
            record.subscription_status = Some(status);
        }
        if let Some(id) = &self.external_agreement_id {
            record.external_agreement_id = Some(id.clone());
        }
        if self.clear_expires_at {
            record.expires_at = None;
        } else if let Some(at) = self.expires_at {
            record.expires_at = Some(at);
        }
        if let Some(at) = self.cancelled_at {
            record.cancelled_at = Some(at);
        }
        if let Some(at) = self.upgraded_at {
            record.upgraded_at = Some(at);
        }
        if let Some(at) = self.downgraded_at {
            record.downgraded_at = Some(at);
        }
        if let Some(plan) = self.previous_plan {
            record.previous_plan = Some(plan);
        }
        if let Some(remaining) = self.remaining_messages {
            record.remaining_messages = remaining;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
