use crate::error::ApiError;

/// Domain errors for the subscription lifecycle.
#[derive(Debug)]
pub enum SubscriptionError {
    /// Cancel with nothing to cancel: no record, or no stored agreement id.
    NoActiveSubscription { user_id: String },
    /// An operation referenced a user with no stored record.
    RecordNotFound { user_id: String },
    /// Free-tier daily message quota spent.
    QuotaExhausted { user_id: String },
    /// Gateway call failed; the local record was left untouched.
    Gateway { detail: String },
}

impl SubscriptionError {
    pub fn no_active_subscription(user_id: impl Into<String>) -> Self {
        Self::NoActiveSubscription {
            user_id: user_id.into(),
        }
    }

    pub fn record_not_found(user_id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            user_id: user_id.into(),
        }
    }

    pub fn quota_exhausted(user_id: impl Into<String>) -> Self {
        Self::QuotaExhausted {
            user_id: user_id.into(),
        }
    }

    pub fn gateway(detail: impl Into<String>) -> Self {
        Self::Gateway {
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoActiveSubscription { user_id } => {
                write!(f, "No active subscription for user {user_id}")
            }
            Self::RecordNotFound { user_id } => {
                write!(f, "No record for user {user_id}")
            }
            Self::QuotaExhausted { user_id } => {
                write!(f, "Daily message quota exhausted for user {user_id}")
            }
            Self::Gateway { detail } => {
                write!(f, "Payment gateway failure: {detail}")
            }
        }
    }
}

impl std::error::Error for SubscriptionError {}

impl From<SubscriptionError> for ApiError {
    fn from(err: SubscriptionError) -> Self {
        match &err {
            SubscriptionError::NoActiveSubscription { .. } => Self::bad_request(err.to_string()),
            SubscriptionError::RecordNotFound { .. } => Self::not_found(err.to_string()),
            SubscriptionError::QuotaExhausted { .. } => Self::too_many_requests(err.to_string()),
            SubscriptionError::Gateway { .. } => Self::service_unavailable(err.to_string()),
        }
    }
}
