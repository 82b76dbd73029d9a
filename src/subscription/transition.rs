//! Pure state transitions for the subscription lifecycle.
//!
//! Every entry point (authenticated HTTP, gateway webhook, sweep) funnels its
//! record edits through these functions, so the invariants hold no matter who
//! calls. Each function returns a [`RecordPatch`] describing one merge-write;
//! nothing here touches storage.

use crate::store::record::{Plan, RecordPatch, SubscriptionStatus, UserRecord};
use chrono::{DateTime, Utc};

/// Patch that puts a record on the plus plan.
///
/// `paid_through` carries the gateway's next-payment date when one is known
/// (the webhook path). Without one the expiry is cleared: a live agreement
/// has no lapse date, and a stale expiry left behind by an earlier
/// cancellation would hand the sweep a reason to downgrade a paying user.
#[must_use]
pub fn activation(
    agreement_id: &str,
    paid_through: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> RecordPatch {
    RecordPatch {
        plan: Some(Plan::Plus),
        is_plus: Some(true),
        clear_subscription_status: true,
        external_agreement_id: Some(agreement_id.to_string()),
        expires_at: paid_through,
        clear_expires_at: paid_through.is_none(),
        upgraded_at: Some(now),
        ..Default::default()
    }
}

/// Patch that records a cancellation while preserving paid access.
///
/// The plan stays plus: the user keeps access through the grace period and
/// the sweep downgrades later. `expires_at` is the gateway-reported end of
/// the paid period; `None` leaves whatever expiry the record already carries,
/// so a cancellation can never shorten access by clearing it.
#[must_use]
pub fn cancellation(now: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> RecordPatch {
    RecordPatch {
        subscription_status: Some(SubscriptionStatus::Cancelled),
        cancelled_at: Some(now),
        expires_at,
        ..Default::default()
    }
}

/// Patch that downgrades an expired plus record, or `None` when the record
/// needs no conversion.
///
/// Running it twice is a no-op: the second pass sees a free plan and bails.
/// `subscription_status` is left as recorded; the cancellation history stays
/// on the document.
#[must_use]
pub fn expiration(record: &UserRecord, now: DateTime<Utc>, free_quota: u32) -> Option<RecordPatch> {
    if record.plan != Plan::Plus || !record.is_expired(now) {
        return None;
    }

    Some(RecordPatch {
        plan: Some(Plan::Free),
        is_plus: Some(false),
        previous_plan: Some(Plan::Plus),
        downgraded_at: Some(now),
        remaining_messages: Some(free_quota),
        ..Default::default()
    })
}

/// Patch that spends one free-tier message.
#[must_use]
pub fn consume_message(record: &UserRecord) -> RecordPatch {
    RecordPatch {
        remaining_messages: Some(record.remaining_messages.saturating_sub(1)),
        ..Default::default()
    }
}
