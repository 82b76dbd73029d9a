use crate::error::Result;
use crate::gateway::{Preapproval, PreapprovalClient};
use crate::store::UserStore;
use crate::store::record::{Plan, SubscriptionStatus, UserRecord};
use crate::subscription::error::SubscriptionError;
use crate::subscription::transition;
use chrono::{DateTime, Utc};

/// Outcome of an activation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The record was switched to plus.
    Activated,
    /// The record already carried this agreement on the plus plan.
    AlreadyActive,
}

/// Outcome of syncing a gateway-side cancellation into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationSync {
    /// Grace-period cancellation written to the record.
    Recorded,
    /// The record already carried the cancellation.
    AlreadyRecorded,
    /// The preapproval is not the agreement the record currently holds.
    StaleAgreement,
    /// No record matches the preapproval.
    NoMatchingUser,
}

/// Drives each user's subscription record through its lifecycle.
///
/// Three entry points share this type: authenticated HTTP calls, gateway
/// webhooks, and the periodic expiration sweep. All record edits go through
/// [`transition`] patches so the entry points agree on state, and every
/// operation is one read plus at most one merge-write.
pub struct LifecycleManager<S: UserStore, G: PreapprovalClient> {
    store: S,
    gateway: G,
    free_quota: u32,
}

impl<S: UserStore, G: PreapprovalClient> LifecycleManager<S, G> {
    pub fn new(store: S, gateway: G, free_quota: u32) -> Self {
        Self {
            store,
            gateway,
            free_quota,
        }
    }

    /// Free-tier message allowance granted to new and downgraded records.
    #[must_use]
    pub fn free_quota(&self) -> u32 {
        self.free_quota
    }

    /// Fetch the record for `user_id`, provisioning a free-tier one on first
    /// access. The stored email is normalized to lowercase so webhook lookups
    /// can match it with an exact query.
    pub async fn ensure_record(&self, user_id: &str, email: &str) -> Result<UserRecord> {
        if let Some(record) = self.store.get(user_id).await? {
            return Ok(record);
        }

        let record = UserRecord::new_free(user_id, email.to_lowercase(), self.free_quota);
        match self.store.insert(&record).await {
            Ok(()) => {
                tracing::info!(user_id = %user_id, "provisioned free-tier record");
                Ok(record)
            }
            // Lost a provisioning race; the concurrent writer's record wins.
            Err(crate::error::ApiError::BadRequest(_)) => self
                .store
                .get(user_id)
                .await?
                .ok_or_else(|| SubscriptionError::record_not_found(user_id).into()),
            Err(e) => Err(e),
        }
    }

    /// Put the user on the plus plan under `agreement_id`.
    ///
    /// Re-activation with the agreement id the record already holds on plus
    /// is a no-op, which also absorbs duplicate gateway notifications without
    /// un-cancelling a grace-period record. A different agreement id always
    /// applies in full: a new checkout supersedes any recorded cancellation.
    ///
    /// No gateway call happens here; the id is taken on trust from checkout
    /// or verified upstream by the webhook processor.
    pub async fn activate(
        &self,
        user_id: &str,
        agreement_id: &str,
        paid_through: Option<DateTime<Utc>>,
    ) -> Result<ActivationOutcome> {
        let record = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| SubscriptionError::record_not_found(user_id))?;

        if record.plan == Plan::Plus && record.external_agreement_id.as_deref() == Some(agreement_id)
        {
            tracing::debug!(
                user_id = %user_id,
                agreement_id = %agreement_id,
                "agreement already active, skipping"
            );
            return Ok(ActivationOutcome::AlreadyActive);
        }

        let patch = transition::activation(agreement_id, paid_through, Utc::now());
        self.store.merge(user_id, &patch).await?;

        tracing::info!(
            user_id = %user_id,
            agreement_id = %agreement_id,
            paid_through = ?paid_through,
            "subscription activated"
        );
        Ok(ActivationOutcome::Activated)
    }

    /// Cancel the caller's subscription.
    ///
    /// The gateway call runs first; only after it succeeds is the local
    /// cancellation written, so a gateway failure leaves the record exactly
    /// as it was and the whole operation can be retried. Paid access runs on
    /// until `expires_at`: the gateway's next payment date when it reports
    /// one, otherwise whatever expiry the record already carries.
    pub async fn cancel(&self, user_id: &str) -> Result<()> {
        let Some(record) = self.store.get(user_id).await? else {
            return Err(SubscriptionError::no_active_subscription(user_id).into());
        };
        let Some(agreement_id) = record.external_agreement_id.clone() else {
            return Err(SubscriptionError::no_active_subscription(user_id).into());
        };

        let preapproval = self
            .gateway
            .cancel_preapproval(&agreement_id)
            .await
            .map_err(|e| SubscriptionError::gateway(e.to_string()))?;

        let expires_at = preapproval.next_payment_date.or(record.expires_at);
        let patch = transition::cancellation(Utc::now(), expires_at);
        self.store.merge(user_id, &patch).await?;

        tracing::info!(
            user_id = %user_id,
            agreement_id = %agreement_id,
            expires_at = ?expires_at,
            "subscription cancelled"
        );
        Ok(())
    }

    /// Downgrade every plus record whose paid period has lapsed.
    ///
    /// Per-user merge-writes, no cross-user transaction. One user's failure
    /// is logged and skipped so the rest of the batch still converts.
    /// Returns the number of records converted.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.store.expired_plus(now).await?;
        let mut converted = 0usize;

        for record in expired {
            let Some(patch) = transition::expiration(&record, now, self.free_quota) else {
                continue;
            };
            match self.store.merge(&record.id, &patch).await {
                Ok(()) => {
                    converted += 1;
                    tracing::info!(
                        user_id = %record.id,
                        expired_at = ?record.expires_at,
                        "expired plus record downgraded"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %record.id,
                        error = %e,
                        "sweep failed for record, skipping"
                    );
                }
            }
        }

        Ok(converted)
    }

    /// Bring a record's entitlement up to date before it is read or charged.
    ///
    /// Runs the same conversion as the sweep inline, so an expiry is observed
    /// immediately instead of at the next sweep tick. Returns the refreshed
    /// record, or `None` when the user has no record.
    pub async fn ensure_current(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserRecord>> {
        let Some(mut record) = self.store.get(user_id).await? else {
            return Ok(None);
        };

        if let Some(patch) = transition::expiration(&record, now, self.free_quota) {
            self.store.merge(user_id, &patch).await?;
            patch.apply(&mut record);
            tracing::info!(user_id = %user_id, "expired plus record downgraded inline");
        }

        Ok(Some(record))
    }

    /// Resolve the record a preapproval belongs to: the checkout reference
    /// (user id) first, the payer email as fallback.
    async fn resolve_preapproval_user(
        &self,
        preapproval: &Preapproval,
    ) -> Result<Option<UserRecord>> {
        if let Some(user_id) = &preapproval.external_reference {
            if let Some(record) = self.store.get(user_id).await? {
                return Ok(Some(record));
            }
        }
        if let Some(email) = &preapproval.payer_email {
            if let Some(record) = self.store.find_by_email(email).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Webhook-path activation.
    ///
    /// Returns `None` when no record matches the preapproval; the caller
    /// acknowledges the notification and drops it without any mutation.
    pub async fn activate_from_gateway(
        &self,
        preapproval: &Preapproval,
    ) -> Result<Option<ActivationOutcome>> {
        let Some(record) = self.resolve_preapproval_user(preapproval).await? else {
            tracing::warn!(
                preapproval_id = %preapproval.id,
                "no record matches preapproval, dropping notification"
            );
            return Ok(None);
        };

        let outcome = self
            .activate(&record.id, &preapproval.id, preapproval.next_payment_date)
            .await?;
        Ok(Some(outcome))
    }

    /// Webhook-path cancellation sync.
    ///
    /// Applies the grace-period write when the record's stored agreement is
    /// the preapproval that was cancelled; a preapproval the record no longer
    /// holds is stale and skipped, so an old agreement's late notification
    /// cannot cancel a newer subscription.
    pub async fn cancellation_from_gateway(
        &self,
        preapproval: &Preapproval,
    ) -> Result<CancellationSync> {
        let Some(record) = self.resolve_preapproval_user(preapproval).await? else {
            tracing::warn!(
                preapproval_id = %preapproval.id,
                "no record matches cancelled preapproval, dropping notification"
            );
            return Ok(CancellationSync::NoMatchingUser);
        };

        if record.external_agreement_id.as_deref() != Some(preapproval.id.as_str()) {
            tracing::debug!(
                user_id = %record.id,
                preapproval_id = %preapproval.id,
                "cancellation for an agreement the record no longer holds, skipping"
            );
            return Ok(CancellationSync::StaleAgreement);
        }

        if record.subscription_status == Some(SubscriptionStatus::Cancelled) {
            return Ok(CancellationSync::AlreadyRecorded);
        }

        let expires_at = preapproval.next_payment_date.or(record.expires_at);
        let patch = transition::cancellation(Utc::now(), expires_at);
        self.store.merge(&record.id, &patch).await?;

        tracing::info!(
            user_id = %record.id,
            preapproval_id = %preapproval.id,
            expires_at = ?expires_at,
            "gateway cancellation recorded"
        );
        Ok(CancellationSync::Recorded)
    }
}
