//! Service routes and handlers.
//!
//! Authenticated endpoints resolve the caller through [`AuthIdentity`]; the
//! gateway webhook authenticates with its HMAC signature instead and is the
//! only unauthenticated mutation path.

use crate::auth::{AuthIdentity, IdentityVerifier};
use crate::chat::{ChatAccess, MessageGuard};
use crate::error::{ApiError, Result};
use crate::gateway::PreapprovalClient;
use crate::http::response::ApiResponse;
use crate::store::{Plan, SubscriptionStatus, UserRecord, UserStore};
use crate::subscription::{
    GatewayNotification, LifecycleManager, SubscriptionError, WebhookOutcome, WebhookProcessor,
};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared handler state.
pub struct AppState<S: UserStore, G: PreapprovalClient> {
    pub manager: Arc<LifecycleManager<S, G>>,
    pub webhooks: Arc<WebhookProcessor<S, G>>,
    pub guard: Arc<MessageGuard<S, G>>,
}

// Hand-written so cloning does not demand S: Clone or G: Clone.
impl<S: UserStore, G: PreapprovalClient> Clone for AppState<S, G> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            webhooks: Arc::clone(&self.webhooks),
            guard: Arc::clone(&self.guard),
        }
    }
}

/// Build the service router.
///
/// The identity verifier rides in request extensions so the [`AuthIdentity`]
/// extractor can reach it from any handler.
pub fn router<S, G>(state: AppState<S, G>, verifier: Arc<dyn IdentityVerifier>) -> Router
where
    S: UserStore + 'static,
    G: PreapprovalClient + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/api/subscription", get(subscription_view::<S, G>))
        .route(
            "/api/subscription/activate",
            post(activate_subscription::<S, G>),
        )
        .route(
            "/api/subscription/cancel",
            post(cancel_subscription::<S, G>),
        )
        .route("/api/chat/authorize", post(authorize_message::<S, G>))
        .route("/api/webhooks/mercadopago", post(gateway_webhook::<S, G>))
        .layer(Extension(verifier))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthView {
    status: &'static str,
}

async fn health() -> Json<HealthView> {
    Json(HealthView { status: "ok" })
}

/// What the frontend sees of a subscription record. The gateway agreement id
/// stays server-side.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub plan: Plan,
    pub is_plus: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<SubscriptionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgraded_at: Option<DateTime<Utc>>,
    pub remaining_messages: u32,
}

impl From<&UserRecord> for SubscriptionView {
    fn from(record: &UserRecord) -> Self {
        Self {
            plan: record.plan,
            is_plus: record.is_plus,
            subscription_status: record.subscription_status,
            expires_at: record.expires_at,
            cancelled_at: record.cancelled_at,
            upgraded_at: record.upgraded_at,
            remaining_messages: record.remaining_messages,
        }
    }
}

/// `GET /api/subscription`
async fn subscription_view<S, G>(
    State(state): State<AppState<S, G>>,
    AuthIdentity(identity): AuthIdentity,
) -> Result<ApiResponse<SubscriptionView>>
where
    S: UserStore + 'static,
    G: PreapprovalClient + 'static,
{
    state
        .manager
        .ensure_record(&identity.user_id, &identity.email)
        .await?;
    let record = state
        .manager
        .ensure_current(&identity.user_id, Utc::now())
        .await?
        .ok_or_else(|| SubscriptionError::record_not_found(&identity.user_id))?;
    Ok(ApiResponse::success(SubscriptionView::from(&record)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    pub preapproval_id: String,
}

/// `POST /api/subscription/activate`
///
/// Called by the frontend after the checkout redirect with the preapproval id
/// the gateway handed back.
async fn activate_subscription<S, G>(
    State(state): State<AppState<S, G>>,
    AuthIdentity(identity): AuthIdentity,
    Json(body): Json<ActivateRequest>,
) -> Result<ApiResponse<SubscriptionView>>
where
    S: UserStore + 'static,
    G: PreapprovalClient + 'static,
{
    let preapproval_id = body.preapproval_id.trim();
    if preapproval_id.is_empty() {
        return Err(ApiError::bad_request("preapprovalId must not be empty"));
    }

    state
        .manager
        .ensure_record(&identity.user_id, &identity.email)
        .await?;
    state
        .manager
        .activate(&identity.user_id, preapproval_id, None)
        .await?;

    let record = state
        .manager
        .ensure_current(&identity.user_id, Utc::now())
        .await?
        .ok_or_else(|| SubscriptionError::record_not_found(&identity.user_id))?;
    Ok(ApiResponse::success(SubscriptionView::from(&record)))
}

/// `POST /api/subscription/cancel`
async fn cancel_subscription<S, G>(
    State(state): State<AppState<S, G>>,
    AuthIdentity(identity): AuthIdentity,
) -> Result<ApiResponse<()>>
where
    S: UserStore + 'static,
    G: PreapprovalClient + 'static,
{
    state.manager.cancel(&identity.user_id).await?;
    Ok(ApiResponse::success_with_message((), "Subscription cancelled"))
}

/// `POST /api/chat/authorize`
async fn authorize_message<S, G>(
    State(state): State<AppState<S, G>>,
    AuthIdentity(identity): AuthIdentity,
) -> Result<ApiResponse<ChatAccess>>
where
    S: UserStore + 'static,
    G: PreapprovalClient + 'static,
{
    let access = state
        .guard
        .authorize(&identity.user_id, &identity.email, Utc::now())
        .await?;
    Ok(ApiResponse::success(access))
}

/// Query parameters of a gateway notification. Current deliveries use
/// `data.id` + `type`; the legacy shape uses `id` + `topic`.
#[derive(Debug, Deserialize)]
struct WebhookParams {
    #[serde(rename = "data.id")]
    data_id: Option<String>,
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    topic: Option<String>,
}

/// `POST /api/webhooks/mercadopago`
async fn gateway_webhook<S, G>(
    State(state): State<AppState<S, G>>,
    Query(params): Query<WebhookParams>,
    headers: HeaderMap,
) -> Result<ApiResponse<()>>
where
    S: UserStore + 'static,
    G: PreapprovalClient + 'static,
{
    let signature = headers
        .get("x-signature")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApiError::unauthorized("Missing x-signature header"))?;
    let request_id = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let Some(data_id) = params.data_id.or(params.id) else {
        return Err(ApiError::bad_request("Missing data.id parameter"));
    };
    let topic = params.kind.or(params.topic).unwrap_or_default();

    let notification = GatewayNotification {
        data_id,
        topic,
        request_id,
        signature,
    };
    let outcome = state.webhooks.process(&notification, Utc::now()).await?;

    let message = match outcome {
        WebhookOutcome::Activated => "Subscription activated",
        WebhookOutcome::AlreadyActive => "Subscription already active",
        WebhookOutcome::CancellationRecorded => "Cancellation recorded",
        WebhookOutcome::NoMatchingUser => "No matching user",
        WebhookOutcome::Ignored => "Notification ignored",
    };
    Ok(ApiResponse::success_with_message((), message))
}
