//! Subscription lifecycle for the freemium plan model.
//!
//! A user record is either on the free plan (daily message quota) or on the
//! paid plus plan backed by a Mercado Pago preapproval. This module owns
//! every transition between the two: activation, cancellation with a paid
//! grace window, and expiry back to free.
//!
//! # Example
//!
//! ```rust,ignore
//! use prodai_backend::subscription::{LifecycleManager, WebhookProcessor};
//!
//! let manager = Arc::new(LifecycleManager::new(store, gateway, 10));
//!
//! // Activate after the user authorizes a preapproval
//! manager.activate("user_1", "mp_123", None).await?;
//!
//! // Cancel: gateway first, then the record keeps its paid-through date
//! manager.cancel("user_1").await?;
//!
//! // Periodic downgrade of lapsed grace windows
//! let swept = manager.sweep_expired(Utc::now()).await?;
//! ```

pub mod error;
pub mod manager;
pub mod transition;
pub mod webhook;

// Error exports
pub use error::SubscriptionError;

// Lifecycle exports
pub use manager::{ActivationOutcome, CancellationSync, LifecycleManager};

// Webhook exports
pub use webhook::{GatewayNotification, WebhookOutcome, WebhookProcessor};
