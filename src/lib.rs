//! PROD.AI backend - subscription lifecycle and chat-access metering
//!
//! Service backend for the PROD.AI music-production assistant. The product is
//! freemium: a free tier with a daily message quota, and a paid plus tier
//! billed through Mercado Pago recurring agreements (preapprovals).
//!
//! # Features
//!
//! - **Lifecycle**: activation, cancellation with a paid grace window, and
//!   expiry back to free (periodic sweep plus inline conversion)
//! - **Webhooks**: HMAC-signed Mercado Pago notifications, re-fetched from the
//!   gateway before anything is written
//! - **Chat metering**: per-message quota accounting for the free tier
//! - **Adapters**: Firestore record store and Mercado Pago client behind trait
//!   seams, with in-memory doubles for tests
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use prodai_backend::{self as prodai, ConfigBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Initialize logging
//!     prodai::init_tracing();
//!
//!     // Load and validate configuration
//!     let config = ConfigBuilder::new().from_env().build()?;
//!
//!     // ... wire adapters, build the router, serve (see src/main.rs)
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod jobs;
pub mod store;
pub mod subscription;

// Re-exports for public API
pub use auth::{AuthIdentity, Identity, IdentityVerifier, JwtIdentityVerifier, TokenExtractor};
pub use chat::{ChatAccess, MessageGuard};
pub use config::{Config, ConfigBuilder};
pub use error::{ApiError, Result};
pub use gateway::{
    MercadoPagoClient, MercadoPagoConfig, Preapproval, PreapprovalClient, PreapprovalStatus,
};
pub use http::{ApiResponse, AppState, SubscriptionView, router};
pub use jobs::SweepWorker;
pub use store::{
    FirestoreConfig, FirestoreUserStore, Plan, RecordPatch, SubscriptionStatus, UserRecord,
    UserStore,
};
pub use subscription::{
    ActivationOutcome, CancellationSync, GatewayNotification, LifecycleManager, SubscriptionError,
    WebhookOutcome, WebhookProcessor,
};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// Call early in main(), before any adapter construction.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "prodai_backend=debug")
/// - `PRODAI_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = config::get_env_with_prefix("LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing with a custom configuration
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::new(&config.logging.level);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
