//! HTTP surface: response envelope, router, handlers.

pub mod response;
pub mod routes;

pub use response::ApiResponse;
pub use routes::{ActivateRequest, AppState, SubscriptionView, router};
