use crate::auth::{
    identity::{Identity, IdentityVerifier},
    token::TokenExtractor,
};
use crate::error::ApiError;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::future::Future;
use std::sync::Arc;

/// Axum extractor for authenticated callers
///
/// Use this in a handler to require authentication. The request is rejected
/// with 401 if the bearer token is missing or fails verification.
///
/// Requires an `Arc<dyn IdentityVerifier>` to be injected into request
/// extensions (the router does this with an `Extension` layer).
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(AuthIdentity(identity): AuthIdentity) -> String {
///     identity.user_id
/// }
/// ```
pub struct AuthIdentity(pub Identity);

impl<S> FromRequestParts<S> for AuthIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        Box::pin(async move {
            // Extract the verifier injected by the router
            let verifier = parts
                .extensions
                .get::<Arc<dyn IdentityVerifier>>()
                .cloned()
                .ok_or_else(|| {
                    ApiError::internal("Identity verifier not found in request extensions")
                })?;

            // Extract token from Authorization header
            let token = TokenExtractor::from_header(parts)?;

            // Verify token and resolve the caller
            let identity = verifier.verify(&token).await?;

            Ok(AuthIdentity(identity))
        })
    }
}
