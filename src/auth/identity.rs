use crate::error::{ApiError, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Verified caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}

/// Turns a bearer credential into a caller identity.
///
/// Object safe so the HTTP layer can inject it into request extensions as an
/// `Arc<dyn IdentityVerifier>`.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity>;
}

/// Claims this service reads from access tokens.
#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: String,
    email: String,
}

/// HS256 JWT verifier.
///
/// Expiry is always validated; issuer and audience checks are opt-in through
/// the builder methods.
pub struct JwtIdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    /// Create a verifier from a shared HMAC secret.
    pub fn from_secret(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(ApiError::internal("JWT secret must not be empty"));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Identity> {
        let data =
            jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
                .map_err(|e| ApiError::unauthorized(format!("Invalid token: {e}")))?;

        Ok(Identity {
            user_id: data.claims.sub,
            email: data.claims.email,
        })
    }
}

/// Test double for the identity seam.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// Maps fixed bearer tokens to identities.
    #[derive(Default)]
    pub struct StaticIdentityVerifier {
        identities: RwLock<HashMap<String, Identity>>,
    }

    impl StaticIdentityVerifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, token: impl Into<String>, identity: Identity) {
            self.identities
                .write()
                .unwrap()
                .insert(token.into(), identity);
        }
    }

    #[async_trait]
    impl IdentityVerifier for StaticIdentityVerifier {
        async fn verify(&self, token: &str) -> Result<Identity> {
            self.identities
                .read()
                .unwrap()
                .get(token)
                .cloned()
                .ok_or_else(|| ApiError::unauthorized("Unknown token"))
        }
    }
}
