pub mod extractors;
pub mod identity;
pub mod token;

pub use extractors::AuthIdentity;
pub use identity::{Identity, IdentityVerifier, JwtIdentityVerifier};
pub use token::TokenExtractor;
