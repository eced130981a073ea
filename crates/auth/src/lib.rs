//! Identity verification for relay channels.
//!
//! A channel is bound to an identity by presenting a credential in its
//! `authenticate` frame. The relay only depends on [`IdentityVerifier`];
//! [`JwtVerifier`] is the production implementation and [`StaticVerifier`]
//! maps fixed tokens to identities for development and tests.

mod jwt;
mod verifier;

pub use jwt::{Claims, JwtVerifier};
pub use verifier::{IdentityVerifier, StaticVerifier};

use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential is empty")]
    MissingCredential,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token has no subject")]
    MissingSubject,
    #[error("token creation failed: {0}")]
    TokenCreation(String),
}
