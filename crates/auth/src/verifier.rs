use std::collections::HashMap;

use async_trait::async_trait;
use courier_chats::UserId;
use tokio::sync::RwLock;

use crate::{AuthError, AuthResult};

/// Turns a credential into an identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> AuthResult<UserId>;
}

/// Verifier backed by a fixed token table.
#[derive(Default)]
pub struct StaticVerifier {
    tokens: RwLock<HashMap<String, UserId>>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens<I, T, U>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, U)>,
        T: Into<String>,
        U: Into<UserId>,
    {
        let tokens = entries
            .into_iter()
            .map(|(token, user)| (token.into(), user.into()))
            .collect();
        Self {
            tokens: RwLock::new(tokens),
        }
    }

    pub async fn insert(&self, token: impl Into<String>, user: impl Into<UserId>) {
        self.tokens.write().await.insert(token.into(), user.into());
    }

    pub async fn revoke(&self, token: &str) {
        self.tokens.write().await.remove(token);
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, credential: &str) -> AuthResult<UserId> {
        if credential.trim().is_empty() {
            return Err(AuthError::MissingCredential);
        }
        self.tokens
            .read()
            .await
            .get(credential)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("unknown token".to_string()))
    }
}
