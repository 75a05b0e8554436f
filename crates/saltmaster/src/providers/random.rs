//! Random peer tokens.

use async_trait::async_trait;
use uuid::Uuid;

use super::traits::{PeerToken, ProviderError, TokenSource};

/// Generates UUID v4 tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidTokenSource;

#[async_trait]
impl TokenSource for UuidTokenSource {
    async fn generate_token(&self) -> Result<PeerToken, ProviderError> {
        Ok(PeerToken::new(Uuid::new_v4().to_string()))
    }
}
