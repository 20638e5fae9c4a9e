pub mod http;

pub use http::HttpGateway;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// Latency/cost/capability bucket for a reasoning call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Fast,
    Mid,
    Deep,
}

impl Tier {
    pub fn timeout(&self) -> Duration {
        match self {
            Tier::Fast => Duration::from_secs(10),
            Tier::Mid => Duration::from_secs(20),
            Tier::Deep => Duration::from_secs(35),
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            Tier::Fast => 256,
            Tier::Mid => 512,
            Tier::Deep => 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Streamed reply element. A stream ends with exactly one `Done` or one
/// terminal `Failed`; transport errors never surface as anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Token(String),
    Done,
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("reasoning service returned status {0}")]
    Status(u16),
    #[error("reasoning call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// Thin, retryable client seam to the external reasoning service.
#[async_trait]
pub trait ReasoningGateway: Send + Sync {
    /// Buffered call. Retries transient failures internally up to a small
    /// fixed attempt count before returning the terminal error.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tier: Tier,
    ) -> Result<String, GatewayError>;

    /// Streaming call. The receiver yields tokens and then a single
    /// terminal event.
    async fn stream(&self, messages: &[ChatMessage], tier: Tier) -> mpsc::Receiver<TokenEvent>;
}
