use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, warn};

use super::{ChatMessage, GatewayError, ReasoningGateway, Tier, TokenEvent};
use crate::config::ReasoningConfig;

const RETRY_BACKOFF: Duration = Duration::from_millis(300);

/// OpenAI-compatible chat-completions client with tier-dependent model
/// selection, timeout, and token budget.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    fast_model: String,
    mid_model: String,
    deep_model: String,
    max_attempts: u32,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatBody,
}

#[derive(Deserialize)]
struct ChatBody {
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &ReasoningConfig, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            fast_model: config.fast_model.clone(),
            mid_model: config.mid_model.clone(),
            deep_model: config.deep_model.clone(),
            max_attempts: config.max_attempts.max(1),
            temperature: config.temperature,
        }
    }

    fn model(&self, tier: Tier) -> &str {
        match tier {
            Tier::Fast => &self.fast_model,
            Tier::Mid => &self.mid_model,
            Tier::Deep => &self.deep_model,
        }
    }

    fn body(&self, messages: &[ChatMessage], tier: Tier, stream: bool) -> serde_json::Value {
        json!({
            "model": self.model(tier),
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": tier.max_tokens(),
            "stream": stream,
        })
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tier: Tier,
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(tier.timeout())
            .json(&self.body(messages, tier, stream))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(tier.timeout())
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(GatewayError::Status(status.as_u16()))
        }
    }
}

/// 429 and 5xx are worth a retry; 4xx are not.
fn retryable(err: &GatewayError) -> bool {
    match err {
        GatewayError::Transport(_) | GatewayError::Timeout(_) => true,
        GatewayError::Status(code) => *code == 429 || *code >= 500,
        GatewayError::Malformed(_) => false,
    }
}

#[async_trait]
impl ReasoningGateway for HttpGateway {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tier: Tier,
    ) -> Result<String, GatewayError> {
        let mut last = GatewayError::Transport("no attempt made".to_string());
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            match self.send(messages, tier, false).await {
                Ok(response) => {
                    let parsed: ChatResponse = response
                        .json()
                        .await
                        .map_err(|e| GatewayError::Malformed(e.to_string()))?;
                    return parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content.trim().to_string())
                        .ok_or_else(|| GatewayError::Malformed("empty choices".to_string()));
                }
                Err(e) if retryable(&e) => {
                    debug!(attempt, error = %e, "reasoning call failed, retrying");
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    async fn stream(&self, messages: &[ChatMessage], tier: Tier) -> mpsc::Receiver<TokenEvent> {
        let (tx, rx) = mpsc::channel(64);

        // Retry only the connection; once tokens are flowing, a failure
        // is terminal for this reply.
        let mut response = None;
        let mut last = GatewayError::Transport("no attempt made".to_string());
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            match self.send(messages, tier, true).await {
                Ok(r) => {
                    response = Some(r);
                    break;
                }
                Err(e) if retryable(&e) => {
                    debug!(attempt, error = %e, "stream connect failed, retrying");
                    last = e;
                }
                Err(e) => {
                    last = e;
                    break;
                }
            }
        }

        let Some(response) = response else {
            let _ = tx.send(TokenEvent::Failed(last.to_string())).await;
            return rx;
        };

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "reasoning stream broke mid-reply");
                        let _ = tx.send(TokenEvent::Failed(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE framing: one `data: {json}` event per line.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        let _ = tx.send(TokenEvent::Done).await;
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(payload) {
                        Ok(parsed) => {
                            let token = parsed
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content);
                            if let Some(token) = token {
                                if tx.send(TokenEvent::Token(token)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => debug!(error = %e, "skipping unparsable stream event"),
                    }
                }
            }
            let _ = tx.send(TokenEvent::Done).await;
        });

        rx
    }
}
