use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{ChatReply, ChatRequest, LlmProvider, Message, ProviderError, Role, Usage};

/// Local Ollama adapter — no authentication, token counts are estimates the
/// daemon reports as eval counts.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatReply, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut messages: Vec<serde_json::Value> = Vec::with_capacity(req.messages.len() + 1);
        if !req.system.is_empty() {
            messages.push(serde_json::json!({ "role": "system", "content": req.system }));
        }
        messages.extend(req.messages.iter().map(message_json));

        let body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "stream": false,
        });

        debug!(model = %req.model, "sending request to Ollama");

        let resp = self.client.post(&url).json(&body).send().await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(ChatReply {
            content: api_resp.message.content,
            model: api_resp.model,
            usage: Usage {
                prompt_tokens: api_resp.prompt_eval_count.unwrap_or(0),
                completion_tokens: api_resp.eval_count.unwrap_or(0),
            },
            stop_reason: api_resp.done_reason.unwrap_or_default(),
        })
    }
}

fn message_json(m: &Message) -> serde_json::Value {
    let role = match m.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    };
    serde_json::json!({ "role": role, "content": m.content })
}

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    message: ApiMessage,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: String,
}
