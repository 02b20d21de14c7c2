//! HTTP adapter for the external WhatsApp transport.
//!
//! The transport collaborator exposes a small send API; this adapter POSTs
//! outbound messages to it. Media goes base64-encoded — the transport
//! re-materialises it before handing to WhatsApp.

use async_trait::async_trait;
use base64::Engine;
use tracing::{debug, warn};

use rainbow_core::PhoneKey;

use crate::channel::OutboundMessenger;
use crate::error::ChannelError;
use crate::types::ChannelStatus;

pub struct HttpMessenger {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpMessenger {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("authorization", format!("Bearer {}", key));
        }
        builder
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<(), ChannelError> {
        let resp = self
            .request(path)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                channel: "whatsapp".to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "transport send rejected");
            return Err(ChannelError::SendFailed {
                channel: "whatsapp".to_string(),
                reason: format!("HTTP {}: {}", status, text),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OutboundMessenger for HttpMessenger {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, phone: &PhoneKey, text: &str) -> Result<(), ChannelError> {
        debug!(phone = %phone, "sending via transport");
        self.post(
            "/send",
            serde_json::json!({ "phone": phone.as_str(), "text": text }),
        )
        .await
    }

    async fn send_media(
        &self,
        phone: &PhoneKey,
        bytes: &[u8],
        mime: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.post(
            "/send-media",
            serde_json::json!({
                "phone": phone.as_str(),
                "mime": mime,
                "caption": caption,
                "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
        )
        .await
    }

    fn status(&self) -> ChannelStatus {
        ChannelStatus::Connected
    }
}
