use serde::{Deserialize, Serialize};

use rainbow_core::PhoneKey;

/// A guest message delivered by the external WhatsApp collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub phone: PhoneKey,
    pub text: String,
    /// WhatsApp display name, when the transport knows it.
    pub push_name: Option<String>,
    /// Transport instance for multi-number deployments.
    pub instance_id: Option<String>,
    pub received_at: String,
}

impl InboundMessage {
    pub fn new(phone: PhoneKey, text: impl Into<String>) -> Self {
        Self {
            phone,
            text: text.into(),
            push_name: None,
            instance_id: None,
            received_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// One outbound text queued for the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub phone: PhoneKey,
    pub text: String,
}

/// Runtime status of a channel adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Connected,
    Disconnected,
}
