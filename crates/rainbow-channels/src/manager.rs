use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use rainbow_core::PhoneKey;

use crate::channel::OutboundMessenger;
use crate::error::ChannelError;
use crate::types::{ChannelStatus, OutboundMessage};

/// Registry of named outbound adapters with a default route.
#[derive(Default)]
pub struct ChannelManager {
    adapters: HashMap<String, Arc<dyn OutboundMessenger>>,
    default: Option<String>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. The first registration becomes the default.
    pub fn register(&mut self, adapter: Arc<dyn OutboundMessenger>) {
        let name = adapter.name().to_string();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.adapters.insert(name, adapter);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn OutboundMessenger>, ChannelError> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| ChannelError::NotRegistered {
                name: name.to_string(),
            })
    }

    /// The default route — what the core uses unless a caller pins one.
    pub fn default_channel(&self) -> Result<Arc<dyn OutboundMessenger>, ChannelError> {
        let name = self
            .default
            .as_deref()
            .ok_or_else(|| ChannelError::NotRegistered {
                name: "(default)".to_string(),
            })?;
        self.get(name)
    }
}

/// In-memory adapter for tests and the dashboard's live simulator: records
/// every send instead of touching a transport.
#[derive(Default)]
pub struct MemoryMessenger {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MemoryMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything sent so far, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundMessenger for MemoryMessenger {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, phone: &PhoneKey, text: &str) -> Result<(), ChannelError> {
        debug!(phone = %phone, "memory messenger recorded send");
        self.sent.lock().unwrap().push(OutboundMessage {
            phone: phone.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_media(
        &self,
        phone: &PhoneKey,
        _bytes: &[u8],
        mime: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(OutboundMessage {
            phone: phone.clone(),
            text: format!("[media {}] {}", mime, caption.unwrap_or_default()),
        });
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        ChannelStatus::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_registration_becomes_default() {
        let mut manager = ChannelManager::new();
        let memory = MemoryMessenger::new();
        manager.register(memory.clone());

        let channel = manager.default_channel().unwrap();
        let phone = PhoneKey::parse("60123456789").unwrap();
        channel.send(&phone, "hello").await.unwrap();

        assert_eq!(memory.sent().len(), 1);
        assert_eq!(memory.sent()[0].text, "hello");
    }

    #[test]
    fn unknown_channel_errors() {
        let manager = ChannelManager::new();
        assert!(manager.get("whatsapp").is_err());
        assert!(manager.default_channel().is_err());
    }
}
