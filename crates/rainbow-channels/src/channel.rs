use async_trait::async_trait;

use rainbow_core::PhoneKey;

use crate::error::ChannelError;
use crate::types::ChannelStatus;

/// Outbound side of a messaging transport.
///
/// Implementations must be `Send + Sync` so adapters can be stored in a
/// [`ChannelManager`](crate::manager::ChannelManager) and driven from many
/// Tokio tasks. `send` is `&self` on purpose: a connected adapter sends
/// concurrently without a mutable borrow.
#[async_trait]
pub trait OutboundMessenger: Send + Sync {
    /// Stable lowercase identifier (e.g. `"whatsapp"`).
    fn name(&self) -> &str;

    /// Deliver one text message.
    async fn send(&self, phone: &PhoneKey, text: &str) -> Result<(), ChannelError>;

    /// Deliver a media payload with an optional caption.
    async fn send_media(
        &self,
        phone: &PhoneKey,
        bytes: &[u8],
        mime: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Current runtime status without blocking.
    fn status(&self) -> ChannelStatus;
}
