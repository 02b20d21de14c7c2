//! The messaging seam between the core and the WhatsApp transport.
//!
//! The transport itself lives outside this repository: it feeds inbound
//! messages into an mpsc channel and consumes outbound sends through the
//! [`OutboundMessenger`] trait. Everything in the core that needs to reach
//! a guest goes through this crate, which keeps tests on the in-memory
//! adapter and production on whatever adapter the deployment registers.

pub mod channel;
pub mod error;
pub mod http;
pub mod manager;
pub mod types;

pub use channel::OutboundMessenger;
pub use error::ChannelError;
pub use http::HttpMessenger;
pub use manager::{ChannelManager, MemoryMessenger};
pub use types::{ChannelStatus, InboundMessage, OutboundMessage};
