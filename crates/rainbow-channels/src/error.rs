use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not registered: {name}")]
    NotRegistered { name: String },

    #[error("Send failed ({channel}): {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Channel disconnected: {name}")]
    Disconnected { name: String },
}
