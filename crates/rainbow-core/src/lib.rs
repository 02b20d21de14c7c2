pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::RainbowConfig;
pub use error::{RainbowError, Result};
pub use store::ConfigStore;
pub use types::{Action, AdminAlert, Lang, PhoneKey, ResponseMode, Tier, WorkflowCursor};
