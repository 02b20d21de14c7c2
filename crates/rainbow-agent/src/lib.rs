//! The turn pipeline — everything between an inbound guest message and the
//! outbound reply.
//!
//! Data flows leaves-first: language router → conversation store → workflow
//! executor (if one is active) → tiered classifier → router policy →
//! knowledge retriever → provider adapter → response formatting → store
//! update → scheduler. Per-conversation ordering is guaranteed by the
//! [`worker::WorkerPool`]: one mailbox per phone key, strict FIFO inside,
//! full parallelism across keys.

pub mod context;
pub mod pipeline;
pub mod policy;
pub mod replies;
pub mod settings;
pub mod sweeper;
pub mod worker;

pub use context::AgentContext;
pub use pipeline::{process_inbound, TurnReply};
pub use policy::{route, EscalationReason, PolicyDecision, PolicyInput};
pub use replies::ReplyBook;
pub use settings::{CopilotSettings, RouteEntry, RoutingTable, Settings, StaticReplies};
pub use worker::WorkerPool;
