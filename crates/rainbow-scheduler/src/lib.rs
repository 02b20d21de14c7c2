//! `rainbow-scheduler` — durable scheduled WhatsApp messages.
//!
//! # Overview
//!
//! Tasks are rows in a SQLite `scheduled_tasks` table. The
//! [`engine::SchedulerEngine`] sweeps every 15 seconds and dispatches any
//! pending task whose `fire_at` has arrived, in (fire_at, created_at) order
//! so equal fire-at times go out in creation order. Tasks never dispatch
//! early.
//!
//! # Repeat rules
//!
//! | Rule      | Behaviour                                            |
//! |-----------|------------------------------------------------------|
//! | `none`    | Single send                                          |
//! | `daily`   | Next occurrence at previous fire_at + 1 day          |
//! | `weekly`  | Next occurrence at previous fire_at + 7 days         |
//! | `monthly` | Next occurrence at previous fire_at + 1 month        |
//!
//! The next occurrence spawns on *successful dispatch* and is computed from
//! the previous `fire_at`, never from `now`, so drift cannot accumulate.

pub mod checkout;
pub mod db;
pub mod engine;
pub mod error;
pub mod types;

pub use checkout::{run_checkout_alert_loop, run_checkout_alerts, GuestDirectory, GuestStay};
pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use types::{next_occurrence, RepeatRule, ScheduledTask, TaskStatus};
