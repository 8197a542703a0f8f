//! # Dripflow Engine
//!
//! The sequence automation engine: trigger-driven enrollment, per-step
//! advancement under time rules, and reply-driven reactivation.
//!
//! ## Architecture
//! ```text
//! Trigger event (contact created, tag, origin, keyword)
//!   └── EnrollmentManager → Subscription rows (runtime store)
//!
//! Inbound reply
//!   └── ReplyReactivator → stamp last-reply, restart follow-ups
//!
//! Scheduler (tokio interval, default 60s)
//!   └── due-query (active AND next_step_at <= now LIMIT batch)
//!         └── SubscriptionRunner per row, isolated:
//!               pause check → content resolve → gateway send → advance
//! ```
//!
//! Definitions and runtime state live in two stores that cannot be joined;
//! every cross-store composition happens here, and no error in one
//! subscription's cycle is allowed to touch another.

pub mod content;
pub mod enroll;
pub mod reactivate;
pub mod runner;
pub mod scheduler;

pub use enroll::EnrollmentManager;
pub use reactivate::ReplyReactivator;
pub use runner::{RunOutcome, SubscriptionRunner};
pub use scheduler::{Scheduler, TickStats};
