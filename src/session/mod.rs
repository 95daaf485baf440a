//! Chat sessions
//!
//! This module handles:
//! - The session state machine (status, history, side-channel metadata)
//! - Outgoing queue, interrupt slot, and input history
//! - Usage tracking and auto-prune
//! - Typed event subscriptions
//! - The actor task and handle that drive a session

mod events;
mod handle;
mod queue;
#[allow(clippy::module_inception)]
mod session;
mod usage;

pub use events::{EventBus, SessionChannel, SessionEvent, Subscription, SubscriptionId};
pub use handle::{SessionDeps, SessionHandle};
pub use queue::{InputHistory, NextSource, OutgoingEntry, OutgoingQueue};
pub use session::{
    InterruptOutcome, Session, SessionParams, SessionSnapshot, SubmitOutcome,
};
pub use usage::UsageTracker;
