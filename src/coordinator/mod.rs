//! Client-facing façade over sessions
//!
//! [`SessionCoordinator`] owns one session per conversation, persists
//! finished messages through a [`MessageStore`], and feeds the
//! [`StatusAggregator`] used for cross-session indicators.

mod aggregator;
mod manager;
mod store;

pub use aggregator::{StatusAggregator, StatusEntry};
pub use manager::SessionCoordinator;
pub use store::{JsonlMessageStore, MemoryMessageStore, MessageStore};
