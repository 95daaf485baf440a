//! Public types for the ACP session client
//!
//! This module contains all the shared types used across the crate.

mod config;
mod error;
mod message;
mod session;
mod tool;

pub use config::{
    ClientConfig, DEFAULT_CANCEL_TIMEOUT, DEFAULT_HISTORY_LIMIT, EnvOverrides, PruneConfig,
};
pub use error::{ClientError, FailureKind, Result};
pub use message::{
    FileAttachment, InvalidTransition, Message, Part, Role, ToolCallPart, ToolCallState,
};
pub use session::{
    AvailableCommand, ConfigOption, Cost, HasId, ModeInfo, ModelInfo, PlanEntry,
    PlanEntryStatus, Selection, SessionFailure, SessionStatus, UsageSnapshot,
};
pub use tool::ToolKind;
