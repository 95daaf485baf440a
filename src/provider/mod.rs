//! Agent providers and their capability descriptors
//!
//! Provider-specific behavior is described once, as data, and resolved when a
//! session is created. Nothing downstream switches on provider ids.

mod registry;

pub use registry::{ProviderCapabilities, ProviderDescriptor, ProviderRegistry};
