#![deny(clippy::wildcard_imports)]

//! Cross-thread lifecycle registry for processing filters.
//!
//! Filters are attached to targets (output sinks or playback sessions), each
//! running its own processing thread. [`FilterRegistry`] keeps the
//! filter-to-target mapping and destroys a released filter only after the
//! target thread confirms detachment.

pub mod config;
pub mod error;
pub mod events;
pub mod filter;
mod join;
pub mod registry;
pub mod target;

#[cfg(test)]
mod tests;

pub use config::{RegistryConfig, TargetConfig};
pub use error::{RegistryError, TargetError};
pub use events::{DestroyCause, EventReceiver, RegistryEvent};
pub use filter::{Filter, FilterHandle, FilterId};
pub use registry::completion::{CompletionInbox, CompletionPump, DetachCompletion};
pub use registry::{
    FilterRegistry, ForceReleaseOutcome, RegisterOutcome, RegistrySnapshot, ReleaseOutcome,
    TargetBinding, UnregisterOutcome,
};
pub use target::{
    DetachRequest, DetachTicket, FilterTarget, OutputSink, PlaybackSession, TargetId, TargetKind,
};

/// Creates a registry with a pump thread delivering detach completions.
pub fn start_registry(
    config: &RegistryConfig,
) -> Result<(FilterRegistry, CompletionPump), RegistryError> {
    FilterRegistry::start(config)
}
