//! Targets that host filters on their own processing thread.
//!
//! # Role
//!
//! A target is either an output sink or a playback session. The registry only
//! needs one capability from it: accept a detach request and, later, signal
//! completion from the target's own thread.
//!
//! # Design Notes
//!
//! - [`DetachRequest`] owns the completion notifier. Completing it, or dropping
//!   it unhandled, sends exactly one completion back to the registry.
//! - [`OutputSink`] and [`PlaybackSession`] share [`worker::TargetWorker`] for
//!   their processing thread and differ only in [`TargetKind`].
//! - Shutting a target down, explicitly or by dropping it, detaches its whole
//!   chain on the target's own initiative and removes those mappings. A later
//!   release of such a filter reports "not registered" and leaves it pending
//!   until it is force-released.
//! - The registry holds targets weakly. A [`FilterTarget`] that disappears while
//!   still mapped gets its detach completed on the spot at the next release.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::filter::{FilterHandle, FilterId};
use crate::registry::completion::{CompletionSender, DetachCompletion};

mod output_sink;
mod playback_session;
pub(crate) mod worker;

pub use output_sink::OutputSink;
pub use playback_session::PlaybackSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    OutputSink,
    PlaybackSession,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutputSink => "output-sink",
            Self::PlaybackSession => "playback-session",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(pub u64);

impl TargetId {
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed).saturating_add(1))
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// Capability the registry needs from a target.
pub trait FilterTarget: Send + Sync {
    fn id(&self) -> TargetId;

    fn kind(&self) -> TargetKind;

    fn label(&self) -> &str;

    /// Queues detachment on the target's processing thread and returns
    /// immediately. The request must be completed or dropped exactly once.
    fn request_detach(&self, request: DetachRequest);
}

/// Identifies one release cycle of one filter.
///
/// The epoch is allocated by the registry each time a filter enters the
/// pending set, so completions from an older cycle can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetachTicket {
    pub filter: FilterId,
    pub epoch: u64,
}

pub struct DetachRequest {
    filter: FilterHandle,
    ticket: DetachTicket,
    notifier: Option<CompletionSender>,
}

impl DetachRequest {
    pub(crate) fn new(filter: FilterHandle, epoch: u64, notifier: CompletionSender) -> Self {
        let ticket = DetachTicket {
            filter: filter.id(),
            epoch,
        };
        Self {
            filter,
            ticket,
            notifier: Some(notifier),
        }
    }

    pub fn filter(&self) -> &FilterHandle {
        &self.filter
    }

    pub fn ticket(&self) -> DetachTicket {
        self.ticket
    }

    /// Signals that the target thread no longer touches the filter.
    pub fn complete(mut self) {
        self.notify();
    }

    fn notify(&mut self) {
        if let Some(notifier) = self.notifier.take() {
            notifier.send(DetachCompletion {
                ticket: self.ticket,
            });
        }
    }
}

impl Drop for DetachRequest {
    fn drop(&mut self) {
        self.notify();
    }
}

impl fmt::Debug for DetachRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachRequest")
            .field("ticket", &self.ticket)
            .field("completed", &self.notifier.is_none())
            .finish()
    }
}
