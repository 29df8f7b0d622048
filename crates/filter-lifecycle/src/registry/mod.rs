//! Process-wide filter lifecycle registry.
//!
//! # Role
//!
//! The registry tracks which target each filter is attached to and which
//! filters are waiting to be destroyed. Release is split in two: the mapping
//! is removed on the caller's thread, and the filter is dropped only after the
//! target's processing thread reports that detachment finished.
//!
//! # Design Notes
//!
//! - One mutex guards both containers. It is never held while a target is
//!   asked to detach or while a filter is dropped.
//! - Each release cycle gets an epoch. A completion only destroys the filter
//!   when it carries the epoch of the cycle that is still pending.
//! - [`FilterRegistry::force_release`] skips the handshake. Calling it while a
//!   target thread may still be running the detach is a caller error; the
//!   filter slot turns that into "already destroyed" rather than freed memory.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::events::{DestroyCause, EventHub, EventReceiver, RegistryEvent};
use crate::filter::{FilterHandle, FilterId};
use crate::target::{DetachRequest, DetachTicket, FilterTarget, TargetId};

pub(crate) mod completion;
mod outcome;
mod state;

use completion::{CompletionInbox, CompletionPump, CompletionSender};
use state::{CompletionStep, RegistryState, ReleaseStep};

pub use outcome::{
    ForceReleaseOutcome, RegisterOutcome, RegistrySnapshot, ReleaseOutcome, TargetBinding,
    UnregisterOutcome,
};

struct RegistryInner {
    state: Mutex<RegistryState>,
    completion_tx: CompletionSender,
    events: EventHub,
}

/// Shared handle to one registry. Clones refer to the same registry.
#[derive(Clone)]
pub struct FilterRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct WeakRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<FilterRegistry> {
        self.inner.upgrade().map(|inner| FilterRegistry { inner })
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

impl FilterRegistry {
    /// Creates a registry whose completions are delivered by the caller
    /// through the returned inbox.
    pub fn new(config: &RegistryConfig) -> (Self, CompletionInbox) {
        let (completion_tx, inbox) = completion::completion_channel();
        let registry = Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                completion_tx,
                events: EventHub::new(config.event_capacity),
            }),
        };
        (registry, inbox)
    }

    /// Creates a registry together with a pump thread that delivers completions.
    pub fn start(config: &RegistryConfig) -> Result<(Self, CompletionPump), RegistryError> {
        let (registry, inbox) = Self::new(config);
        let pump = CompletionPump::spawn(&registry, inbox, config)?;
        Ok((registry, pump))
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn register(
        &self,
        filter: &FilterHandle,
        target: &Arc<dyn FilterTarget>,
    ) -> RegisterOutcome {
        let filter_id = filter.id();
        if filter.is_destroyed() {
            warn!(
                filter_id = filter_id.0,
                target_label = target.label(),
                "cannot register destroyed filter"
            );
            return RegisterOutcome::FilterDestroyed;
        }

        let registration = self.lock_state().register(filter_id, target);
        if let Some(epoch) = registration.superseded_epoch {
            debug!(
                filter_id = filter_id.0,
                epoch, "registration supersedes pending release"
            );
        }
        match registration.outcome {
            RegisterOutcome::Registered => {
                debug!(
                    filter_id = filter_id.0,
                    target_label = target.label(),
                    kind = target.kind().as_str(),
                    "filter registered"
                );
                self.inner.events.emit(RegistryEvent::Registered {
                    filter: filter_id,
                    target: target.id(),
                    kind: target.kind(),
                });
            },
            RegisterOutcome::AlreadyRegistered => {
                warn!(
                    filter_id = filter_id.0,
                    target_label = target.label(),
                    "filter already registered"
                );
                self.inner.events.emit(RegistryEvent::RegistrationRejected {
                    filter: filter_id,
                    target: target.id(),
                });
            },
            RegisterOutcome::FilterDestroyed => {},
        }
        registration.outcome
    }

    /// Drops the mapping for a filter its target has already detached.
    pub fn unregister(&self, filter: FilterId) -> UnregisterOutcome {
        let outcome = self.lock_state().unregister(filter);
        self.after_unregister(filter, outcome);
        outcome
    }

    /// Like [`Self::unregister`], but only when `filter` is mapped to `target`.
    pub fn unregister_from_target(&self, filter: FilterId, target: TargetId) -> UnregisterOutcome {
        let outcome = self.lock_state().unregister_from(filter, target);
        self.after_unregister(filter, outcome);
        outcome
    }

    fn after_unregister(&self, filter: FilterId, outcome: UnregisterOutcome) {
        if outcome == UnregisterOutcome::Removed {
            debug!(filter_id = filter.0, "filter unregistered");
            self.inner
                .events
                .emit(RegistryEvent::Unregistered { filter });
        }
    }

    /// Requests asynchronous detachment; the filter is destroyed once the
    /// target reports completion.
    pub fn release(&self, filter: &FilterHandle) -> ReleaseOutcome {
        let filter_id = filter.id();
        let step = self.lock_state().begin_release(filter);
        match step {
            ReleaseStep::Dispatch {
                target,
                binding,
                epoch,
            } => {
                let request =
                    DetachRequest::new(filter.clone(), epoch, self.inner.completion_tx.clone());
                match target.upgrade() {
                    Some(target) => {
                        debug!(
                            filter_id = filter_id.0,
                            target_label = binding.label.as_str(),
                            epoch,
                            "detach requested"
                        );
                        target.request_detach(request);
                    },
                    None => {
                        // A dropped target no longer runs the filter; completing now is safe.
                        warn!(
                            filter_id = filter_id.0,
                            target_label = binding.label.as_str(),
                            epoch,
                            "target dropped before detach, completing immediately"
                        );
                        request.complete();
                    },
                }
                self.inner.events.emit(RegistryEvent::ReleaseRequested {
                    filter: filter_id,
                    epoch,
                    dispatched: true,
                });
                ReleaseOutcome::Accepted
            },
            ReleaseStep::NotRegistered { epoch } => {
                debug!(
                    filter_id = filter_id.0,
                    epoch, "release of unregistered filter left pending"
                );
                self.inner.events.emit(RegistryEvent::ReleaseRequested {
                    filter: filter_id,
                    epoch,
                    dispatched: false,
                });
                ReleaseOutcome::NotRegistered
            },
        }
    }

    /// Consumes a detach completion. Safe to call from any thread, any number
    /// of times; only the completion of the pending cycle destroys the filter.
    pub fn on_detach_completed(&self, ticket: DetachTicket) {
        let step = self.lock_state().complete_detach(ticket);
        match step {
            CompletionStep::Destroy(handle) => {
                let dropped = handle.destroy();
                debug!(
                    filter_id = ticket.filter.0,
                    epoch = ticket.epoch,
                    dropped,
                    "filter destroyed after detach"
                );
                if dropped {
                    self.inner.events.emit(RegistryEvent::Destroyed {
                        filter: ticket.filter,
                        cause: DestroyCause::DetachCompleted,
                    });
                }
            },
            CompletionStep::Stale { pending_epoch } => {
                debug!(
                    filter_id = ticket.filter.0,
                    epoch = ticket.epoch,
                    ?pending_epoch,
                    "stale detach completion ignored"
                );
                self.inner.events.emit(RegistryEvent::StaleCompletion {
                    filter: ticket.filter,
                    epoch: ticket.epoch,
                });
            },
        }
    }

    /// Destroys `filter` immediately, bypassing the detach handshake.
    ///
    /// The caller must know that no target thread can still touch the filter,
    /// e.g. at process shutdown.
    pub fn force_release(&self, filter: &FilterHandle) -> ForceReleaseOutcome {
        let filter_id = filter.id();
        let forced = self.lock_state().force_release(filter_id);
        if let Some(binding) = forced.detached_from {
            warn!(
                filter_id = filter_id.0,
                target_label = binding.label.as_str(),
                "force-releasing a filter that is still registered"
            );
        }
        self.destroy_forced(filter);
        if forced.was_pending {
            ForceReleaseOutcome::WasPending
        } else {
            ForceReleaseOutcome::WasNotPending
        }
    }

    /// Force-releases every pending filter. Returns how many were destroyed.
    pub fn force_release_all_pending(&self) -> usize {
        let drained = self.lock_state().drain_pending();
        let mut destroyed = 0usize;
        for handle in &drained {
            if self.destroy_forced(handle) {
                destroyed += 1;
            }
        }
        destroyed
    }

    fn destroy_forced(&self, filter: &FilterHandle) -> bool {
        let dropped = filter.destroy();
        debug!(filter_id = filter.id().0, dropped, "filter force-released");
        if dropped {
            self.inner.events.emit(RegistryEvent::Destroyed {
                filter: filter.id(),
                cause: DestroyCause::Forced,
            });
        }
        dropped
    }

    pub fn is_registered(&self, filter: FilterId) -> bool {
        self.lock_state().is_active(filter)
    }

    pub fn is_pending(&self, filter: FilterId) -> bool {
        self.lock_state().is_pending(filter)
    }

    pub fn target_of(&self, filter: FilterId) -> Option<TargetBinding> {
        self.lock_state().binding(filter).cloned()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.lock_state().snapshot()
    }

    pub fn subscribe_events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        // Critical sections only touch the two maps; a panic elsewhere cannot
        // leave them half-updated.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
