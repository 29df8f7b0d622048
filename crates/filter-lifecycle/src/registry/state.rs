//! Lock-protected containers behind [`super::FilterRegistry`].
//!
//! Every method here is O(1) apart from the snapshot and drain helpers, and none
//! of them call into a target or drop a filter. The caller performs those side
//! effects after releasing the lock.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Weak};

use crate::filter::{FilterHandle, FilterId};
use crate::target::{DetachTicket, FilterTarget, TargetId};

use super::outcome::{RegisterOutcome, RegistrySnapshot, TargetBinding, UnregisterOutcome};

pub(crate) struct ActiveEntry {
    pub(crate) target: Weak<dyn FilterTarget>,
    pub(crate) binding: TargetBinding,
}

struct PendingEntry {
    handle: FilterHandle,
    epoch: u64,
}

pub(crate) struct Registration {
    pub(crate) outcome: RegisterOutcome,
    /// Epoch of a release cycle cancelled by this registration.
    pub(crate) superseded_epoch: Option<u64>,
}

pub(crate) enum ReleaseStep {
    Dispatch {
        target: Weak<dyn FilterTarget>,
        binding: TargetBinding,
        epoch: u64,
    },
    NotRegistered {
        epoch: u64,
    },
}

pub(crate) enum CompletionStep {
    Destroy(FilterHandle),
    Stale { pending_epoch: Option<u64> },
}

pub(crate) struct ForcedRelease {
    pub(crate) was_pending: bool,
    pub(crate) detached_from: Option<TargetBinding>,
}

#[derive(Default)]
pub(crate) struct RegistryState {
    active: HashMap<FilterId, ActiveEntry>,
    pending: HashMap<FilterId, PendingEntry>,
    last_epoch: u64,
}

impl RegistryState {
    pub(crate) fn register(
        &mut self,
        filter: FilterId,
        target: &Arc<dyn FilterTarget>,
    ) -> Registration {
        // A new registration supersedes any earlier release request.
        let superseded_epoch = self.pending.remove(&filter).map(|entry| entry.epoch);
        if self.active.contains_key(&filter) {
            return Registration {
                outcome: RegisterOutcome::AlreadyRegistered,
                superseded_epoch,
            };
        }
        let binding = TargetBinding {
            id: target.id(),
            kind: target.kind(),
            label: target.label().to_string(),
        };
        self.active.insert(
            filter,
            ActiveEntry {
                target: Arc::downgrade(target),
                binding,
            },
        );
        Registration {
            outcome: RegisterOutcome::Registered,
            superseded_epoch,
        }
    }

    pub(crate) fn unregister(&mut self, filter: FilterId) -> UnregisterOutcome {
        match self.active.remove(&filter) {
            Some(_) => UnregisterOutcome::Removed,
            None => UnregisterOutcome::Absent,
        }
    }

    pub(crate) fn unregister_from(
        &mut self,
        filter: FilterId,
        target: TargetId,
    ) -> UnregisterOutcome {
        match self.active.get(&filter) {
            Some(entry) if entry.binding.id == target => self.unregister(filter),
            _ => UnregisterOutcome::Absent,
        }
    }

    pub(crate) fn begin_release(&mut self, handle: &FilterHandle) -> ReleaseStep {
        let filter = handle.id();
        let epoch = match self.pending.get(&filter) {
            Some(entry) => entry.epoch,
            None => {
                self.last_epoch = self.last_epoch.wrapping_add(1);
                let epoch = self.last_epoch;
                self.pending.insert(
                    filter,
                    PendingEntry {
                        handle: handle.clone(),
                        epoch,
                    },
                );
                epoch
            },
        };
        // Removed before dispatch so a re-registration during the detach succeeds.
        match self.active.remove(&filter) {
            Some(entry) => ReleaseStep::Dispatch {
                target: entry.target,
                binding: entry.binding,
                epoch,
            },
            None => ReleaseStep::NotRegistered { epoch },
        }
    }

    pub(crate) fn complete_detach(&mut self, ticket: DetachTicket) -> CompletionStep {
        match self.pending.entry(ticket.filter) {
            Entry::Occupied(entry) if entry.get().epoch == ticket.epoch => {
                CompletionStep::Destroy(entry.remove().handle)
            },
            Entry::Occupied(entry) => CompletionStep::Stale {
                pending_epoch: Some(entry.get().epoch),
            },
            Entry::Vacant(_) => CompletionStep::Stale {
                pending_epoch: None,
            },
        }
    }

    pub(crate) fn force_release(&mut self, filter: FilterId) -> ForcedRelease {
        let was_pending = self.pending.remove(&filter).is_some();
        let detached_from = self.active.remove(&filter).map(|entry| entry.binding);
        ForcedRelease {
            was_pending,
            detached_from,
        }
    }

    pub(crate) fn drain_pending(&mut self) -> Vec<FilterHandle> {
        let mut drained = self
            .pending
            .drain()
            .map(|(_, entry)| entry.handle)
            .collect::<Vec<_>>();
        drained.sort_by_key(FilterHandle::id);
        drained
    }

    pub(crate) fn binding(&self, filter: FilterId) -> Option<&TargetBinding> {
        self.active.get(&filter).map(|entry| &entry.binding)
    }

    pub(crate) fn is_active(&self, filter: FilterId) -> bool {
        self.active.contains_key(&filter)
    }

    pub(crate) fn is_pending(&self, filter: FilterId) -> bool {
        self.pending.contains_key(&filter)
    }

    pub(crate) fn snapshot(&self) -> RegistrySnapshot {
        let mut active = self
            .active
            .iter()
            .map(|(filter, entry)| (*filter, entry.binding.clone()))
            .collect::<Vec<_>>();
        active.sort_by_key(|(filter, _)| *filter);
        let mut pending = self.pending.keys().copied().collect::<Vec<_>>();
        pending.sort();
        RegistrySnapshot { active, pending }
    }
}
