use tokio::sync::broadcast;

use crate::filter::FilterId;
use crate::target::{TargetId, TargetKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyCause {
    DetachCompleted,
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered {
        filter: FilterId,
        target: TargetId,
        kind: TargetKind,
    },
    RegistrationRejected {
        filter: FilterId,
        target: TargetId,
    },
    Unregistered {
        filter: FilterId,
    },
    ReleaseRequested {
        filter: FilterId,
        epoch: u64,
        dispatched: bool,
    },
    Destroyed {
        filter: FilterId,
        cause: DestroyCause,
    },
    StaleCompletion {
        filter: FilterId,
        epoch: u64,
    },
}

pub type EventReceiver = broadcast::Receiver<RegistryEvent>;

pub(crate) struct EventHub {
    tx: broadcast::Sender<RegistryEvent>,
}

impl EventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn emit(&self, event: RegistryEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }
}
