use crate::filter::FilterId;
use crate::target::{TargetId, TargetKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyRegistered,
    /// The filter was force-released earlier and can no longer be attached.
    FilterDestroyed,
}

impl RegisterOutcome {
    pub fn is_registered(self) -> bool {
        matches!(self, Self::Registered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    Removed,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Mapping removed and detach dispatched to the target.
    Accepted,
    /// No target hosts the filter; it stays pending until force-released.
    NotRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceReleaseOutcome {
    WasPending,
    WasNotPending,
}

/// Where a registered filter is currently attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBinding {
    pub id: TargetId,
    pub kind: TargetKind,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Registered filters sorted by id.
    pub active: Vec<(FilterId, TargetBinding)>,
    /// Filters awaiting destruction, sorted by id.
    pub pending: Vec<FilterId>,
}
