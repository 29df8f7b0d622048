//! Filter identity and the shared slot that owns a filter until it is destroyed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Opaque processing stage attached to a target.
///
/// The registry never runs a filter; it only tracks where the filter is
/// attached and drops it once no target thread can touch it anymore.
pub trait Filter: Send + 'static {
    fn name(&self) -> &str {
        "filter"
    }
}

/// Process-wide filter identity. Values are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilterId(pub u64);

impl FilterId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed).saturating_add(1))
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter#{}", self.0)
    }
}

struct FilterSlot {
    id: FilterId,
    name: String,
    filter: Mutex<Option<Box<dyn Filter>>>,
}

/// Shared handle to one filter slot.
///
/// Clones refer to the same filter; equality is identity, not value. The slot
/// is emptied exactly once, by the registry, when the filter is destroyed.
#[derive(Clone)]
pub struct FilterHandle {
    slot: Arc<FilterSlot>,
}

impl FilterHandle {
    pub fn new<F>(filter: F) -> Self
    where
        F: Filter,
    {
        Self::from_box(Box::new(filter))
    }

    pub fn from_box(filter: Box<dyn Filter>) -> Self {
        let name = filter.name().to_string();
        Self {
            slot: Arc::new(FilterSlot {
                id: FilterId::next(),
                name,
                filter: Mutex::new(Some(filter)),
            }),
        }
    }

    pub fn id(&self) -> FilterId {
        self.slot.id
    }

    pub fn name(&self) -> &str {
        &self.slot.name
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock_slot().is_none()
    }

    /// Runs `f` against the filter if it has not been destroyed yet.
    pub fn with_filter<R>(&self, f: impl FnOnce(&dyn Filter) -> R) -> Option<R> {
        let guard = self.lock_slot();
        guard.as_deref().map(f)
    }

    /// Drops the filter. Returns `true` only for the call that actually dropped it.
    pub(crate) fn destroy(&self) -> bool {
        let filter = self.lock_slot().take();
        match filter {
            Some(filter) => {
                // Drop outside the slot lock so filter destructors may inspect handles.
                drop(filter);
                true
            },
            None => false,
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Box<dyn Filter>>> {
        // Poison only means a `with_filter` closure panicked; the slot itself is intact.
        self.slot
            .filter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PartialEq for FilterHandle {
    fn eq(&self, other: &Self) -> bool {
        self.slot.id == other.slot.id
    }
}

impl Eq for FilterHandle {}

impl fmt::Debug for FilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterHandle")
            .field("id", &self.slot.id)
            .field("name", &self.slot.name)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{Filter, FilterHandle};

    struct CountingFilter {
        drops: Arc<AtomicUsize>,
    }

    impl Filter for CountingFilter {
        fn name(&self) -> &str {
            "counting"
        }
    }

    impl Drop for CountingFilter {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn handles_compare_by_identity() {
        let drops = Arc::new(AtomicUsize::new(0));
        let a = FilterHandle::new(CountingFilter {
            drops: Arc::clone(&drops),
        });
        let b = FilterHandle::new(CountingFilter {
            drops: Arc::clone(&drops),
        });
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert!(a.id() < b.id());
        assert_eq!(a.name(), "counting");
    }

    #[test]
    fn destroy_drops_filter_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = FilterHandle::new(CountingFilter {
            drops: Arc::clone(&drops),
        });
        let clone = handle.clone();

        assert!(handle.destroy());
        assert!(!clone.destroy());
        assert!(clone.is_destroyed());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(clone.with_filter(|filter| filter.name().len()), None);
    }

    #[test]
    fn dropping_last_handle_without_destroy_still_drops_filter() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = FilterHandle::new(CountingFilter {
            drops: Arc::clone(&drops),
        });
        assert_eq!(
            handle
                .with_filter(|filter| filter.name().to_string())
                .as_deref(),
            Some("counting")
        );
        drop(handle);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
