use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use filter_lifecycle::{Filter, FilterHandle};

/// Filter that counts how often it was dropped.
pub struct DemoFilter {
    name: String,
    drops: Arc<AtomicUsize>,
}

impl Filter for DemoFilter {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DemoFilter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct Drops(Arc<AtomicUsize>);

impl Drops {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn demo_filter(name: impl Into<String>) -> (FilterHandle, Drops) {
    let drops = Arc::new(AtomicUsize::new(0));
    let handle = FilterHandle::new(DemoFilter {
        name: name.into(),
        drops: Arc::clone(&drops),
    });
    (handle, Drops(drops))
}
