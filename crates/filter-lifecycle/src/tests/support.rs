use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::{RegistryConfig, TargetConfig};
use crate::filter::{Filter, FilterHandle};
use crate::target::{DetachRequest, FilterTarget, TargetId, TargetKind};

pub(crate) const TEST_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn test_registry_config() -> RegistryConfig {
    RegistryConfig {
        pump_idle_poll: Duration::from_millis(5),
        pump_shutdown_timeout: TEST_TIMEOUT,
        ..RegistryConfig::default()
    }
}

pub(crate) fn test_target_config() -> TargetConfig {
    TargetConfig {
        control_timeout: TEST_TIMEOUT,
        thread_name_prefix: "filter-lifecycle-test".to_string(),
    }
}

pub(crate) struct CountingFilter {
    name: &'static str,
    drops: Arc<AtomicUsize>,
}

impl Filter for CountingFilter {
    fn name(&self) -> &str {
        self.name
    }
}

impl Drop for CountingFilter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub(crate) struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) fn counted_filter(name: &'static str) -> (FilterHandle, DropCounter) {
    let drops = Arc::new(AtomicUsize::new(0));
    let handle = FilterHandle::new(CountingFilter {
        name,
        drops: Arc::clone(&drops),
    });
    (handle, DropCounter(drops))
}

/// Target that parks detach requests until the test completes them.
pub(crate) struct ManualTarget {
    id: TargetId,
    kind: TargetKind,
    label: String,
    requests: Mutex<Vec<DetachRequest>>,
}

impl ManualTarget {
    pub(crate) fn new(kind: TargetKind, label: &str) -> Arc<Self> {
        Arc::new(Self {
            id: TargetId::next(),
            kind,
            label: label.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn as_target(self: &Arc<Self>) -> Arc<dyn FilterTarget> {
        Arc::clone(self) as Arc<dyn FilterTarget>
    }

    pub(crate) fn parked(&self) -> usize {
        self.requests.lock().expect("manual target lock").len()
    }

    pub(crate) fn take_requests(&self) -> Vec<DetachRequest> {
        std::mem::take(&mut *self.requests.lock().expect("manual target lock"))
    }

    pub(crate) fn complete_all(&self) -> usize {
        let requests = self.take_requests();
        let count = requests.len();
        for request in requests {
            request.complete();
        }
        count
    }
}

impl FilterTarget for ManualTarget {
    fn id(&self) -> TargetId {
        self.id
    }

    fn kind(&self) -> TargetKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn request_detach(&self, request: DetachRequest) {
        self.requests
            .lock()
            .expect("manual target lock")
            .push(request);
    }
}

pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
