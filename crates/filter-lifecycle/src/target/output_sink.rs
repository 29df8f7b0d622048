use std::sync::Arc;

use crate::config::TargetConfig;
use crate::error::TargetError;
use crate::filter::{FilterHandle, FilterId};
use crate::registry::{FilterRegistry, RegisterOutcome};
use crate::target::worker::TargetWorker;
use crate::target::{DetachRequest, FilterTarget, TargetId, TargetKind};

/// Rendering sink hosting a chain of filters on its own thread.
pub struct OutputSink {
    worker: TargetWorker,
}

impl OutputSink {
    pub fn spawn(
        label: impl Into<String>,
        registry: &FilterRegistry,
        config: &TargetConfig,
    ) -> Result<Arc<Self>, TargetError> {
        let worker = TargetWorker::spawn(
            TargetKind::OutputSink,
            label.into(),
            registry.clone(),
            config,
        )?;
        Ok(Arc::new(Self { worker }))
    }

    /// Registers `filter` against this sink and appends it to the chain.
    pub fn install(
        self: &Arc<Self>,
        filter: &FilterHandle,
    ) -> Result<RegisterOutcome, TargetError> {
        let target: Arc<dyn FilterTarget> = self.clone();
        self.worker.install(filter, &target)
    }

    /// Detaches `filter` on the sink's initiative. Returns whether it was attached.
    pub fn uninstall(&self, filter: &FilterHandle) -> Result<bool, TargetError> {
        self.worker.uninstall(filter.id())
    }

    /// Attached filters in chain order.
    pub fn attached(&self) -> Result<Vec<FilterId>, TargetError> {
        self.worker.attached()
    }

    pub fn shutdown(&self) -> Result<(), TargetError> {
        self.worker.shutdown()
    }
}

impl FilterTarget for OutputSink {
    fn id(&self) -> TargetId {
        self.worker.id()
    }

    fn kind(&self) -> TargetKind {
        self.worker.kind()
    }

    fn label(&self) -> &str {
        self.worker.label()
    }

    fn request_detach(&self, request: DetachRequest) {
        self.worker.post_detach(request);
    }
}
