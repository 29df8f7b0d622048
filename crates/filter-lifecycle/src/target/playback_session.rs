use std::sync::Arc;

use crate::config::TargetConfig;
use crate::error::TargetError;
use crate::filter::{FilterHandle, FilterId};
use crate::registry::{FilterRegistry, RegisterOutcome};
use crate::target::worker::TargetWorker;
use crate::target::{DetachRequest, FilterTarget, TargetId, TargetKind};

/// Playback session whose decode thread runs the attached filters.
pub struct PlaybackSession {
    worker: TargetWorker,
}

impl PlaybackSession {
    pub fn spawn(
        label: impl Into<String>,
        registry: &FilterRegistry,
        config: &TargetConfig,
    ) -> Result<Arc<Self>, TargetError> {
        let worker = TargetWorker::spawn(
            TargetKind::PlaybackSession,
            label.into(),
            registry.clone(),
            config,
        )?;
        Ok(Arc::new(Self { worker }))
    }

    /// Registers `filter` against this session and appends it to the chain.
    pub fn install(
        self: &Arc<Self>,
        filter: &FilterHandle,
    ) -> Result<RegisterOutcome, TargetError> {
        let target: Arc<dyn FilterTarget> = self.clone();
        self.worker.install(filter, &target)
    }

    /// Target-initiated detach; the registry mapping is dropped afterwards.
    pub fn uninstall(&self, filter: &FilterHandle) -> Result<bool, TargetError> {
        self.worker.uninstall(filter.id())
    }

    pub fn attached(&self) -> Result<Vec<FilterId>, TargetError> {
        self.worker.attached()
    }

    pub fn shutdown(&self) -> Result<(), TargetError> {
        self.worker.shutdown()
    }
}

impl FilterTarget for PlaybackSession {
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
