//! Processing thread shared by output sinks and playback sessions.
//!
//! Every task that touches the attached filter chain runs on this thread, so
//! the chain needs no lock. Callers talk to the thread through an unbounded
//! mailbox; control calls wait for a reply up to the configured timeout.
//!
//! Registration happens on the caller's thread before the attach task is
//! queued. A detach posted by a later release therefore always lands behind the
//! attach in the mailbox.

use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendError, Sender};
use tracing::{debug, warn};

use crate::config::TargetConfig;
use crate::error::TargetError;
use crate::filter::{FilterHandle, FilterId};
use crate::join::detach_join;
use crate::registry::{FilterRegistry, RegisterOutcome};
use crate::target::{DetachRequest, FilterTarget, TargetId, TargetKind};

enum TargetTask {
    Attach {
        filter: FilterHandle,
        resp_tx: Sender<bool>,
    },
    Detach {
        request: DetachRequest,
    },
    Uninstall {
        filter: FilterId,
        resp_tx: Sender<bool>,
    },
    ListAttached {
        resp_tx: Sender<Vec<FilterId>>,
    },
    Shutdown {
        resp_tx: Sender<()>,
    },
}

pub(crate) struct TargetWorker {
    id: TargetId,
    kind: TargetKind,
    label: String,
    registry: FilterRegistry,
    task_tx: Sender<TargetTask>,
    control_timeout: Duration,
    join: Mutex<Option<JoinHandle<()>>>,
}

const TARGET_JOINER: &str = "filter-lifecycle-target-join";

impl TargetWorker {
    pub(crate) fn spawn(
        kind: TargetKind,
        label: String,
        registry: FilterRegistry,
        config: &TargetConfig,
    ) -> Result<Self, TargetError> {
        let id = TargetId::next();
        let (task_tx, task_rx) = crossbeam_channel::unbounded::<TargetTask>();
        let args = TargetThreadArgs {
            id,
            label: label.clone(),
            registry: registry.clone(),
            task_rx,
        };
        let join = std::thread::Builder::new()
            .name(config.thread_name(&label))
            .spawn(move || target_thread_main(args))
            .map_err(|source| TargetError::Spawn {
                label: label.clone(),
                source,
            })?;
        debug!(
            target_label = label.as_str(),
            kind = kind.as_str(),
            %id,
            "target thread started"
        );
        Ok(Self {
            id,
            kind,
            label,
            registry,
            task_tx,
            control_timeout: config.control_timeout,
            join: Mutex::new(Some(join)),
        })
    }

    pub(crate) fn id(&self) -> TargetId {
        self.id
    }

    pub(crate) fn kind(&self) -> TargetKind {
        self.kind
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    /// Registers `filter` against `target` on the calling thread, then attaches
    /// it on the target thread.
    pub(crate) fn install(
        &self,
        filter: &FilterHandle,
        target: &Arc<dyn FilterTarget>,
    ) -> Result<RegisterOutcome, TargetError> {
        let outcome = self.registry.register(filter, target);
        if !outcome.is_registered() {
            return Ok(outcome);
        }
        let attached = self.call("install", |resp_tx| TargetTask::Attach {
            filter: filter.clone(),
            resp_tx,
        });
        if let Err(error) = attached {
            self.registry.unregister_from_target(filter.id(), self.id);
            return Err(error);
        }
        Ok(outcome)
    }

    /// Detaches on the target's own initiative and drops the registry mapping.
    pub(crate) fn uninstall(&self, filter: FilterId) -> Result<bool, TargetError> {
        self.call("uninstall", |resp_tx| TargetTask::Uninstall { filter, resp_tx })
    }

    pub(crate) fn attached(&self) -> Result<Vec<FilterId>, TargetError> {
        self.call("list-attached", |resp_tx| TargetTask::ListAttached { resp_tx })
    }

    pub(crate) fn post_detach(&self, request: DetachRequest) {
        if let Err(SendError(task)) = self.task_tx.send(TargetTask::Detach { request }) {
            // Dropping the request reports completion; the thread is gone.
            debug!(
                target_label = self.label.as_str(),
                "target exited, detach completes on drop"
            );
            drop(task);
        }
    }

    pub(crate) fn shutdown(&self) -> Result<(), TargetError> {
        let result = self.call("shutdown", |resp_tx| TargetTask::Shutdown { resp_tx });
        if let Some(join) = self.take_join() {
            detach_join(join, TARGET_JOINER);
        }
        result
    }

    fn call<R>(
        &self,
        operation: &'static str,
        constructor: impl FnOnce(Sender<R>) -> TargetTask,
    ) -> Result<R, TargetError> {
        let (resp_tx, resp_rx) = crossbeam_channel::bounded(1);
        self.task_tx
            .send(constructor(resp_tx))
            .map_err(|_| TargetError::exited(&self.label, operation))?;
        resp_rx
            .recv_timeout(self.control_timeout)
            .map_err(|error| match error {
                RecvTimeoutError::Timeout => {
                    TargetError::timed_out(&self.label, operation, self.control_timeout)
                },
                RecvTimeoutError::Disconnected => TargetError::exited(&self.label, operation),
            })
    }

    fn take_join(&self) -> Option<JoinHandle<()>> {
        self.join
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl Drop for TargetWorker {
    fn drop(&mut self) {
        let Some(join) = self.take_join() else {
            return;
        };
        let (resp_tx, resp_rx) = crossbeam_channel::bounded(1);
        let _ = self.task_tx.send(TargetTask::Shutdown { resp_tx });
        let _ = resp_rx.recv_timeout(Duration::from_millis(100));
        detach_join(join, TARGET_JOINER);
    }
}

struct TargetThreadArgs {
    id: TargetId,
    label: String,
    registry: FilterRegistry,
    task_rx: Receiver<TargetTask>,
}

struct TargetThread {
    id: TargetId,
    label: String,
    registry: FilterRegistry,
    chain: Vec<FilterHandle>,
}

fn target_thread_main(args: TargetThreadArgs) {
    let TargetThreadArgs {
        id,
        label,
        registry,
        task_rx,
    } = args;
    let mut thread = TargetThread {
        id,
        label,
        registry,
        chain: Vec::new(),
    };

    while let Ok(task) = task_rx.recv() {
        let flow = catch_unwind(AssertUnwindSafe(|| thread.handle_task(task)));
        match flow {
            Ok(ControlFlow::Continue(())) => {},
            Ok(ControlFlow::Break(())) => break,
            Err(_) => {
                warn!(
                    target_label = thread.label.as_str(),
                    "target task panicked, stopping thread"
                );
                break;
            },
        }
    }

    thread.detach_all();
    debug!(target_label = thread.label.as_str(), "target thread exited");
    // Queued detach requests are dropped with the receiver and report completion.
}

impl TargetThread {
    fn handle_task(&mut self, task: TargetTask) -> ControlFlow<()> {
        match task {
            TargetTask::Attach { filter, resp_tx } => {
                // A release or move may have overtaken the attach; only attach
                // while the registry still maps the filter here.
                let mapped_here = self
                    .registry
                    .target_of(filter.id())
                    .is_some_and(|binding| binding.id == self.id);
                let attached = mapped_here && !self.chain.contains(&filter);
                if attached {
                    debug!(
                        target_label = self.label.as_str(),
                        filter_id = filter.id().0,
                        filter = filter.name(),
                        "filter attached"
                    );
                    self.chain.push(filter);
                } else {
                    debug!(
                        target_label = self.label.as_str(),
                        filter_id = filter.id().0,
                        mapped_here,
                        "attach skipped"
                    );
                }
                let _ = resp_tx.send(attached);
                ControlFlow::Continue(())
            },
            TargetTask::Detach { request } => {
                let ticket = request.ticket();
                let attached = self.remove_from_chain(ticket.filter);
                debug!(
                    target_label = self.label.as_str(),
                    filter_id = ticket.filter.0,
                    epoch = ticket.epoch,
                    attached,
                    "filter detached on request"
                );
                request.complete();
                ControlFlow::Continue(())
            },
            TargetTask::Uninstall { filter, resp_tx } => {
                let attached = self.remove_from_chain(filter);
                if attached {
                    self.registry.unregister_from_target(filter, self.id);
                    debug!(
                        target_label = self.label.as_str(),
                        filter_id = filter.0,
                        "filter uninstalled by target"
                    );
                }
                let _ = resp_tx.send(attached);
                ControlFlow::Continue(())
            },
            TargetTask::ListAttached { resp_tx } => {
                let _ = resp_tx.send(self.chain.iter().map(FilterHandle::id).collect());
                ControlFlow::Continue(())
            },
            TargetTask::Shutdown { resp_tx } => {
                self.detach_all();
                let _ = resp_tx.send(());
                ControlFlow::Break(())
            },
        }
    }

    fn remove_from_chain(&mut self, filter: FilterId) -> bool {
        let before = self.chain.len();
        self.chain.retain(|attached| attached.id() != filter);
        self.chain.len() != before
    }

    fn detach_all(&mut self) {
        for filter in self.chain.drain(..) {
            self.registry.unregister_from_target(filter.id(), self.id);
        }
    }
}
