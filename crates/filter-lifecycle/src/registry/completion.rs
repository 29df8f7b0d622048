//! Delivery of detach completions from target threads back to the registry.
//!
//! Targets push [`DetachCompletion`]s into an unbounded channel. The receiving
//! side is either drained by hand through [`CompletionInbox`] or fed into the
//! registry by a [`CompletionPump`] thread.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::join::detach_join;
use crate::registry::{FilterRegistry, WeakRegistry};
use crate::target::DetachTicket;

const PUMP_JOINER: &str = "filter-lifecycle-pump-join";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachCompletion {
    pub ticket: DetachTicket,
}

#[derive(Clone)]
pub(crate) struct CompletionSender {
    tx: Sender<DetachCompletion>,
}

impl CompletionSender {
    pub(crate) fn send(&self, completion: DetachCompletion) {
        if self.tx.send(completion).is_err() {
            // Registry and inbox are gone; nothing is left to destroy the filter.
            debug!(
                filter_id = completion.ticket.filter.0,
                epoch = completion.ticket.epoch,
                "detach completion dropped: inbox closed"
            );
        }
    }
}

/// Receiving side of the completion channel.
pub struct CompletionInbox {
    rx: Receiver<DetachCompletion>,
}

impl CompletionInbox {
    pub fn try_recv(&self) -> Option<DetachCompletion> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<DetachCompletion> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Feeds every queued completion into `registry`. Returns how many were delivered.
    pub fn drain_into(&self, registry: &FilterRegistry) -> usize {
        let mut delivered = 0usize;
        while let Ok(completion) = self.rx.try_recv() {
            registry.on_detach_completed(completion.ticket);
            delivered += 1;
        }
        delivered
    }
}

pub(crate) fn completion_channel() -> (CompletionSender, CompletionInbox) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (CompletionSender { tx }, CompletionInbox { rx })
}

/// Thread that delivers completions to the registry as they arrive.
///
/// The pump holds only a weak reference to the registry and exits on its own
/// once the registry is dropped.
pub struct CompletionPump {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    join: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl CompletionPump {
    pub(crate) fn spawn(
        registry: &FilterRegistry,
        inbox: CompletionInbox,
        config: &RegistryConfig,
    ) -> Result<Self, RegistryError> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let args = PumpThreadArgs {
            registry: registry.downgrade(),
            inbox,
            stop_rx,
            done_tx,
            idle_poll: config.pump_idle_poll,
        };
        let join = std::thread::Builder::new()
            .name(config.pump_thread_name.clone())
            .spawn(move || pump_thread_main(args))
            .map_err(|source| RegistryError::SpawnCompletionPump { source })?;
        Ok(Self {
            stop_tx,
            done_rx,
            join: Some(join),
            shutdown_timeout: config.pump_shutdown_timeout,
        })
    }

    /// Delivers what is already queued, then stops the pump thread.
    pub fn shutdown(mut self) -> Result<(), RegistryError> {
        let _ = self.stop_tx.try_send(());
        let acknowledged = match self.done_rx.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        if !acknowledged {
            detach_join(join, PUMP_JOINER);
            return Err(RegistryError::PumpShutdownTimedOut {
                timeout_ms: self.shutdown_timeout.as_millis(),
            });
        }
        join.join().map_err(|_| RegistryError::PumpPanicked)
    }
}

impl Drop for CompletionPump {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.stop_tx.try_send(());
            detach_join(join, PUMP_JOINER);
        }
    }
}

struct PumpThreadArgs {
    registry: WeakRegistry,
    inbox: CompletionInbox,
    stop_rx: Receiver<()>,
    done_tx: Sender<()>,
    idle_poll: Duration,
}

fn pump_thread_main(args: PumpThreadArgs) {
    let PumpThreadArgs {
        registry,
        inbox,
        stop_rx,
        done_tx,
        idle_poll,
    } = args;

    loop {
        crossbeam_channel::select! {
            recv(stop_rx) -> _ => {
                if let Some(registry) = registry.upgrade() {
                    let delivered = inbox.drain_into(&registry);
                    debug!(delivered, "completion pump drained on shutdown");
                }
                break;
            }
            recv(inbox.rx) -> msg => {
                let Ok(completion) = msg else {
                    break;
                };
                let Some(registry) = registry.upgrade() else {
                    warn!(
                        filter_id = completion.ticket.filter.0,
                        "registry dropped before detach completion was delivered"
                    );
                    break;
                };
                registry.on_detach_completed(completion.ticket);
            }
            default(idle_poll) => {
                if registry.is_dropped() {
                    break;
                }
            }
        }
    }

    debug!("completion pump exited");
    let _ = done_tx.send(());
}
