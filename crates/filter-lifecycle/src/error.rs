//! Typed errors for the threads that back the registry and its targets.
//!
//! Protocol results (`already registered`, `not registered`, ...) are plain
//! outcome enums in [`crate::registry`]; the errors here only cover
//! infrastructure failures such as a thread that could not be spawned or a
//! control call that never got an answer.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while starting or stopping the completion pump.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Completion pump thread could not be spawned.
    #[error("failed to spawn completion pump: {source}")]
    SpawnCompletionPump {
        /// I/O error returned by thread spawn.
        #[source]
        source: std::io::Error,
    },
    /// Completion pump did not acknowledge shutdown in time.
    #[error("completion pump shutdown timed out after {timeout_ms}ms")]
    PumpShutdownTimedOut {
        /// Timeout budget used while waiting for the acknowledgement.
        timeout_ms: u128,
    },
    /// Completion pump thread panicked.
    #[error("completion pump thread panicked")]
    PumpPanicked,
}

/// Errors produced by a target's processing thread.
#[derive(Debug, Error)]
pub enum TargetError {
    /// Target thread could not be spawned.
    #[error("failed to spawn target thread '{label}': {source}")]
    Spawn {
        /// Label of the target being started.
        label: String,
        /// I/O error returned by thread spawn.
        #[source]
        source: std::io::Error,
    },
    /// Target thread exited before the task could be delivered or answered.
    #[error("target '{label}' exited while handling '{operation}'")]
    Exited {
        /// Label of the target.
        label: String,
        /// Task name.
        operation: &'static str,
    },
    /// Target thread did not answer a control call in time.
    #[error("target '{label}' task '{operation}' timed out after {timeout_ms}ms")]
    TimedOut {
        /// Label of the target.
        label: String,
        /// Task name.
        operation: &'static str,
        /// Timeout budget used for the call.
        timeout_ms: u128,
    },
}

impl TargetError {
    pub(crate) fn timed_out(label: &str, operation: &'static str, timeout: Duration) -> Self {
        Self::TimedOut {
            label: label.to_string(),
            operation,
            timeout_ms: timeout.as_millis(),
        }
    }

    pub(crate) fn exited(label: &str, operation: &'static str) -> Self {
        Self::Exited {
            label: label.to_string(),
            operation,
        }
    }
}
