use std::time::Duration;

/// Settings for a registry and its completion pump.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub event_capacity: usize,
    pub pump_thread_name: String,
    /// How often the pump re-checks that the registry is still alive while idle.
    pub pump_idle_poll: Duration,
    pub pump_shutdown_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            pump_thread_name: "filter-lifecycle-completions".to_string(),
            pump_idle_poll: Duration::from_millis(50),
            pump_shutdown_timeout: Duration::from_secs(2),
        }
    }
}

/// Settings for a target's processing thread.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub control_timeout: Duration,
    pub thread_name_prefix: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            control_timeout: Duration::from_millis(500),
            thread_name_prefix: "filter-lifecycle-target".to_string(),
        }
    }
}

impl TargetConfig {
    pub(crate) fn thread_name(&self, label: &str) -> String {
        format!("{}-{label}", self.thread_name_prefix)
    }
}
