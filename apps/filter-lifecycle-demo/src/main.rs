mod churn;
mod cli;
mod demo_filter;
mod scenario;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use filter_lifecycle::{RegistryConfig, TargetConfig};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, Tuning};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let (registry_config, target_config) = configs(&cli.tuning);
    match cli.command {
        Command::Scenario => scenario::run(&registry_config, &target_config),
        Command::Churn {
            threads,
            iterations,
            settle_ms,
        } => churn::run(
            &registry_config,
            &target_config,
            churn::ChurnPlan {
                threads: threads.max(1),
                iterations,
                settle: Duration::from_millis(settle_ms),
            },
        ),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(true)
        .try_init();
}

fn configs(tuning: &Tuning) -> (RegistryConfig, TargetConfig) {
    let registry = RegistryConfig {
        pump_idle_poll: Duration::from_millis(tuning.pump_poll_ms.max(1)),
        ..RegistryConfig::default()
    };
    let target = TargetConfig {
        control_timeout: Duration::from_millis(tuning.control_timeout_ms.max(1)),
        ..TargetConfig::default()
    };
    (registry, target)
}
