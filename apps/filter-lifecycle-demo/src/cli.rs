use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[command(name = "filter-lifecycle-demo")]
#[command(about = "Drive the filter lifecycle registry against threaded targets")]
pub struct Cli {
    #[command(flatten)]
    pub tuning: Tuning,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Clone)]
pub struct Tuning {
    /// Timeout for control calls into a target thread.
    #[arg(long, global = true, default_value_t = 500)]
    pub control_timeout_ms: u64,

    /// Idle poll interval of the completion pump.
    #[arg(long, global = true, default_value_t = 50)]
    pub pump_poll_ms: u64,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the re-registration, duplicate and orphan-release scenarios.
    Scenario,
    /// Register and release filters from many threads and verify single destruction.
    Churn {
        #[arg(long, default_value_t = 4)]
        threads: usize,

        #[arg(long, default_value_t = 200)]
        iterations: usize,

        /// How long to wait for outstanding detaches after the last release.
        #[arg(long, default_value_t = 5000)]
        settle_ms: u64,
    },
}
