use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail, ensure};
use filter_lifecycle::{
    FilterHandle, FilterRegistry, OutputSink, PlaybackSession, RegistryConfig, TargetConfig,
};
use tracing::{debug, info, warn};

use crate::demo_filter::{Drops, demo_filter};

pub struct ChurnPlan {
    pub threads: usize,
    pub iterations: usize,
    pub settle: Duration,
}

#[derive(Clone)]
struct Targets {
    sinks: Vec<Arc<OutputSink>>,
    sessions: Vec<Arc<PlaybackSession>>,
}

impl Targets {
    fn install(&self, slot: usize, filter: &FilterHandle) -> Result<()> {
        let total = self.sinks.len() + self.sessions.len();
        let index = slot % total;
        let outcome = match self.sinks.get(index) {
            Some(sink) => sink.install(filter)?,
            None => self.sessions[index - self.sinks.len()].install(filter)?,
        };
        debug!(filter = %filter.id(), ?outcome, "install");
        ensure!(
            outcome.is_registered(),
            "install of {} reported {outcome:?}",
            filter.id()
        );
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        for sink in &self.sinks {
            sink.shutdown()?;
        }
        for session in &self.sessions {
            session.shutdown()?;
        }
        Ok(())
    }
}

pub fn run(
    registry_config: &RegistryConfig,
    target_config: &TargetConfig,
    plan: ChurnPlan,
) -> Result<()> {
    let (registry, pump) = FilterRegistry::start(registry_config)?;
    let targets = Targets {
        sinks: (0..2)
            .map(|n| OutputSink::spawn(format!("sink-{n}"), &registry, target_config))
            .collect::<Result<_, _>>()?,
        sessions: (0..2)
            .map(|n| PlaybackSession::spawn(format!("session-{n}"), &registry, target_config))
            .collect::<Result<_, _>>()?,
    };

    let started = Instant::now();
    let workers = (0..plan.threads)
        .map(|worker| {
            let registry = registry.clone();
            let targets = targets.clone();
            let iterations = plan.iterations;
            std::thread::Builder::new()
                .name(format!("churn-{worker}"))
                .spawn(move || churn_worker(worker, iterations, &registry, &targets))
                .context("spawn churn worker")
        })
        .collect::<Result<Vec<_>>>()?;

    let mut counters = Vec::with_capacity(plan.threads * plan.iterations);
    for worker in workers {
        let produced = worker
            .join()
            .map_err(|_| anyhow::anyhow!("churn worker panicked"))??;
        counters.extend(produced);
    }
    info!(
        filters = counters.len(),
        elapsed_ms = started.elapsed().as_millis(),
        "all releases issued"
    );

    let deadline = Instant::now() + plan.settle;
    while counters.iter().any(|(_, drops)| drops.count() == 0) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    targets.shutdown()?;
    pump.shutdown()?;

    let snapshot = registry.snapshot();
    let missing = counters
        .iter()
        .filter(|(_, drops)| drops.count() == 0)
        .count();
    let doubled = counters
        .iter()
        .filter(|(_, drops)| drops.count() > 1)
        .count();
    if missing > 0 || doubled > 0 {
        warn!(
            missing,
            doubled,
            pending = snapshot.pending.len(),
            "churn run failed"
        );
        bail!("{missing} filters never destroyed, {doubled} destroyed more than once");
    }
    if !snapshot.pending.is_empty() || !snapshot.active.is_empty() {
        bail!(
            "registry not empty after churn: {} active, {} pending",
            snapshot.active.len(),
            snapshot.pending.len()
        );
    }
    info!(
        filters = counters.len(),
        elapsed_ms = started.elapsed().as_millis(),
        "every filter destroyed exactly once"
    );
    Ok(())
}

fn churn_worker(
    worker: usize,
    iterations: usize,
    registry: &FilterRegistry,
    targets: &Targets,
) -> Result<Vec<(FilterHandle, Drops)>> {
    let mut produced = Vec::with_capacity(iterations);
    for iteration in 0..iterations {
        let (filter, drops) = demo_filter(format!("churn-{worker}-{iteration}"));
        targets.install(worker + iteration, &filter)?;
        if iteration % 3 == 0 {
            // Move to another target while the first detach may still be queued.
            registry.release(&filter);
            targets.install(worker + iteration + 1, &filter)?;
        }
        registry.release(&filter);
        produced.push((filter, drops));
    }
    Ok(produced)
}
