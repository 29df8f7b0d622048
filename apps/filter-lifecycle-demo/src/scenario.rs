//! Scripted runs of the three lifecycle scenarios against real target threads.
//!
//! Completions are delivered by hand from the inbox so that a late completion
//! from an earlier release cycle can be replayed after re-registration.

use std::time::Duration;

use anyhow::{Context, Result, ensure};
use filter_lifecycle::{
    CompletionInbox, EventReceiver, FilterRegistry, ForceReleaseOutcome, OutputSink,
    PlaybackSession, RegisterOutcome, RegistryConfig, ReleaseOutcome, TargetConfig,
};
use tracing::info;

use crate::demo_filter::demo_filter;

const COMPLETION_WAIT: Duration = Duration::from_secs(2);

pub fn run(registry_config: &RegistryConfig, target_config: &TargetConfig) -> Result<()> {
    let (registry, inbox) = FilterRegistry::new(registry_config);
    let mut events = registry.subscribe_events();

    reregistration_during_detach(&registry, &inbox, target_config)
        .context("scenario A: re-registration during detach")?;
    log_events("A", &mut events);

    duplicate_registration(&registry, target_config)
        .context("scenario B: duplicate registration")?;
    log_events("B", &mut events);

    orphan_release(&registry).context("scenario C: release of unregistered filter")?;
    log_events("C", &mut events);

    let snapshot = registry.snapshot();
    ensure!(
        snapshot.pending.is_empty(),
        "filters left pending: {:?}",
        snapshot.pending
    );
    info!(active = snapshot.active.len(), "all scenarios passed");
    Ok(())
}

fn reregistration_during_detach(
    registry: &FilterRegistry,
    inbox: &CompletionInbox,
    target_config: &TargetConfig,
) -> Result<()> {
    let output_a = OutputSink::spawn("output-a", registry, target_config)?;
    let output_b = OutputSink::spawn("output-b", registry, target_config)?;
    let (filter, drops) = demo_filter("osd");

    ensure!(output_a.install(&filter)?.is_registered(), "install on output-a");
    ensure!(
        registry.release(&filter) == ReleaseOutcome::Accepted,
        "release from output-a"
    );
    ensure!(output_b.install(&filter)?.is_registered(), "install on output-b");

    // The completion from output-a's cycle arrives only now.
    deliver_next(registry, inbox)?;
    let binding = registry
        .target_of(filter.id())
        .context("filter lost its mapping")?;
    ensure!(binding.label == "output-b", "mapped to {}", binding.label);
    ensure!(drops.count() == 0, "filter destroyed by a stale completion");
    info!(
        filter = %filter.id(),
        target_label = binding.label.as_str(),
        "survived stale completion"
    );

    ensure!(
        registry.release(&filter) == ReleaseOutcome::Accepted,
        "release from output-b"
    );
    deliver_next(registry, inbox)?;
    ensure!(drops.count() == 1, "destroyed {} times", drops.count());
    info!(filter = %filter.id(), "destroyed after detach");

    output_a.shutdown()?;
    output_b.shutdown()?;
    Ok(())
}

fn duplicate_registration(registry: &FilterRegistry, target_config: &TargetConfig) -> Result<()> {
    let session = PlaybackSession::spawn("session", registry, target_config)?;
    let (filter, drops) = demo_filter("subtitle");

    ensure!(
        session.install(&filter)? == RegisterOutcome::Registered,
        "first install"
    );
    let second = session.install(&filter)?;
    ensure!(
        second == RegisterOutcome::AlreadyRegistered,
        "second install reported {second:?}"
    );
    info!(filter = %filter.id(), ?second, "duplicate registration rejected");

    session.shutdown()?;
    ensure!(
        !registry.is_registered(filter.id()),
        "session shutdown kept the mapping"
    );
    registry.force_release(&filter);
    ensure!(drops.count() == 1, "destroyed {} times", drops.count());
    Ok(())
}

fn orphan_release(registry: &FilterRegistry) -> Result<()> {
    let (filter, drops) = demo_filter("orphan");

    let released = registry.release(&filter);
    ensure!(
        released == ReleaseOutcome::NotRegistered,
        "release reported {released:?}"
    );
    ensure!(registry.is_pending(filter.id()), "orphan not pending");

    let forced = registry.force_release(&filter);
    ensure!(
        forced == ForceReleaseOutcome::WasPending,
        "force release reported {forced:?}"
    );
    ensure!(drops.count() == 1, "destroyed {} times", drops.count());
    info!(filter = %filter.id(), ?released, ?forced, "orphan force-released");
    Ok(())
}

fn deliver_next(registry: &FilterRegistry, inbox: &CompletionInbox) -> Result<()> {
    let completion = inbox
        .recv_timeout(COMPLETION_WAIT)
        .context("no detach completion arrived")?;
    registry.on_detach_completed(completion.ticket);
    Ok(())
}

fn log_events(scenario: &str, events: &mut EventReceiver) {
    while let Ok(event) = events.try_recv() {
        info!(scenario, ?event, "registry event");
    }
}
