use std::sync::Arc;

use crate::events::RegistryEvent;
use crate::filter::FilterHandle;
use crate::registry::{FilterRegistry, ForceReleaseOutcome, RegisterOutcome, ReleaseOutcome};
use crate::target::{FilterTarget, OutputSink, PlaybackSession, TargetKind};

use super::support::{
    DropCounter, ManualTarget, TEST_TIMEOUT, counted_filter, test_registry_config,
    test_target_config, wait_until,
};

fn wait_destroyed(filter: &FilterHandle, drops: &DropCounter) {
    assert!(
        wait_until(TEST_TIMEOUT, || drops.get() == 1),
        "{} was not destroyed in time",
        filter.id()
    );
    assert!(filter.is_destroyed());
}

#[test]
fn released_filter_is_destroyed_after_sink_detaches() {
    let (registry, pump) = FilterRegistry::start(&test_registry_config()).expect("start registry");
    let sink = OutputSink::spawn("sink", &registry, &test_target_config()).expect("spawn sink");
    let (filter, drops) = counted_filter("eq");

    assert_eq!(
        sink.install(&filter).expect("install"),
        RegisterOutcome::Registered
    );
    assert_eq!(sink.attached().expect("attached"), vec![filter.id()]);
    assert!(registry.is_registered(filter.id()));

    assert_eq!(registry.release(&filter), ReleaseOutcome::Accepted);
    wait_destroyed(&filter, &drops);
    assert!(sink.attached().expect("attached").is_empty());
    assert!(!registry.is_pending(filter.id()));

    sink.shutdown().expect("shutdown sink");
    pump.shutdown().expect("shutdown pump");
    assert_eq!(drops.get(), 1);
}

#[test]
fn duplicate_install_is_rejected_without_second_attach() {
    let (registry, _pump) = FilterRegistry::start(&test_registry_config()).expect("start registry");
    let sink = OutputSink::spawn("sink", &registry, &test_target_config()).expect("spawn sink");
    let session =
        PlaybackSession::spawn("session", &registry, &test_target_config()).expect("spawn session");
    let (filter, _drops) = counted_filter("osd");

    assert!(sink.install(&filter).expect("install").is_registered());
    assert_eq!(
        session.install(&filter).expect("install"),
        RegisterOutcome::AlreadyRegistered
    );
    assert_eq!(
        sink.install(&filter).expect("install"),
        RegisterOutcome::AlreadyRegistered
    );
    assert_eq!(sink.attached().expect("attached"), vec![filter.id()]);
    assert!(session.attached().expect("attached").is_empty());
    assert_eq!(
        registry.target_of(filter.id()).map(|binding| binding.kind),
        Some(TargetKind::OutputSink)
    );
}

#[test]
fn filter_moved_to_session_survives_late_completion_from_old_target() {
    let (registry, pump) = FilterRegistry::start(&test_registry_config()).expect("start registry");
    let output = ManualTarget::new(TargetKind::OutputSink, "slow-output");
    let session =
        PlaybackSession::spawn("session", &registry, &test_target_config()).expect("spawn session");
    let (filter, drops) = counted_filter("subtitle");

    registry.register(&filter, &output.as_target());
    registry.release(&filter);
    assert!(session.install(&filter).expect("install").is_registered());

    let mut events = registry.subscribe_events();
    assert_eq!(output.complete_all(), 1);
    assert!(wait_until(TEST_TIMEOUT, || {
        matches!(
            events.try_recv(),
            Ok(RegistryEvent::StaleCompletion { filter: id, .. }) if id == filter.id()
        )
    }));
    assert_eq!(drops.get(), 0);
    assert!(registry.is_registered(filter.id()));
    assert_eq!(session.attached().expect("attached"), vec![filter.id()]);

    assert_eq!(registry.release(&filter), ReleaseOutcome::Accepted);
    wait_destroyed(&filter, &drops);

    pump.shutdown().expect("shutdown pump");
}

#[test]
fn uninstalled_filter_needs_force_release() {
    let (registry, _pump) = FilterRegistry::start(&test_registry_config()).expect("start registry");
    let sink = OutputSink::spawn("sink", &registry, &test_target_config()).expect("spawn sink");
    let (filter, drops) = counted_filter("crop");

    sink.install(&filter).expect("install");
    assert!(sink.uninstall(&filter).expect("uninstall"));
    assert!(!sink.uninstall(&filter).expect("uninstall"));
    assert!(!registry.is_registered(filter.id()));

    assert_eq!(registry.release(&filter), ReleaseOutcome::NotRegistered);
    assert!(registry.is_pending(filter.id()));
    assert_eq!(drops.get(), 0);

    assert_eq!(
        registry.force_release(&filter),
        ForceReleaseOutcome::WasPending
    );
    assert_eq!(drops.get(), 1);
}

#[test]
fn shutdown_unregisters_the_whole_chain() {
    let (registry, _pump) = FilterRegistry::start(&test_registry_config()).expect("start registry");
    let session =
        PlaybackSession::spawn("session", &registry, &test_target_config()).expect("spawn session");
    let filters = (0..3).map(|_| counted_filter("chain")).collect::<Vec<_>>();
    for (filter, _) in &filters {
        session.install(filter).expect("install");
    }
    assert_eq!(registry.snapshot().active.len(), 3);

    session.shutdown().expect("shutdown session");

    assert!(registry.snapshot().active.is_empty());
    assert!(session.attached().is_err());
    for (filter, drops) in &filters {
        assert_eq!(drops.get(), 0);
        assert!(!filter.is_destroyed());
    }
}

#[test]
fn detach_to_stopped_target_still_completes() {
    let (registry, _pump) = FilterRegistry::start(&test_registry_config()).expect("start registry");
    let sink = OutputSink::spawn("sink", &registry, &test_target_config()).expect("spawn sink");
    let (filter, drops) = counted_filter("late");

    // Mapped in the registry but never attached to the sink's chain.
    let target: Arc<dyn FilterTarget> = sink.clone();
    registry.register(&filter, &target);
    sink.shutdown().expect("shutdown sink");
    assert!(registry.is_registered(filter.id()));

    assert_eq!(registry.release(&filter), ReleaseOutcome::Accepted);
    wait_destroyed(&filter, &drops);
}

#[test]
fn dropping_a_sink_detaches_its_chain() {
    let (registry, _pump) = FilterRegistry::start(&test_registry_config()).expect("start registry");
    let sink = OutputSink::spawn("sink", &registry, &test_target_config()).expect("spawn sink");
    let (filter, drops) = counted_filter("dropped");

    sink.install(&filter).expect("install");
    drop(sink);

    assert!(wait_until(TEST_TIMEOUT, || !registry.is_registered(filter.id())));
    assert_eq!(registry.release(&filter), ReleaseOutcome::NotRegistered);
    assert_eq!(drops.get(), 0);
    assert_eq!(
        registry.force_release(&filter),
        ForceReleaseOutcome::WasPending
    );
    assert_eq!(drops.get(), 1);
}

#[test]
fn move_right_after_release_keeps_the_filter_alive() {
    const MOVES: usize = 200;

    let (registry, pump) = FilterRegistry::start(&test_registry_config()).expect("start registry");
    let sink = OutputSink::spawn("sink", &registry, &test_target_config()).expect("spawn sink");
    let session =
        PlaybackSession::spawn("session", &registry, &test_target_config()).expect("spawn session");

    let moved = (0..MOVES)
        .map(|_| {
            let (filter, drops) = counted_filter("moved");
            assert!(sink.install(&filter).expect("install").is_registered());
            assert_eq!(registry.release(&filter), ReleaseOutcome::Accepted);
            assert_eq!(
                session.install(&filter).expect("install"),
                RegisterOutcome::Registered
            );
            (filter, drops)
        })
        .collect::<Vec<_>>();

    // Every detach queued on the sink has run once the sink answers.
    assert!(sink.attached().expect("attached").is_empty());
    assert!(wait_until(TEST_TIMEOUT, || registry.snapshot().pending.is_empty()));
    assert!(moved.iter().all(|(_, drops)| drops.get() == 0));
    assert_eq!(session.attached().expect("attached").len(), MOVES);
    assert!(moved.iter().all(|(filter, _)| {
        registry.target_of(filter.id()).map(|binding| binding.kind)
            == Some(TargetKind::PlaybackSession)
    }));

    for (filter, _) in &moved {
        assert_eq!(registry.release(filter), ReleaseOutcome::Accepted);
    }
    assert!(wait_until(TEST_TIMEOUT, || {
        moved.iter().all(|(_, drops)| drops.get() == 1)
    }));
    assert!(session.attached().expect("attached").is_empty());

    pump.shutdown().expect("shutdown pump");
}

#[test]
fn concurrent_churn_destroys_every_filter_exactly_once() {
    const THREADS: usize = 4;
    const ITERATIONS: usize = 50;

    let (registry, pump) = FilterRegistry::start(&test_registry_config()).expect("start registry");
    let sink = OutputSink::spawn("sink", &registry, &test_target_config()).expect("spawn sink");
    let session =
        PlaybackSession::spawn("session", &registry, &test_target_config()).expect("spawn session");

    let workers = (0..THREADS)
        .map(|worker| {
            let registry = registry.clone();
            let sink = Arc::clone(&sink);
            let session = Arc::clone(&session);
            std::thread::spawn(move || {
                let mut counters = Vec::with_capacity(ITERATIONS);
                for iteration in 0..ITERATIONS {
                    let (filter, drops) = counted_filter("churn");
                    if (worker + iteration) % 2 == 0 {
                        assert!(sink.install(&filter).expect("install").is_registered());
                    } else {
                        session.install(&filter).expect("install");
                    }
                    if iteration % 5 == 0 {
                        // Move to the other target while the first detach is in flight.
                        registry.release(&filter);
                        assert!(sink.install(&filter).expect("install").is_registered());
                    }
                    registry.release(&filter);
                    counters.push((filter, drops));
                }
                counters
            })
        })
        .collect::<Vec<_>>();

    let counters = workers
        .into_iter()
        .flat_map(|worker| worker.join().expect("churn worker panicked"))
        .collect::<Vec<_>>();

    assert!(wait_until(TEST_TIMEOUT, || {
        counters.iter().all(|(_, drops)| drops.get() == 1)
    }));
    let snapshot = registry.snapshot();
    assert!(snapshot.active.is_empty());
    assert!(snapshot.pending.is_empty());
    assert!(counters.iter().all(|(filter, _)| filter.is_destroyed()));

    sink.shutdown().expect("shutdown sink");
    session.shutdown().expect("shutdown session");
    pump.shutdown().expect("shutdown pump");
    assert!(counters.iter().all(|(_, drops)| drops.get() == 1));
}
