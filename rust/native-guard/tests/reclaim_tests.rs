use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use native_guard::{
    Diagnostic, DiagnosticSink, GuardConfig, HandleState, ResourceGuard, WorkerState,
    reclaim::{Interrupted, ReclaimItem, ReclaimQueue, ReclaimSource},
};
use native_guard_testkit::{probe::ReleaseProbe, resource::TestResource, sink::RecordingSink};

fn recording_guard() -> (ResourceGuard, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    let guard = ResourceGuard::new(GuardConfig::new().with_sink(sink.clone())).unwrap();
    (guard, sink)
}

#[test]
fn test_explicit_release_scenario() {
    let (guard, sink) = recording_guard();
    let probe = ReleaseProbe::new();

    let handle = guard.register(0x1, probe.callback()).unwrap();
    assert!(guard.contains(&handle));

    assert!(guard.release(&handle));
    assert_eq!(probe.count(0x1), 1);
    assert!(!guard.contains(&handle));
    assert_eq!(handle.state(), HandleState::Released);

    drop(handle);
    assert!(guard.flush());
    assert_eq!(probe.total(), 1);
    assert!(sink.events().is_empty());
}

#[test]
fn test_leaked_owner_is_reclaimed() {
    let (guard, sink) = recording_guard();
    let probe = ReleaseProbe::new();

    let resource = TestResource::open(&guard, 0x2, &probe);
    let id = resource.handle().id();
    drop(resource);

    assert!(guard.flush());
    assert_eq!(probe.count(0x2), 1);
    assert_eq!(guard.live_count(), 0);
    assert_eq!(guard.stats().reclaimed, 1);

    assert_eq!(
        sink.for_address(0x2),
        vec![
            Diagnostic::NotProperlyClosed { address: 0x2 },
            Diagnostic::Destroyed {
                label: Some("TestResource".to_string()),
                address: 0x2
            },
        ]
    );
    assert_eq!(
        sink.messages(),
        vec!["2 not properly closed, doing it now", "TestResource destroyed 2"]
    );
    assert!(id.as_u64() > 0);
}

#[test]
fn test_unlabeled_destroyed_message() {
    let (guard, sink) = recording_guard();
    let handle = guard.register(0x30, |_| {}).unwrap();
    drop(handle);

    assert!(guard.flush());
    assert_eq!(sink.messages().last().unwrap(), "Destroyed 48");
}

#[test]
fn test_double_release_scenario() {
    let (guard, _sink) = recording_guard();
    let probe = ReleaseProbe::new();
    let resource = TestResource::open(&guard, 0x3, &probe);

    assert!(resource.close());
    assert!(!resource.close());
    assert!(!guard.release(resource.handle()));
    assert_eq!(probe.count(0x3), 1);
}

#[test]
fn test_closed_then_dropped_is_not_reclaimed() {
    let (guard, sink) = recording_guard();
    let probe = ReleaseProbe::new();

    let resource = TestResource::open(&guard, 0x4, &probe);
    resource.close();
    drop(resource);

    assert!(guard.flush());
    assert_eq!(probe.count(0x4), 1);
    assert_eq!(guard.stats().reclaimed, 0);
    assert_eq!(sink.count(|d| matches!(d, Diagnostic::NotProperlyClosed { .. })), 0);
}

#[test]
fn test_reclaim_follows_drop_order() {
    let (guard, _sink) = recording_guard();
    let probe = ReleaseProbe::new();

    let resources: Vec<_> = (1..=10u64)
        .map(|a| TestResource::open(&guard, a * 16, &probe))
        .collect();
    let mut expected: Vec<u64> = resources.iter().map(|r| r.address()).collect();
    expected.reverse();
    for resource in resources.into_iter().rev() {
        drop(resource);
    }

    assert!(guard.flush());
    assert_eq!(probe.order(), expected);
}

#[test]
fn test_failing_release_does_not_stop_worker() {
    let (guard, sink) = recording_guard();
    let probe = ReleaseProbe::new();
    probe.fail_on(0x10);

    drop(TestResource::open(&guard, 0x10, &probe));
    drop(TestResource::open(&guard, 0x20, &probe));

    assert!(guard.flush());
    assert_ne!(guard.worker_state(), WorkerState::Stopped);
    assert_eq!(probe.count(0x10), 1);
    assert_eq!(probe.count(0x20), 1);
    assert_eq!(guard.live_count(), 0);

    let stats = guard.stats();
    assert_eq!(stats.release_failures, 1);
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(
        sink.count(|d| matches!(d, Diagnostic::ReleaseFailed { address: 0x10, .. })),
        1
    );
}

#[test]
fn test_shutdown_stops_reclamation() {
    let (guard, sink) = recording_guard();
    let probe = ReleaseProbe::new();
    let leaked = TestResource::open(&guard, 0x40, &probe);
    let closed_later = TestResource::open(&guard, 0x50, &probe);

    guard.shutdown();
    assert_eq!(guard.worker_state(), WorkerState::Stopped);
    assert_eq!(sink.count(|d| *d == Diagnostic::Interrupted), 1);
    assert_eq!(sink.messages().last().unwrap(), "Thread Interrupted");

    drop(leaked);
    assert!(!guard.flush());
    assert_eq!(probe.count(0x40), 0);
    assert_eq!(guard.live_count(), 2);
    assert_eq!(
        sink.count(|d| *d == Diagnostic::LeakedAfterStop { address: 0x40 }),
        1
    );

    assert!(closed_later.close());
    assert_eq!(probe.count(0x50), 1);

    guard.shutdown();
    assert_eq!(sink.count(|d| *d == Diagnostic::Interrupted), 1);
}

#[test]
fn test_guard_drop_interrupts_worker() {
    let sink = RecordingSink::new();
    {
        let guard = ResourceGuard::new(GuardConfig::new().with_sink(sink.clone())).unwrap();
        let _ = guard.register(0x60, |_| {}).unwrap().release();
    }
    assert_eq!(sink.messages(), vec!["Thread Interrupted"]);
}

#[test]
fn test_worker_thread_is_named() {
    let (guard, _sink) = recording_guard();
    let name = Arc::new(std::sync::Mutex::new(None));
    let seen = name.clone();
    let handle = guard
        .register(0x70, move |_| {
            *seen.lock().unwrap() = std::thread::current().name().map(str::to_string);
        })
        .unwrap();
    drop(handle);

    assert!(guard.flush());
    assert_eq!(
        name.lock().unwrap().as_deref(),
        Some(native_guard::config::DEFAULT_THREAD_NAME)
    );
}

/// Sink that panics whenever the worker reports a destroyed handle.
struct PanickingSink;

impl DiagnosticSink for PanickingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        if matches!(diagnostic, Diagnostic::Destroyed { .. }) {
            panic!("sink failure");
        }
    }
}

#[test]
fn test_panicking_sink_does_not_stop_worker() {
    let guard = ResourceGuard::new(GuardConfig::new().with_sink(Arc::new(PanickingSink))).unwrap();
    let probe = ReleaseProbe::new();

    drop(TestResource::open(&guard, 0x10, &probe));
    drop(TestResource::open(&guard, 0x20, &probe));

    assert!(guard.flush_timeout(Duration::from_secs(5)));
    assert_ne!(guard.worker_state(), WorkerState::Stopped);
    assert_eq!(probe.count(0x10), 1);
    assert_eq!(probe.count(0x20), 1);
    assert_eq!(guard.live_count(), 0);
}

/// Queue whose first `next` panics, simulating a worker that dies outside item
/// processing.
#[derive(Default)]
struct FaultySource {
    queue: ReclaimQueue,
    tripped: AtomicBool,
}

impl ReclaimSource for FaultySource {
    fn enqueue(&self, item: ReclaimItem) -> Result<(), ReclaimItem> {
        self.queue.enqueue(item)
    }

    fn next(&self) -> Result<ReclaimItem, Interrupted> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("source failure");
        }
        self.queue.next()
    }

    fn interrupt(&self) {
        self.queue.interrupt()
    }

    fn is_interrupted(&self) -> bool {
        self.queue.is_interrupted()
    }

    fn pending(&self) -> usize {
        self.queue.pending()
    }
}

#[test]
fn test_worker_exit_on_panic_reports_later_leaks() {
    let sink = RecordingSink::new();
    let guard = ResourceGuard::with_source(
        GuardConfig::new().with_sink(sink.clone()),
        Box::new(FaultySource::default()),
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while guard.worker_state() != WorkerState::Stopped {
        assert!(Instant::now() < deadline, "worker did not stop");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(sink.messages(), vec!["Thread Interrupted"]);

    let probe = ReleaseProbe::new();
    drop(TestResource::open(&guard, 0x80, &probe));
    assert!(!guard.flush());
    assert_eq!(
        sink.count(|d| *d == Diagnostic::LeakedAfterStop { address: 0x80 }),
        1
    );
    assert_eq!(probe.count(0x80), 0);
}
