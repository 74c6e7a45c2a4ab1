//! The process-wide guard. Everything lives in one test because the global
//! instance can only be configured once per process.

use std::sync::Arc;

use native_guard::{Diagnostic, GuardConfig, ResourceGuard, WorkerState};
use native_guard_testkit::{probe::ReleaseProbe, sink::RecordingSink};

#[test]
fn test_global_guard_lifecycle() {
    let sink = RecordingSink::new();
    let probe = ReleaseProbe::new();

    // Membership queries do not start the global guard, so it can still be
    // configured afterwards.
    let early_guard = ResourceGuard::new(GuardConfig::new().with_sink(Arc::new(
        native_guard::diagnostics::NullSink,
    )))
    .unwrap();
    let early = early_guard.register(0x9, probe.callback()).unwrap();
    assert!(!native_guard::contains(&early));
    assert!(early.release());

    ResourceGuard::configure_global(
        GuardConfig::new()
            .with_thread_name("global-reclaim")
            .with_sink(sink.clone()),
    )
    .unwrap();

    // Scenario A through the free functions.
    let a = native_guard::register(0x1, probe.callback(), Some("Widget")).unwrap();
    assert!(native_guard::contains(&a));
    assert!(native_guard::release(&a));
    assert!(!native_guard::contains(&a));
    assert_eq!(probe.count(0x1), 1);

    // Scenario C.
    assert!(!native_guard::release(&a));
    assert_eq!(probe.count(0x1), 1);

    // The global guard is a singleton and cannot be reconfigured once running.
    let global = ResourceGuard::global();
    assert!(std::ptr::eq(global, ResourceGuard::global()));
    assert!(ResourceGuard::configure_global(GuardConfig::new()).is_err());

    // Scenario B.
    let b = native_guard::register(0x2, probe.callback(), None).unwrap();
    drop(b);
    assert!(global.flush());
    assert_eq!(probe.count(0x2), 1);
    assert_eq!(
        sink.for_address(0x2),
        vec![
            Diagnostic::NotProperlyClosed { address: 0x2 },
            Diagnostic::Destroyed {
                label: None,
                address: 0x2
            },
        ]
    );

    // Handles registered on a private guard are not members of the global one.
    let private = ResourceGuard::new(GuardConfig::new().with_sink(Arc::new(
        native_guard::diagnostics::NullSink,
    )))
    .unwrap();
    let c = private.register(0x3, probe.callback()).unwrap();
    assert!(!native_guard::contains(&c));
    assert!(native_guard::release(&c));

    // Misuse fails fast.
    assert!(native_guard::register(0, probe.callback(), None).is_err());

    global.shutdown();
    assert_eq!(global.worker_state(), WorkerState::Stopped);
    assert_eq!(sink.count(|d| *d == Diagnostic::Interrupted), 1);
    assert!(probe.duplicates().is_empty());
}
