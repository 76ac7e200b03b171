//! Lifecycle tests for `MountedFileSystem`.
//!
//! Drives the coordinator through every outcome with the scripted doubles
//! from `fusemount::testing`:
//! - Mount failure, readiness failure, serve failure, panics
//! - Unmount while serving
//! - Cancellation and timeouts that leave outcomes untouched
//!
//! Run: `cargo nextest run -p fusemount --test lifecycle`

use std::error::Error as _;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use fusemount::testing::{Gate, RecordingObserver, TestDriver, TestServer};
use fusemount::{mount, MountBuilder, MountConfig, MountError, MountState, Phase};
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Short wait used to show that something does NOT happen.
const SETTLE: Duration = Duration::from_millis(50);

// =============================================================================
// Mount phase
// =============================================================================

#[tokio::test]
async fn test_mount_failure_reported_through_ready() {
    let driver = TestDriver::new().failing_mount(ErrorKind::NotFound, "no /dev/fuse");
    let counters = driver.counters();
    let mfs = mount(
        "/mnt/missing",
        (),
        driver,
        TestServer::ok(Arc::clone(&counters)),
        &MountConfig::default(),
    )
    .unwrap();

    let err = mfs
        .wait_for_ready(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MountError::Mount(_)), "got {err:?}");
    assert!(err.is_mount_phase());

    // The driver's error is wrapped, not replaced
    let source = err.source().expect("wrapped driver error");
    assert_eq!(source.to_string(), "no /dev/fuse");
    assert_eq!(err.io_error().unwrap().kind(), ErrorKind::NotFound);

    // Nothing past the mount call ran
    assert_eq!(counters.mounts(), 1);
    assert_eq!(counters.ready_checks(), 0);
    assert_eq!(counters.serves(), 0);
    assert_eq!(counters.closes(), 0);
    assert_eq!(mfs.state(), MountState::MountFailed);
}

#[test]
fn test_mount_failure_never_reports_termination() {
    let driver = TestDriver::new().failing_mount(ErrorKind::PermissionDenied, "denied");
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/denied", driver)
        .mount((), TestServer::ok(counters))
        .unwrap();

    assert!(mfs.wait_for_ready_timeout(TIMEOUT).is_err());
    assert!(mfs.join_outcome().is_none());
    assert!(matches!(
        mfs.join_timeout(SETTLE),
        Err(MountError::TimedOut(Phase::Join))
    ));
}

#[test]
fn test_join_on_mount_failure_reports_same_error() {
    let driver = TestDriver::new().failing_mount(ErrorKind::PermissionDenied, "denied");
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/denied", driver)
        .config(MountConfig::default().join_on_mount_failure(true))
        .mount((), TestServer::ok(Arc::clone(&counters)))
        .unwrap();

    let ready = mfs.wait_for_ready_timeout(TIMEOUT).unwrap_err();
    let joined = mfs.join_timeout(TIMEOUT).unwrap_err();
    assert!(matches!(joined, MountError::Mount(_)));
    assert!(std::ptr::eq(
        ready.io_error().unwrap(),
        joined.io_error().unwrap()
    ));
    assert_eq!(counters.serves(), 0);
}

#[test]
fn test_panicking_mount_still_reports_readiness() {
    let driver = TestDriver::new().panicking_mount("driver exploded");
    let counters = driver.counters();
    let observer = RecordingObserver::new();
    let mfs = MountBuilder::new("/mnt/panic-mount", driver)
        .observer(observer.clone())
        .mount((), TestServer::ok(Arc::clone(&counters)))
        .unwrap();

    let err = mfs.wait_for_ready_timeout(TIMEOUT).unwrap_err();
    assert!(matches!(err, MountError::Panicked(Phase::Ready)), "got {err:?}");
    assert!(err.is_mount_phase());
    assert_eq!(mfs.state(), MountState::MountFailed);
    assert!(observer.names().contains(&"panicked"));

    // No connection was created, so nothing is served or closed
    assert_eq!(counters.serves(), 0);
    assert_eq!(counters.closes(), 0);
    assert!(matches!(
        mfs.join_timeout(SETTLE),
        Err(MountError::TimedOut(Phase::Join))
    ));
}

#[test]
fn test_join_on_mount_failure_covers_panicking_mount() {
    let driver = TestDriver::new().panicking_mount("driver exploded");
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/panic-mount", driver)
        .config(MountConfig::default().join_on_mount_failure(true))
        .mount((), TestServer::ok(counters))
        .unwrap();

    let ready = mfs.wait_for_ready_timeout(TIMEOUT).unwrap_err();
    let joined = mfs.join_timeout(TIMEOUT).unwrap_err();
    assert!(matches!(ready, MountError::Panicked(Phase::Ready)));
    assert!(matches!(joined, MountError::Panicked(Phase::Ready)), "got {joined:?}");
    assert_eq!(mfs.state(), MountState::MountFailed);
}

#[test]
fn test_panicking_readiness_check_reports_panicked() {
    let driver = TestDriver::new().panicking_ready("poll exploded");
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/panic-ready", driver)
        .mount((), TestServer::ok(Arc::clone(&counters)))
        .unwrap();

    let err = mfs.wait_for_ready_timeout(TIMEOUT).unwrap_err();
    assert!(matches!(err, MountError::Panicked(Phase::Ready)), "got {err:?}");
    assert_eq!(counters.ready_checks(), 1);

    // Serving is unaffected by the readiness thread
    mfs.join_timeout(TIMEOUT).unwrap();
    assert_eq!(counters.serves(), 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(mfs.state(), MountState::Terminated);
}

#[test]
fn test_unbounded_timeout_returns_outcome() {
    let driver = TestDriver::new().failing_mount(ErrorKind::NotFound, "no /dev/fuse");
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/unbounded", driver)
        .config(MountConfig::default().join_on_mount_failure(true))
        .mount((), TestServer::ok(counters))
        .unwrap();

    let ready = mfs.wait_for_ready_timeout(Duration::MAX).unwrap_err();
    let joined = mfs.join_timeout(Duration::MAX).unwrap_err();
    assert!(matches!(ready, MountError::Mount(_)));
    assert!(matches!(joined, MountError::Mount(_)));
}

#[tokio::test]
async fn test_clean_readiness_is_success() {
    let driver = TestDriver::new();
    let counters = driver.counters();
    let unmounted = driver.unmounted();
    let mfs = MountBuilder::new("/mnt/ok", driver)
        .mount((), TestServer::until_unmount(Arc::clone(&counters), unmounted))
        .unwrap();

    let cancel = CancellationToken::new();
    mfs.wait_for_ready(&cancel).await.unwrap();
    assert_eq!(counters.ready_checks(), 1);
    assert!(!mfs.state().is_terminal());

    mfs.unmount().unwrap();
    mfs.join(&cancel).await.unwrap();
}

#[test]
fn test_readiness_error_reported_as_not_ready() {
    let driver = TestDriver::new().not_ready(ErrorKind::ConnectionRefused, "init rejected");
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/rejected", driver)
        .mount((), TestServer::ok(Arc::clone(&counters)))
        .unwrap();

    let err = mfs.wait_for_ready_timeout(TIMEOUT).unwrap_err();
    assert!(matches!(err, MountError::NotReady(_)), "got {err:?}");
    assert_eq!(err.io_error().unwrap().kind(), ErrorKind::ConnectionRefused);
    assert_eq!(err.source().unwrap().to_string(), "init rejected");

    // Serving still ran and terminated on its own
    mfs.join_timeout(TIMEOUT).unwrap();
    assert_eq!(counters.serves(), 1);
}

#[test]
fn test_readiness_independent_of_serving() {
    let ready_gate = Gate::new();
    let driver = TestDriver::new().ready_after(ready_gate.clone());
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/slow-ready", driver)
        .mount((), TestServer::ok(counters))
        .unwrap();

    // Serving can finish before the connection reports readiness
    mfs.join_timeout(TIMEOUT).unwrap();
    assert!(mfs.ready_outcome().is_none());

    ready_gate.open();
    mfs.wait_for_ready_timeout(TIMEOUT).unwrap();
}

#[test]
fn test_dir_is_requested_mountpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = TestDriver::new().failing_mount(ErrorKind::NotFound, "missing");
    let counters = driver.counters();
    let mfs = MountBuilder::new(tmp.path(), driver)
        .mount((), TestServer::ok(counters))
        .unwrap();

    // Same path before and after the outcome is known
    assert_eq!(mfs.dir(), tmp.path());
    assert!(mfs.wait_for_ready_timeout(TIMEOUT).is_err());
    assert_eq!(mfs.dir(), tmp.path());
}

#[test]
fn test_invalid_config_fails_synchronously() {
    let driver = TestDriver::new();
    let counters = driver.counters();
    let result = MountBuilder::new("/mnt/bad", driver)
        .config(MountConfig::default().fs_name("a,b"))
        .mount((), TestServer::ok(Arc::clone(&counters)));

    assert!(matches!(result, Err(MountError::Config(_))));
    assert_eq!(counters.mounts(), 0);
}

#[test]
fn test_config_converted_for_driver() {
    let driver = TestDriver::new();
    let counters = driver.counters();
    let config = MountConfig::default()
        .fs_name("scratch")
        .subtype("fusemount")
        .default_permissions(true);
    let mfs = MountBuilder::new("/mnt/scratch", driver)
        .config(config)
        .mount((), TestServer::ok(Arc::clone(&counters)))
        .unwrap();

    mfs.wait_for_ready_timeout(TIMEOUT).unwrap();
    assert_eq!(
        counters.last_options().as_deref(),
        Some("fsname=scratch,subtype=fusemount,default_permissions")
    );
}

// =============================================================================
// Serve phase
// =============================================================================

#[test]
fn test_serve_failure_reported_through_join() {
    let driver = TestDriver::new();
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/broken", driver)
        .mount(
            (),
            TestServer::failing(Arc::clone(&counters), ErrorKind::BrokenPipe, "device gone"),
        )
        .unwrap();

    mfs.wait_for_ready_timeout(TIMEOUT).unwrap();
    let err = mfs.join_timeout(TIMEOUT).unwrap_err();
    assert!(matches!(err, MountError::Serve(_)), "got {err:?}");
    assert!(err.is_serve_phase());
    assert_eq!(err.io_error().unwrap().kind(), ErrorKind::BrokenPipe);
    assert_eq!(err.source().unwrap().to_string(), "device gone");

    // Released exactly once
    assert_eq!(counters.closes(), 1);
    assert_eq!(mfs.state(), MountState::Terminated);
}

#[test]
fn test_unmount_while_serving_terminates_cleanly() {
    let driver = TestDriver::new();
    let counters = driver.counters();
    let unmounted = driver.unmounted();
    let mfs = MountBuilder::new("/mnt/serving", driver)
        .mount((), TestServer::until_unmount(Arc::clone(&counters), unmounted))
        .unwrap();

    mfs.wait_for_ready_timeout(TIMEOUT).unwrap();

    // Serving blocks until unmounted
    assert!(matches!(
        mfs.join_timeout(SETTLE),
        Err(MountError::TimedOut(Phase::Join))
    ));
    assert_eq!(counters.closes(), 0);

    mfs.unmount().unwrap();
    mfs.join_timeout(TIMEOUT).unwrap();

    assert_eq!(counters.unmounts(), 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(mfs.state(), MountState::Terminated);
}

#[test]
fn test_unmount_failure_leaves_serving_running() {
    let driver = TestDriver::new().failing_unmount("target is busy");
    let counters = driver.counters();
    let unmounted = driver.unmounted();
    let mfs = MountBuilder::new("/mnt/busy", driver)
        .mount((), TestServer::until_unmount(Arc::clone(&counters), unmounted.clone()))
        .unwrap();
    mfs.wait_for_ready_timeout(TIMEOUT).unwrap();

    let err = mfs.unmount().unwrap_err();
    match &err {
        MountError::Unmount {
            mountpoint,
            message,
        } => {
            assert_eq!(mountpoint, mfs.dir());
            assert!(message.contains("target is busy"));
        }
        other => panic!("expected Unmount error, got {other:?}"),
    }
    assert!(mfs.join_timeout(SETTLE).is_err());

    // Let the serving thread finish
    unmounted.open();
    mfs.join_timeout(TIMEOUT).unwrap();
}

#[test]
fn test_panicking_server_still_closes_and_reports() {
    let driver = TestDriver::new();
    let counters = driver.counters();
    let observer = RecordingObserver::new();
    let mfs = MountBuilder::new("/mnt/panic", driver)
        .observer(observer.clone())
        .mount((), TestServer::panicking(Arc::clone(&counters), "serve exploded"))
        .unwrap();

    let err = mfs.join_timeout(TIMEOUT).unwrap_err();
    assert!(matches!(err, MountError::Panicked(Phase::Join)), "got {err:?}");
    assert_eq!(counters.closes(), 1);
    assert_eq!(mfs.state(), MountState::Terminated);
    assert!(observer.names().contains(&"panicked"));
}

#[test]
fn test_close_failure_is_observed_not_stored() {
    let driver = TestDriver::new().failing_close();
    let counters = driver.counters();
    let observer = RecordingObserver::new();
    let mfs = MountBuilder::new("/mnt/close", driver)
        .observer(observer.clone())
        .mount((), TestServer::ok(Arc::clone(&counters)))
        .unwrap();

    mfs.join_timeout(TIMEOUT).unwrap();
    assert_eq!(counters.closes(), 1);
    assert!(observer.names().contains(&"close_failed"));
}

// =============================================================================
// Cancellation and repeated waits
// =============================================================================

#[tokio::test]
async fn test_cancelled_token_returns_without_outcome() {
    let gate = Gate::new();
    let driver = TestDriver::new().blocking_mount(gate);
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/never", driver)
        .mount((), TestServer::ok(counters))
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = mfs.wait_for_ready(&cancel).await.unwrap_err();
    assert!(matches!(err, MountError::Cancelled(Phase::Ready)));
    assert!(err.is_cancelled());
    assert!(mfs.ready_outcome().is_none());
    assert_eq!(mfs.state(), MountState::Mounting);
}

#[tokio::test]
async fn test_cancellation_does_not_abort_mount() {
    let gate = Gate::new();
    let driver = TestDriver::new().blocking_mount(gate.clone());
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/later", driver)
        .mount((), TestServer::ok(Arc::clone(&counters)))
        .unwrap();

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };

    let err = mfs.wait_for_ready(&cancel).await.unwrap_err();
    assert!(matches!(err, MountError::Cancelled(Phase::Ready)));
    canceller.await.unwrap();

    // The mount carries on for other waiters
    gate.open();
    mfs.wait_for_ready(&CancellationToken::new()).await.unwrap();
    mfs.join(&CancellationToken::new()).await.unwrap();
    assert_eq!(counters.mounts(), 1);
}

#[tokio::test]
async fn test_cancelled_join_on_failed_mount() {
    let driver = TestDriver::new().failing_mount(ErrorKind::NotFound, "gone");
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/gone", driver)
        .mount((), TestServer::ok(counters))
        .unwrap();

    let cancel = CancellationToken::new();
    assert!(mfs.wait_for_ready(&cancel).await.is_err());

    // join would wait forever here; cancellation is the only way out
    let joined = tokio::spawn({
        let cancel = cancel.clone();
        let mfs = Arc::new(mfs);
        async move { mfs.join(&cancel).await }
    });
    tokio::time::sleep(SETTLE).await;
    cancel.cancel();
    let err = joined.await.unwrap().unwrap_err();
    assert!(matches!(err, MountError::Cancelled(Phase::Join)));
}

#[tokio::test]
async fn test_repeated_waits_are_idempotent() {
    let driver = TestDriver::new();
    let counters = driver.counters();
    let mfs = MountBuilder::new("/mnt/repeat", driver)
        .mount(
            (),
            TestServer::failing(Arc::clone(&counters), ErrorKind::Other, "serve broke"),
        )
        .unwrap();

    let cancel = CancellationToken::new();
    for _ in 0..5 {
        mfs.wait_for_ready(&cancel).await.unwrap();
    }

    let first = mfs.join(&cancel).await.unwrap_err();
    for _ in 0..5 {
        let again = mfs.join(&cancel).await.unwrap_err();
        assert!(std::ptr::eq(
            first.io_error().unwrap(),
            again.io_error().unwrap()
        ));
        let blocking = mfs.join_timeout(TIMEOUT).unwrap_err();
        assert!(std::ptr::eq(
            first.io_error().unwrap(),
            blocking.io_error().unwrap()
        ));
    }

    // No extra side effects from waiting
    assert_eq!(counters.mounts(), 1);
    assert_eq!(counters.ready_checks(), 1);
    assert_eq!(counters.serves(), 1);
    assert_eq!(counters.closes(), 1);
}

// =============================================================================
// Observation
// =============================================================================

#[test]
fn test_observer_sees_lifecycle_in_order() {
    let driver = TestDriver::new();
    let counters = driver.counters();
    let observer = RecordingObserver::new();
    let mfs = MountBuilder::new("/mnt/observed", driver)
        .observer(observer.clone())
        .mount((), TestServer::ok(counters))
        .unwrap();

    mfs.wait_for_ready_timeout(TIMEOUT).unwrap();
    mfs.join_timeout(TIMEOUT).unwrap();

    let names = observer.names();
    assert!(names.contains(&"ready"));

    // Readiness runs on its own thread; the rest is sequential
    let sequential: Vec<_> = names.into_iter().filter(|name| *name != "ready").collect();
    assert_eq!(sequential, ["mounting", "mounted", "serving", "served"]);
}

#[test]
fn test_observer_sees_mount_failure() {
    let driver = TestDriver::new().failing_mount(ErrorKind::NotFound, "missing");
    let counters = driver.counters();
    let observer = RecordingObserver::new();
    let mfs = MountBuilder::new("/mnt/observed-fail", driver)
        .observer(observer.clone())
        .mount((), TestServer::ok(counters))
        .unwrap();

    assert!(mfs.wait_for_ready_timeout(TIMEOUT).is_err());
    assert_eq!(observer.names(), ["mounting", "mount_failed"]);
}
