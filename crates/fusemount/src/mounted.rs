//! The mount lifecycle coordinator.
//!
//! [`MountedFileSystem`] is returned as soon as a mount is requested. The
//! mount itself runs on a background thread:
//!
//! ```text
//! Mounting ──driver.mount() fails──► MountFailed
//!    │
//!    ▼
//! Mounted ──► readiness thread: connection.wait_ready() ──► ready
//!    │
//!    ▼
//! Serving: server.serve(connection) ──► close connection ──► Terminated ──► joined
//! ```
//!
//! Readiness and termination are each published exactly once through a
//! [`OnceSignal`], so any number of callers can wait for them concurrently
//! and repeatedly.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::MountConfig;
use crate::driver::{Connection, MountDriver, RequestServer};
use crate::error::{MountError, MountResult, Phase};
use crate::observer::{MountEvent, MountObserver, TracingObserver};
use crate::signal::OnceSignal;

/// Where a mount is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MountState {
    /// The driver's mount call is running.
    Mounting = 0,
    /// A connection exists; serving has not started yet.
    Mounted = 1,
    /// The request server is running.
    Serving = 2,
    /// Mounting failed. Terminal.
    MountFailed = 3,
    /// Serving ended and the connection was released. Terminal.
    Terminated = 4,
}

impl MountState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => MountState::Mounting,
            1 => MountState::Mounted,
            2 => MountState::Serving,
            3 => MountState::MountFailed,
            4 => MountState::Terminated,
            _ => unreachable!("invalid mount state {value}"),
        }
    }

    /// Returns true if no further transitions will happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, MountState::MountFailed | MountState::Terminated)
    }
}

/// State shared between the handle and the background threads.
struct Shared {
    mountpoint: PathBuf,
    ready: OnceSignal<MountResult>,
    joined: OnceSignal<MountResult>,
    state: AtomicU8,
    observer: Arc<dyn MountObserver>,
}

impl Shared {
    fn emit(&self, event: &MountEvent) {
        self.observer.on_event(&self.mountpoint, event);
    }

    fn set_state(&self, state: MountState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn signal(&self, phase: Phase) -> &OnceSignal<MountResult> {
        match phase {
            Phase::Ready => &self.ready,
            Phase::Join => &self.joined,
        }
    }
}

/// Publishes an outcome exactly once, falling back to
/// [`MountError::Panicked`] if dropped while still armed.
struct PublishGuard<'a> {
    shared: &'a Shared,
    phase: Phase,
    armed: bool,
    /// State to enter when publishing a panic.
    on_panic: Option<MountState>,
    /// Second phase that receives the same outcome.
    mirror: Option<Phase>,
}

impl<'a> PublishGuard<'a> {
    fn armed(shared: &'a Shared, phase: Phase) -> Self {
        Self {
            shared,
            phase,
            armed: true,
            on_panic: None,
            mirror: None,
        }
    }

    fn disarmed(shared: &'a Shared, phase: Phase) -> Self {
        Self {
            shared,
            phase,
            armed: false,
            on_panic: None,
            mirror: None,
        }
    }

    fn terminal_on_panic(mut self, state: MountState) -> Self {
        self.on_panic = Some(state);
        self
    }

    fn mirror_to(mut self, phase: Option<Phase>) -> Self {
        self.mirror = phase;
        self
    }

    fn arm(&mut self) {
        self.armed = true;
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    fn publish(mut self, outcome: MountResult) {
        self.armed = false;
        self.set(outcome);
    }

    fn set(&self, outcome: MountResult) {
        // Single writer per phase; a rejected set can only follow a panic
        if let Some(mirror) = self.mirror {
            let _ = self.shared.signal(mirror).set(outcome.clone());
        }
        let _ = self.shared.signal(self.phase).set(outcome);
    }
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let err = MountError::Panicked(self.phase);
            if let Some(state) = self.on_panic {
                self.shared.set_state(state);
            }
            // Waiters are released before the observer runs, which may panic
            self.set(Err(err.clone()));
            self.shared.emit(&MountEvent::Panicked(err));
        }
    }
}

/// Closes the connection exactly once, on every exit path.
struct CloseOnDrop<'a, C: Connection> {
    shared: &'a Shared,
    connection: &'a C,
}

impl<C: Connection> Drop for CloseOnDrop<'_, C> {
    fn drop(&mut self) {
        if let Err(e) = self.connection.close() {
            self.shared.emit(&MountEvent::CloseFailed(Arc::new(e)));
        }
    }
}

/// A filesystem being mounted and served in the background.
///
/// Created by [`mount`](crate::mount) or [`MountBuilder`]. Cheap to share
/// behind an `Arc`; every method may be called from any thread at any time.
pub struct MountedFileSystem<D: MountDriver> {
    shared: Arc<Shared>,
    driver: Arc<D>,
}

impl<D: MountDriver> MountedFileSystem<D> {
    /// The directory the filesystem is mounted on (or was meant to be).
    pub fn dir(&self) -> &Path {
        &self.shared.mountpoint
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MountState {
        MountState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Wait until the mount is usable or has failed.
    ///
    /// After `Ok(())` the filesystem's contents are visible under
    /// [`dir`](Self::dir). May be called any number of times; every call
    /// sees the same outcome. An already-cancelled token returns
    /// [`MountError::Cancelled`] without looking at the outcome.
    pub async fn wait_for_ready(&self, cancel: &CancellationToken) -> MountResult {
        wait_cancellable(&self.shared.ready, cancel, Phase::Ready).await
    }

    /// Wait until serving has ended.
    ///
    /// Must not be called unless [`wait_for_ready`](Self::wait_for_ready)
    /// returned `Ok(())`: a failed mount never reports termination (unless
    /// [`MountConfig::join_on_mount_failure`] is set), so this would wait
    /// until `cancel` fires.
    pub async fn join(&self, cancel: &CancellationToken) -> MountResult {
        wait_cancellable(&self.shared.joined, cancel, Phase::Join).await
    }

    /// Blocking [`wait_for_ready`](Self::wait_for_ready) with a timeout.
    pub fn wait_for_ready_timeout(&self, timeout: Duration) -> MountResult {
        wait_timeout(&self.shared.ready, timeout, Phase::Ready)
    }

    /// Blocking [`join`](Self::join) with a timeout.
    pub fn join_timeout(&self, timeout: Duration) -> MountResult {
        wait_timeout(&self.shared.joined, timeout, Phase::Join)
    }

    /// The readiness outcome, if already known.
    pub fn ready_outcome(&self) -> Option<MountResult> {
        self.shared.ready.get().cloned()
    }

    /// The termination outcome, if already known.
    pub fn join_outcome(&self) -> Option<MountResult> {
        self.shared.joined.get().cloned()
    }

    /// Ask the driver to force-unmount this mountpoint.
    ///
    /// Does not wait: a successful unmount makes the request server return,
    /// which is then reported through [`join`](Self::join). Call
    /// [`wait_for_ready`](Self::wait_for_ready) first to avoid racing the
    /// mount itself.
    pub fn unmount(&self) -> MountResult {
        self.shared.emit(&MountEvent::UnmountRequested);
        self.driver
            .unmount(&self.shared.mountpoint)
            .map_err(|e| MountError::Unmount {
                mountpoint: self.shared.mountpoint.clone(),
                message: format!("{e:#}"),
            })
    }
}

impl<D: MountDriver> fmt::Debug for MountedFileSystem<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountedFileSystem")
            .field("mountpoint", &self.shared.mountpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn wait_cancellable(
    signal: &OnceSignal<MountResult>,
    cancel: &CancellationToken,
    phase: Phase,
) -> MountResult {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(MountError::Cancelled(phase)),
        outcome = signal.wait() => outcome.clone(),
    }
}

fn wait_timeout(signal: &OnceSignal<MountResult>, timeout: Duration, phase: Phase) -> MountResult {
    match signal.wait_timeout(timeout) {
        Some(outcome) => outcome.clone(),
        None => Err(MountError::TimedOut(phase)),
    }
}

/// Configures and starts a mount.
///
/// ```ignore
/// let mfs = MountBuilder::new("/mnt/scratch", driver)
///     .config(MountConfig::default().fs_name("scratch"))
///     .observer(Arc::new(NoopObserver))
///     .mount(filesystem, server)?;
/// mfs.wait_for_ready(&CancellationToken::new()).await?;
/// ```
pub struct MountBuilder<D> {
    mountpoint: PathBuf,
    driver: D,
    config: MountConfig,
    observer: Arc<dyn MountObserver>,
}

impl<D: MountDriver> MountBuilder<D> {
    /// Start configuring a mount of `driver` at `mountpoint`.
    pub fn new(mountpoint: impl Into<PathBuf>, driver: D) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            driver,
            config: MountConfig::default(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Sets the mount configuration.
    #[must_use]
    pub fn config(mut self, config: MountConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the lifecycle observer (defaults to [`TracingObserver`]).
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn MountObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Start mounting in the background and return immediately.
    ///
    /// Fails synchronously only if the configuration is invalid or the
    /// background thread cannot be spawned. Everything else is reported
    /// through [`MountedFileSystem::wait_for_ready`].
    pub fn mount<F, S>(self, filesystem: F, server: S) -> MountResult<MountedFileSystem<D>>
    where
        F: Send + 'static,
        S: RequestServer<D::Connection, F>,
    {
        self.config.validate()?;
        let options = self.driver.options(&self.config)?;
        let join_on_mount_failure = self.config.join_on_mount_failure;

        let shared = Arc::new(Shared {
            mountpoint: self.mountpoint,
            ready: OnceSignal::new(),
            joined: OnceSignal::new(),
            state: AtomicU8::new(MountState::Mounting as u8),
            observer: self.observer,
        });
        let driver = Arc::new(self.driver);

        let task = MountTask {
            shared: Arc::clone(&shared),
            driver: Arc::clone(&driver),
            options,
            join_on_mount_failure,
        };
        std::thread::Builder::new()
            .name("fusemount-serve".to_string())
            .spawn(move || task.run(filesystem, server))
            .map_err(|e| MountError::Spawn(Arc::new(e)))?;

        Ok(MountedFileSystem { shared, driver })
    }
}

/// The background half of a mount.
struct MountTask<D: MountDriver> {
    shared: Arc<Shared>,
    driver: Arc<D>,
    options: D::Options,
    join_on_mount_failure: bool,
}

impl<D: MountDriver> MountTask<D> {
    fn run<F, S>(self, filesystem: F, server: S)
    where
        F: Send + 'static,
        S: RequestServer<D::Connection, F>,
    {
        let shared = &*self.shared;

        // Guards drop in reverse order: on unwind the connection is closed
        // before termination is published. With join_on_mount_failure every
        // mount-phase outcome written to ready is also written to joined.
        let ready = PublishGuard::armed(shared, Phase::Ready)
            .terminal_on_panic(MountState::MountFailed)
            .mirror_to(self.join_on_mount_failure.then_some(Phase::Join));
        let mut joined = PublishGuard::disarmed(shared, Phase::Join)
            .terminal_on_panic(MountState::Terminated);

        shared.emit(&MountEvent::Mounting);
        let connection = match self.driver.mount(&shared.mountpoint, &self.options) {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                let err = MountError::mount(e);
                shared.emit(&MountEvent::MountFailed(err.clone()));
                shared.set_state(MountState::MountFailed);
                ready.publish(Err(err));
                return;
            }
        };

        let close = CloseOnDrop {
            shared,
            connection: &*connection,
        };
        shared.set_state(MountState::Mounted);
        shared.emit(&MountEvent::Mounted);

        // Readiness is reported independently of serving
        let spawned = {
            let shared = Arc::clone(&self.shared);
            let connection = Arc::clone(&connection);
            std::thread::Builder::new()
                .name("fusemount-ready".to_string())
                .spawn(move || report_ready(&shared, &*connection))
        };
        match spawned {
            Ok(_) => ready.disarm(),
            Err(e) => {
                drop(close);
                shared.set_state(MountState::MountFailed);
                ready.publish(Err(MountError::Spawn(Arc::new(e))));
                return;
            }
        }

        shared.set_state(MountState::Serving);
        shared.emit(&MountEvent::Serving);
        joined.arm();
        let result = server.serve(&*connection, filesystem);
        drop(close);

        let outcome = match result {
            Ok(()) => {
                shared.emit(&MountEvent::Served);
                Ok(())
            }
            Err(e) => {
                let err = MountError::serve(e);
                shared.emit(&MountEvent::ServeFailed(err.clone()));
                Err(err)
            }
        };
        shared.set_state(MountState::Terminated);
        joined.publish(outcome);
    }
}

fn report_ready<C: Connection>(shared: &Shared, connection: &C) {
    let guard = PublishGuard::armed(shared, Phase::Ready);
    match connection.wait_ready() {
        Ok(()) => {
            shared.emit(&MountEvent::Ready);
            guard.publish(Ok(()));
        }
        Err(e) => {
            let err = MountError::not_ready(e);
            shared.emit(&MountEvent::NotReady(err.clone()));
            guard.publish(Err(err));
        }
    }
}
