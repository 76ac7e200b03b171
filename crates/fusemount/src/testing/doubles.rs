//! Scripted collaborators.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{MountConfig, MountOption};
use crate::driver::{Connection, MountDriver, RequestServer};
use crate::error::MountError;
use crate::observer::{MountEvent, MountObserver};
use crate::signal::OnceSignal;

/// A latch that starts closed and opens once.
#[derive(Debug, Clone, Default)]
pub struct Gate(Arc<OnceSignal<()>>);

impl Gate {
    /// Create a closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate, releasing all current and future waiters.
    pub fn open(&self) {
        let _ = self.0.set(());
    }

    /// Check whether the gate is open.
    pub fn is_open(&self) -> bool {
        self.0.is_set()
    }

    /// Block until the gate opens.
    pub fn wait(&self) {
        self.0.wait_blocking();
    }
}

/// Invocation counts shared by a driver and everything it creates.
#[derive(Debug, Default)]
pub struct Counters {
    mounts: AtomicUsize,
    unmounts: AtomicUsize,
    ready_checks: AtomicUsize,
    serves: AtomicUsize,
    closes: AtomicUsize,
    last_options: Mutex<Option<String>>,
}

impl Counters {
    /// Calls to `MountDriver::mount`.
    pub fn mounts(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    /// Calls to `MountDriver::unmount`.
    pub fn unmounts(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }

    /// Calls to `Connection::wait_ready`.
    pub fn ready_checks(&self) -> usize {
        self.ready_checks.load(Ordering::SeqCst)
    }

    /// Calls to `RequestServer::serve`.
    pub fn serves(&self) -> usize {
        self.serves.load(Ordering::SeqCst)
    }

    /// Calls to `Connection::close`.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Option string passed to the most recent mount.
    pub fn last_options(&self) -> Option<String> {
        self.last_options.lock().clone()
    }
}

type ScriptedError = (io::ErrorKind, String);

fn scripted(error: &ScriptedError) -> io::Error {
    io::Error::new(error.0, error.1.clone())
}

/// A mount driver with scripted behaviour.
///
/// By default every mount succeeds, the connection becomes ready at once,
/// and unmount succeeds and opens [`TestDriver::unmounted`].
#[derive(Debug, Default)]
pub struct TestDriver {
    counters: Arc<Counters>,
    mount_error: Option<ScriptedError>,
    mount_gate: Option<Gate>,
    mount_panic: Option<String>,
    ready_error: Option<ScriptedError>,
    ready_gate: Option<Gate>,
    ready_panic: Option<String>,
    close_fails: bool,
    unmount_error: Option<String>,
    unmounted: Gate,
}

impl TestDriver {
    /// A driver whose mounts succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every mount with the given error.
    #[must_use]
    pub fn failing_mount(mut self, kind: io::ErrorKind, message: &str) -> Self {
        self.mount_error = Some((kind, message.to_string()));
        self
    }

    /// Hold every mount call until `gate` opens.
    #[must_use]
    pub fn blocking_mount(mut self, gate: Gate) -> Self {
        self.mount_gate = Some(gate);
        self
    }

    /// Panic inside every mount call.
    #[must_use]
    pub fn panicking_mount(mut self, message: &str) -> Self {
        self.mount_panic = Some(message.to_string());
        self
    }

    /// Have connections report a mount error through readiness.
    #[must_use]
    pub fn not_ready(mut self, kind: io::ErrorKind, message: &str) -> Self {
        self.ready_error = Some((kind, message.to_string()));
        self
    }

    /// Hold readiness until `gate` opens.
    #[must_use]
    pub fn ready_after(mut self, gate: Gate) -> Self {
        self.ready_gate = Some(gate);
        self
    }

    /// Panic inside `Connection::wait_ready`.
    #[must_use]
    pub fn panicking_ready(mut self, message: &str) -> Self {
        self.ready_panic = Some(message.to_string());
        self
    }

    /// Make `Connection::close` return an error.
    #[must_use]
    pub fn failing_close(mut self) -> Self {
        self.close_fails = true;
        self
    }

    /// Fail every unmount with `message`.
    #[must_use]
    pub fn failing_unmount(mut self, message: &str) -> Self {
        self.unmount_error = Some(message.to_string());
        self
    }

    /// Shared invocation counts.
    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Gate opened by a successful unmount.
    pub fn unmounted(&self) -> Gate {
        self.unmounted.clone()
    }
}

impl MountDriver for TestDriver {
    type Connection = TestConnection;
    type Options = Vec<MountOption>;

    fn options(&self, config: &MountConfig) -> Result<Self::Options, MountError> {
        Ok(config.mount_options())
    }

    fn mount(&self, _mountpoint: &Path, options: &Self::Options) -> io::Result<TestConnection> {
        self.counters.mounts.fetch_add(1, Ordering::SeqCst);
        *self.counters.last_options.lock() = Some(
            options
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        );

        if let Some(gate) = &self.mount_gate {
            gate.wait();
        }
        if let Some(message) = &self.mount_panic {
            panic!("{message}");
        }
        if let Some(error) = &self.mount_error {
            return Err(scripted(error));
        }

        Ok(TestConnection {
            counters: Arc::clone(&self.counters),
            ready_error: self.ready_error.clone(),
            ready_gate: self.ready_gate.clone(),
            ready_panic: self.ready_panic.clone(),
            close_fails: self.close_fails,
        })
    }

    fn unmount(&self, _mountpoint: &Path) -> anyhow::Result<()> {
        self.counters.unmounts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.unmount_error {
            anyhow::bail!("{message}");
        }
        self.unmounted.open();
        Ok(())
    }
}

/// Connection handed out by [`TestDriver`].
#[derive(Debug)]
pub struct TestConnection {
    counters: Arc<Counters>,
    ready_error: Option<ScriptedError>,
    ready_gate: Option<Gate>,
    ready_panic: Option<String>,
    close_fails: bool,
}

impl Connection for TestConnection {
    fn wait_ready(&self) -> io::Result<()> {
        self.counters.ready_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.ready_gate {
            gate.wait();
        }
        if let Some(message) = &self.ready_panic {
            panic!("{message}");
        }
        match &self.ready_error {
            Some(error) => Err(scripted(error)),
            None => Ok(()),
        }
    }

    fn close(&self) -> io::Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        if self.close_fails {
            return Err(io::Error::other("device busy"));
        }
        Ok(())
    }
}

/// What a [`TestServer`] does when asked to serve.
#[derive(Debug, Clone)]
pub enum ServeBehavior {
    /// Return `Ok(())` immediately.
    Return,
    /// Return the given error immediately.
    Fail(io::ErrorKind, String),
    /// Panic with the given message.
    Panic(String),
    /// Block until the gate opens, then return `Ok(())`.
    UntilUnmount(Gate),
}

/// A request server with scripted behaviour.
#[derive(Debug, Clone)]
pub struct TestServer {
    counters: Arc<Counters>,
    behavior: ServeBehavior,
}

impl TestServer {
    /// A server with the given behaviour.
    pub fn new(counters: Arc<Counters>, behavior: ServeBehavior) -> Self {
        Self { counters, behavior }
    }

    /// Serve returns success at once.
    pub fn ok(counters: Arc<Counters>) -> Self {
        Self::new(counters, ServeBehavior::Return)
    }

    /// Serve fails at once.
    pub fn failing(counters: Arc<Counters>, kind: io::ErrorKind, message: &str) -> Self {
        Self::new(counters, ServeBehavior::Fail(kind, message.to_string()))
    }

    /// Serve panics.
    pub fn panicking(counters: Arc<Counters>, message: &str) -> Self {
        Self::new(counters, ServeBehavior::Panic(message.to_string()))
    }

    /// Serve blocks until `unmounted` opens (see [`TestDriver::unmounted`]).
    pub fn until_unmount(counters: Arc<Counters>, unmounted: Gate) -> Self {
        Self::new(counters, ServeBehavior::UntilUnmount(unmounted))
    }
}

impl<F: Send + 'static> RequestServer<TestConnection, F> for TestServer {
    fn serve(self, _connection: &TestConnection, _filesystem: F) -> io::Result<()> {
        self.counters.serves.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ServeBehavior::Return => Ok(()),
            ServeBehavior::Fail(kind, message) => Err(io::Error::new(kind, message)),
            ServeBehavior::Panic(message) => panic!("{message}"),
            ServeBehavior::UntilUnmount(gate) => {
                gate.wait();
                Ok(())
            }
        }
    }
}

/// Observer that keeps every event it sees.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<MountEvent>>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of recorded events, in order.
    pub fn events(&self) -> Vec<MountEvent> {
        self.events.lock().clone()
    }

    /// Names of recorded events, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(MountEvent::name).collect()
    }
}

impl MountObserver for RecordingObserver {
    fn on_event(&self, _mountpoint: &Path, event: &MountEvent) {
        self.events.lock().push(event.clone());
    }
}
