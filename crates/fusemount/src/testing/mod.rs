//! Test doubles for code built on the mount lifecycle.
//!
//! Provides in-process stand-ins for the collaborators, so lifecycle
//! behaviour can be tested without FUSE installed:
//!
//! - **Drivers**: [`TestDriver`], scripted mount/readiness/unmount behaviour
//! - **Servers**: [`TestServer`], returns, fails, panics, or blocks until
//!   the driver is asked to unmount
//! - **Observers**: [`RecordingObserver`], keeps every lifecycle event
//! - **Gates**: [`Gate`], a manual latch for holding a double mid-call
//!
//! # Usage
//!
//! ```ignore
//! use fusemount::testing::{TestDriver, TestServer};
//!
//! let driver = TestDriver::new();
//! let counters = driver.counters();
//! let server = TestServer::until_unmount(counters.clone(), driver.unmounted());
//! let mfs = MountBuilder::new("/mnt/test", driver).mount((), server)?;
//! mfs.wait_for_ready_timeout(Duration::from_secs(1))?;
//! mfs.unmount()?;
//! mfs.join_timeout(Duration::from_secs(1))?;
//! ```

mod doubles;

pub use doubles::{
    Counters, Gate, RecordingObserver, ServeBehavior, TestConnection, TestDriver, TestServer,
};
