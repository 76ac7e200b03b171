//! Background mount lifecycle for user-space filesystems.
//!
//! Mounting a FUSE filesystem has two outcomes that arrive at different
//! times: the mount becomes usable (or fails to), and later serving ends.
//! This crate runs the mount on a background thread and lets any number of
//! callers wait for either outcome without blocking the mount itself.
//!
//! # Components
//!
//! ## Lifecycle
//!
//! - [`mount`] / [`MountBuilder`] - Start a mount in the background
//! - [`MountedFileSystem`] - Wait for readiness, join, unmount
//! - [`MountState`] - Observable lifecycle state
//!
//! ## Collaborators
//!
//! - [`MountDriver`] - Performs the OS mount, yields a [`Connection`]
//! - [`RequestServer`] - Serves a connection with the caller's filesystem
//! - [`MountConfig`] - Driver-neutral options, converted by the driver
//!
//! ## Primitives
//!
//! - [`OnceSignal`] - Write-once value with broadcast wake-up
//! - [`MountObserver`] - Injected sink for lifecycle events
//! - [`force_unmount`] / [`lazy_unmount`] - Platform unmount tools
//!
//! # Outcomes
//!
//! [`MountedFileSystem::wait_for_ready`] reports mount-phase failures: the
//! driver's mount call failing, or the connection reporting an error when it
//! becomes ready. [`MountedFileSystem::join`] reports serve-phase failures.
//! Each outcome is produced exactly once and every waiter sees the same
//! value. A failed mount never reports termination unless
//! [`MountConfig::join_on_mount_failure`] is set, so only call `join` after
//! `wait_for_ready` succeeded.
//!
//! # Example
//!
//! ```ignore
//! use fusemount::{mount, MountConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let mfs = mount("/mnt/scratch", my_fs, driver, server, &MountConfig::default())?;
//! let cancel = CancellationToken::new();
//! mfs.wait_for_ready(&cancel).await?;
//!
//! // ... use the filesystem ...
//!
//! mfs.unmount()?;
//! mfs.join(&cancel).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod driver;
mod error;
mod force_unmount;
mod mounted;
mod observer;
mod signal;

pub use config::{MountConfig, MountOption};
pub use driver::{Connection, MountDriver, RequestServer};
pub use error::{MountError, MountResult, Phase};
pub use force_unmount::{force_unmount, lazy_unmount, UNMOUNT_COMMAND_TIMEOUT};
pub use mounted::{MountBuilder, MountState, MountedFileSystem};
pub use observer::{MountEvent, MountObserver, NoopObserver, TracingObserver};
pub use signal::OnceSignal;

use std::path::PathBuf;

/// Start mounting `filesystem` at `mountpoint` in the background.
///
/// Returns immediately. Call [`MountedFileSystem::wait_for_ready`] to find
/// out whether the mount succeeded. Lifecycle events are logged through
/// `tracing`; use [`MountBuilder`] to inject a different observer.
pub fn mount<D, F, S>(
    mountpoint: impl Into<PathBuf>,
    filesystem: F,
    driver: D,
    server: S,
    config: &MountConfig,
) -> MountResult<MountedFileSystem<D>>
where
    D: MountDriver,
    F: Send + 'static,
    S: RequestServer<D::Connection, F>,
{
    MountBuilder::new(mountpoint, driver)
        .config(config.clone())
        .mount(filesystem, server)
}

/// Test doubles for lifecycle tests.
///
/// Provides scripted drivers, servers and observers so code built on
/// [`MountedFileSystem`] can be tested without FUSE installed.
pub mod testing;
