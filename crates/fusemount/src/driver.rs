//! Collaborator traits for the mount lifecycle.
//!
//! The coordinator never talks to the kernel itself. A [`MountDriver`]
//! performs the OS-level mount and hands back a [`Connection`]; a
//! [`RequestServer`] drains that connection and dispatches requests to the
//! caller's filesystem value.
//!
//! All three are blocking interfaces. The coordinator runs them on its own
//! threads, so implementations are free to block in syscalls.

use std::io;
use std::path::Path;

use crate::config::MountConfig;
use crate::error::MountError;
use crate::force_unmount::force_unmount;

/// A live, open mount.
pub trait Connection: Send + Sync + 'static {
    /// Block until the kernel has acknowledged the mount.
    ///
    /// Returns the mount error carried by the readiness notification,
    /// `Ok(())` if the filesystem mounted cleanly. Called once, from a
    /// dedicated thread, concurrently with [`RequestServer::serve`].
    fn wait_ready(&self) -> io::Result<()>;

    /// Release the connection.
    ///
    /// Called exactly once after serving ends. Best effort: errors are
    /// reported to the observer and otherwise ignored.
    fn close(&self) -> io::Result<()>;
}

/// Performs OS-level mounts and unmounts.
pub trait MountDriver: Send + Sync + 'static {
    /// Connection produced by a successful mount.
    type Connection: Connection;

    /// Driver-specific mount options.
    type Options: Send + 'static;

    /// Convert a configuration into driver options.
    ///
    /// Must not touch the system; this is the only step of a mount that can
    /// fail synchronously.
    fn options(&self, config: &MountConfig) -> Result<Self::Options, MountError>;

    /// Mount a filesystem at `mountpoint`.
    fn mount(&self, mountpoint: &Path, options: &Self::Options) -> io::Result<Self::Connection>;

    /// Force-unmount whatever is mounted at `mountpoint`.
    ///
    /// Independent of any coordinator instance. The default uses the
    /// platform unmount tools.
    fn unmount(&self, mountpoint: &Path) -> anyhow::Result<()> {
        force_unmount(mountpoint)
    }
}

/// Serves requests arriving on a connection.
pub trait RequestServer<C, F>: Send + 'static {
    /// Serve `connection` with `filesystem` until the connection closes or
    /// serving fails irrecoverably.
    fn serve(self, connection: &C, filesystem: F) -> io::Result<()>;
}
