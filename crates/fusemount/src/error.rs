//! Error types for the mount lifecycle.
//!
//! Mount-phase and serve-phase failures are stored once and handed to every
//! waiter, so [`MountError`] is `Clone` and keeps I/O sources behind an
//! `Arc`. Cancellation and timeouts are produced by the waiting call itself
//! and are never stored.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// The two outcomes a caller can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The mount is usable (or has failed to become usable).
    Ready,
    /// Serving has ended.
    Join,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Ready => f.write_str("readiness"),
            Phase::Join => f.write_str("termination"),
        }
    }
}

/// Errors reported by a [`MountedFileSystem`](crate::MountedFileSystem).
#[derive(Debug, Clone, Error)]
pub enum MountError {
    /// The mount configuration could not be turned into driver options.
    #[error("Invalid mount configuration: {0}")]
    Config(String),

    /// The background mount thread could not be started.
    #[error("Failed to spawn mount thread: {0}")]
    Spawn(#[source] Arc<io::Error>),

    /// The driver's mount call failed.
    #[error("Mount failed: {0}")]
    Mount(#[source] Arc<io::Error>),

    /// The connection was established but reported a mount error.
    #[error("Mount did not become ready: {0}")]
    NotReady(#[source] Arc<io::Error>),

    /// Serving the connection failed.
    #[error("Serve failed: {0}")]
    Serve(#[source] Arc<io::Error>),

    /// A collaborator panicked before the outcome could be published.
    #[error("Mount task panicked before {0} was reported")]
    Panicked(Phase),

    /// The caller's cancellation fired before the outcome was available.
    #[error("Cancelled while waiting for {0}")]
    Cancelled(Phase),

    /// The caller's timeout elapsed before the outcome was available.
    #[error("Timed out waiting for {0}")]
    TimedOut(Phase),

    /// Force unmount failed.
    #[error("Failed to unmount {}: {message}", .mountpoint.display())]
    Unmount {
        /// Path that was being unmounted.
        mountpoint: PathBuf,
        /// Rendered error chain from the driver.
        message: String,
    },
}

impl MountError {
    /// Wrap a driver mount failure.
    pub fn mount(err: io::Error) -> Self {
        MountError::Mount(Arc::new(err))
    }

    /// Wrap an error carried by the connection's readiness signal.
    pub fn not_ready(err: io::Error) -> Self {
        MountError::NotReady(Arc::new(err))
    }

    /// Wrap a serve failure.
    pub fn serve(err: io::Error) -> Self {
        MountError::Serve(Arc::new(err))
    }

    /// The underlying I/O error, for variants that carry one.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            MountError::Spawn(e)
            | MountError::Mount(e)
            | MountError::NotReady(e)
            | MountError::Serve(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Returns true for failures surfaced through readiness.
    pub fn is_mount_phase(&self) -> bool {
        matches!(
            self,
            MountError::Spawn(_)
                | MountError::Mount(_)
                | MountError::NotReady(_)
                | MountError::Panicked(Phase::Ready)
        )
    }

    /// Returns true for failures surfaced through join.
    pub fn is_serve_phase(&self) -> bool {
        matches!(self, MountError::Serve(_) | MountError::Panicked(Phase::Join))
    }

    /// Returns true if the waiting call gave up (cancelled or timed out).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MountError::Cancelled(_) | MountError::TimedOut(_))
    }

    /// Converts this error to a libc error code.
    pub fn to_errno(&self) -> i32 {
        match self {
            MountError::Config(_) => libc::EINVAL,
            MountError::Cancelled(_) => libc::ECANCELED,
            MountError::TimedOut(_) => libc::ETIMEDOUT,
            MountError::Unmount { .. } => libc::EBUSY,
            MountError::Panicked(_) => libc::EIO,
            MountError::Spawn(e)
            | MountError::Mount(e)
            | MountError::NotReady(e)
            | MountError::Serve(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Result type for lifecycle outcomes.
pub type MountResult<T = ()> = Result<T, MountError>;
