//! Lifecycle observation.
//!
//! Every coordinator reports its progress to an injected [`MountObserver`].
//! The default, [`TracingObserver`], turns events into `tracing` records with
//! the mountpoint as a structured field.

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::error::MountError;

/// A step in a mount's lifecycle.
#[derive(Debug, Clone)]
pub enum MountEvent {
    /// The driver's mount call is about to run.
    Mounting,
    /// The driver's mount call failed.
    MountFailed(MountError),
    /// The driver returned a connection.
    Mounted,
    /// The connection reported a clean mount.
    Ready,
    /// The connection reported a mount error.
    NotReady(MountError),
    /// The request server is about to run.
    Serving,
    /// The request server returned without error.
    Served,
    /// The request server returned an error.
    ServeFailed(MountError),
    /// Closing the connection failed.
    CloseFailed(Arc<io::Error>),
    /// A collaborator panicked before an outcome was published.
    Panicked(MountError),
    /// `unmount()` was called.
    UnmountRequested,
}

impl MountEvent {
    /// Short, stable name for this kind of event.
    pub fn name(&self) -> &'static str {
        match self {
            MountEvent::Mounting => "mounting",
            MountEvent::MountFailed(_) => "mount_failed",
            MountEvent::Mounted => "mounted",
            MountEvent::Ready => "ready",
            MountEvent::NotReady(_) => "not_ready",
            MountEvent::Serving => "serving",
            MountEvent::Served => "served",
            MountEvent::ServeFailed(_) => "serve_failed",
            MountEvent::CloseFailed(_) => "close_failed",
            MountEvent::Panicked(_) => "panicked",
            MountEvent::UnmountRequested => "unmount_requested",
        }
    }
}

/// Sink for lifecycle events.
pub trait MountObserver: Send + Sync {
    /// Called synchronously from the thread that made progress.
    fn on_event(&self, mountpoint: &Path, event: &MountEvent);
}

/// Logs lifecycle events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl MountObserver for TracingObserver {
    fn on_event(&self, mountpoint: &Path, event: &MountEvent) {
        let mountpoint = mountpoint.display();
        match event {
            MountEvent::Mounting => {
                tracing::info!(mountpoint = %mountpoint, "Opening FUSE connection");
            }
            MountEvent::MountFailed(e) => {
                tracing::error!(mountpoint = %mountpoint, error = %e, "FUSE mount failed");
            }
            MountEvent::Mounted => {
                tracing::debug!(mountpoint = %mountpoint, "Waiting for FUSE connection to be ready");
            }
            MountEvent::Ready => {
                tracing::info!(mountpoint = %mountpoint, "FUSE connection is ready");
            }
            MountEvent::NotReady(e) => {
                tracing::error!(mountpoint = %mountpoint, error = %e, "FUSE connection failed to become ready");
            }
            MountEvent::Serving => {
                tracing::debug!(mountpoint = %mountpoint, "Serving FUSE connection");
            }
            MountEvent::Served => {
                tracing::info!(mountpoint = %mountpoint, "FUSE connection closed");
            }
            MountEvent::ServeFailed(e) => {
                tracing::error!(mountpoint = %mountpoint, error = %e, "Serving FUSE connection failed");
            }
            MountEvent::CloseFailed(e) => {
                tracing::warn!(mountpoint = %mountpoint, error = %e, "Failed to close FUSE connection");
            }
            MountEvent::Panicked(e) => {
                tracing::error!(mountpoint = %mountpoint, error = %e, "Mount task panicked");
            }
            MountEvent::UnmountRequested => {
                tracing::info!(mountpoint = %mountpoint, "Unmounting FUSE filesystem");
            }
        }
    }
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl MountObserver for NoopObserver {
    fn on_event(&self, _mountpoint: &Path, _event: &MountEvent) {}
}
