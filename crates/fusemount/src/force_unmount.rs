//! Platform force-unmount.
//!
//! Backs the default [`MountDriver::unmount`](crate::MountDriver::unmount).
//! Each platform has an ordered list of unmount commands; the first one that
//! exits successfully wins.
//!
//! - **Linux**: `fusermount -uz`, then `umount -l`, then `umount -f`
//! - **macOS**: `diskutil unmount force`, then `umount -f`
//! - **Other**: unsupported
//!
//! Commands run on a helper thread with a timeout, since unmount tools can
//! hang on a mount whose daemon has died.
//!
//! **Callers must own the mount.** These functions unmount any path they are
//! given.

use std::path::Path;
use std::process::{Command, Output};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// How long a single unmount command may run.
pub const UNMOUNT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// An unmount command: program plus the arguments preceding the mountpoint.
type Attempt = (&'static str, &'static [&'static str]);

#[cfg(target_os = "linux")]
const FORCE_ATTEMPTS: &[Attempt] = &[
    ("fusermount", &["-uz"]),
    ("umount", &["-l"]),
    ("umount", &["-f"]),
];

#[cfg(target_os = "linux")]
const LAZY_ATTEMPTS: &[Attempt] = &[("fusermount", &["-uz"]), ("umount", &["-l"])];

// macOS has no lazy unmount; both entry points force.
#[cfg(target_os = "macos")]
const FORCE_ATTEMPTS: &[Attempt] = &[("diskutil", &["unmount", "force"]), ("umount", &["-f"])];

#[cfg(target_os = "macos")]
const LAZY_ATTEMPTS: &[Attempt] = FORCE_ATTEMPTS;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const FORCE_ATTEMPTS: &[Attempt] = &[];

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const LAZY_ATTEMPTS: &[Attempt] = &[];

/// Force unmount the filesystem at `mountpoint`.
///
/// Returns an error if every unmount command fails or times out.
pub fn force_unmount(mountpoint: &Path) -> Result<()> {
    unmount_with(mountpoint, FORCE_ATTEMPTS, "force")
}

/// Detach the mount immediately, letting open handles drain.
///
/// Falls back to a forced unmount where the platform has no lazy variant.
pub fn lazy_unmount(mountpoint: &Path) -> Result<()> {
    unmount_with(mountpoint, LAZY_ATTEMPTS, "lazy")
}

fn unmount_with(mountpoint: &Path, attempts: &[Attempt], kind: &str) -> Result<()> {
    if attempts.is_empty() {
        bail!(
            "{kind} unmount not supported on this platform for {}",
            mountpoint.display()
        );
    }

    // NOTE: no mountpoint.exists() check, stat blocks forever on a dead mount
    let mut last_failure = String::new();
    for &(program, args) in attempts {
        match run_with_timeout(program, args, mountpoint, UNMOUNT_COMMAND_TIMEOUT) {
            Ok(output) if output.status.success() => {
                tracing::debug!(
                    mountpoint = %mountpoint.display(),
                    "{kind} unmount via {program} {} succeeded",
                    args.join(" ")
                );
                return Ok(());
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::debug!(
                    mountpoint = %mountpoint.display(),
                    "{program} {} failed: {}",
                    args.join(" "),
                    stderr.trim()
                );
                last_failure = format!("{program}: {}", stderr.trim());
            }
            Err(e) => {
                tracing::debug!(mountpoint = %mountpoint.display(), "{program} unavailable: {e:#}");
                last_failure = format!("{e:#}");
            }
        }
    }

    bail!(
        "Failed to {kind} unmount {}: {last_failure}",
        mountpoint.display()
    )
}

fn run_with_timeout(
    program: &'static str,
    args: &'static [&'static str],
    mountpoint: &Path,
    timeout: Duration,
) -> Result<Output> {
    let (tx, rx) = mpsc::channel();
    let mountpoint = mountpoint.to_path_buf();

    std::thread::spawn(move || {
        let result = Command::new(program).args(args).arg(&mountpoint).output();
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result.with_context(|| format!("Failed to run {program}")),
        Err(_) => {
            tracing::warn!("{program} timed out after {timeout:?} (possible ghost mount)");
            bail!("{program} timed out after {timeout:?}")
        }
    }
}
