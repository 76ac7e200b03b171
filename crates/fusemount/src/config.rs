//! Mount configuration.
//!
//! [`MountConfig`] is driver-neutral. The default configuration requests no
//! options at all; drivers turn a config into their own option type inside
//! [`MountDriver::options`](crate::MountDriver::options), usually starting
//! from [`MountConfig::mount_options`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MountError;

/// A single driver-neutral mount option.
///
/// Mirrors the options commonly passed to `fusermount -o` / `mount_macfuse -o`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MountOption {
    /// Filesystem name shown in the mount table (`fsname=`).
    FsName(String),
    /// Filesystem subtype (`subtype=`).
    Subtype(String),
    /// Mount read-only.
    ReadOnly,
    /// Allow other users to access the mount.
    AllowOther,
    /// Unmount automatically when the serving process exits.
    AutoUnmount,
    /// Let the kernel perform permission checks.
    DefaultPermissions,
    /// Any other option, passed through verbatim.
    Custom(String),
}

impl fmt::Display for MountOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountOption::FsName(name) => write!(f, "fsname={name}"),
            MountOption::Subtype(subtype) => write!(f, "subtype={subtype}"),
            MountOption::ReadOnly => f.write_str("ro"),
            MountOption::AllowOther => f.write_str("allow_other"),
            MountOption::AutoUnmount => f.write_str("auto_unmount"),
            MountOption::DefaultPermissions => f.write_str("default_permissions"),
            MountOption::Custom(option) => f.write_str(option),
        }
    }
}

/// Configuration accepted by [`mount`](crate::mount).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountConfig {
    /// Name shown in the mount table.
    pub fs_name: Option<String>,

    /// Filesystem subtype (e.g. `fuse.<subtype>` on Linux).
    pub subtype: Option<String>,

    /// Mount read-only.
    pub read_only: bool,

    /// Allow users other than the mounting user.
    pub allow_other: bool,

    /// Ask the kernel to unmount when the serving process dies.
    pub auto_unmount: bool,

    /// Delegate permission checks to the kernel.
    pub default_permissions: bool,

    /// Extra options passed to the driver verbatim.
    pub custom_options: Vec<String>,

    /// Also report a mount failure through `join()`.
    ///
    /// Off by default: when mounting fails only readiness is reported, and
    /// `join()` must not be called unless `wait_for_ready()` succeeded.
    pub join_on_mount_failure: bool,
}

impl MountConfig {
    /// Sets the filesystem name.
    #[must_use]
    pub fn fs_name(mut self, name: impl Into<String>) -> Self {
        self.fs_name = Some(name.into());
        self
    }

    /// Sets the filesystem subtype.
    #[must_use]
    pub fn subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets whether other users may access the mount.
    #[must_use]
    pub fn allow_other(mut self, allow_other: bool) -> Self {
        self.allow_other = allow_other;
        self
    }

    /// Sets automatic unmount on process exit.
    #[must_use]
    pub fn auto_unmount(mut self, auto_unmount: bool) -> Self {
        self.auto_unmount = auto_unmount;
        self
    }

    /// Sets kernel-side permission checking.
    #[must_use]
    pub fn default_permissions(mut self, default_permissions: bool) -> Self {
        self.default_permissions = default_permissions;
        self
    }

    /// Appends a verbatim option.
    #[must_use]
    pub fn custom_option(mut self, option: impl Into<String>) -> Self {
        self.custom_options.push(option.into());
        self
    }

    /// Sets whether a mount failure is also reported through `join()`.
    #[must_use]
    pub fn join_on_mount_failure(mut self, enabled: bool) -> Self {
        self.join_on_mount_failure = enabled;
        self
    }

    /// Check that every option can be passed through a comma-separated
    /// option string.
    pub fn validate(&self) -> Result<(), MountError> {
        if let Some(name) = &self.fs_name {
            check_value("fs_name", name)?;
        }
        if let Some(subtype) = &self.subtype {
            check_value("subtype", subtype)?;
        }
        for option in &self.custom_options {
            check_value("custom option", option)?;
        }
        Ok(())
    }

    /// Driver-neutral option list, in a stable order.
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = Vec::new();
        if let Some(name) = &self.fs_name {
            options.push(MountOption::FsName(name.clone()));
        }
        if let Some(subtype) = &self.subtype {
            options.push(MountOption::Subtype(subtype.clone()));
        }
        if self.read_only {
            options.push(MountOption::ReadOnly);
        }
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        if self.default_permissions {
            options.push(MountOption::DefaultPermissions);
        }
        options.extend(self.custom_options.iter().cloned().map(MountOption::Custom));
        options
    }

    /// Options rendered as a single `-o` argument.
    pub fn option_string(&self) -> String {
        self.mount_options()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn check_value(what: &str, value: &str) -> Result<(), MountError> {
    if value.is_empty() {
        return Err(MountError::Config(format!("{what} must not be empty")));
    }
    if value.contains([',', '\0']) {
        return Err(MountError::Config(format!(
            "{what} {value:?} must not contain ',' or NUL"
        )));
    }
    Ok(())
}
