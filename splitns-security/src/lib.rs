//! Privilege checks
//!
//! Every subcommand needs to create namespaces, links and packet filter
//! rules, so the effective user must be root. The check runs before any
//! query or mutation.

#![warn(missing_docs, clippy::all, clippy::pedantic)]

use nix::unistd::{Uid, geteuid};
use splitns_core::{Error, Result};

/// Effective identity of the running process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Privileges {
    euid: Uid,
}

impl Privileges {
    /// Capture the current effective user
    #[must_use]
    pub fn current() -> Self {
        Self { euid: geteuid() }
    }

    /// Privileges for an explicit effective uid
    #[must_use]
    pub fn from_uid(uid: u32) -> Self {
        Self {
            euid: Uid::from_raw(uid),
        }
    }

    /// Effective uid
    #[must_use]
    pub fn euid(&self) -> u32 {
        self.euid.as_raw()
    }

    /// Whether the effective user is root
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.euid.is_root()
    }

    /// Fail with [`Error::PermissionDenied`] unless running as root
    ///
    /// # Errors
    /// Returns error if the effective uid is not 0
    pub fn require_root(&self, operation: &str) -> Result<()> {
        if self.is_root() {
            return Ok(());
        }

        tracing::debug!(euid = self.euid(), operation, "Refusing to run unprivileged");
        Err(Error::PermissionDenied {
            operation: operation.to_string(),
        })
    }
}

impl Default for Privileges {
    fn default() -> Self {
        Self::current()
    }
}

/// Shorthand for `Privileges::current().require_root(operation)`
///
/// # Errors
/// Returns error if the effective uid is not 0
pub fn require_root(operation: &str) -> Result<()> {
    Privileges::current().require_root(operation)
}
