//! Host network state behind a pluggable backend
//!
//! This crate provides a trait-based abstraction over the kernel namespace,
//! link, routing and packet filter primitives the reconciler drives,
//! including production and mock implementations.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backend;
pub mod command;
pub mod dns;
pub mod parse;
pub mod rule;
pub mod system;

pub use backend::{MockBackend, NetworkBackend};
pub use command::{CommandOutput, CommandRunner, FailureKind};
pub use rule::{FirewallRule, PolicyRule};
pub use system::SystemBackend;

// Re-export commonly used types
pub use splitns_core::{InterfaceName, NamespaceName, Outcome};
