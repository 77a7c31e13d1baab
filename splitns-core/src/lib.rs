//! splitns Core - Foundation types, reports, and errors
//!
//! This crate provides the core abstractions shared by the backend, the
//! reconciler and the CLI.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod events;
pub mod step;
pub mod types;

pub use error::{Error, Result};
pub use events::{StatusReport, StepReport};
pub use step::{Outcome, Step};
pub use types::{InterfaceName, NamespaceName};
