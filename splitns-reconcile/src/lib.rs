//! Host reconciliation for a split-routing network namespace
//!
//! A [`Reconciler`] drives a [`NetworkBackend`](splitns_net::NetworkBackend)
//! towards the topology described by a [`TopologyConfig`]:
//! - a named namespace with loopback up
//! - a veth pair joining it to the root namespace
//! - a source policy rule sending its traffic through the main table
//! - NAT masquerade and forward accepts
//! - a per-namespace resolver configuration

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod config;
pub mod reconciler;

pub use config::TopologyConfig;
pub use reconciler::Reconciler;
