//! bgp-neighbor-sync: keeps A10 BGP neighbors in sync with Kubernetes nodes
//!
//! The device's neighbor list for a given remote AS is reconciled against the
//! external IPs of nodes that are Ready, schedulable and carry a configured
//! label, once at startup and then continuously from node events.

pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod telemetry;

pub use crate::error::{Error, Result};
