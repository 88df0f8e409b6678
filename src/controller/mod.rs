//! Controller module for BGP neighbor reconciliation
//! This module contains node eligibility, the cluster node event source,
//! and the reconciliation engine that drives the device's neighbor set.

pub mod eligibility;
pub mod node_source;
mod reconciler;

pub use eligibility::{evaluate, Eligibility, IneligibleReason, LabelSelector};
pub use node_source::{NodeCache, NodeEvent, NodeSource};
pub use reconciler::Reconciler;
