//! Remote device access: the A10 AXAPI client and the neighbor registry seam
//!
//! The reconciler only talks to a [`NeighborRegistry`]. [`A10Client`] is the
//! production implementation; it owns the session signature and the mirrored
//! neighbor set.

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use client::{A10Client, DeviceConfig, RetryPolicy, MAX_REQUEST_ATTEMPTS};
pub use types::Ipv4Neighbor;

/// The set of BGP neighbors believed to be configured on the device
///
/// Add and remove are no-ops for an address already present / already absent,
/// and never issue a device call in that case.
#[async_trait]
pub trait NeighborRegistry: Send + Sync {
    /// Create the neighbor on the device unless it is already mirrored
    async fn add_neighbor(&self, address: &str) -> Result<()>;

    /// Delete the neighbor from the device if it is mirrored
    async fn remove_neighbor(&self, address: &str) -> Result<()>;

    async fn contains_neighbor(&self, address: &str) -> bool;

    /// Snapshot of the mirrored set in device listing order
    async fn neighbors(&self) -> Vec<String>;
}
