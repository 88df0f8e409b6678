//! Reconciliation of device neighbors against eligible cluster nodes
//!
//! Startup runs [`Reconciler::full_reconcile`], which only prunes neighbors
//! that no eligible node backs. Missing neighbors are added later by the
//! incremental path as node events arrive. Events are handled strictly one at
//! a time, each finishing its device calls before the next is read.

use std::future::Future;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::eligibility::{self, evaluate, Eligibility};
use super::node_source::NodeEvent;
use crate::device::NeighborRegistry;
use crate::error::{Error, Result};

/// Drives the device's neighbor set toward the desired set
pub struct Reconciler<R: ?Sized> {
    registry: Arc<R>,
    label_selector: String,
}

impl<R: NeighborRegistry + ?Sized> Reconciler<R> {
    pub fn new(registry: Arc<R>, label_selector: impl Into<String>) -> Self {
        Self {
            registry,
            label_selector: label_selector.into(),
        }
    }

    /// Addresses of eligible nodes, in node order, without duplicates
    pub fn desired_neighbors(&self, nodes: &[Node]) -> Vec<String> {
        let mut desired: Vec<String> = Vec::new();
        for node in nodes {
            if let Eligibility::Eligible(address) = evaluate(node, &self.label_selector) {
                if !desired.contains(&address) {
                    desired.push(address);
                }
            }
        }
        desired
    }

    /// Remove every mirrored neighbor not backed by an eligible node
    ///
    /// Never adds. Returns the removed addresses; the first failed removal
    /// aborts the pass.
    #[instrument(skip(self, nodes), fields(nodes = nodes.len()))]
    pub async fn full_reconcile(&self, nodes: &[Node]) -> Result<Vec<String>> {
        info!("Removing extra neighbors from device");

        let desired = self.desired_neighbors(nodes);
        let current = self.registry.neighbors().await;
        debug!(?desired, ?current, "Comparing neighbor sets");

        let mut removed = Vec::new();
        for address in current {
            if desired.contains(&address) {
                continue;
            }
            info!(neighbor = %address, "Device neighbor not backed by an eligible node");
            self.registry.remove_neighbor(&address).await?;
            removed.push(address);
        }

        info!(removed = removed.len(), "Full reconciliation complete");
        Ok(removed)
    }

    /// Apply the correction implied by one node event
    pub async fn reconcile_event(&self, event: &NodeEvent) -> Result<()> {
        match event {
            NodeEvent::Added(node) => self.node_added(node).await,
            NodeEvent::Updated { old, new } => self.node_updated(old, new).await,
            NodeEvent::Deleted(node) => self.node_deleted(node).await,
            NodeEvent::Synced => {
                info!("Node cache synced, processing live events");
                Ok(())
            }
        }
    }

    #[instrument(skip_all, fields(node = %node.name_any()))]
    async fn node_added(&self, node: &Node) -> Result<()> {
        info!("Node add event");
        match evaluate(node, &self.label_selector) {
            Eligibility::Eligible(address) => {
                info!(neighbor = %address, "Node should be a neighbor");
                self.registry.add_neighbor(&address).await
            }
            Eligibility::Ineligible(reason) => {
                debug!(%reason, "Node is not eligible");
                Ok(())
            }
        }
    }

    #[instrument(skip_all, fields(node = %new.name_any()))]
    async fn node_updated(&self, old: &Node, new: &Node) -> Result<()> {
        info!("Node update event");
        match evaluate(new, &self.label_selector) {
            Eligibility::Eligible(address) => {
                if let Some(previous) = eligibility::external_address(old) {
                    if previous != address {
                        warn!(
                            neighbor = %address,
                            previous = %previous,
                            "Node external address changed, previous neighbor is left on the device until the next full reconciliation"
                        );
                    }
                }
                info!(neighbor = %address, "Node should be a neighbor");
                self.registry.add_neighbor(&address).await
            }
            Eligibility::Ineligible(reason) => {
                // Fall back to the previous address when the node dropped its ExternalIP
                let address = eligibility::external_address(new)
                    .or_else(|| eligibility::external_address(old));
                match address {
                    Some(address) => {
                        info!(%reason, neighbor = %address, "Node should not be a neighbor");
                        self.registry.remove_neighbor(address).await
                    }
                    None => {
                        warn!(%reason, "Node is not eligible and has no known external address");
                        Ok(())
                    }
                }
            }
        }
    }

    #[instrument(skip_all, fields(node = %node.name_any()))]
    async fn node_deleted(&self, node: &Node) -> Result<()> {
        info!("Node delete event");
        if !eligibility::is_labeled(node, &self.label_selector) {
            debug!("Deleted node was not labelled, skipping");
            return Ok(());
        }
        match eligibility::external_address(node) {
            Some(address) => {
                info!(neighbor = %address, "Deleted node should not be a neighbor");
                self.registry.remove_neighbor(address).await
            }
            None => {
                debug!("Deleted node had no external address");
                Ok(())
            }
        }
    }

    /// Process node events in order until shutdown or the stream ends
    ///
    /// A failed correction is logged and the loop moves on. Shutdown is only
    /// observed between events, so an in-flight device call runs to completion.
    pub async fn run<S, F>(&self, events: S, shutdown: F) -> Result<()>
    where
        S: Stream<Item = Result<NodeEvent>>,
        F: Future<Output = ()>,
    {
        info!(label_selector = %self.label_selector, "Watching node events");
        futures::pin_mut!(events);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping node event processing");
                    return Ok(());
                }
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        if let Err(e) = self.reconcile_event(&event).await {
                            error!(
                                event = event.kind(),
                                node = %event.node_name().unwrap_or_default(),
                                error = %e,
                                "Failed to reconcile node event"
                            );
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "Node watch error"),
                    None => {
                        return Err(Error::WatchError("node event stream ended".to_string()));
                    }
                },
            }
        }
    }
}
