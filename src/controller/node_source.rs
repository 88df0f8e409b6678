//! Kubernetes node snapshot and lifecycle events
//!
//! Wraps the kube-rs watcher in an informer-like cache so the reconciler sees
//! add/update/delete events. Updates carry the previously observed object, and
//! deletes carry the last observed one.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{Api, ListParams},
    runtime::{watcher, WatchStreamExt},
    Client, ResourceExt,
};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};

/// A node lifecycle event, in delivery order
#[derive(Clone, Debug)]
pub enum NodeEvent {
    Added(Node),
    Updated { old: Node, new: Node },
    /// Carries the node as last observed before deletion
    Deleted(Node),
    /// The initial listing has been delivered; sent once
    Synced,
}

impl NodeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeEvent::Added(_) => "add",
            NodeEvent::Updated { .. } => "update",
            NodeEvent::Deleted(_) => "delete",
            NodeEvent::Synced => "synced",
        }
    }

    pub fn node_name(&self) -> Option<String> {
        match self {
            NodeEvent::Added(node) | NodeEvent::Deleted(node) => Some(node.name_any()),
            NodeEvent::Updated { new, .. } => Some(new.name_any()),
            NodeEvent::Synced => None,
        }
    }
}

/// Last observed state of every node, keyed by name
#[derive(Default)]
pub struct NodeCache {
    nodes: HashMap<String, Node>,
    relisting: Option<HashSet<String>>,
    synced: bool,
}

impl NodeCache {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Fold one watcher event into the cache and return the lifecycle events it implies
    pub fn apply(&mut self, event: watcher::Event<Node>) -> Vec<NodeEvent> {
        match event {
            watcher::Event::Init => {
                debug!("Node listing started");
                self.relisting = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(node) => {
                if let Some(seen) = self.relisting.as_mut() {
                    seen.insert(node.name_any());
                }
                vec![self.upsert(node)]
            }
            watcher::Event::InitDone => {
                let mut events = Vec::new();
                if let Some(seen) = self.relisting.take() {
                    let mut gone: Vec<String> = self
                        .nodes
                        .keys()
                        .filter(|name| !seen.contains(*name))
                        .cloned()
                        .collect();
                    gone.sort();
                    for name in gone {
                        if let Some(node) = self.nodes.remove(&name) {
                            events.push(NodeEvent::Deleted(node));
                        }
                    }
                }
                if !self.synced {
                    self.synced = true;
                    events.push(NodeEvent::Synced);
                }
                events
            }
            watcher::Event::Apply(node) => vec![self.upsert(node)],
            watcher::Event::Delete(node) => {
                let last = self.nodes.remove(&node.name_any()).unwrap_or(node);
                vec![NodeEvent::Deleted(last)]
            }
        }
    }

    /// Re-deliver every cached node as an update, sorted by name
    pub fn resync(&self) -> Vec<NodeEvent> {
        let mut names: Vec<&String> = self.nodes.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let node = &self.nodes[name];
                NodeEvent::Updated {
                    old: node.clone(),
                    new: node.clone(),
                }
            })
            .collect()
    }

    fn upsert(&mut self, node: Node) -> NodeEvent {
        match self.nodes.insert(node.name_any(), node.clone()) {
            Some(old) => NodeEvent::Updated { old, new: node },
            None => NodeEvent::Added(node),
        }
    }
}

/// Source of node snapshots and node events from the cluster
#[derive(Clone)]
pub struct NodeSource {
    client: Client,
}

impl NodeSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// List nodes, using the selector as a server-side filter hint
    #[instrument(skip(self))]
    pub async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>> {
        info!("Getting nodes from cluster");
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(Error::KubeError)?;
        debug!(count = list.items.len(), "Listed nodes");
        Ok(list.items)
    }

    /// Watch all nodes and yield lifecycle events, resyncing on `resync_interval`
    ///
    /// Every node is watched, not only labelled ones, so that losing the label
    /// shows up as an update rather than a disappearance.
    pub fn watch(&self, resync_interval: Option<Duration>) -> BoxStream<'static, Result<NodeEvent>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let watch = watcher(nodes, watcher::Config::default())
            .default_backoff()
            .boxed();
        node_events(watch, resync_interval)
    }
}

struct EventState<S> {
    watch: S,
    cache: NodeCache,
    resync: Option<Interval>,
    pending: std::collections::VecDeque<NodeEvent>,
}

/// Turn a raw watcher stream into lifecycle events, one at a time
pub fn node_events<S, E>(
    watch: S,
    resync_interval: Option<Duration>,
) -> BoxStream<'static, Result<NodeEvent>>
where
    S: futures::Stream<Item = std::result::Result<watcher::Event<Node>, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let resync = resync_interval.filter(|d| !d.is_zero()).map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let state = EventState {
        watch,
        cache: NodeCache::default(),
        resync,
        pending: Default::default(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }

            tokio::select! {
                item = state.watch.next() => match item {
                    Some(Ok(event)) => {
                        let events = state.cache.apply(event);
                        state.pending.extend(events);
                    }
                    Some(Err(e)) => {
                        return Some((Err(Error::WatchError(e.to_string())), state));
                    }
                    None => return None,
                },
                _ = tick(&mut state.resync) => {
                    debug!(nodes = state.cache.len(), "Resyncing cached nodes");
                    let events = state.cache.resync();
                    state.pending.extend(events);
                }
            }
        }
    })
    .boxed()
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
