//! In-memory hypertext store for testing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{validate_extent, Anchor, AnchorId, Extent, Link, LinkId, Node, NodeId};
use super::{AnchorStore, LinkStore, NodeStore, RecordKind, StoreError};

/// Store operation, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreOp {
    /// `NodeStore::get_node`.
    GetNode,
    /// `AnchorStore::anchors_by_node`.
    AnchorsByNode,
    /// `AnchorStore::get_anchor`.
    GetAnchor,
    /// `AnchorStore::create_anchor`.
    CreateAnchor,
    /// `AnchorStore::update_extent`.
    UpdateExtent,
    /// `AnchorStore::delete_anchor`.
    DeleteAnchor,
    /// `LinkStore::links_by_anchor`.
    LinksByAnchor,
    /// `LinkStore::create_link`.
    CreateLink,
    /// `LinkStore::delete_link`.
    DeleteLink,
}

#[derive(Debug, Default)]
struct Tables {
    nodes: BTreeMap<NodeId, Node>,
    anchors: BTreeMap<AnchorId, Anchor>,
    links: BTreeMap<LinkId, Link>,
}

/// In-memory hypertext store for testing.
///
/// Uses BTreeMap for deterministic iteration order. Faults can be injected
/// per operation (optionally per record id) to simulate an unavailable
/// backend, and successful mutations are counted.
#[derive(Debug, Default)]
pub struct InMemoryHypertextStore {
    tables: RwLock<Tables>,
    /// (operation, record id) pairs that fail; `None` fails every call.
    faults: RwLock<BTreeSet<(StoreOp, Option<String>)>>,
    mutations: AtomicUsize,
}

impl InMemoryHypertextStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the store.
    pub fn add_node(&mut self, node: Node) {
        self.tables.get_mut().nodes.insert(node.node_id.clone(), node);
    }

    /// Add an anchor as-is, without checking its node exists.
    pub fn add_anchor(&mut self, anchor: Anchor) {
        self.tables.get_mut().anchors.insert(anchor.anchor_id.clone(), anchor);
    }

    /// Add a link as-is, without checking its anchors exist.
    pub fn add_link(&mut self, link: Link) {
        self.tables.get_mut().links.insert(link.link_id.clone(), link);
    }

    /// Make every call of `op` fail with `StoreError::Unavailable`.
    pub fn fail_on(&self, op: StoreOp) {
        self.faults.write().insert((op, None));
    }

    /// Make calls of `op` addressing record `id` fail.
    pub fn fail_on_id(&self, op: StoreOp, id: impl ToString) {
        self.faults.write().insert((op, Some(id.to_string())));
    }

    /// Remove all injected faults.
    pub fn heal(&self) {
        self.faults.write().clear();
    }

    /// Number of successful mutations since creation or the last reset.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Reset the mutation counter.
    pub fn reset_mutation_count(&self) {
        self.mutations.store(0, Ordering::SeqCst);
    }

    /// Get an anchor synchronously.
    pub fn anchor(&self, id: &AnchorId) -> Option<Anchor> {
        self.tables.read().anchors.get(id).cloned()
    }

    /// Get a link synchronously.
    pub fn link(&self, id: &LinkId) -> Option<Link> {
        self.tables.read().links.get(id).cloned()
    }

    /// Whether an anchor exists.
    pub fn contains_anchor(&self, id: &AnchorId) -> bool {
        self.tables.read().anchors.contains_key(id)
    }

    /// Whether a link exists.
    pub fn contains_link(&self, id: &LinkId) -> bool {
        self.tables.read().links.contains_key(id)
    }

    /// Get number of anchors.
    pub fn num_anchors(&self) -> usize {
        self.tables.read().anchors.len()
    }

    /// Get number of links.
    pub fn num_links(&self) -> usize {
        self.tables.read().links.len()
    }

    /// Get number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.tables.read().nodes.len()
    }

    fn check(&self, op: StoreOp, id: &str) -> Result<(), StoreError> {
        let faults = self.faults.read();
        if faults.contains(&(op, None)) || faults.contains(&(op, Some(id.to_string()))) {
            return Err(StoreError::Unavailable(format!("injected fault on {:?}({})", op, id)));
        }
        Ok(())
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl NodeStore for InMemoryHypertextStore {
    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError> {
        self.check(StoreOp::GetNode, id.as_str())?;
        Ok(self.tables.read().nodes.get(id).cloned())
    }
}

#[async_trait]
impl AnchorStore for InMemoryHypertextStore {
    async fn anchors_by_node(&self, node_id: &NodeId) -> Result<Vec<Anchor>, StoreError> {
        self.check(StoreOp::AnchorsByNode, node_id.as_str())?;
        Ok(self.tables.read().anchors
            .values()
            .filter(|a| &a.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn get_anchor(&self, id: &AnchorId) -> Result<Option<Anchor>, StoreError> {
        self.check(StoreOp::GetAnchor, id.as_str())?;
        Ok(self.tables.read().anchors.get(id).cloned())
    }

    async fn create_anchor(
        &self,
        node_id: &NodeId,
        extent: Option<Extent>,
    ) -> Result<Anchor, StoreError> {
        self.check(StoreOp::CreateAnchor, node_id.as_str())?;
        validate_extent(extent.as_ref())?;

        let mut tables = self.tables.write();
        if !tables.nodes.contains_key(node_id) {
            return Err(StoreError::not_found(RecordKind::Node, node_id));
        }
        let anchor = Anchor::new(AnchorId::generate(), node_id.clone(), extent);
        tables.anchors.insert(anchor.anchor_id.clone(), anchor.clone());
        drop(tables);

        self.record_mutation();
        Ok(anchor)
    }

    async fn update_extent(&self, id: &AnchorId, extent: Option<Extent>) -> Result<(), StoreError> {
        self.check(StoreOp::UpdateExtent, id.as_str())?;
        validate_extent(extent.as_ref())?;

        let mut tables = self.tables.write();
        let anchor = tables.anchors
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(RecordKind::Anchor, id))?;
        anchor.extent = extent;
        drop(tables);

        self.record_mutation();
        Ok(())
    }

    async fn delete_anchor(&self, id: &AnchorId) -> Result<(), StoreError> {
        self.check(StoreOp::DeleteAnchor, id.as_str())?;
        self.tables.write().anchors
            .remove(id)
            .ok_or_else(|| StoreError::not_found(RecordKind::Anchor, id))?;
        self.record_mutation();
        Ok(())
    }
}

#[async_trait]
impl LinkStore for InMemoryHypertextStore {
    async fn links_by_anchor(&self, anchor_id: &AnchorId) -> Result<Vec<Link>, StoreError> {
        self.check(StoreOp::LinksByAnchor, anchor_id.as_str())?;
        Ok(self.tables.read().links
            .values()
            .filter(|l| l.touches(anchor_id))
            .cloned()
            .collect())
    }

    async fn create_link(&self, anchor1: &AnchorId, anchor2: &AnchorId) -> Result<Link, StoreError> {
        self.check(StoreOp::CreateLink, anchor1.as_str())?;

        let mut tables = self.tables.write();
        let link = {
            let resolve = |id: &AnchorId| {
                tables.anchors.get(id).ok_or_else(|| {
                    StoreError::ReferenceInconsistency(format!("link endpoint {} does not exist", id))
                })
            };
            Link::new(LinkId::generate(), resolve(anchor1)?, resolve(anchor2)?)
        };
        tables.links.insert(link.link_id.clone(), link.clone());
        drop(tables);

        self.record_mutation();
        Ok(link)
    }

    async fn delete_link(&self, id: &LinkId) -> Result<(), StoreError> {
        self.check(StoreOp::DeleteLink, id.as_str())?;
        self.tables.write().links
            .remove(id)
            .ok_or_else(|| StoreError::not_found(RecordKind::Link, id))?;
        self.record_mutation();
        Ok(())
    }
}
