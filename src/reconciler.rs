//! Anchor reconciliation after content edits.
//!
//! Keeps the anchors persisted for a node consistent with the node's current
//! content and cascade-deletes whatever the edit orphaned.
//!
//! ## Algorithm
//!
//! 1. Fetch every anchor persisted for the node (failure aborts, no writes)
//! 2. For each anchor the content still references, update its extent when
//!    it changed structurally; the anchor is accounted for
//! 3. Every persisted anchor not accounted for is an orphan. Per orphan:
//!    - fetch its links
//!    - per link, delete the link, then the opposite anchor if that link
//!      was its only one
//!    - delete the orphan once none of its links remain
//!
//! Updates complete before any cascade starts. Cascades for different
//! orphans run concurrently; their failures are collected per orphan in the
//! [`ReconcileReport`] instead of aborting the call.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::content::MarkedContent;
use crate::store::{AnchorStore, LinkStore, StoreError};
use crate::types::{same_extent, Anchor, AnchorId, ExtentError, LinkId, NodeId};

/// Error type for reconciliation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    /// The node's own anchor list could not be fetched; nothing was written.
    #[error("Store unavailable while fetching anchors of {node_id}: {source}")]
    StoreUnavailable {
        /// Node being reconciled.
        node_id: NodeId,
        /// Underlying store failure.
        source: StoreError,
    },
}

/// Progress of one orphan through its cascade.
///
/// `Scanning -> CascadeLinks -> CascadeOtherAnchor -> Deleted | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanState {
    /// Fetching the orphan's links.
    Scanning,
    /// Deleting the orphan's links.
    CascadeLinks,
    /// Deciding whether a link's opposite anchor goes too.
    CascadeOtherAnchor,
    /// Orphan and its links are gone.
    Deleted,
    /// Some step failed; see the outcome's failures.
    Failed,
}

impl OrphanState {
    /// Whether the cascade has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted | Self::Failed)
    }
}

/// A store failure during an orphan cascade, with the stage it hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeFailure {
    /// Stage the failure occurred in.
    pub stage: OrphanState,
    /// Underlying store failure.
    pub error: StoreError,
}

/// Terminal result of one orphan cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct OrphanOutcome {
    /// The orphaned anchor.
    pub anchor_id: AnchorId,
    /// `Deleted` or `Failed`.
    pub state: OrphanState,
    /// Links removed by this cascade.
    pub deleted_links: Vec<LinkId>,
    /// Opposite anchors removed because they would have been left linkless.
    pub deleted_partners: Vec<AnchorId>,
    /// Every failure hit along the way.
    pub failures: Vec<CascadeFailure>,
    /// Whether this cascade removed the orphan itself, as opposed to finding
    /// it already gone.
    pub removed: bool,
}

impl OrphanOutcome {
    fn new(anchor_id: AnchorId) -> Self {
        Self {
            anchor_id,
            state: OrphanState::Scanning,
            deleted_links: Vec::new(),
            deleted_partners: Vec::new(),
            failures: Vec::new(),
            removed: false,
        }
    }

    fn fail(&mut self, stage: OrphanState, error: StoreError) {
        tracing::warn!(
            anchor_id = %self.anchor_id,
            stage = ?stage,
            error = %error,
            "Orphan cascade step failed"
        );
        self.failures.push(CascadeFailure { stage, error });
    }

    /// Number of records this cascade removed.
    pub fn mutation_count(&self) -> usize {
        self.deleted_links.len() + self.deleted_partners.len() + usize::from(self.removed)
    }
}

/// Summary of one reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    /// Node that was reconciled.
    pub node_id: NodeId,
    /// Anchors whose extent was rewritten.
    pub updated: Vec<AnchorId>,
    /// Anchors still referenced with an identical extent.
    pub unchanged: Vec<AnchorId>,
    /// Referenced ids with no stored anchor on this node.
    pub ignored: Vec<AnchorId>,
    /// Referenced anchors whose new extent failed validation; left as stored.
    pub invalid: Vec<(AnchorId, ExtentError)>,
    /// Extent updates the store rejected.
    pub failed_updates: Vec<(AnchorId, StoreError)>,
    /// One outcome per orphaned anchor.
    pub orphans: Vec<OrphanOutcome>,
}

impl ReconcileReport {
    fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            updated: Vec::new(),
            unchanged: Vec::new(),
            ignored: Vec::new(),
            invalid: Vec::new(),
            failed_updates: Vec::new(),
            orphans: Vec::new(),
        }
    }

    /// Number of store mutations that succeeded.
    pub fn mutation_count(&self) -> usize {
        self.updated.len() + self.orphans.iter().map(OrphanOutcome::mutation_count).sum::<usize>()
    }

    /// Anchors removed by this call: orphans and their partners.
    pub fn deleted_anchors(&self) -> BTreeSet<AnchorId> {
        let mut deleted = BTreeSet::new();
        for orphan in &self.orphans {
            if orphan.removed {
                deleted.insert(orphan.anchor_id.clone());
            }
            deleted.extend(orphan.deleted_partners.iter().cloned());
        }
        deleted
    }

    /// Links deleted by this call.
    pub fn deleted_links(&self) -> Vec<LinkId> {
        self.orphans
            .iter()
            .flat_map(|o| o.deleted_links.iter().cloned())
            .collect()
    }

    /// Whether every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty()
            && self.failed_updates.is_empty()
            && self.orphans.iter().all(|o| o.failures.is_empty())
    }

    /// First store failure encountered, if any.
    pub fn first_error(&self) -> Option<&StoreError> {
        self.failed_updates
            .first()
            .map(|(_, e)| e)
            .or_else(|| {
                self.orphans
                    .iter()
                    .flat_map(|o| o.failures.iter())
                    .map(|f| &f.error)
                    .next()
            })
    }
}

/// Reconciles a node's anchors against its edited content.
pub struct AnchorReconciler<S: AnchorStore + LinkStore> {
    store: Arc<S>,
}

impl<S: AnchorStore + LinkStore + 'static> AnchorReconciler<S> {
    /// Create a reconciler over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconcile `node_id`'s anchors with `content`.
    ///
    /// Returns `Err` only when the node's anchor list cannot be fetched.
    /// Every later failure is collected in the report alongside the
    /// mutations that did succeed.
    pub async fn reconcile(
        &self,
        node_id: &NodeId,
        content: &MarkedContent,
    ) -> Result<ReconcileReport, ReconcileError> {
        let anchors = self.store.anchors_by_node(node_id).await.map_err(|source| {
            ReconcileError::StoreUnavailable {
                node_id: node_id.clone(),
                source,
            }
        })?;

        let mut persisted: BTreeMap<AnchorId, Anchor> = anchors
            .into_iter()
            .map(|a| (a.anchor_id.clone(), a))
            .collect();
        let mut report = ReconcileReport::new(node_id.clone());
        let mut pending_updates = Vec::new();

        // Scan: account for every anchor the content still references
        for (anchor_id, extent) in content.resolved() {
            let Some(stored) = persisted.remove(&anchor_id) else {
                tracing::debug!(
                    node_id = %node_id,
                    anchor_id = %anchor_id,
                    "Content references an unknown anchor, ignoring"
                );
                report.ignored.push(anchor_id);
                continue;
            };

            if let Some(Err(e)) = extent.as_ref().map(|e| e.validate()) {
                tracing::warn!(
                    anchor_id = %anchor_id,
                    error = %e,
                    "Referenced anchor has an invalid extent, keeping stored extent"
                );
                report.invalid.push((anchor_id, e));
                continue;
            }

            if same_extent(stored.extent.as_ref(), extent.as_ref()) {
                report.unchanged.push(anchor_id);
            } else {
                pending_updates.push((anchor_id, extent));
            }
        }

        let update_results = join_all(pending_updates.into_iter().map(|(anchor_id, extent)| {
            let store = Arc::clone(&self.store);
            async move {
                let result = store.update_extent(&anchor_id, extent).await;
                (anchor_id, result)
            }
        }))
        .await;

        for (anchor_id, result) in update_results {
            match result {
                Ok(()) => report.updated.push(anchor_id),
                Err(e) => {
                    tracing::warn!(anchor_id = %anchor_id, error = %e, "Extent update failed");
                    report.failed_updates.push((anchor_id, e));
                }
            }
        }

        // Cascade: the orphan set is fixed before any deletion starts
        let orphans: Vec<Anchor> = persisted.into_values().collect();
        report.orphans = join_all(orphans.into_iter().map(|orphan| self.cascade_orphan(orphan))).await;

        tracing::info!(
            node_id = %node_id,
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            ignored = report.ignored.len(),
            orphans = report.orphans.len(),
            mutations = report.mutation_count(),
            clean = report.is_clean(),
            "Reconciled node anchors"
        );

        Ok(report)
    }

    /// Remove one orphan, its links, and any partner left linkless.
    ///
    /// A partner is only deleted after the link to it is gone, and the
    /// orphan itself only once all of its links are gone. A failed link
    /// deletion therefore never leaves a link pointing at a missing anchor,
    /// and a partner whose links cannot be counted keeps its link.
    async fn cascade_orphan(&self, orphan: Anchor) -> OrphanOutcome {
        let orphan_id = orphan.anchor_id;
        let mut outcome = OrphanOutcome::new(orphan_id.clone());

        let links = match self.store.links_by_anchor(&orphan_id).await {
            Ok(links) => links,
            Err(e) => {
                outcome.fail(OrphanState::Scanning, e);
                outcome.state = OrphanState::Failed;
                return outcome;
            }
        };

        outcome.state = OrphanState::CascadeLinks;
        let mut links_remaining = false;

        for link in links {
            let other = link.other_anchor(&orphan_id).clone();

            // Count the partner's links while this one still exists; without
            // the count the link stays so a retry can finish the cascade
            let partner_linkless = if other == orphan_id {
                false
            } else {
                match self.store.links_by_anchor(&other).await {
                    Ok(other_links) => other_links.len() <= 1,
                    Err(e) => {
                        links_remaining = true;
                        outcome.fail(OrphanState::CascadeOtherAnchor, e);
                        continue;
                    }
                }
            };

            match removed(self.store.delete_link(&link.link_id).await) {
                Ok(true) => outcome.deleted_links.push(link.link_id),
                Ok(false) => {}
                Err(e) => {
                    links_remaining = true;
                    outcome.fail(OrphanState::CascadeLinks, e);
                    continue;
                }
            }

            if partner_linkless {
                outcome.state = OrphanState::CascadeOtherAnchor;
                match removed(self.store.delete_anchor(&other).await) {
                    Ok(true) => {
                        tracing::debug!(
                            orphan = %orphan_id,
                            anchor_id = %other,
                            "Deleted partner anchor left without links"
                        );
                        outcome.deleted_partners.push(other);
                    }
                    Ok(false) => {}
                    Err(e) => outcome.fail(OrphanState::CascadeOtherAnchor, e),
                }
                outcome.state = OrphanState::CascadeLinks;
            }
        }

        if links_remaining {
            outcome.state = OrphanState::Failed;
            return outcome;
        }

        match removed(self.store.delete_anchor(&orphan_id).await) {
            Ok(was_present) => {
                tracing::debug!(anchor_id = %orphan_id, was_present, "Deleted orphan anchor");
                outcome.removed = was_present;
                outcome.state = if outcome.failures.is_empty() {
                    OrphanState::Deleted
                } else {
                    OrphanState::Failed
                };
            }
            Err(e) => {
                outcome.fail(OrphanState::CascadeLinks, e);
                outcome.state = OrphanState::Failed;
            }
        }

        outcome
    }
}

/// `Ok(true)` if the delete removed the record, `Ok(false)` if it was
/// already gone. A concurrent cascade may have removed it first.
fn removed(result: Result<(), StoreError>) -> Result<bool, StoreError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryHypertextStore, StoreOp};
    use crate::types::{Extent, Link, Node, NodeType};

    fn anchor(id: &str, node: &str, extent: Option<Extent>) -> Anchor {
        Anchor::new(AnchorId::new(id), NodeId::new(node), extent)
    }

    fn link(id: &str, a: &Anchor, b: &Anchor) -> Link {
        Link::new(LinkId::new(id), a, b)
    }

    /// n1 holds "The quick brown fox" with anchors on "quick" (a1) and "fox" (a2).
    /// a1 links to b1 on n2, a2 links to b2 on n2.
    fn build_store() -> Arc<InMemoryHypertextStore> {
        let mut store = InMemoryHypertextStore::new();
        store.add_node(Node::new(NodeId::new("n1"), NodeType::Text, "Fox", ""));
        store.add_node(Node::new(NodeId::new("n2"), NodeType::Text, "Other", ""));

        let a1 = anchor("anchor.a1", "n1", Some(Extent::text("quick", 4)));
        let a2 = anchor("anchor.a2", "n1", Some(Extent::text("fox", 16)));
        let b1 = anchor("anchor.b1", "n2", None);
        let b2 = anchor("anchor.b2", "n2", None);
        store.add_link(link("link.1", &a1, &b1));
        store.add_link(link("link.2", &a2, &b2));
        for a in [a1, a2, b1, b2] {
            store.add_anchor(a);
        }
        Arc::new(store)
    }

    fn content_with(marks: &[(&str, Extent)]) -> MarkedContent {
        marks.iter().fold(MarkedContent::new(), |c, (id, e)| {
            c.with_mark(AnchorId::new(*id), Some(e.clone()))
        })
    }

    #[tokio::test]
    async fn test_unchanged_content_is_noop() {
        let store = build_store();
        let reconciler = AnchorReconciler::new(Arc::clone(&store));
        let content = content_with(&[
            ("anchor.a1", Extent::text("quick", 4)),
            ("anchor.a2", Extent::text("fox", 16)),
        ]);

        let report = reconciler.reconcile(&NodeId::new("n1"), &content).await.unwrap();
        assert_eq!(report.unchanged.len(), 2);
        assert_eq!(report.mutation_count(), 0);
        assert_eq!(store.mutation_count(), 0);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_moved_anchor_is_updated_in_place() {
        let store = build_store();
        let reconciler = AnchorReconciler::new(Arc::clone(&store));
        // "A quick brown fox" shifts both spans left by two
        let content = content_with(&[
            ("anchor.a1", Extent::text("quick", 2)),
            ("anchor.a2", Extent::text("fox", 14)),
        ]);

        let report = reconciler.reconcile(&NodeId::new("n1"), &content).await.unwrap();
        assert_eq!(report.updated.len(), 2);
        assert!(report.orphans.is_empty());
        assert_eq!(
            store.anchor(&AnchorId::new("anchor.a1")).unwrap().extent,
            Some(Extent::text("quick", 2))
        );
    }

    #[tokio::test]
    async fn test_removed_anchor_cascades() {
        let store = build_store();
        let reconciler = AnchorReconciler::new(Arc::clone(&store));
        let content = content_with(&[("anchor.a2", Extent::text("fox", 16))]);

        let report = reconciler.reconcile(&NodeId::new("n1"), &content).await.unwrap();
        assert_eq!(report.orphans.len(), 1);
        let orphan = &report.orphans[0];
        assert_eq!(orphan.state, OrphanState::Deleted);
        assert_eq!(orphan.deleted_links, vec![LinkId::new("link.1")]);
        assert_eq!(orphan.deleted_partners, vec![AnchorId::new("anchor.b1")]);

        assert!(!store.contains_anchor(&AnchorId::new("anchor.a1")));
        assert!(!store.contains_anchor(&AnchorId::new("anchor.b1")));
        assert!(!store.contains_link(&LinkId::new("link.1")));
        assert!(store.contains_link(&LinkId::new("link.2")));
        assert_eq!(report.mutation_count(), 3);
    }

    #[tokio::test]
    async fn test_unknown_reference_is_ignored() {
        let store = build_store();
        let reconciler = AnchorReconciler::new(Arc::clone(&store));
        let content = content_with(&[
            ("anchor.a1", Extent::text("quick", 4)),
            ("anchor.a2", Extent::text("fox", 16)),
            ("anchor.ghost", Extent::text("x", 0)),
            // lives on n2, not n1
            ("anchor.b1", Extent::text("y", 0)),
        ]);

        let report = reconciler.reconcile(&NodeId::new("n1"), &content).await.unwrap();
        assert_eq!(report.ignored.len(), 2);
        assert_eq!(store.mutation_count(), 0);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_invalid_extent_is_not_written_nor_orphaned() {
        let store = build_store();
        let reconciler = AnchorReconciler::new(Arc::clone(&store));
        let broken = Extent::Text(crate::types::TextExtent {
            start_character: 9,
            end_character: 4,
            text: "quick".to_string(),
        });
        let content = content_with(&[
            ("anchor.a1", broken),
            ("anchor.a2", Extent::text("fox", 16)),
        ]);

        let report = reconciler.reconcile(&NodeId::new("n1"), &content).await.unwrap();
        assert_eq!(report.invalid.len(), 1);
        assert!(report.orphans.is_empty());
        assert!(!report.is_clean());
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_without_writes() {
        let store = build_store();
        store.fail_on(StoreOp::AnchorsByNode);
        let reconciler = AnchorReconciler::new(Arc::clone(&store));

        let err = reconciler
            .reconcile(&NodeId::new("n1"), &MarkedContent::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::StoreUnavailable { source: StoreError::Unavailable(_), .. }
        ));
        assert_eq!(store.mutation_count(), 0);
        assert_eq!(store.num_anchors(), 4);
    }

    #[tokio::test]
    async fn test_failed_link_delete_keeps_orphan() {
        let store = build_store();
        store.fail_on_id(StoreOp::DeleteLink, "link.1");
        let reconciler = AnchorReconciler::new(Arc::clone(&store));

        // Both anchors removed from content; only a1's cascade is blocked
        let report = reconciler
            .reconcile(&NodeId::new("n1"), &MarkedContent::new())
            .await
            .unwrap();

        let a1 = report.orphans.iter().find(|o| o.anchor_id.as_str() == "anchor.a1").unwrap();
        let a2 = report.orphans.iter().find(|o| o.anchor_id.as_str() == "anchor.a2").unwrap();
        assert_eq!(a1.state, OrphanState::Failed);
        assert_eq!(a1.failures[0].stage, OrphanState::CascadeLinks);
        assert_eq!(a2.state, OrphanState::Deleted);

        // No dangling link: a1 and b1 survive because link.1 does
        assert!(store.contains_link(&LinkId::new("link.1")));
        assert!(store.contains_anchor(&AnchorId::new("anchor.a1")));
        assert!(store.contains_anchor(&AnchorId::new("anchor.b1")));
        assert!(!store.contains_anchor(&AnchorId::new("anchor.a2")));
        assert!(matches!(report.first_error(), Some(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_scan_failure_leaves_orphan_untouched() {
        let store = build_store();
        store.fail_on_id(StoreOp::LinksByAnchor, "anchor.a1");
        let reconciler = AnchorReconciler::new(Arc::clone(&store));
        let content = content_with(&[("anchor.a2", Extent::text("fox", 16))]);

        let report = reconciler.reconcile(&NodeId::new("n1"), &content).await.unwrap();
        assert_eq!(report.orphans[0].state, OrphanState::Failed);
        assert_eq!(report.orphans[0].failures[0].stage, OrphanState::Scanning);
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_uncountable_partner_keeps_link_until_retry() {
        let store = build_store();
        store.fail_on_id(StoreOp::LinksByAnchor, "anchor.b1");
        let reconciler = AnchorReconciler::new(Arc::clone(&store));
        let content = content_with(&[("anchor.a2", Extent::text("fox", 16))]);

        let report = reconciler.reconcile(&NodeId::new("n1"), &content).await.unwrap();
        let orphan = &report.orphans[0];
        assert_eq!(orphan.state, OrphanState::Failed);
        assert_eq!(orphan.failures[0].stage, OrphanState::CascadeOtherAnchor);
        assert!(orphan.deleted_links.is_empty());

        // Nothing stranded: the orphan, its link and the partner all remain
        assert!(store.contains_link(&LinkId::new("link.1")));
        assert!(store.contains_anchor(&AnchorId::new("anchor.a1")));
        assert!(store.contains_anchor(&AnchorId::new("anchor.b1")));
        assert_eq!(store.mutation_count(), 0);

        store.heal();
        let retry = reconciler.reconcile(&NodeId::new("n1"), &content).await.unwrap();
        assert!(retry.is_clean());
        assert_eq!(retry.orphans[0].state, OrphanState::Deleted);
        assert!(!store.contains_link(&LinkId::new("link.1")));
        assert!(!store.contains_anchor(&AnchorId::new("anchor.a1")));
        assert!(!store.contains_anchor(&AnchorId::new("anchor.b1")));
        assert!(store.contains_anchor(&AnchorId::new("anchor.b2")));
    }

    #[tokio::test]
    async fn test_orphans_linked_to_each_other() {
        let mut store = InMemoryHypertextStore::new();
        store.add_node(Node::new(NodeId::new("n1"), NodeType::Text, "Self", ""));
        let a = anchor("anchor.a", "n1", Some(Extent::text("a", 0)));
        let b = anchor("anchor.b", "n1", Some(Extent::text("b", 2)));
        store.add_link(link("link.ab", &a, &b));
        store.add_anchor(a);
        store.add_anchor(b);
        let store = Arc::new(store);

        let reconciler = AnchorReconciler::new(Arc::clone(&store));
        let report = reconciler
            .reconcile(&NodeId::new("n1"), &MarkedContent::new())
            .await
            .unwrap();

        assert!(report.orphans.iter().all(|o| o.state == OrphanState::Deleted));
        assert_eq!(store.num_anchors(), 0);
        assert_eq!(store.num_links(), 0);
        // Whichever cascade ran second found its records already gone
        assert_eq!(report.mutation_count(), store.mutation_count());
        assert_eq!(report.deleted_anchors().len(), 2);
    }

    #[tokio::test]
    async fn test_self_link_deletes_orphan_once() {
        let mut store = InMemoryHypertextStore::new();
        store.add_node(Node::new(NodeId::new("n1"), NodeType::Text, "Loop", ""));
        let a = anchor("anchor.a", "n1", None);
        store.add_link(link("link.aa", &a, &a));
        store.add_anchor(a);
        let store = Arc::new(store);

        let report = AnchorReconciler::new(Arc::clone(&store))
            .reconcile(&NodeId::new("n1"), &MarkedContent::new())
            .await
            .unwrap();

        let orphan = &report.orphans[0];
        assert_eq!(orphan.state, OrphanState::Deleted);
        assert!(orphan.deleted_partners.is_empty());
        assert_eq!(store.mutation_count(), 2);
    }

    #[test]
    fn test_orphan_state_terminal() {
        assert!(OrphanState::Deleted.is_terminal());
        assert!(OrphanState::Failed.is_terminal());
        assert!(!OrphanState::CascadeLinks.is_terminal());
    }
}
