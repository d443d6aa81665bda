//! Reconciliation of logical cluster membership.
//!
//! Each cycle re-derives everything from the current state of the node
//! inventory and the declaration:
//! 1. **Sense**: Observe which nodes carry the group's marker
//! 2. **Compare**: Diff observed membership against the desired nodes
//! 3. **Actuate**: Tag missing nodes, strip extra ones
//!
//! Deletion is gated by a finalizer: the declaration is only released once
//! every marker it owns has been removed.
//!
//! ```text
//! ┌─────────┐      ┌─────────┐      ┌─────────┐
//! │ Sense   │─────▶│ Compare │─────▶│ Actuate │
//! └─────────┘      └─────────┘      └─────────┘
//!      ▲                                 │
//!      └─────────────────────────────────┘
//!             next trigger / retry
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let reconciler = Reconciler::new(declarations, nodes, DEFAULT_FINALIZER);
//! match reconciler.on_reconcile("gpu-pool").await {
//!     ReconcileAction::Done => {}
//!     ReconcileAction::RequeueAfter(delay) => schedule(delay),
//!     ReconcileAction::RequeueNow => schedule(Duration::ZERO),
//! }
//! ```

pub mod actuate;
pub mod compare;
pub mod finalize;
pub mod requeue;
pub mod sense;

pub use actuate::LabelMutator;
pub use compare::{diff, MembershipDiff};
pub use finalize::{FinalizationManager, Lifecycle};
pub use requeue::{BackoffStrategy, ReconcileAction, RetryPolicy};
pub use sense::{Membership, StatusCalculator};

use std::collections::BTreeSet;
use std::sync::Arc;

use label_store_interface::{DeclarationStore, NodeLabelStore};
use labeler_shared_types::{
    LabelerError, LogicalClusterDeclaration, LogicalClusterStatus, NodeId, Result,
};
use observability::cycle_span;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Result of one successful reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The declaration no longer exists.
    Absent,
    /// Observed membership already matched; nothing was mutated.
    Converged,
    /// Markers were added and/or removed.
    Mutated { added: usize, removed: usize },
    /// All markers were stripped and the finalizer released.
    TornDown { cleared: usize },
    /// Deletion already completed; nothing to do.
    Terminated,
}

/// Drives one logical cluster declaration toward its desired membership.
///
/// Holds no per-declaration state between cycles, so one instance can serve
/// every declaration concurrently.
pub struct Reconciler {
    declarations: Arc<dyn DeclarationStore>,
    calculator: StatusCalculator,
    mutator: LabelMutator,
    finalization: FinalizationManager,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(
        declarations: Arc<dyn DeclarationStore>,
        nodes: Arc<dyn NodeLabelStore>,
        finalizer: impl Into<String>,
    ) -> Self {
        Self {
            declarations,
            calculator: StatusCalculator::new(nodes.clone()),
            mutator: LabelMutator::new(nodes),
            finalization: FinalizationManager::new(finalizer),
            retry: RetryPolicy::default(),
        }
    }

    /// Use `retry` when translating failures into requeue decisions.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Trigger entry point: run one cycle and tell the host whether and when
    /// to run it again.
    pub async fn on_reconcile(&self, name: &str) -> ReconcileAction {
        match self.reconcile(name).await {
            Ok(_) => ReconcileAction::Done,
            Err(e) => {
                error!(logical_cluster = name, error = %e, "reconciliation failed");
                self.retry.action_for_error(&e, 0)
            }
        }
    }

    /// Run one full reconciliation cycle for the declaration called `name`.
    ///
    /// Absence of the declaration, before or during the cycle, ends the
    /// cycle cleanly.
    pub async fn reconcile(&self, name: &str) -> Result<CycleOutcome> {
        let correlation_id = Uuid::new_v4();
        let result = self
            .run_cycle(name)
            .instrument(cycle_span!(name, correlation_id))
            .await;

        match result {
            Err(e) if e.is_benign() => {
                debug!(logical_cluster = name, "declaration disappeared mid-cycle");
                Ok(CycleOutcome::Absent)
            }
            other => other,
        }
    }

    async fn run_cycle(&self, name: &str) -> Result<CycleOutcome> {
        let Some(mut decl) = self.declarations.get(name).await? else {
            debug!("declaration not found, nothing to converge");
            return Ok(CycleOutcome::Absent);
        };

        match self.finalization.lifecycle(&decl) {
            Lifecycle::Terminated => {
                debug!("declaration already torn down");
                return Ok(CycleOutcome::Terminated);
            }
            Lifecycle::Terminating => return self.tear_down(&mut decl).await,
            Lifecycle::Active => {}
        }

        if self.finalization.ensure_present(&mut decl) {
            self.declarations
                .update_finalizers(&decl.name, &decl.finalizers)
                .await?;
            info!(finalizer = self.finalization.finalizer(), "finalizer added");
        }

        let desired = decl.desired_set();
        let observed = self.calculator.observe(&decl.name).await?;
        self.persist_status(&mut decl, observed.status_against(&desired))
            .await?;

        let changes = diff(&desired, &observed.nodes);
        if changes.is_empty() {
            debug!(members = observed.count(), "membership converged");
            return Ok(CycleOutcome::Converged);
        }

        info!(
            to_add = changes.to_add.len(),
            to_remove = changes.to_remove.len(),
            "converging membership"
        );
        let (added, removed) = match self.converge(&changes, &decl.name).await {
            Ok(counts) => counts,
            Err(e) => {
                self.refresh_status(&mut decl, &desired).await;
                return Err(e);
            }
        };

        let observed = self.calculator.observe(&decl.name).await?;
        self.persist_status(&mut decl, observed.status_against(&desired))
            .await?;

        Ok(CycleOutcome::Mutated { added, removed })
    }

    async fn converge(&self, changes: &MembershipDiff, group: &str) -> Result<(usize, usize)> {
        let added = self.mutator.apply_marker(&changes.to_add, group).await?;
        let removed = self.mutator.clear_marker(&changes.to_remove).await?;
        Ok((added, removed))
    }

    /// Strip the marker from every current member, then release the finalizer.
    ///
    /// Status is reported against an empty desired set, so a stuck teardown
    /// shows `Progressing` with the members still carrying the marker.
    async fn tear_down(&self, decl: &mut LogicalClusterDeclaration) -> Result<CycleOutcome> {
        let none = BTreeSet::new();
        let observed = self.calculator.observe(&decl.name).await?;
        self.persist_status(decl, observed.status_against(&none))
            .await?;

        let members: Vec<_> = observed.nodes.into_iter().collect();
        info!(members = members.len(), "tearing down logical cluster");

        let cleared = match self.mutator.clear_marker(&members).await {
            Ok(cleared) => cleared,
            Err(e) => {
                self.refresh_status(decl, &none).await;
                return Err(e);
            }
        };

        // Another actor may have re-tagged a node while we were clearing.
        let remaining = self.calculator.observe(&decl.name).await?;
        self.persist_status(decl, remaining.status_against(&none))
            .await?;
        if let Some(node) = remaining.nodes.into_iter().next() {
            return Err(LabelerError::ConflictingMutation {
                node,
                reason: "marker reappeared during teardown".to_string(),
            });
        }

        if self.finalization.release(decl) {
            self.declarations
                .update_finalizers(&decl.name, &decl.finalizers)
                .await?;
            info!(cleared, "finalizer released");
        }
        Ok(CycleOutcome::TornDown { cleared })
    }

    /// Best-effort status refresh after a failed batch. The batch error is
    /// what gets reported, so failures here are only logged.
    async fn refresh_status(&self, decl: &mut LogicalClusterDeclaration, desired: &BTreeSet<NodeId>) {
        let refreshed = match self.calculator.observe(&decl.name).await {
            Ok(observed) => self.persist_status(decl, observed.status_against(desired)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = refreshed {
            warn!(error = %e, "could not refresh status after failed batch");
        }
    }

    async fn persist_status(
        &self,
        decl: &mut LogicalClusterDeclaration,
        status: LogicalClusterStatus,
    ) -> Result<()> {
        if decl.status == status {
            return Ok(());
        }
        self.declarations.update_status(&decl.name, &status).await?;
        debug!(
            expected = status.expected_count,
            observed = status.observed_count,
            phase = %status.phase,
            "status persisted"
        );
        decl.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use label_store_interface::{InMemoryDeclarationStore, InMemoryNodeStore};
    use labeler_shared_types::{ConvergencePhase, DEFAULT_FINALIZER};
    use std::time::Duration;

    async fn fixture() -> (Arc<InMemoryDeclarationStore>, Arc<InMemoryNodeStore>, Reconciler) {
        let declarations = Arc::new(InMemoryDeclarationStore::new());
        let nodes = Arc::new(InMemoryNodeStore::new());
        for n in ["n1", "n2", "n3"] {
            nodes.add_node(n).await;
        }
        let reconciler = Reconciler::new(declarations.clone(), nodes.clone(), DEFAULT_FINALIZER)
            .with_retry_policy(RetryPolicy::fixed(Duration::from_secs(1)));
        (declarations, nodes, reconciler)
    }

    #[tokio::test]
    async fn test_absent_declaration_is_noop() {
        let (_, nodes, reconciler) = fixture().await;
        assert_eq!(reconciler.reconcile("missing").await.unwrap(), CycleOutcome::Absent);
        assert_eq!(nodes.patch_count().await, 0);
        assert_eq!(reconciler.on_reconcile("missing").await, ReconcileAction::Done);
    }

    #[tokio::test]
    async fn test_finalizer_persisted_before_mutation() {
        let (declarations, nodes, reconciler) = fixture().await;
        declarations
            .put(LogicalClusterDeclaration::new("gpu", vec!["n1".to_string()]))
            .await;
        nodes.set_unavailable(true).await;

        assert!(reconciler.reconcile("gpu").await.is_err());
        let decl = declarations.snapshot("gpu").await.unwrap();
        assert!(decl.has_finalizer(DEFAULT_FINALIZER));
        assert_eq!(nodes.patch_count().await, 0);
    }

    #[tokio::test]
    async fn test_zero_member_declaration_is_evaluated() {
        let (declarations, _, reconciler) = fixture().await;
        declarations
            .put(LogicalClusterDeclaration::new("empty", Vec::new()))
            .await;

        assert_eq!(reconciler.reconcile("empty").await.unwrap(), CycleOutcome::Converged);
        let status = declarations.snapshot("empty").await.unwrap().status;
        assert_eq!(status.phase, ConvergencePhase::Converged);
        assert_eq!(status.expected_count, 0);
        assert_eq!(status.observed_count, 0);
    }

    #[tokio::test]
    async fn test_equal_counts_with_wrong_members_still_mutates() {
        let (declarations, nodes, reconciler) = fixture().await;
        nodes.add_marked_node("n3", "gpu").await;
        declarations
            .put(LogicalClusterDeclaration::new("gpu", vec!["n1".to_string()]))
            .await;

        let outcome = reconciler.reconcile("gpu").await.unwrap();
        assert_eq!(outcome, CycleOutcome::Mutated { added: 1, removed: 1 });
        assert_eq!(nodes.members_of("gpu").await, vec!["n1"]);
    }

    #[tokio::test]
    async fn test_on_reconcile_maps_failures() {
        let (declarations, nodes, reconciler) = fixture().await;
        declarations
            .put(LogicalClusterDeclaration::new("gpu", vec!["n1".to_string()]))
            .await;

        nodes.set_unavailable(true).await;
        assert_eq!(
            reconciler.on_reconcile("gpu").await,
            ReconcileAction::RequeueAfter(Duration::from_secs(1))
        );

        nodes.set_unavailable(false).await;
        assert_eq!(reconciler.on_reconcile("gpu").await, ReconcileAction::Done);
    }

    #[tokio::test]
    async fn test_status_write_failure_is_retryable() {
        let (declarations, _, reconciler) = fixture().await;
        let mut decl = LogicalClusterDeclaration::new("gpu", vec!["n1".to_string()]);
        decl.finalizers.insert(DEFAULT_FINALIZER.to_string());
        declarations.put(decl).await;
        declarations.set_fail_writes(true).await;

        let err = reconciler.reconcile("gpu").await.unwrap_err();
        assert!(matches!(err, LabelerError::PersistenceFailure { .. }));
        assert!(err.is_transient());
    }
}
