//! Logical cluster labeler.
//!
//! Keeps the marker label on nodes converged with `LogicalCluster`
//! declarations: exactly the declared nodes carry a group's marker, and every
//! marker is removed before the declaration itself goes away.

pub mod config;
pub mod controller;
pub mod inventory;
pub mod reconciliation;

pub use config::{ConfigError, ControllerConfig, LoggingConfig};
pub use inventory::{ClusterInventory, LogicalClusterSummary};
pub use reconciliation::{
    CycleOutcome, FinalizationManager, LabelMutator, Lifecycle, MembershipDiff, ReconcileAction,
    Reconciler, RetryPolicy, StatusCalculator,
};
