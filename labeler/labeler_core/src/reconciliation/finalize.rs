//! Finalization of logical cluster declarations.
//!
//! A declaration moves one way through `Active -> Terminating -> Terminated`.
//! The finalizer is inserted before any node is touched, so a declaration
//! deleted between two cycles still gets its markers stripped.

use labeler_shared_types::LogicalClusterDeclaration;

/// Lifecycle position of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Deletion not requested; membership is converged toward the desired nodes.
    Active,
    /// Deletion requested, finalizer still held; markers must be stripped.
    Terminating,
    /// Deletion requested and finalizer released; nothing left to do.
    Terminated,
}

/// Owns the finalizer name and the transitions guarded by it.
#[derive(Debug, Clone)]
pub struct FinalizationManager {
    finalizer: String,
}

impl FinalizationManager {
    pub fn new(finalizer: impl Into<String>) -> Self {
        Self {
            finalizer: finalizer.into(),
        }
    }

    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    pub fn lifecycle(&self, decl: &LogicalClusterDeclaration) -> Lifecycle {
        match (decl.deletion_requested, decl.has_finalizer(&self.finalizer)) {
            (false, _) => Lifecycle::Active,
            (true, true) => Lifecycle::Terminating,
            (true, false) => Lifecycle::Terminated,
        }
    }

    /// Insert the finalizer into an active declaration. Returns whether the
    /// finalizer set changed and needs persisting.
    pub fn ensure_present(&self, decl: &mut LogicalClusterDeclaration) -> bool {
        if decl.deletion_requested {
            return false;
        }
        decl.finalizers.insert(self.finalizer.clone())
    }

    /// Drop the finalizer once teardown has completed. Returns whether the
    /// finalizer set changed.
    pub fn release(&self, decl: &mut LogicalClusterDeclaration) -> bool {
        decl.finalizers.remove(&self.finalizer)
    }
}
