use async_trait::async_trait;
use labeler_shared_types::{
    LogicalClusterDeclaration, LogicalClusterStatus, NodeId, Result, DEFAULT_MARKER_KEY,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{DeclarationStore, MarkedNode, MarkerPatch, MarkerSelector, NodeLabelStore, StoreError};

/// In-memory node inventory.
///
/// Holds every node's labels behind a RwLock and records each patch it is
/// asked to apply. Failures can be injected per node or for the whole store
/// to exercise retry paths.
pub struct InMemoryNodeStore {
    marker_key: String,
    nodes: Arc<RwLock<HashMap<NodeId, HashMap<String, String>>>>,
    patch_log: Arc<RwLock<Vec<(NodeId, MarkerPatch)>>>,
    failing_nodes: Arc<RwLock<HashMap<NodeId, StoreError>>>,
    unavailable: Arc<RwLock<bool>>,
    list_count: Arc<AtomicUsize>,
}

impl InMemoryNodeStore {
    /// Create an empty inventory using the default marker key.
    pub fn new() -> Self {
        Self::with_marker_key(DEFAULT_MARKER_KEY)
    }

    pub fn with_marker_key(marker_key: impl Into<String>) -> Self {
        Self {
            marker_key: marker_key.into(),
            nodes: Arc::new(RwLock::new(HashMap::new())),
            patch_log: Arc::new(RwLock::new(Vec::new())),
            failing_nodes: Arc::new(RwLock::new(HashMap::new())),
            unavailable: Arc::new(RwLock::new(false)),
            list_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register an unlabeled node.
    pub async fn add_node(&self, node: impl Into<NodeId>) {
        self.nodes.write().await.insert(node.into(), HashMap::new());
    }

    /// Register a node already carrying `marker`.
    pub async fn add_marked_node(&self, node: impl Into<NodeId>, marker: impl Into<String>) {
        let mut labels = HashMap::new();
        labels.insert(self.marker_key.clone(), marker.into());
        self.nodes.write().await.insert(node.into(), labels);
    }

    pub async fn marker_of(&self, node: &str) -> Option<String> {
        self.nodes
            .read()
            .await
            .get(node)
            .and_then(|labels| labels.get(&self.marker_key).cloned())
    }

    /// Nodes currently carrying `marker`, sorted.
    pub async fn members_of(&self, marker: &str) -> Vec<NodeId> {
        let nodes = self.nodes.read().await;
        let mut members: Vec<NodeId> = nodes
            .iter()
            .filter(|(_, labels)| labels.get(&self.marker_key).map(String::as_str) == Some(marker))
            .map(|(id, _)| id.clone())
            .collect();
        members.sort();
        members
    }

    /// Make every subsequent patch of `node` fail with `error`.
    pub async fn fail_patches_on(&self, node: impl Into<NodeId>, error: StoreError) {
        self.failing_nodes.write().await.insert(node.into(), error);
    }

    pub async fn clear_failures(&self) {
        self.failing_nodes.write().await.clear();
        *self.unavailable.write().await = false;
    }

    /// Simulate the inventory being unreachable for every call.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    pub async fn patch_log(&self) -> Vec<(NodeId, MarkerPatch)> {
        self.patch_log.read().await.clone()
    }

    pub async fn patch_count(&self) -> usize {
        self.patch_log.read().await.len()
    }

    pub fn list_count(&self) -> usize {
        self.list_count.load(Ordering::SeqCst)
    }

    async fn check_available(&self) -> std::result::Result<(), StoreError> {
        if *self.unavailable.read().await {
            return Err(StoreError::Unavailable(
                "simulated inventory outage".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeLabelStore for InMemoryNodeStore {
    async fn list(&self, selector: &MarkerSelector) -> Result<Vec<MarkedNode>> {
        self.list_count.fetch_add(1, Ordering::SeqCst);
        self.check_available()
            .await
            .map_err(|e| e.for_node("*"))?;

        let nodes = self.nodes.read().await;
        let mut marked: Vec<MarkedNode> = nodes
            .iter()
            .filter_map(|(id, labels)| {
                let marker = labels.get(&self.marker_key)?;
                selector.matches(Some(marker)).then(|| MarkedNode {
                    id: id.clone(),
                    marker: marker.clone(),
                })
            })
            .collect();
        marked.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(marked)
    }

    async fn patch(&self, node: &NodeId, patch: &MarkerPatch) -> Result<()> {
        self.check_available().await.map_err(|e| e.for_node(node))?;

        if let Some(error) = self.failing_nodes.read().await.get(node) {
            return Err(error.clone().for_node(node));
        }

        let mut nodes = self.nodes.write().await;
        let labels = nodes
            .get_mut(node)
            .ok_or_else(|| StoreError::NotFound(format!("node {}", node)).for_node(node))?;

        match patch {
            MarkerPatch::SetMarker(value) => {
                labels.insert(self.marker_key.clone(), value.clone());
            }
            MarkerPatch::RemoveMarker => {
                labels.remove(&self.marker_key);
            }
        }
        drop(nodes);

        self.patch_log
            .write()
            .await
            .push((node.clone(), patch.clone()));
        Ok(())
    }
}

/// In-memory declaration storage mimicking control-plane deletion: a
/// declaration with finalizers is only marked for deletion, and is removed
/// once its last finalizer is cleared.
pub struct InMemoryDeclarationStore {
    declarations: Arc<RwLock<HashMap<String, LogicalClusterDeclaration>>>,
    fail_writes: Arc<RwLock<bool>>,
    status_writes: Arc<AtomicUsize>,
    finalizer_writes: Arc<AtomicUsize>,
}

impl InMemoryDeclarationStore {
    pub fn new() -> Self {
        Self {
            declarations: Arc::new(RwLock::new(HashMap::new())),
            fail_writes: Arc::new(RwLock::new(false)),
            status_writes: Arc::new(AtomicUsize::new(0)),
            finalizer_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create or replace a declaration's desired state.
    pub async fn put(&self, declaration: LogicalClusterDeclaration) {
        self.declarations
            .write()
            .await
            .insert(declaration.name.clone(), declaration);
    }

    /// Change the desired nodes of an existing declaration.
    pub async fn set_desired_nodes(&self, name: &str, nodes: Vec<NodeId>) {
        if let Some(decl) = self.declarations.write().await.get_mut(name) {
            decl.desired_nodes = nodes;
        }
    }

    /// Request deletion. Removes immediately when no finalizer is pending.
    pub async fn delete(&self, name: &str) {
        let mut declarations = self.declarations.write().await;
        let release = match declarations.get_mut(name) {
            Some(decl) => {
                decl.deletion_requested = true;
                decl.finalizers.is_empty()
            }
            None => false,
        };
        if release {
            declarations.remove(name);
        }
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.declarations.read().await.contains_key(name)
    }

    pub async fn snapshot(&self, name: &str) -> Option<LogicalClusterDeclaration> {
        self.declarations.read().await.get(name).cloned()
    }

    pub async fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.write().await = fail;
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub fn finalizer_writes(&self) -> usize {
        self.finalizer_writes.load(Ordering::SeqCst)
    }

    async fn check_writable(&self, name: &str) -> Result<()> {
        if *self.fail_writes.read().await {
            return Err(StoreError::Unavailable("simulated write failure".to_string())
                .for_declaration(name));
        }
        Ok(())
    }
}

impl Default for InMemoryDeclarationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeclarationStore for InMemoryDeclarationStore {
    async fn get(&self, name: &str) -> Result<Option<LogicalClusterDeclaration>> {
        Ok(self.declarations.read().await.get(name).cloned())
    }

    async fn update_status(&self, name: &str, status: &LogicalClusterStatus) -> Result<()> {
        self.check_writable(name).await?;
        let mut declarations = self.declarations.write().await;
        let decl = declarations
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()).for_declaration(name))?;
        decl.status = status.clone();
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_finalizers(&self, name: &str, finalizers: &BTreeSet<String>) -> Result<()> {
        self.check_writable(name).await?;
        let mut declarations = self.declarations.write().await;
        let decl = declarations
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()).for_declaration(name))?;
        decl.finalizers = finalizers.clone();
        self.finalizer_writes.fetch_add(1, Ordering::SeqCst);

        if decl.deletion_requested && decl.finalizers.is_empty() {
            declarations.remove(name);
        }
        Ok(())
    }
}
