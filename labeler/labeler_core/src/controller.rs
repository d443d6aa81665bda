//! Kubernetes host for the reconciler.
//!
//! Watches `LogicalCluster` resources, and nodes carrying a marker, and runs
//! one reconciliation cycle per triggered declaration. The runtime guarantees
//! at most one concurrent cycle per object.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::controller::{Action, Controller, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use label_store_interface::{KubeDeclarationStore, KubeNodeStore};
use labeler_shared_types::{LabelerError, LogicalCluster};
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::reconciliation::{CycleOutcome, ReconcileAction, Reconciler, RetryPolicy};

/// Shared state handed to every reconcile invocation.
pub struct Context {
    reconciler: Reconciler,
    retry: RetryPolicy,
    resync: Duration,
    /// Consecutive failures per declaration, for backoff.
    failures: Mutex<HashMap<String, u32>>,
}

impl Context {
    pub fn new(reconciler: Reconciler, config: &ControllerConfig) -> Self {
        Self {
            reconciler,
            retry: config.requeue.clone(),
            resync: config.resync_interval(),
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn record_failure(&self, name: &str) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let attempt = failures.entry(name.to_string()).or_insert(0);
        let current = *attempt;
        *attempt = attempt.saturating_add(1);
        current
    }

    /// Forget the failure history of `name`.
    fn reset_failures(&self, name: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(name);
    }

    fn success_action(&self, outcome: &CycleOutcome) -> Action {
        match outcome {
            CycleOutcome::Absent | CycleOutcome::Terminated | CycleOutcome::TornDown { .. } => {
                Action::await_change()
            }
            CycleOutcome::Converged | CycleOutcome::Mutated { .. } => Action::requeue(self.resync),
        }
    }
}

/// Convert a requeue decision into a controller-runtime action.
pub fn to_action(action: ReconcileAction) -> Action {
    match action {
        ReconcileAction::Done => Action::await_change(),
        ReconcileAction::RequeueAfter(delay) => Action::requeue(delay),
        ReconcileAction::RequeueNow => Action::requeue(Duration::ZERO),
    }
}

/// Reconcile one `LogicalCluster`.
pub async fn reconcile(lc: Arc<LogicalCluster>, ctx: Arc<Context>) -> Result<Action, LabelerError> {
    let name = lc.name_any();
    let outcome = ctx.reconciler.reconcile(&name).await?;
    ctx.reset_failures(&name);
    debug!(logical_cluster = %name, ?outcome, "reconcile finished");
    Ok(ctx.success_action(&outcome))
}

/// Backoff for a failed cycle, growing with consecutive failures.
pub fn error_policy(lc: Arc<LogicalCluster>, error: &LabelerError, ctx: Arc<Context>) -> Action {
    let name = lc.name_any();
    if error.is_benign() {
        ctx.reset_failures(&name);
        return Action::await_change();
    }
    let attempt = ctx.record_failure(&name);
    let action = ctx.retry.action_for_error(error, attempt);
    error!(
        logical_cluster = %name,
        %error,
        attempt,
        ?action,
        "reconciliation failed"
    );
    to_action(action)
}

/// Run the controller until a shutdown signal arrives.
pub async fn run(client: Client, config: ControllerConfig) -> anyhow::Result<()> {
    let declarations = Arc::new(KubeDeclarationStore::new(
        client.clone(),
        config.field_manager.clone(),
    ));
    let nodes = Arc::new(KubeNodeStore::new(
        client.clone(),
        config.marker_key.clone(),
        config.field_manager.clone(),
    ));
    let reconciler = Reconciler::new(declarations, nodes, config.finalizer.clone())
        .with_retry_policy(config.requeue.clone());
    let ctx = Arc::new(Context::new(reconciler, &config));
    let stream_ctx = ctx.clone();

    let logical_clusters: Api<LogicalCluster> = Api::all(client.clone());
    let node_api: Api<Node> = Api::all(client);
    let marker_key = config.marker_key.clone();

    info!(
        marker_key = %config.marker_key,
        finalizer = %config.finalizer,
        "starting logical cluster controller"
    );

    Controller::new(logical_clusters, watcher::Config::default())
        .watches(
            node_api,
            watcher::Config::default().labels(&config.marker_key),
            move |node: Node| {
                node.labels()
                    .get(&marker_key)
                    .map(|group| ObjectRef::<LogicalCluster>::new(group))
            },
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(move |result| {
            let ctx = stream_ctx.clone();
            async move {
                match result {
                    Ok((obj, _)) => debug!(logical_cluster = %obj.name, "reconciled"),
                    // Deleted while a retry was pending.
                    Err(ControllerError::ObjectNotFound(obj)) => {
                        ctx.reset_failures(&obj.name);
                        debug!(logical_cluster = %obj.name, "declaration gone, backoff dropped");
                    }
                    Err(e) => warn!(error = %e, "controller reported an error"),
                }
            }
        })
        .await;

    info!("logical cluster controller stopped");
    Ok(())
}
