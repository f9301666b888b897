//! Reconciliation controller
//!
//! Correlates participating ingresses to their backing workloads, drives
//! the decision engine with the latest snapshot per target and commits
//! replica changes with provenance annotations. Reconcile requests arrive
//! on a queue fed by the ingress watch and a periodic requeue; the single
//! queue worker serializes passes, so at most one is in flight per target.

pub mod annotations;

use crate::cluster::{find_backing_workload, ClusterClient, ClusterError};
use crate::collector::MetricsStore;
use crate::engine::ScalingEngine;
use crate::health::HealthRegistry;
use crate::models::{ReplicaBounds, ScalingDecision, TargetRef};
use crate::observability::RouteMetrics;
use annotations::{
    effective_bounds, is_participating, target_service, CONFIDENCE_ANNOTATION,
    LAST_SCALED_ANNOTATION, SCALE_REASON_ANNOTATION,
};
use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// One unit of reconcile work: an ingress to evaluate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub namespace: String,
    pub name: String,
}

/// Sink for committed scaling changes; invoked at least once per commit
pub trait AuditSink: Send + Sync {
    fn record(&self, decision: &ScalingDecision);
}

/// Log-only audit sink
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, decision: &ScalingDecision) {
        info!(
            event = "scaling_committed",
            namespace = %decision.target.namespace,
            service = %decision.target.service,
            current_replicas = decision.current_replicas,
            recommended_replicas = decision.recommended_replicas,
            scale_factor = decision.scale_factor,
            confidence = decision.confidence,
            reasoning = %decision.reasoning,
            "scaling change committed"
        );
    }
}

/// Drives reconcile passes for participating ingresses
pub struct IngressReconciler {
    cluster: Arc<dyn ClusterClient>,
    store: Arc<MetricsStore>,
    engine: Arc<ScalingEngine>,
    audit: Arc<dyn AuditSink>,
    dry_run: bool,
    requeue_interval: Duration,
    metrics: RouteMetrics,
    health: HealthRegistry,
}

impl IngressReconciler {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        store: Arc<MetricsStore>,
        engine: Arc<ScalingEngine>,
        audit: Arc<dyn AuditSink>,
        dry_run: bool,
        requeue_interval: Duration,
        metrics: RouteMetrics,
        health: HealthRegistry,
    ) -> Self {
        Self {
            cluster,
            store,
            engine,
            audit,
            dry_run,
            requeue_interval,
            metrics,
            health,
        }
    }

    /// Drain the reconcile queue until shutdown.
    ///
    /// Each processed ingress is re-enqueued after the requeue interval so
    /// targets keep being evaluated without ingress churn. The requeue path
    /// holds only a weak sender, so the queue closes for real once the
    /// watch feeder drops its end.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<ReconcileRequest>,
        requeue_tx: mpsc::WeakSender<ReconcileRequest>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            requeue_secs = self.requeue_interval.as_secs(),
            dry_run = self.dry_run,
            "starting reconcile worker"
        );

        loop {
            tokio::select! {
                request = rx.recv() => {
                    let Some(request) = request else {
                        // All senders dropped; no further passes will run
                        self.health.record_queue_closed();
                        info!("reconcile queue closed");
                        break;
                    };
                    if let Err(err) = self.reconcile(&request.namespace, &request.name).await {
                        warn!(
                            namespace = %request.namespace,
                            ingress = %request.name,
                            error = %err,
                            "reconcile pass failed"
                        );
                        self.metrics.inc_reconcile_errors();
                    }
                    schedule_requeue(requeue_tx.clone(), request, self.requeue_interval);
                }
                _ = shutdown.recv() => {
                    info!("shutting down reconcile worker");
                    break;
                }
            }
        }
    }

    /// One reconcile pass over a single ingress
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<()> {
        let Some(ingress) = self.cluster.get_ingress(namespace, name).await? else {
            debug!(namespace, ingress = name, "ingress no longer exists");
            return Ok(());
        };

        if !is_participating(&ingress.annotations) {
            debug!(namespace, ingress = name, "ingress not participating");
            return Ok(());
        }

        let bounds = effective_bounds(&ingress.annotations, self.engine.default_bounds());
        let services: Vec<String> = match target_service(&ingress.annotations) {
            Some(target) => vec![target.to_string()],
            None => ingress.backend_services.clone(),
        };

        for service in &services {
            if let Err(err) = self.process_service(namespace, service, bounds).await {
                warn!(
                    namespace,
                    service = %service,
                    error = %err,
                    "failed to process service"
                );
                self.metrics.inc_reconcile_errors();
            }
        }

        Ok(())
    }

    /// Evaluate and, when warranted, scale the workload behind one service
    async fn process_service(
        &self,
        namespace: &str,
        service: &str,
        bounds: ReplicaBounds,
    ) -> Result<()> {
        let target = TargetRef::new(namespace, service);

        let Some(snapshot) = self.store.latest(&target).await else {
            debug!(target = %target, "no snapshot available yet");
            return Ok(());
        };

        let Some(decision) = self.engine.decide(&snapshot, bounds).await else {
            return Ok(());
        };

        info!(
            target = %target,
            current_replicas = decision.current_replicas,
            recommended_replicas = decision.recommended_replicas,
            confidence = decision.confidence,
            reasoning = %decision.reasoning,
            "scaling decision made"
        );

        if decision.recommended_replicas == decision.current_replicas {
            debug!(target = %target, "no scaling needed");
            return Ok(());
        }

        let service_info = self
            .cluster
            .get_service(namespace, service)
            .await?
            .ok_or_else(|| anyhow::anyhow!("service {target} no longer exists"))?;
        let workloads = self.cluster.list_workloads(namespace).await?;
        let workload = find_backing_workload(&workloads, &service_info.selector)
            .ok_or_else(|| anyhow::anyhow!("no backing workload found for service {target}"))?;

        if self.dry_run {
            info!(
                event = "dry_run_skip",
                target = %target,
                workload = %workload.name,
                current_replicas = decision.current_replicas,
                recommended_replicas = decision.recommended_replicas,
                "dry run: would scale workload"
            );
            self.metrics.inc_dry_run_skips();
            return Ok(());
        }

        let mut provenance = BTreeMap::new();
        provenance.insert(LAST_SCALED_ANNOTATION.to_string(), Utc::now().to_rfc3339());
        provenance.insert(
            SCALE_REASON_ANNOTATION.to_string(),
            decision.reasoning.clone(),
        );
        provenance.insert(
            CONFIDENCE_ANNOTATION.to_string(),
            format!("{:.2}", decision.confidence),
        );

        match self
            .cluster
            .scale_workload(
                namespace,
                &workload.name,
                decision.recommended_replicas,
                provenance,
            )
            .await
        {
            Ok(()) => {
                self.engine.record_commit(&decision).await;
                self.audit.record(&decision);
                self.metrics.inc_commits();
                info!(
                    target = %target,
                    workload = %workload.name,
                    replicas = decision.recommended_replicas,
                    "scaled workload"
                );
                Ok(())
            }
            Err(ClusterError::Conflict { .. }) => {
                // Another controller touched the workload; the next pass
                // re-evaluates against fresh state. No cooldown is recorded.
                warn!(
                    target = %target,
                    workload = %workload.name,
                    "workload update conflicted, deferring to next pass"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Re-enqueue an ingress after the requeue interval.
///
/// A full or closed queue drops the request; the watch stream or a later
/// requeue will surface the ingress again.
fn schedule_requeue(
    tx: mpsc::WeakSender<ReconcileRequest>,
    request: ReconcileRequest,
    delay: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(tx) = tx.upgrade() else {
            return;
        };
        if tx.try_send(request).is_err() {
            debug!("reconcile queue full, dropping requeue");
        }
    });
}
