//! Telemetry aggregation
//!
//! Periodically builds one metrics snapshot per candidate service and keeps
//! a bounded per-target history. Each snapshot is assembled in four phases
//! (resource, ingress frontend, system bandwidth, workload); a failing phase
//! leaves its fields at zero and never invalidates the snapshot.

mod nginx;
mod store;

pub use nginx::NginxStatsClient;
pub use store::MetricsStore;

use crate::cluster::{find_backing_workload, ClusterClient, ServiceInfo};
use crate::config::MetricsConfig;
use crate::health::HealthRegistry;
use crate::models::{MetricsSnapshot, NginxStats, TargetRef};
use crate::observability::RouteMetrics;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

/// Upstream metric carrying proxied bytes per second
const UPSTREAM_NETWORK_KEY: &str = "upstream_bytes_per_second";
/// Upstream metric carrying backend I/O bytes per second
const UPSTREAM_IO_KEY: &str = "upstream_io_bytes_per_second";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Collects metrics for all candidate services on a fixed interval
pub struct MetricsAggregator {
    cluster: Arc<dyn ClusterClient>,
    nginx: Option<NginxStatsClient>,
    store: Arc<MetricsStore>,
    config: MetricsConfig,
    watch_namespaces: Vec<String>,
    ingress_class: Option<String>,
    metrics: RouteMetrics,
    health: HealthRegistry,
    stop_tx: broadcast::Sender<()>,
}

impl MetricsAggregator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        config: MetricsConfig,
        watch_namespaces: Vec<String>,
        ingress_class: Option<String>,
        metrics: RouteMetrics,
        health: HealthRegistry,
    ) -> Result<Self> {
        let nginx = if config.nginx_metrics_url.is_empty() {
            None
        } else {
            Some(NginxStatsClient::new(&config.nginx_metrics_url)?)
        };
        let (stop_tx, _) = broadcast::channel(1);

        Ok(Self {
            cluster,
            nginx,
            store: Arc::new(MetricsStore::new()),
            config,
            watch_namespaces,
            ingress_class,
            metrics,
            health,
            stop_tx,
        })
    }

    /// Shared history store; the decision engine reads trends from it
    pub fn store(&self) -> Arc<MetricsStore> {
        Arc::clone(&self.store)
    }

    /// Most recent snapshot for a target
    pub async fn latest(&self, target: &TargetRef) -> Option<Arc<MetricsSnapshot>> {
        self.store.latest(target).await
    }

    /// Retained history for a target, oldest first
    pub async fn history(&self, target: &TargetRef) -> Vec<Arc<MetricsSnapshot>> {
        self.store.history(target).await
    }

    /// Stop the collection loop; safe to call more than once
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    /// Run the collection loop until shutdown or [`stop`](Self::stop)
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.collection_interval_secs,
            retention_secs = self.config.retention_period_secs,
            "starting metrics collection"
        );

        let mut stop_rx = self.stop_tx.subscribe();
        let mut ticker = interval(self.config.collection_interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.collect_cycle().await {
                        Ok(()) => self.health.record_cycle(),
                        Err(err) => {
                            error!(error = %err, "metrics collection cycle failed");
                            self.metrics.inc_collection_errors();
                            self.health.record_cycle_error(err.to_string());
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("shutting down metrics collection");
                    break;
                }
                _ = stop_rx.recv() => {
                    info!("metrics collection stopped");
                    break;
                }
            }
        }
    }

    /// One collection cycle: snapshot every candidate service, then evict
    async fn collect_cycle(&self) -> Result<()> {
        let started = Instant::now();
        let services = self.cluster.list_services(&self.watch_namespaces).await?;

        for service in &services {
            let snapshot = self.collect_service(service).await;
            self.store.append(snapshot).await;
        }

        let retention = chrono::Duration::from_std(self.config.retention_period())
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        self.store.evict_older_than(Utc::now() - retention).await;

        self.metrics
            .observe_collection_latency(started.elapsed().as_secs_f64());
        self.metrics
            .set_targets_tracked(self.store.target_count().await as i64);
        self.metrics
            .set_snapshots_stored(self.store.snapshot_count().await as i64);

        debug!(services = services.len(), "collection cycle complete");
        Ok(())
    }

    /// Build one snapshot for a service through the four phases
    async fn collect_service(&self, service: &ServiceInfo) -> MetricsSnapshot {
        let target = TargetRef::new(&service.namespace, &service.name);
        let mut snapshot = MetricsSnapshot::empty(target.clone(), Utc::now());
        snapshot.ingress_class = self.ingress_class.clone();

        if let Err(err) = self.collect_resources(service, &mut snapshot).await {
            debug!(target = %target, error = %err, "resource phase failed");
            self.metrics.inc_collection_errors();
        }

        let stats = self.collect_frontend(&target, &mut snapshot).await;

        if self.config.bandwidth_monitoring.enabled() {
            self.collect_bandwidth(stats.as_ref(), &mut snapshot);
        }

        if let Err(err) = self.collect_workload(service, &mut snapshot).await {
            debug!(target = %target, error = %err, "workload phase failed");
            self.metrics.inc_collection_errors();
        }

        snapshot
    }

    /// Resource phase: utilization percentages against summed pod requests
    async fn collect_resources(
        &self,
        service: &ServiceInfo,
        snapshot: &mut MetricsSnapshot,
    ) -> Result<()> {
        if service.selector.is_empty() {
            return Ok(());
        }

        let pods = self
            .cluster
            .list_pods(&service.namespace, &service.selector)
            .await?;
        if pods.is_empty() {
            return Ok(());
        }

        let usage = self
            .cluster
            .pod_usage(&service.namespace, &service.selector)
            .await?;

        let used_cpu: f64 = usage.iter().map(|u| u.cpu_cores).sum();
        let used_memory: f64 = usage.iter().map(|u| u.memory_mib).sum();
        let requested_cpu: f64 = pods.iter().map(|p| p.cpu_request_cores).sum();
        let requested_memory: f64 = pods.iter().map(|p| p.memory_request_mib).sum();

        if requested_cpu > 0.0 {
            snapshot.cpu_utilization = used_cpu / requested_cpu * 100.0;
        }
        if requested_memory > 0.0 {
            snapshot.memory_utilization = used_memory / requested_memory * 100.0;
        }
        Ok(())
    }

    /// Ingress-frontend phase: request metrics from the proxy endpoint.
    ///
    /// Returns the raw payload so the bandwidth phase can reuse it.
    async fn collect_frontend(
        &self,
        target: &TargetRef,
        snapshot: &mut MetricsSnapshot,
    ) -> Option<NginxStats> {
        let client = self.nginx.as_ref()?;
        match client.stats().await {
            Ok(stats) => {
                snapshot.request_rate = stats.requests_per_second;
                snapshot.response_time = stats.response_time;
                snapshot.error_rate = stats.error_rate;
                snapshot.network_bandwidth = stats.bytes_per_second / BYTES_PER_MB;
                Some(stats)
            }
            Err(err) => {
                debug!(target = %target, error = %err, "ingress frontend phase failed");
                self.metrics.inc_collection_errors();
                None
            }
        }
    }

    /// System-bandwidth phase: upstream byte rates from the proxy payload.
    ///
    /// A network value set by the frontend phase wins over this one.
    fn collect_bandwidth(&self, stats: Option<&NginxStats>, snapshot: &mut MetricsSnapshot) {
        let Some(stats) = stats else {
            debug!("no bandwidth source available this cycle");
            return;
        };

        let monitoring = &self.config.bandwidth_monitoring;
        if monitoring.enable_network_bandwidth && snapshot.network_bandwidth == 0.0 {
            if let Some(bytes) = stats.upstream_metrics.get(UPSTREAM_NETWORK_KEY) {
                snapshot.network_bandwidth = bytes / BYTES_PER_MB;
            }
        }
        if monitoring.enable_io_bandwidth {
            if let Some(bytes) = stats.upstream_metrics.get(UPSTREAM_IO_KEY) {
                snapshot.io_bandwidth = bytes / BYTES_PER_MB;
            }
        }
    }

    /// Workload phase: replica counts from the backing workload descriptor
    async fn collect_workload(
        &self,
        service: &ServiceInfo,
        snapshot: &mut MetricsSnapshot,
    ) -> Result<()> {
        let workloads = self.cluster.list_workloads(&service.namespace).await?;
        match find_backing_workload(&workloads, &service.selector) {
            Some(workload) => {
                snapshot.current_replicas = workload.current_replicas;
                snapshot.desired_replicas = workload.desired_replicas;
            }
            None => {
                warn!(
                    namespace = %service.namespace,
                    service = %service.name,
                    "no backing workload found for service"
                );
            }
        }
        Ok(())
    }
}
