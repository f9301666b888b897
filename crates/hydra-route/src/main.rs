//! HydraRoute - predictive autoscaler for ingress-exposed workloads
//!
//! Watches participating ingresses, aggregates telemetry for the services
//! they route to and adjusts backing workload replicas through a
//! multi-signal decision engine.

use anyhow::Result;
use futures::TryStreamExt;
use hydra_route_lib::cluster::{ClusterClient, KubeClusterClient};
use hydra_route_lib::collector::MetricsAggregator;
use hydra_route_lib::config::Config;
use hydra_route_lib::controller::{IngressReconciler, LogAuditSink, ReconcileRequest};
use hydra_route_lib::engine::ScalingEngine;
use hydra_route_lib::health::HealthRegistry;
use hydra_route_lib::RouteMetrics;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Queue depth for reconcile requests from the watch and requeue paths
const RECONCILE_QUEUE_SIZE: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = CONTROLLER_VERSION, "Starting hydra-route");

    // Load configuration; validation failures are fatal
    let config_path = std::env::var("HYDRA_ROUTE_CONFIG").ok();
    let config = Config::load(config_path.as_deref())?;
    info!(
        dry_run = config.general.dry_run,
        watch_namespaces = ?config.general.watch_namespaces,
        "Controller configured"
    );

    // Health registry fed by the components' lifecycle signals
    let health_registry = HealthRegistry::new(config.metrics.collection_interval());
    let metrics = RouteMetrics::new();

    // Cluster client
    let client = Client::try_default().await?;
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client.clone()));

    // Telemetry aggregator (C1)
    let ingress_class = if config.general.ingress_class.is_empty() {
        None
    } else {
        Some(config.general.ingress_class.clone())
    };
    let aggregator = Arc::new(MetricsAggregator::new(
        Arc::clone(&cluster),
        config.metrics.clone(),
        config.general.watch_namespaces.clone(),
        ingress_class,
        metrics.clone(),
        health_registry.clone(),
    )?);

    // Decision engine (C2), sharing the aggregator's history store
    let engine = Arc::new(ScalingEngine::new(
        config.scaling.clone(),
        config.metrics.request_rate_window(),
        aggregator.store(),
        metrics.clone(),
        health_registry.clone(),
    ));

    // Reconciliation controller (C3)
    let reconciler = Arc::new(IngressReconciler::new(
        cluster,
        aggregator.store(),
        engine,
        Arc::new(LogAuditSink),
        config.general.dry_run,
        config.general.requeue_interval(),
        metrics.clone(),
        health_registry.clone(),
    ));

    let (reconcile_tx, reconcile_rx) = mpsc::channel(RECONCILE_QUEUE_SIZE);
    let (shutdown_tx, _) = broadcast::channel(1);

    // Start the collection loop
    let collector_handle = {
        let aggregator = Arc::clone(&aggregator);
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { aggregator.run(shutdown).await })
    };

    // Start the reconcile worker; it requeues through a weak sender so the
    // queue genuinely closes if the watch feeder goes away
    let reconciler_handle = tokio::spawn(reconciler.run(
        reconcile_rx,
        reconcile_tx.downgrade(),
        shutdown_tx.subscribe(),
    ));

    // Feed the reconcile queue from the ingress watch
    let watch_handle = tokio::spawn(watch_ingresses(
        client,
        reconcile_tx,
        config.general.watch_namespaces.clone(),
    ));

    // Health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.general.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());
    aggregator.stop();

    let _ = collector_handle.await;
    let _ = reconciler_handle.await;
    watch_handle.abort();
    api_handle.abort();

    Ok(())
}

/// Forward ingress change events into the reconcile queue
async fn watch_ingresses(
    client: Client,
    tx: mpsc::Sender<ReconcileRequest>,
    watch_namespaces: Vec<String>,
) {
    let api: Api<Ingress> = Api::all(client);
    let stream = watcher(api, watcher::Config::default()).applied_objects();
    let mut stream = std::pin::pin!(stream);

    loop {
        match stream.try_next().await {
            Ok(Some(ingress)) => {
                let namespace = ingress.namespace().unwrap_or_default();
                if !watch_namespaces.is_empty() && !watch_namespaces.contains(&namespace) {
                    continue;
                }
                let request = ReconcileRequest {
                    namespace,
                    name: ingress.name_any(),
                };
                if tx.send(request).await.is_err() {
                    info!("reconcile queue closed, stopping ingress watch");
                    break;
                }
            }
            Ok(None) => {
                info!("ingress watch stream ended");
                break;
            }
            Err(err) => {
                warn!(error = %err, "ingress watch error, retrying");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}
