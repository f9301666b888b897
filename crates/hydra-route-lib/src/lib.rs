//! Core library for the HydraRoute ingress autoscaler
//!
//! This crate provides:
//! - Telemetry aggregation per ingress-exposed service
//! - A multi-signal decision engine with pluggable scaling models
//! - The reconciliation controller that applies replica changes
//! - Health checks and operational counters

pub mod cluster;
pub mod collector;
pub mod config;
pub mod controller;
pub mod engine;
pub mod health;
pub mod models;
pub mod observability;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::RouteMetrics;
