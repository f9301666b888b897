//! Ingress annotation surface
//!
//! Participation, per-target bound overrides and the provenance annotations
//! written back on scaled workloads. Unknown annotations are ignored.

use crate::models::ReplicaBounds;
use std::collections::BTreeMap;
use tracing::warn;

/// Opt-in flag; only ingresses with this set to "true" participate
pub const ENABLED_ANNOTATION: &str = "hydra-route.ai/enabled";
/// Per-target lower bound override
pub const MIN_REPLICAS_ANNOTATION: &str = "hydra-route.ai/min-replicas";
/// Per-target upper bound override
pub const MAX_REPLICAS_ANNOTATION: &str = "hydra-route.ai/max-replicas";
/// Alternate backend service name to scale
pub const TARGET_ANNOTATION: &str = "hydra-route.ai/target";

/// Provenance: RFC3339 timestamp of the last commit
pub const LAST_SCALED_ANNOTATION: &str = "hydra-route.ai/last-scaled";
/// Provenance: reasoning behind the last commit
pub const SCALE_REASON_ANNOTATION: &str = "hydra-route.ai/scale-reason";
/// Provenance: confidence of the last commit, two decimals
pub const CONFIDENCE_ANNOTATION: &str = "hydra-route.ai/confidence";

/// Whether an ingress has opted into scaling
pub fn is_participating(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(ENABLED_ANNOTATION)
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Apply per-ingress bound overrides on top of the process defaults.
///
/// Non-positive or unparseable values are ignored, as is a max override
/// that would fall below the effective min.
pub fn effective_bounds(
    annotations: &BTreeMap<String, String>,
    defaults: ReplicaBounds,
) -> ReplicaBounds {
    let mut bounds = defaults;

    if let Some(value) = annotations.get(MIN_REPLICAS_ANNOTATION) {
        match value.parse::<i32>() {
            Ok(min) if min > 0 => bounds.min = min,
            _ => warn!(value = %value, "ignoring invalid min-replicas annotation"),
        }
    }

    if let Some(value) = annotations.get(MAX_REPLICAS_ANNOTATION) {
        match value.parse::<i32>() {
            Ok(max) if max >= bounds.min => bounds.max = max,
            _ => warn!(value = %value, "ignoring invalid max-replicas annotation"),
        }
    }

    // A raised min can leave the default max behind it
    if bounds.max < bounds.min {
        bounds.max = bounds.min;
    }
    bounds
}

/// Alternate service name to scale instead of the rule backends
pub fn target_service(annotations: &BTreeMap<String, String>) -> Option<&str> {
    annotations
        .get(TARGET_ANNOTATION)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}
