//! Aggregate resource demand of a set of pods.
//!
//! Per container, the limit wins over the request when a positive limit is
//! declared; otherwise the request counts. Memory arrives from the API as a
//! byte quantity and is truncated (not rounded) to megabytes, matching how
//! node capacity is tabulated on the remediation side. Init containers and
//! pod overhead are not considered.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::resources::Resources;

const BYTES_PER_MB: i64 = 1024 * 1024;

/// Total resources the given pods are asking for.
pub fn needed_resources(pods: &[Arc<Pod>]) -> Resources {
    let mut total = Resources::EMPTY;
    for pod in pods {
        let containers = pod.spec.as_ref().map(|s| s.containers.as_slice());
        for container in containers.unwrap_or_default() {
            total.cpu += container_cpu_milli(container);
            total.mem_mb += container_mem_mb(container);
        }
    }
    total
}

fn container_cpu_milli(container: &Container) -> i64 {
    let Some(resources) = container.resources.as_ref() else {
        return 0;
    };
    let limit = resources
        .limits
        .as_ref()
        .and_then(|limits| limits.get("cpu"))
        .map(parse_cpu_milli)
        .unwrap_or(0);
    if limit > 0 {
        return limit;
    }
    resources
        .requests
        .as_ref()
        .and_then(|requests| requests.get("cpu"))
        .map(parse_cpu_milli)
        .unwrap_or(0)
}

fn container_mem_mb(container: &Container) -> i64 {
    let Some(resources) = container.resources.as_ref() else {
        return 0;
    };
    let limit = resources
        .limits
        .as_ref()
        .and_then(|limits| limits.get("memory"))
        .map(parse_memory_bytes)
        .unwrap_or(0);
    let bytes = if limit > 0 {
        limit
    } else {
        resources
            .requests
            .as_ref()
            .and_then(|requests| requests.get("memory"))
            .map(parse_memory_bytes)
            .unwrap_or(0)
    };
    bytes / BYTES_PER_MB
}

/// Parse a Kubernetes CPU quantity ("100m", "1", "0.5") into milli-units.
///
/// Unparseable quantities contribute zero rather than failing the tick.
pub(crate) fn parse_cpu_milli(quantity: &Quantity) -> i64 {
    let raw = quantity.0.trim();
    if let Some(milli) = raw.strip_suffix('m') {
        milli.parse::<i64>().unwrap_or(0)
    } else {
        raw.parse::<f64>()
            .map(|cores| (cores * 1000.0) as i64)
            .unwrap_or(0)
    }
}

const BINARY_SUFFIXES: [(&str, i64); 6] = [
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
];

const DECIMAL_SUFFIXES: [(&str, i64); 6] = [
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// Parse a Kubernetes memory quantity ("128Mi", "1Gi", "1000000") into bytes.
pub(crate) fn parse_memory_bytes(quantity: &Quantity) -> i64 {
    let raw = quantity.0.trim();
    // Binary suffixes first: "Mi" must not be read as "M" with a trailing i.
    for (suffix, multiplier) in BINARY_SUFFIXES.iter().chain(DECIMAL_SUFFIXES.iter()) {
        if let Some(prefix) = raw.strip_suffix(suffix) {
            return prefix
                .parse::<f64>()
                .map(|v| (v * *multiplier as f64) as i64)
                .unwrap_or(0);
        }
    }
    raw.parse::<f64>().map(|v| v as i64).unwrap_or(0)
}
