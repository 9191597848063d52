//! Service middleware for metrics and request tracking.
//!
//! ## Metrics Exposed
//!
//! - `request` - Request count and latency by path pattern, method, status
//! - `reconcile` - Updates, orphans and mutations per reconciliation
//! - `projection` - Nodes and edges per projection
//!
//! Metrics are structured `tracing` events under the
//! `anchor_link_kernel::metrics` target and aggregated from logs.

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use regex_lite::Regex;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

use crate::reconciler::ReconcileReport;

/// Metrics middleware that records request counts and latency.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "anchor_link_kernel::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

fn id_segment_regex() -> &'static Regex {
    static ID_SEGMENT: OnceLock<Regex> = OnceLock::new();
    ID_SEGMENT.get_or_init(|| {
        Regex::new(r"/(nodes|anchors|links)/[^/]+").expect("static id segment pattern")
    })
}

/// Normalize path for metrics to avoid high cardinality.
///
/// Node, anchor and link ids become `:id`.
fn normalize_path(path: &str) -> String {
    id_segment_regex().replace_all(path, "/$1/:id").into_owned()
}

/// Record reconciliation metrics.
pub fn record_reconcile_metrics(report: &ReconcileReport, latency_ms: u64) {
    info!(
        target: "anchor_link_kernel::metrics",
        metric_type = "reconcile",
        updated = report.updated.len(),
        unchanged = report.unchanged.len(),
        ignored = report.ignored.len(),
        invalid = report.invalid.len(),
        orphans = report.orphans.len(),
        mutations = report.mutation_count(),
        clean = report.is_clean(),
        latency_ms = latency_ms,
        "reconcile_metric"
    );
}

/// Record projection metrics.
pub fn record_projection_metrics(node_count: usize, edge_count: usize, latency_ms: u64) {
    info!(
        target: "anchor_link_kernel::metrics",
        metric_type = "projection",
        node_count = node_count,
        edge_count = edge_count,
        latency_ms = latency_ms,
        "projection_metric"
    );
}
