//! Anchor/link REST service.
//!
//! Exposes reconciliation, projection and linking over HTTP.
//!
//! ## Endpoints
//!
//! - `POST /api/nodes/:node_id/reconcile` - Reconcile anchors after an edit
//! - `GET /api/nodes/:node_id/projection` - One-hop link graph around a node
//! - `GET /api/nodes/:node_id/marks` - Link markup for a text node
//! - `POST /api/links` - Anchor two selections and link them
//! - `GET /api/anchors/:anchor_id/follow` - Follow an anchor's link
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_projection_metrics, record_reconcile_metrics};
pub use routes::{create_router, ErrorResponse};
pub use state::{HealthProbe, ServiceState};
