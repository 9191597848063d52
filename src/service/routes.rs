//! Axum routes for the anchor/link service.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::content::{AnchorMark, MarkedContent};
use crate::linking::{AnchorMarkup, LinkerError};
use crate::projector::ProjectionError;
use crate::reconciler::{OrphanOutcome, OrphanState, ReconcileError, ReconcileReport};
use crate::store::postgres::PoolStats;
use crate::store::{HypertextStore, StoreError};
use crate::types::{Anchor, AnchorId, Extent, Link, LinkId, NodeId, Projection};
use crate::ANCHOR_LINK_SCHEMA_VERSION;

use super::middleware::{record_projection_metrics, record_reconcile_metrics};
use super::state::{HealthProbe, ServiceState};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Edited content of a node: explicit marks, or editor HTML to flatten.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileRequest {
    /// Anchor marks, for image and temporal editors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marks: Option<Vec<AnchorMark>>,
    /// Editor HTML, for text nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl ReconcileRequest {
    fn into_content(self) -> Result<MarkedContent, &'static str> {
        match (self.marks, self.html) {
            (Some(marks), None) => Ok(MarkedContent { marks, text: String::new() }),
            (None, Some(html)) => Ok(MarkedContent::from_html(&html)),
            (Some(_), Some(_)) => Err("Provide either marks or html, not both"),
            (None, None) => Err("Provide marks or html"),
        }
    }
}

/// A per-item failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    /// Anchor the failure concerns.
    pub anchor_id: AnchorId,
    /// Error message.
    pub error: String,
}

/// Serializable orphan outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanDto {
    /// The orphaned anchor.
    pub anchor_id: AnchorId,
    /// Terminal state.
    pub state: OrphanState,
    /// Links removed.
    pub deleted_links: Vec<LinkId>,
    /// Partner anchors removed.
    pub deleted_partners: Vec<AnchorId>,
    /// Failure messages, prefixed with the stage they hit.
    pub errors: Vec<String>,
}

impl From<OrphanOutcome> for OrphanDto {
    fn from(outcome: OrphanOutcome) -> Self {
        Self {
            errors: outcome
                .failures
                .iter()
                .map(|f| format!("{:?}: {}", f.stage, f.error))
                .collect(),
            anchor_id: outcome.anchor_id,
            state: outcome.state,
            deleted_links: outcome.deleted_links,
            deleted_partners: outcome.deleted_partners,
        }
    }
}

/// Serializable reconciliation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResponse {
    /// Node that was reconciled.
    pub node_id: NodeId,
    /// Anchors whose extent was rewritten.
    pub updated: Vec<AnchorId>,
    /// Anchors left as they were.
    pub unchanged: Vec<AnchorId>,
    /// Referenced ids with no stored anchor on the node.
    pub ignored: Vec<AnchorId>,
    /// Marks rejected for an invalid extent.
    pub invalid: Vec<ItemError>,
    /// Extent updates the store rejected.
    pub failed_updates: Vec<ItemError>,
    /// Orphan cascades.
    pub orphans: Vec<OrphanDto>,
    /// Successful store mutations.
    pub mutation_count: usize,
    /// First store failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ReconcileReport> for ReconcileResponse {
    fn from(report: ReconcileReport) -> Self {
        Self {
            mutation_count: report.mutation_count(),
            error: report.first_error().map(ToString::to_string),
            node_id: report.node_id,
            updated: report.updated,
            unchanged: report.unchanged,
            ignored: report.ignored,
            invalid: report
                .invalid
                .into_iter()
                .map(|(anchor_id, e)| ItemError { anchor_id, error: e.to_string() })
                .collect(),
            failed_updates: report
                .failed_updates
                .into_iter()
                .map(|(anchor_id, e)| ItemError { anchor_id, error: e.to_string() })
                .collect(),
            orphans: report.orphans.into_iter().map(OrphanDto::from).collect(),
        }
    }
}

/// Optional layout override for a projection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectionQuery {
    /// Layout seed.
    pub seed: Option<u64>,
}

/// A projection with its fingerprints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionResponse {
    /// The projected graph.
    #[serde(flatten)]
    pub projection: Projection,
    /// Canonical hash of the projection.
    pub fingerprint: String,
    /// Canonical hash of the layout parameters used.
    pub layout_params_hash: String,
}

/// Link markup for a text node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarksResponse {
    /// The node.
    pub node_id: NodeId,
    /// Linked text anchors, ordered by start.
    pub marks: Vec<AnchorMarkup>,
}

/// Request to link two selections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// First node.
    pub node1: NodeId,
    /// Extent on the first node; `null` anchors the whole node.
    #[serde(default)]
    pub extent1: serde_json::Value,
    /// Second node.
    pub node2: NodeId,
    /// Extent on the second node.
    #[serde(default)]
    pub extent2: serde_json::Value,
}

/// The created link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkResponse {
    /// The link.
    pub link: Link,
}

/// Result of following an anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowResponse {
    /// Anchor that was followed.
    pub anchor_id: AnchorId,
    /// Anchor at the other end, if the anchor is linked.
    pub target: Option<Anchor>,
}

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub schema_version: String,
    pub layout_params_hash: String,
    pub database: DatabaseHealth,
}

/// Database health information.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: bool,
    pub details: Option<String>,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: ErrorResponse) -> ApiError {
    tracing::warn!(
        status = status.as_u16(),
        code = %error.code,
        error = %error.error,
        "Request error"
    );
    (status, Json(error))
}

fn store_error(e: &StoreError) -> ApiError {
    let (status, code) = match e {
        StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        StoreError::ReferenceInconsistency(_) => (StatusCode::CONFLICT, "REFERENCE_INCONSISTENCY"),
        StoreError::InvalidExtent(_) => (StatusCode::BAD_REQUEST, "INVALID_EXTENT"),
    };
    api_error(status, ErrorResponse::new(code, e.to_string()))
}

fn linker_error(e: &LinkerError) -> ApiError {
    match e {
        LinkerError::NodeNotFound(_) => {
            api_error(StatusCode::NOT_FOUND, ErrorResponse::new("NODE_NOT_FOUND", e.to_string()))
        }
        LinkerError::AnchorNotFound(_) => {
            api_error(StatusCode::NOT_FOUND, ErrorResponse::new("ANCHOR_NOT_FOUND", e.to_string()))
        }
        LinkerError::ExtentMismatch { .. } => {
            api_error(StatusCode::BAD_REQUEST, ErrorResponse::new("EXTENT_MISMATCH", e.to_string()))
        }
        LinkerError::InvalidExtent(_) => {
            api_error(StatusCode::BAD_REQUEST, ErrorResponse::new("INVALID_EXTENT", e.to_string()))
        }
        LinkerError::Store(e) => store_error(e),
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Reconcile a node's anchors with its edited content.
///
/// Responds 500 with the full report when some mutation failed; the
/// mutations that succeeded stay applied.
async fn reconcile_handler<S: HypertextStore + HealthProbe + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(node_id): Path<String>,
    Json(request): Json<ReconcileRequest>,
) -> Result<(StatusCode, Json<ReconcileResponse>), ApiError> {
    let node_id = NodeId::new(node_id);
    let content = request.into_content().map_err(|msg| {
        api_error(StatusCode::BAD_REQUEST, ErrorResponse::new("INVALID_REQUEST", msg))
    })?;

    let start = Instant::now();
    let report = state
        .reconciler()
        .reconcile(&node_id, &content)
        .await
        .map_err(|e| match &e {
            ReconcileError::StoreUnavailable { source, .. } => api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new("STORE_UNAVAILABLE", e.to_string())
                    .with_details(source.to_string()),
            ),
        })?;
    record_reconcile_metrics(&report, start.elapsed().as_millis() as u64);

    let status = if report.first_error().is_some() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report.into())))
}

/// Project the link graph around a node.
async fn projection_handler<S: HypertextStore + HealthProbe + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(node_id): Path<String>,
    Query(query): Query<ProjectionQuery>,
) -> Result<Json<ProjectionResponse>, ApiError> {
    let node_id = NodeId::new(node_id);
    let mut layout = state.layout.clone();
    if let Some(seed) = query.seed {
        layout.seed = seed;
    }
    let layout_params_hash = layout.params_hash();

    let start = Instant::now();
    let projection = state
        .projector(layout)
        .project_by_id(&node_id)
        .await
        .map_err(|e| match &e {
            ProjectionError::FocalNodeNotFound(_) => {
                api_error(StatusCode::NOT_FOUND, ErrorResponse::new("NODE_NOT_FOUND", e.to_string()))
            }
            ProjectionError::Store(inner) => store_error(inner),
        })?;
    record_projection_metrics(
        projection.num_nodes(),
        projection.num_edges(),
        start.elapsed().as_millis() as u64,
    );

    Ok(Json(ProjectionResponse {
        fingerprint: projection.fingerprint(),
        projection,
        layout_params_hash,
    }))
}

/// Link markup for a node's text anchors.
async fn marks_handler<S: HypertextStore + HealthProbe + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(node_id): Path<String>,
) -> Result<Json<MarksResponse>, ApiError> {
    let node_id = NodeId::new(node_id);
    let marks = state
        .linker()
        .anchor_marks(&node_id)
        .await
        .map_err(|e| linker_error(&e))?;
    Ok(Json(MarksResponse { node_id, marks }))
}

/// Anchor two selections and link them.
async fn connect_handler<S: HypertextStore + HealthProbe + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    Json(request): Json<ConnectRequest>,
) -> Result<(StatusCode, Json<LinkResponse>), ApiError> {
    let parse = |value: &serde_json::Value, field: &str| -> Result<Option<Extent>, ApiError> {
        Extent::from_json(value).map_err(|e| {
            api_error(
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("INVALID_EXTENT", e.to_string()).with_details(field.to_string()),
            )
        })
    };
    let extent1 = parse(&request.extent1, "extent1")?;
    let extent2 = parse(&request.extent2, "extent2")?;

    let link = state
        .linker()
        .connect(&request.node1, extent1, &request.node2, extent2)
        .await
        .map_err(|e| linker_error(&e))?;
    Ok((StatusCode::CREATED, Json(LinkResponse { link })))
}

/// Follow an anchor's first link.
async fn follow_handler<S: HypertextStore + HealthProbe + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(anchor_id): Path<String>,
) -> Result<Json<FollowResponse>, ApiError> {
    let anchor_id = AnchorId::new(anchor_id);
    let target = state
        .linker()
        .follow(&anchor_id)
        .await
        .map_err(|e| linker_error(&e))?;
    Ok(Json(FollowResponse { anchor_id, target }))
}

/// Health check endpoint (detailed).
async fn health_handler<S: HypertextStore + HealthProbe + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
) -> Json<HealthResponse> {
    let connected = state.store.is_healthy().await;

    Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: ANCHOR_LINK_SCHEMA_VERSION.to_string(),
        layout_params_hash: state.layout.params_hash(),
        database: DatabaseHealth {
            connected,
            pool: state.store.pool_stats(),
        },
    })
}

/// Liveness probe endpoint. Does not check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 if the store answers, 503 otherwise.
async fn readiness_handler<S: HypertextStore + HealthProbe + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    if state.store.is_healthy().await {
        Ok(Json(ReadinessResponse {
            ready: true,
            database: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                database: false,
                details: Some("Store connection failed".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the anchor/link service.
pub fn create_router<S: HypertextStore + HealthProbe + 'static>(state: ServiceState<S>) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Content edits and projection
        .route("/api/nodes/:node_id/reconcile", post(reconcile_handler::<S>))
        .route("/api/nodes/:node_id/projection", get(projection_handler::<S>))
        .route("/api/nodes/:node_id/marks", get(marks_handler::<S>))
        // Linking
        .route("/api/links", post(connect_handler::<S>))
        .route("/api/anchors/:anchor_id/follow", get(follow_handler::<S>))
        // Health checks
        .route("/health", get(health_handler::<S>))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler::<S>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutConfig;
    use crate::store::InMemoryHypertextStore;
    use crate::types::{Node, NodeType};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use tower::ServiceExt;

    /// n1 "The quick brown fox" with a1 on "quick" and a2 on "fox",
    /// linked to b1 and b2 on the image node n2.
    fn seeded_store() -> InMemoryHypertextStore {
        let mut store = InMemoryHypertextStore::new();
        store.add_node(Node::new(NodeId::new("n1"), NodeType::Text, "Fox", ""));
        store.add_node(Node::new(NodeId::new("n2"), NodeType::Image, "Photo", ""));
        let a1 = Anchor::new(AnchorId::new("anchor.a1"), NodeId::new("n1"), Some(Extent::text("quick", 4)));
        let a2 = Anchor::new(AnchorId::new("anchor.a2"), NodeId::new("n1"), Some(Extent::text("fox", 16)));
        let b1 = Anchor::new(AnchorId::new("anchor.b1"), NodeId::new("n2"), None);
        let b2 = Anchor::new(AnchorId::new("anchor.b2"), NodeId::new("n2"), None);
        store.add_link(Link::new(LinkId::new("link.1"), &a1, &b1));
        store.add_link(Link::new(LinkId::new("link.2"), &a2, &b2));
        for a in [a1, a2, b1, b2] {
            store.add_anchor(a);
        }
        store
    }

    fn app() -> (Router, Arc<InMemoryHypertextStore>) {
        let state = ServiceState::new(seeded_store(), LayoutConfig::default());
        let store = Arc::clone(&state.store);
        (create_router(state), store)
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_liveness() {
        let (app, _) = app();
        let (status, body) = send(app, Method::GET, "/health/live", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "alive");
    }

    #[tokio::test]
    async fn test_health_reports_memory_store() {
        let (app, _) = app();
        let (status, body) = send(app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"]["connected"], true);
    }

    #[tokio::test]
    async fn test_reconcile_html_cascades_removed_anchor() {
        let (app, store) = app();
        let html = r#"<p>The quick brown <a target="anchor.a2">fox</a></p>"#;
        let (status, body) = send(
            app,
            Method::POST,
            "/api/nodes/n1/reconcile",
            Some(serde_json::json!({ "html": html })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mutation_count"], 3);
        assert_eq!(body["orphans"][0]["state"], "deleted");
        assert!(!store.contains_anchor(&AnchorId::new("anchor.a1")));
        assert!(!store.contains_anchor(&AnchorId::new("anchor.b1")));
        assert!(store.contains_link(&LinkId::new("link.2")));
    }

    #[tokio::test]
    async fn test_reconcile_requires_content() {
        let (app, store) = app();
        let (status, body) = send(
            app,
            Method::POST,
            "/api/nodes/n1/reconcile",
            Some(serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_projection_and_missing_node() {
        let (app, _) = app();
        let (status, body) = send(app.clone(), Method::GET, "/api/nodes/n1/projection?seed=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(body["edges"].as_array().unwrap().len(), 2);
        assert_eq!(body["focal"], "n1");

        let (status, body) = send(app, Method::GET, "/api/nodes/nope/projection", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NODE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_connect_follow_and_marks() {
        let (app, _) = app();
        let (status, body) = send(
            app.clone(),
            Method::POST,
            "/api/links",
            Some(serde_json::json!({
                "node1": "n1",
                "extent1": { "type": "text", "startCharacter": 10, "endCharacter": 15, "text": "brown" },
                "node2": "n2",
                "extent2": { "type": "image", "left": 0.1, "top": 0.1, "width": 0.2, "height": 0.2 },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let anchor2 = body["link"]["anchor2Id"].as_str().unwrap().to_string();

        let (status, body) = send(app.clone(), Method::GET, &format!("/api/anchors/{}/follow", anchor2), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target"]["nodeId"], "n1");

        let (status, body) = send(app, Method::GET, "/api/nodes/n1/marks", None).await;
        assert_eq!(status, StatusCode::OK);
        let marks = body["marks"].as_array().unwrap();
        assert_eq!(marks.len(), 3);
        assert_eq!(marks[1]["start"], 10);
        assert_eq!(marks[1]["targetNodeId"], "n2");
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_extent() {
        let (app, store) = app();
        let (status, body) = send(
            app,
            Method::POST,
            "/api/links",
            Some(serde_json::json!({
                "node1": "n1",
                "extent1": { "type": "text", "startCharacter": 9, "endCharacter": 4, "text": "quick" },
                "node2": "n2",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_EXTENT");
        assert_eq!(store.num_links(), 2);
    }
}
