//! PostgreSQL hypertext store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

use crate::types::{
    validate_extent, Anchor, AnchorId, Extent, Link, LinkId, Node, NodeId, NodeType,
};
use super::{AnchorStore, LinkStore, NodeStore, RecordKind, StoreError};

/// DDL for the tables this store reads and writes.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    node_id      TEXT PRIMARY KEY,
    title        TEXT NOT NULL,
    node_type    TEXT NOT NULL,
    content      TEXT NOT NULL DEFAULT '',
    date_created TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS anchors (
    anchor_id TEXT PRIMARY KEY,
    node_id   TEXT NOT NULL,
    extent    TEXT
);
CREATE INDEX IF NOT EXISTS anchors_node_id_idx ON anchors (node_id);

CREATE TABLE IF NOT EXISTS links (
    link_id         TEXT PRIMARY KEY,
    anchor1_id      TEXT NOT NULL,
    anchor2_id      TEXT NOT NULL,
    anchor1_node_id TEXT NOT NULL,
    anchor2_node_id TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS links_anchor1_idx ON links (anchor1_id);
CREATE INDEX IF NOT EXISTS links_anchor2_idx ON links (anchor2_id);
"#;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/hypertext".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// PostgreSQL hypertext store.
///
/// Extents are stored as JSON text in the wire format of [`Extent`] and
/// re-validated on read.
pub struct PostgresHypertextStore {
    pool: PgPool,
}

impl PostgresHypertextStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Create the tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    fn parse_node_row(row: &PgRow) -> Result<Node, StoreError> {
        let node_id: String = row.try_get("node_id").map_err(StoreError::unavailable)?;
        let title: String = row.try_get("title").map_err(StoreError::unavailable)?;
        let node_type: String = row.try_get("node_type").map_err(StoreError::unavailable)?;
        let content: String = row.try_get("content").map_err(StoreError::unavailable)?;
        let date_created: Option<chrono::DateTime<chrono::Utc>> =
            row.try_get("date_created").map_err(StoreError::unavailable)?;

        let mut node = Node::new(
            NodeId::new(node_id),
            NodeType::parse(&node_type).unwrap_or_default(),
            title,
            content,
        );
        node.date_created = date_created;
        Ok(node)
    }

    fn parse_anchor_row(row: &PgRow) -> Result<Anchor, StoreError> {
        let anchor_id: String = row.try_get("anchor_id").map_err(StoreError::unavailable)?;
        let node_id: String = row.try_get("node_id").map_err(StoreError::unavailable)?;
        let extent_json: Option<String> = row.try_get("extent").map_err(StoreError::unavailable)?;

        let extent = match extent_json {
            Some(text) => {
                let value: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| StoreError::ReferenceInconsistency(format!(
                        "anchor {} has unreadable extent: {}", anchor_id, e
                    )))?;
                Extent::from_json(&value)?
            }
            None => None,
        };

        Ok(Anchor::new(AnchorId::new(anchor_id), NodeId::new(node_id), extent))
    }

    fn parse_link_row(row: &PgRow) -> Result<Link, StoreError> {
        let get = |column: &str| -> Result<String, StoreError> {
            row.try_get::<String, _>(column).map_err(StoreError::unavailable)
        };
        Ok(Link {
            link_id: LinkId::new(get("link_id")?),
            anchor1_id: AnchorId::new(get("anchor1_id")?),
            anchor2_id: AnchorId::new(get("anchor2_id")?),
            anchor1_node_id: NodeId::new(get("anchor1_node_id")?),
            anchor2_node_id: NodeId::new(get("anchor2_node_id")?),
        })
    }

    fn extent_to_json(extent: Option<&Extent>) -> Result<Option<String>, StoreError> {
        validate_extent(extent)?;
        extent
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Unavailable(format!("extent serialization failed: {}", e)))
    }
}

#[async_trait]
impl NodeStore for PostgresHypertextStore {
    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT node_id, title, node_type, content, date_created
            FROM nodes
            WHERE node_id = $1
            "#
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;

        row.as_ref().map(Self::parse_node_row).transpose()
    }
}

#[async_trait]
impl AnchorStore for PostgresHypertextStore {
    async fn anchors_by_node(&self, node_id: &NodeId) -> Result<Vec<Anchor>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT anchor_id, node_id, extent
            FROM anchors
            WHERE node_id = $1
            ORDER BY anchor_id
            "#
        )
        .bind(node_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;

        rows.iter().map(Self::parse_anchor_row).collect()
    }

    async fn get_anchor(&self, id: &AnchorId) -> Result<Option<Anchor>, StoreError> {
        let row = sqlx::query("SELECT anchor_id, node_id, extent FROM anchors WHERE anchor_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;

        row.as_ref().map(Self::parse_anchor_row).transpose()
    }

    async fn create_anchor(
        &self,
        node_id: &NodeId,
        extent: Option<Extent>,
    ) -> Result<Anchor, StoreError> {
        let extent_json = Self::extent_to_json(extent.as_ref())?;
        let anchor = Anchor::new(AnchorId::generate(), node_id.clone(), extent);

        let result = sqlx::query(
            r#"
            INSERT INTO anchors (anchor_id, node_id, extent)
            SELECT $1::text, node_id, $3::text FROM nodes WHERE node_id = $2
            "#
        )
        .bind(anchor.anchor_id.as_str())
        .bind(node_id.as_str())
        .bind(extent_json)
        .execute(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(RecordKind::Node, node_id));
        }
        Ok(anchor)
    }

    async fn update_extent(&self, id: &AnchorId, extent: Option<Extent>) -> Result<(), StoreError> {
        let extent_json = Self::extent_to_json(extent.as_ref())?;
        let result = sqlx::query("UPDATE anchors SET extent = $2 WHERE anchor_id = $1")
            .bind(id.as_str())
            .bind(extent_json)
            .execute(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(RecordKind::Anchor, id));
        }
        Ok(())
    }

    async fn delete_anchor(&self, id: &AnchorId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM anchors WHERE anchor_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(RecordKind::Anchor, id));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkStore for PostgresHypertextStore {
    async fn links_by_anchor(&self, anchor_id: &AnchorId) -> Result<Vec<Link>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT link_id, anchor1_id, anchor2_id, anchor1_node_id, anchor2_node_id
            FROM links
            WHERE anchor1_id = $1 OR anchor2_id = $1
            ORDER BY link_id
            "#
        )
        .bind(anchor_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;

        rows.iter().map(Self::parse_link_row).collect()
    }

    async fn create_link(&self, anchor1: &AnchorId, anchor2: &AnchorId) -> Result<Link, StoreError> {
        let mut endpoints = Vec::with_capacity(2);
        for id in [anchor1, anchor2] {
            let anchor = self.get_anchor(id).await?.ok_or_else(|| {
                StoreError::ReferenceInconsistency(format!("link endpoint {} does not exist", id))
            })?;
            endpoints.push(anchor);
        }
        let link = Link::new(LinkId::generate(), &endpoints[0], &endpoints[1]);

        sqlx::query(
            r#"
            INSERT INTO links (link_id, anchor1_id, anchor2_id, anchor1_node_id, anchor2_node_id)
            VALUES ($1, $2, $3, $4, $5)
            "#
        )
        .bind(link.link_id.as_str())
        .bind(link.anchor1_id.as_str())
        .bind(link.anchor2_id.as_str())
        .bind(link.anchor1_node_id.as_str())
        .bind(link.anchor2_node_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;

        Ok(link)
    }

    async fn delete_link(&self, id: &LinkId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM links WHERE link_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(RecordKind::Link, id));
        }
        Ok(())
    }
}
