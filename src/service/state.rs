//! Service state management.
//!
//! Holds the shared store and layout configuration, and hands out the
//! reconciler, projector and linker built over them.

use async_trait::async_trait;
use std::sync::Arc;

use crate::layout::{ConfigError, LayoutConfig};
use crate::linking::Linker;
use crate::projector::LinkGraphProjector;
use crate::reconciler::AnchorReconciler;
use crate::store::postgres::PoolStats;
use crate::store::{HypertextStore, InMemoryHypertextStore, PostgresHypertextStore};

/// Backend health as reported by the health endpoints.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether the backend answers.
    async fn is_healthy(&self) -> bool;

    /// Connection pool statistics, for pooled backends.
    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }
}

#[async_trait]
impl HealthProbe for PostgresHypertextStore {
    async fn is_healthy(&self) -> bool {
        PostgresHypertextStore::is_healthy(self).await
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        Some(PostgresHypertextStore::pool_stats(self))
    }
}

#[async_trait]
impl HealthProbe for InMemoryHypertextStore {
    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Shared service state.
pub struct ServiceState<S: HypertextStore + 'static> {
    /// The hypertext store.
    pub store: Arc<S>,
    /// Layout used for projections unless a request overrides the seed.
    pub layout: LayoutConfig,
}

impl<S: HypertextStore + 'static> ServiceState<S> {
    /// Create service state over a store.
    pub fn new(store: S, layout: LayoutConfig) -> Self {
        Self {
            store: Arc::new(store),
            layout,
        }
    }

    /// Create service state with layout read from the environment.
    ///
    /// Reads `LAYOUT_SEED` and `LAYOUT_POSITIONS`.
    pub fn from_env(store: S) -> Result<Self, ConfigError> {
        Ok(Self::new(store, LayoutConfig::from_env()?))
    }

    /// Reconciler over the shared store.
    pub fn reconciler(&self) -> AnchorReconciler<S> {
        AnchorReconciler::new(Arc::clone(&self.store))
    }

    /// Projector over the shared store.
    pub fn projector(&self, layout: LayoutConfig) -> LinkGraphProjector<S> {
        LinkGraphProjector::new(Arc::clone(&self.store), layout)
    }

    /// Linker over the shared store.
    pub fn linker(&self) -> Linker<S> {
        Linker::new(Arc::clone(&self.store))
    }
}

impl<S: HypertextStore + 'static> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            layout: self.layout.clone(),
        }
    }
}
