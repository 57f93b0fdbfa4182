//! Upstream range enumeration.
//!
//! The engine never talks to the source service directly; it consumes a
//! [`RangeProvider`]. The provider is authoritative and always live; every
//! reconciliation re-lists ranges rather than trusting cached topology.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::range::Range;
use crate::types::ContainerIdentity;

/// Upstream enumeration failed. Retryable by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("range discovery failed for {target}: {reason}")]
pub struct DiscoveryError {
    /// Database name or container resource id the call was about.
    pub target: String,
    pub reason: String,
}

impl DiscoveryError {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Source of containers and their current ranges.
#[async_trait]
pub trait RangeProvider: Send + Sync {
    /// All containers in a database.
    async fn list_containers(&self, database: &str)
        -> Result<Vec<ContainerIdentity>, DiscoveryError>;

    /// Current ranges of a container, keyed by its resource id.
    async fn list_ranges(&self, container_resource_id: &str)
        -> Result<Vec<Range>, DiscoveryError>;
}

#[derive(Default)]
struct ProviderState {
    /// resource id → (identity, ranges).
    containers: BTreeMap<String, (ContainerIdentity, Vec<Range>)>,
    unreachable: bool,
}

/// In-process provider whose topology is set by the caller.
///
/// Used by hosts that learn topology out of band and by tests that need
/// to script splits, merges and outages.
#[derive(Default)]
pub struct InMemoryRangeProvider {
    state: RwLock<ProviderState>,
}

impl InMemoryRangeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container (or replace its ranges).
    pub async fn put_container(&self, container: ContainerIdentity, ranges: Vec<Range>) {
        let mut state = self.state.write().await;
        state
            .containers
            .insert(container.container_resource_id.clone(), (container, ranges));
    }

    /// Replace the ranges of a known container. Returns false if unknown.
    pub async fn set_ranges(&self, container_resource_id: &str, ranges: Vec<Range>) -> bool {
        let mut state = self.state.write().await;
        match state.containers.get_mut(container_resource_id) {
            Some((_, current)) => {
                *current = ranges;
                true
            }
            None => false,
        }
    }

    /// Drop a container. Returns true if it existed.
    pub async fn remove_container(&self, container_resource_id: &str) -> bool {
        let mut state = self.state.write().await;
        state.containers.remove(container_resource_id).is_some()
    }

    /// Make every call fail with a `DiscoveryError` until cleared.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.write().await.unreachable = unreachable;
    }
}

#[async_trait]
impl RangeProvider for InMemoryRangeProvider {
    async fn list_containers(
        &self,
        database: &str,
    ) -> Result<Vec<ContainerIdentity>, DiscoveryError> {
        let state = self.state.read().await;
        if state.unreachable {
            return Err(DiscoveryError::new(database, "provider unreachable"));
        }
        Ok(state
            .containers
            .values()
            .filter(|(c, _)| c.database_name == database)
            .map(|(c, _)| c.clone())
            .collect())
    }

    async fn list_ranges(&self, container_resource_id: &str) -> Result<Vec<Range>, DiscoveryError> {
        let state = self.state.read().await;
        if state.unreachable {
            return Err(DiscoveryError::new(container_resource_id, "provider unreachable"));
        }
        state
            .containers
            .get(container_resource_id)
            .map(|(_, ranges)| ranges.clone())
            .ok_or_else(|| DiscoveryError::new(container_resource_id, "container not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_registered_containers_by_database() {
        let provider = InMemoryRangeProvider::new();
        provider
            .put_container(ContainerIdentity::new("db", "orders", "rid-1"), vec![Range::full()])
            .await;
        provider
            .put_container(ContainerIdentity::new("other", "users", "rid-2"), vec![Range::full()])
            .await;

        let containers = provider.list_containers("db").await.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].container_resource_id, "rid-1");

        let ranges = provider.list_ranges("rid-1").await.unwrap();
        assert_eq!(ranges, vec![Range::full()]);
    }

    #[tokio::test]
    async fn unknown_container_is_a_discovery_error() {
        let provider = InMemoryRangeProvider::new();
        let err = provider.list_ranges("nope").await.unwrap_err();
        assert_eq!(err.target, "nope");
    }

    #[tokio::test]
    async fn unreachable_fails_every_call() {
        let provider = InMemoryRangeProvider::new();
        provider
            .put_container(ContainerIdentity::new("db", "orders", "rid-1"), vec![Range::full()])
            .await;

        provider.set_unreachable(true).await;
        assert!(provider.list_containers("db").await.is_err());
        assert!(provider.list_ranges("rid-1").await.is_err());

        provider.set_unreachable(false).await;
        assert!(provider.list_ranges("rid-1").await.is_ok());
    }

    #[tokio::test]
    async fn set_ranges_requires_known_container() {
        let provider = InMemoryRangeProvider::new();
        assert!(!provider.set_ranges("rid-1", vec![Range::full()]).await);
        assert!(!provider.remove_container("rid-1").await);
    }
}
