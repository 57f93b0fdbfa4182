//! Range provider backed by a JSON topology file.
//!
//! The file is re-read on every call, so editing it while `watch` runs
//! looks like a live split or merge to the monitor:
//!
//! ```json
//! {
//!   "containers": [
//!     {
//!       "databaseName": "sales",
//!       "containerId": "orders",
//!       "containerResourceId": "rid-orders",
//!       "ranges": [{ "min": "", "max": "80" }, { "min": "80", "max": "FF" }]
//!     }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use rangefeed_core::{ContainerIdentity, DiscoveryError, Range, RangeProvider};

#[derive(Debug, Deserialize)]
pub struct TopologyFile {
    pub containers: Vec<ContainerEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ContainerEntry {
    #[serde(flatten)]
    pub identity: ContainerIdentity,
    pub ranges: Vec<Range>,
}

pub struct FileRangeProvider {
    path: PathBuf,
}

impl FileRangeProvider {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    async fn load(&self) -> Result<TopologyFile, DiscoveryError> {
        let target = self.path.display().to_string();
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| DiscoveryError::new(&target, e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| DiscoveryError::new(target, e.to_string()))
    }
}

#[async_trait]
impl RangeProvider for FileRangeProvider {
    async fn list_containers(
        &self,
        database: &str,
    ) -> Result<Vec<ContainerIdentity>, DiscoveryError> {
        Ok(self
            .load()
            .await?
            .containers
            .into_iter()
            .map(|c| c.identity)
            .filter(|c| c.database_name == database)
            .collect())
    }

    async fn list_ranges(&self, container_resource_id: &str) -> Result<Vec<Range>, DiscoveryError> {
        self.load()
            .await?
            .containers
            .into_iter()
            .find(|c| c.identity.container_resource_id == container_resource_id)
            .map(|c| c.ranges)
            .ok_or_else(|| DiscoveryError::new(container_resource_id, "container not found"))
    }
}
