//! File-backed plan store
//!
//! One JSON document per service under a state directory, written through a
//! temp file and renamed so a crash mid-write never corrupts the record.

use super::{PlanStore, StoreError};
use crate::plan::TrafficPlan;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct FilePlanStore {
    dir: PathBuf,
}

impl FilePlanStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(FilePlanStore { dir })
    }

    fn path_for(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{service}.json"))
    }

    async fn read_plan(path: &Path) -> Result<TrafficPlan, StoreError> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Deserialize {
            path: path.display().to_string(),
            source,
        })
    }
}

#[async_trait]
impl PlanStore for FilePlanStore {
    async fn save(&self, plan: &TrafficPlan) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(plan).map_err(|source| StoreError::Serialize {
                service: plan.service_name.clone(),
                source,
            })?;

        let path = self.path_for(&plan.service_name);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, service: &str) -> Result<Option<TrafficPlan>, StoreError> {
        let path = self.path_for(service);
        match Self::read_plan(&path).await {
            Ok(plan) => Ok(Some(plan)),
            Err(StoreError::Io(error)) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn list(&self) -> Result<Vec<TrafficPlan>, StoreError> {
        let mut plans = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_plan(&path).await {
                Ok(plan) => plans.push(plan),
                // A malformed record should not take down every other plan.
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping unreadable plan record");
                }
            }
        }
        Ok(plans)
    }

    async fn remove(&self, service: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(service)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
