use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use geonode_core::models::{UploadParallelismLimit, UploadSizeLimit};
use geonode_core::{AppError, LimitsConfig};

use crate::defaults::{protected_parallelism_limits, protected_size_limits};
use crate::traits::LimitsRepository;

#[derive(Default)]
pub struct InMemoryLimitsRepository {
    size_limits: RwLock<BTreeMap<String, UploadSizeLimit>>,
    parallelism_limits: RwLock<BTreeMap<String, UploadParallelismLimit>>,
}

impl InMemoryLimitsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the protected limits from configuration.
    pub fn with_defaults(config: &LimitsConfig) -> Self {
        let size_limits = protected_size_limits(config)
            .into_iter()
            .map(|l| (l.slug.clone(), l))
            .collect();
        let parallelism_limits = protected_parallelism_limits(config)
            .into_iter()
            .map(|l| (l.slug.clone(), l))
            .collect();
        Self {
            size_limits: RwLock::new(size_limits),
            parallelism_limits: RwLock::new(parallelism_limits),
        }
    }
}

#[async_trait]
impl LimitsRepository for InMemoryLimitsRepository {
    async fn get_size_limit(&self, slug: &str) -> Result<Option<UploadSizeLimit>, AppError> {
        Ok(self.size_limits.read().await.get(slug).cloned())
    }

    async fn list_size_limits(&self) -> Result<Vec<UploadSizeLimit>, AppError> {
        Ok(self.size_limits.read().await.values().cloned().collect())
    }

    async fn upsert_size_limit(
        &self,
        limit: UploadSizeLimit,
    ) -> Result<UploadSizeLimit, AppError> {
        self.size_limits
            .write()
            .await
            .insert(limit.slug.clone(), limit.clone());
        Ok(limit)
    }

    async fn delete_size_limit(&self, slug: &str) -> Result<bool, AppError> {
        Ok(self.size_limits.write().await.remove(slug).is_some())
    }

    async fn get_parallelism_limit(
        &self,
        slug: &str,
    ) -> Result<Option<UploadParallelismLimit>, AppError> {
        Ok(self.parallelism_limits.read().await.get(slug).cloned())
    }

    async fn list_parallelism_limits(&self) -> Result<Vec<UploadParallelismLimit>, AppError> {
        Ok(self.parallelism_limits.read().await.values().cloned().collect())
    }

    async fn upsert_parallelism_limit(
        &self,
        limit: UploadParallelismLimit,
    ) -> Result<UploadParallelismLimit, AppError> {
        self.parallelism_limits
            .write()
            .await
            .insert(limit.slug.clone(), limit.clone());
        Ok(limit)
    }

    async fn delete_parallelism_limit(&self, slug: &str) -> Result<bool, AppError> {
        Ok(self.parallelism_limits.write().await.remove(slug).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geonode_core::constants::{
        DEFAULT_MAX_PARALLEL_UPLOADS_SLUG, FILE_UPLOAD_HANDLER_SLUG, TOTAL_UPLOAD_SIZE_SUM_SLUG,
    };
    use geonode_core::Config;

    #[tokio::test]
    async fn defaults_keep_safety_margin() {
        let config = Config::local("/tmp/a", "/tmp/m");
        let repo = InMemoryLimitsRepository::with_defaults(config.limits());

        let total = repo
            .get_size_limit(TOTAL_UPLOAD_SIZE_SUM_SLUG)
            .await
            .unwrap()
            .unwrap();
        let handler = repo
            .get_size_limit(FILE_UPLOAD_HANDLER_SLUG)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(total.max_size, 104_857_600);
        assert_eq!(handler.max_size, 2 * total.max_size);

        let parallel = repo
            .get_parallelism_limit(DEFAULT_MAX_PARALLEL_UPLOADS_SLUG)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parallel.max_number, 5);
    }
}
