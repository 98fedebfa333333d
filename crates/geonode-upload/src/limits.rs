//! Admission control for uploads.
//!
//! Two byte limits exist: `file_upload_handler` caps what the request layer
//! buffers before any validation, `total_upload_size_sum` caps the sum of the
//! files of one upload. The first must stay at least twice the second.
//! Parallelism is an admission check on the user's in-flight executions, not
//! a slot held for the duration of the upload.

use std::sync::Arc;

use geonode_core::constants::{
    DEFAULT_MAX_PARALLEL_UPLOADS_SLUG, FILE_UPLOAD_HANDLER_SAFETY_FACTOR, FILE_UPLOAD_HANDLER_SLUG,
    TOTAL_UPLOAD_SIZE_SUM_SLUG,
};
use geonode_core::models::{filesizeformat, UploadParallelismLimit, UploadSizeLimit};
use geonode_core::LimitsConfig;
use geonode_db::{ExecutionRequestRepository, LimitsRepository};

use crate::error::{UploadError, UploadResult};

#[derive(Clone)]
pub struct UploadLimitValidator {
    limits: Arc<dyn LimitsRepository>,
    executions: Arc<dyn ExecutionRequestRepository>,
    defaults: LimitsConfig,
}

impl UploadLimitValidator {
    pub fn new(
        limits: Arc<dyn LimitsRepository>,
        executions: Arc<dyn ExecutionRequestRepository>,
        defaults: LimitsConfig,
    ) -> Self {
        Self {
            limits,
            executions,
            defaults,
        }
    }

    async fn max_size(&self, slug: &str, fallback: u64) -> UploadResult<u64> {
        Ok(self
            .limits
            .get_size_limit(slug)
            .await?
            .map(|l| l.max_size)
            .unwrap_or(fallback))
    }

    pub async fn max_upload_size(&self) -> UploadResult<u64> {
        self.max_size(TOTAL_UPLOAD_SIZE_SUM_SLUG, self.defaults.default_max_upload_size)
            .await
    }

    /// Limit applied to request bodies before they are parsed.
    pub async fn max_request_size(&self) -> UploadResult<u64> {
        self.max_size(
            FILE_UPLOAD_HANDLER_SLUG,
            self.defaults.default_max_upload_size * FILE_UPLOAD_HANDLER_SAFETY_FACTOR,
        )
        .await
    }

    pub async fn validate_files_sum_of_sizes(&self, sizes: &[u64]) -> UploadResult<()> {
        let total: u64 = sizes.iter().sum();
        let max = self.max_upload_size().await?;
        if total > max {
            tracing::warn!(total_bytes = total, max_bytes = max, "Upload exceeds size limit");
            return Err(Self::total_size_exceeded(max));
        }
        Ok(())
    }

    pub fn total_size_exceeded(max: u64) -> UploadError {
        UploadError::FileUploadLimit(format!(
            "Total upload size exceeds {}. Please try again with smaller files.",
            filesizeformat(max)
        ))
    }

    pub async fn validate_max_file_size(&self, size: u64) -> UploadResult<()> {
        let max = self.max_request_size().await?;
        if size > max {
            return Err(UploadError::FileUploadLimit(format!(
                "File size exceeds {}. Please try again with smaller files.",
                filesizeformat(max)
            )));
        }
        Ok(())
    }

    pub async fn validate_parallelism_limit_per_user(&self, user: &str) -> UploadResult<()> {
        let max = self
            .limits
            .get_parallelism_limit(DEFAULT_MAX_PARALLEL_UPLOADS_SLUG)
            .await?
            .map(|l| l.max_number)
            .unwrap_or(self.defaults.default_max_parallel_uploads_per_user);
        let in_flight = self.executions.count_in_flight_for_user(user).await?;
        if in_flight >= max as usize {
            tracing::warn!(user = %user, in_flight, max, "Parallel upload limit reached");
            return Err(UploadError::ParallelismLimit(format!(
                "The number of active parallel uploads exceeds {}. Wait for the pending ones to finish.",
                max
            )));
        }
        Ok(())
    }
}

/// Administrative operations on the limit tables.
#[derive(Clone)]
pub struct LimitsService {
    limits: Arc<dyn LimitsRepository>,
}

impl LimitsService {
    pub fn new(limits: Arc<dyn LimitsRepository>) -> Self {
        Self { limits }
    }

    pub async fn list_size_limits(&self) -> UploadResult<Vec<UploadSizeLimit>> {
        Ok(self.limits.list_size_limits().await?)
    }

    pub async fn list_parallelism_limits(&self) -> UploadResult<Vec<UploadParallelismLimit>> {
        Ok(self.limits.list_parallelism_limits().await?)
    }

    /// Create or update a size limit. Raising `total_upload_size_sum` raises
    /// `file_upload_handler` to keep the safety factor; lowering
    /// `file_upload_handler` below it is rejected.
    pub async fn update_size_limit(&self, limit: UploadSizeLimit) -> UploadResult<UploadSizeLimit> {
        match limit.slug.as_str() {
            TOTAL_UPLOAD_SIZE_SUM_SLUG => {
                let required = limit.max_size.saturating_mul(FILE_UPLOAD_HANDLER_SAFETY_FACTOR);
                let handler = self.limits.get_size_limit(FILE_UPLOAD_HANDLER_SLUG).await?;
                if handler.as_ref().map(|h| h.max_size < required).unwrap_or(true) {
                    let mut handler = handler.unwrap_or_else(|| {
                        UploadSizeLimit::new(FILE_UPLOAD_HANDLER_SLUG, None, required)
                    });
                    handler.max_size = required;
                    tracing::info!(max_size = required, "Raised file_upload_handler limit");
                    self.limits.upsert_size_limit(handler).await?;
                }
            }
            FILE_UPLOAD_HANDLER_SLUG => {
                if let Some(total) = self.limits.get_size_limit(TOTAL_UPLOAD_SIZE_SUM_SLUG).await? {
                    let required = total.max_size.saturating_mul(FILE_UPLOAD_HANDLER_SAFETY_FACTOR);
                    if limit.max_size < required {
                        return Err(UploadError::InvalidLimit(format!(
                            "To avoid errors, max size should be at least {} times {} ({}).",
                            FILE_UPLOAD_HANDLER_SAFETY_FACTOR,
                            TOTAL_UPLOAD_SIZE_SUM_SLUG,
                            filesizeformat(required)
                        )));
                    }
                }
            }
            _ => {}
        }
        Ok(self.limits.upsert_size_limit(limit).await?)
    }

    pub async fn delete_size_limit(&self, slug: &str) -> UploadResult<bool> {
        if UploadSizeLimit::new(slug, None, 0).is_protected() {
            return Err(UploadError::ProtectedLimit(slug.to_string()));
        }
        Ok(self.limits.delete_size_limit(slug).await?)
    }

    pub async fn update_parallelism_limit(
        &self,
        limit: UploadParallelismLimit,
    ) -> UploadResult<UploadParallelismLimit> {
        // 0 is valid and blocks new uploads.
        Ok(self.limits.upsert_parallelism_limit(limit).await?)
    }

    pub async fn delete_parallelism_limit(&self, slug: &str) -> UploadResult<bool> {
        if UploadParallelismLimit::new(slug, None, 0).is_protected() {
            return Err(UploadError::ProtectedLimit(slug.to_string()));
        }
        Ok(self.limits.delete_parallelism_limit(slug).await?)
    }
}
