use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::constants::{PROTECTED_PARALLELISM_LIMIT_SLUGS, PROTECTED_SIZE_LIMIT_SLUGS};

/// Named byte limit, e.g. `total_upload_size_sum`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UploadSizeLimit {
    pub slug: String,
    pub description: Option<String>,
    pub max_size: u64,
}

impl UploadSizeLimit {
    pub fn new(slug: impl Into<String>, description: Option<&str>, max_size: u64) -> Self {
        Self {
            slug: slug.into(),
            description: description.map(str::to_string),
            max_size,
        }
    }

    /// Protected limits back the default policy and cannot be deleted.
    pub fn is_protected(&self) -> bool {
        PROTECTED_SIZE_LIMIT_SLUGS.contains(&self.slug.as_str())
    }

    /// `max_size` rendered with a binary unit, as shown in limit errors.
    pub fn max_size_label(&self) -> String {
        filesizeformat(self.max_size)
    }
}

/// Named concurrency limit, e.g. `default_max_parallel_uploads`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UploadParallelismLimit {
    pub slug: String,
    pub description: Option<String>,
    pub max_number: u32,
}

impl UploadParallelismLimit {
    pub fn new(slug: impl Into<String>, description: Option<&str>, max_number: u32) -> Self {
        Self {
            slug: slug.into(),
            description: description.map(str::to_string),
            max_number,
        }
    }

    pub fn is_protected(&self) -> bool {
        PROTECTED_PARALLELISM_LIMIT_SLUGS.contains(&self.slug.as_str())
    }
}

/// Human readable byte count ("100.0 MB").
pub fn filesizeformat(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{
        DEFAULT_MAX_PARALLEL_UPLOADS_SLUG, FILE_UPLOAD_HANDLER_SLUG, TOTAL_UPLOAD_SIZE_SUM_SLUG,
    };

    #[test]
    fn protected_slugs() {
        assert!(UploadSizeLimit::new(TOTAL_UPLOAD_SIZE_SUM_SLUG, None, 1).is_protected());
        assert!(UploadSizeLimit::new(FILE_UPLOAD_HANDLER_SLUG, None, 1).is_protected());
        assert!(!UploadSizeLimit::new("document_upload_size", None, 1).is_protected());
        assert!(
            UploadParallelismLimit::new(DEFAULT_MAX_PARALLEL_UPLOADS_SLUG, None, 5).is_protected()
        );
    }

    #[test]
    fn size_labels() {
        assert_eq!(filesizeformat(512), "512 bytes");
        assert_eq!(filesizeformat(100 * 1024 * 1024), "100.0 MB");
        assert_eq!(filesizeformat(1536), "1.5 KB");
    }
}
