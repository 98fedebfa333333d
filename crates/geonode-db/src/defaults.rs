//! Limits every deployment starts with.

use geonode_core::constants::{
    DEFAULT_MAX_PARALLEL_UPLOADS_SLUG, FILE_UPLOAD_HANDLER_SAFETY_FACTOR,
    FILE_UPLOAD_HANDLER_SLUG, TOTAL_UPLOAD_SIZE_SUM_SLUG,
};
use geonode_core::models::{UploadParallelismLimit, UploadSizeLimit};
use geonode_core::LimitsConfig;

/// The aggregate upload limit and the request-level limit, which starts at
/// the safety factor times the aggregate one.
pub fn protected_size_limits(config: &LimitsConfig) -> Vec<UploadSizeLimit> {
    vec![
        UploadSizeLimit::new(
            TOTAL_UPLOAD_SIZE_SUM_SLUG,
            Some("The sum of sizes for the files of a dataset upload."),
            config.default_max_upload_size,
        ),
        UploadSizeLimit::new(
            FILE_UPLOAD_HANDLER_SLUG,
            Some("Request total size, validated before the upload process."),
            config
                .default_max_upload_size
                .saturating_mul(FILE_UPLOAD_HANDLER_SAFETY_FACTOR),
        ),
    ]
}

pub fn protected_parallelism_limits(config: &LimitsConfig) -> Vec<UploadParallelismLimit> {
    vec![UploadParallelismLimit::new(
        DEFAULT_MAX_PARALLEL_UPLOADS_SLUG,
        Some("The default maximum parallel uploads per user."),
        config.default_max_parallel_uploads_per_user,
    )]
}
