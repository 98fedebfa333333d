//! Application-wide constants.

/// Size limit slug checked against the sum of all files of one upload.
pub const TOTAL_UPLOAD_SIZE_SUM_SLUG: &str = "total_upload_size_sum";

/// Size limit slug applied by the request body handler before buffering.
pub const FILE_UPLOAD_HANDLER_SLUG: &str = "file_upload_handler";

/// Parallelism limit slug applied per user.
pub const DEFAULT_MAX_PARALLEL_UPLOADS_SLUG: &str = "default_max_parallel_uploads";

/// Slugs that always exist and cannot be deleted.
pub const PROTECTED_SIZE_LIMIT_SLUGS: [&str; 2] =
    [TOTAL_UPLOAD_SIZE_SUM_SLUG, FILE_UPLOAD_HANDLER_SLUG];
pub const PROTECTED_PARALLELISM_LIMIT_SLUGS: [&str; 1] = [DEFAULT_MAX_PARALLEL_UPLOADS_SLUG];

/// The request-level limit must be at least this multiple of the aggregate limit.
pub const FILE_UPLOAD_HANDLER_SAFETY_FACTOR: u64 = 2;

/// Link type used for the resource/asset join of uploaded data.
pub const DATA_LINK_TYPE: &str = "data";

/// Asset type given to the files of an imported resource.
pub const ORIGINAL_ASSET_TYPE: &str = "original";
