/// Prefix of every versioned route.
pub const API_PREFIX: &str = "/api/v2";

/// Header carrying the caller's identity, set by the authenticating proxy.
pub const USER_HEADER: &str = "x-user-id";

/// Multipart fields accepted as upload files.
pub const FILE_FIELDS: [&str; 6] = [
    "base_file",
    "dbf_file",
    "shx_file",
    "prj_file",
    "xml_file",
    "sld_file",
];
