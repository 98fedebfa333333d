//! GeoNode Storage Library
//!
//! Storage backends behind one file-lifecycle contract, the
//! [`StorageManager`] facade that implements replace/copy policy, and the
//! [`DataRetriever`] that stages uploaded, local and remote files into an
//! exclusive temporary folder.
//!
//! # Names
//!
//! Backends address files by name. The local backend accepts names relative
//! to its root, or absolute paths inside it; anything resolving outside the
//! root is a [`StorageError::SuspiciousFileOperation`]. Object backends use
//! names as object keys with any leading `/` removed.

pub mod archive;
pub mod data_retriever;
pub mod dropbox;
pub mod factory;
pub mod local;
pub mod manager;
pub(crate) mod names;
pub mod object;
pub mod remote;
pub mod traits;

// Re-export commonly used types
pub use archive::{expand_archive, is_zip};
pub use data_retriever::{
    remove_staging_folder, DataItemRetriever, DataRetriever, DataRetrieverError, FileSource,
    StagedFiles,
};
pub use dropbox::DropboxStorage;
pub use factory::create_storage;
pub use geonode_core::StorageBackend;
pub use local::LocalStorage;
pub use manager::{FileSet, StorageManager};
pub use object::{GcsStorage, ObjectStorage, S3Storage};
pub use remote::{remote_file_name, RemoteHostRegistry, RemoteOpener};
pub use traits::{ByteStream, Storage, StorageError, StorageResult};
