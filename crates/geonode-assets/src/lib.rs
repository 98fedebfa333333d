//! GeoNode Assets Library
//!
//! Asset handlers own the files behind an [`Asset`](geonode_core::models::Asset)
//! row: they store, clone, remove and serve them. Handlers are looked up by
//! the asset's kind through the [`AssetHandlerRegistry`], which is built once
//! from configuration.

pub mod download;
pub mod error;
pub mod handler;
pub mod local;
pub mod registry;
pub mod utils;
pub mod zip_stream;

pub use download::{AssetDownloadHandler, DownloadResponse, LocalAssetDownloadHandler};
pub use error::{AssetError, AssetResult};
pub use handler::{AssetHandler, CreateAsset};
pub use local::LocalAssetHandler;
pub use registry::AssetHandlerRegistry;
pub use utils::{copy_assets_and_links, create_asset_and_link, get_default_asset, NewAssetLink};
