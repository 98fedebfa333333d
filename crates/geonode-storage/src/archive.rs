//! Zip expansion for uploaded archives.
//!
//! A zipped shapefile arrives as one `base_file`. Expanding it re-keys the
//! sidecar members (`dbf_file`, `shx_file`, `prj_file`, `xml_file`,
//! `sld_file`) so import handlers see the same shape as a multi-file upload.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::traits::{StorageError, StorageResult};

/// Extensions that may be the main file of an archive, in priority order.
const BASE_EXTENSIONS: &[&str] = &["shp", "gpkg", "geojson", "json", "kml", "kmz", "csv", "tif", "tiff"];

fn sidecar_key(extension: &str) -> Option<&'static str> {
    match extension {
        "dbf" => Some("dbf_file"),
        "shx" => Some("shx_file"),
        "prj" => Some("prj_file"),
        "xml" => Some("xml_file"),
        "sld" => Some("sld_file"),
        _ => None,
    }
}

pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Extract `archive` into `dest` and return the files keyed like an upload
/// form. Entries escaping `dest` are rejected and nothing is returned. With
/// `max_bytes`, archives whose members add up to more are rejected, checked
/// against both the declared and the actually inflated sizes. A member whose
/// name is already taken in `dest` is written as `<n>_<name>`.
pub async fn expand_archive(
    archive: &Path,
    dest: &Path,
    max_bytes: Option<u64>,
) -> StorageResult<BTreeMap<String, PathBuf>> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut extracted = Vec::new();
        let result = expand_archive_blocking(&archive, &dest, max_bytes, &mut extracted);
        if result.is_err() {
            for path in &extracted {
                let _ = std::fs::remove_file(path);
            }
        }
        result
    })
    .await
    .map_err(|e| StorageError::BackendError(format!("Archive task failed: {}", e)))?
}

fn free_target(dest: &Path, relative: &Path) -> PathBuf {
    let target = dest.join(relative);
    if !target.exists() {
        return target;
    }
    let parent = target.parent().map(Path::to_path_buf).unwrap_or_else(|| dest.to_path_buf());
    let name = relative
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (1..)
        .map(|n| parent.join(format!("{}_{}", n, name)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(target)
}

fn expand_archive_blocking(
    archive: &Path,
    dest: &Path,
    max_bytes: Option<u64>,
    extracted: &mut Vec<PathBuf>,
) -> StorageResult<BTreeMap<String, PathBuf>> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| StorageError::InvalidKey(format!("{}: {}", archive.display(), e)))?;

    if let Some(limit) = max_bytes {
        let mut declared: u64 = 0;
        for index in 0..zip.len() {
            let entry = zip
                .by_index_raw(index)
                .map_err(|e| StorageError::InvalidKey(format!("{}: {}", archive.display(), e)))?;
            declared = declared.saturating_add(entry.size());
        }
        if declared > limit {
            tracing::warn!(archive = %archive.display(), declared, limit, "Archive too large to expand");
            return Err(StorageError::SizeLimitExceeded { limit });
        }
    }

    let mut inflated: u64 = 0;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| StorageError::InvalidKey(format!("{}: {}", archive.display(), e)))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!(entry = %entry.name(), "Archive entry escapes extraction folder");
            return Err(StorageError::SuspiciousFileOperation(entry.name().to_string()));
        };
        if entry.is_dir() {
            std::fs::create_dir_all(dest.join(&relative))?;
            continue;
        }
        let target = free_target(dest, &relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        extracted.push(target);
        // Declared sizes can lie; never inflate past the remaining budget.
        let written = match max_bytes {
            Some(limit) => {
                let remaining = limit.saturating_sub(inflated);
                io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut out)?
            }
            None => io::copy(&mut entry, &mut out)?,
        };
        inflated = inflated.saturating_add(written);
        if let Some(limit) = max_bytes {
            if inflated > limit {
                tracing::warn!(archive = %archive.display(), limit, "Archive inflates past the size limit");
                return Err(StorageError::SizeLimitExceeded { limit });
            }
        }
    }
    let extracted = extracted.clone();

    let extension_of = |p: &Path| {
        p.extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default()
    };

    let mut keyed = BTreeMap::new();
    let base = BASE_EXTENSIONS.iter().find_map(|wanted| {
        extracted
            .iter()
            .find(|p| extension_of(p) == *wanted)
            .cloned()
    });
    if let Some(base) = base {
        keyed.insert("base_file".to_string(), base);
    }
    for path in &extracted {
        if let Some(key) = sidecar_key(&extension_of(path)) {
            keyed.entry(key.to_string()).or_insert_with(|| path.clone());
        }
    }

    tracing::debug!(
        archive = %archive.display(),
        entries = extracted.len(),
        keys = ?keyed.keys().collect::<Vec<_>>(),
        "Archive expanded"
    );
    Ok(keyed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, content) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn shapefile_members_are_rekeyed() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("roads.zip");
        write_zip(
            &archive,
            &[
                ("roads.shp", b"shp"),
                ("roads.dbf", b"dbf"),
                ("roads.shx", b"shx"),
                ("roads.prj", b"prj"),
            ],
        );
        let out = dir.path().join("out");

        let keyed = expand_archive(&archive, &out, None).await.unwrap();
        assert_eq!(keyed["base_file"], out.join("roads.shp"));
        assert_eq!(keyed["dbf_file"], out.join("roads.dbf"));
        assert_eq!(keyed["shx_file"], out.join("roads.shx"));
        assert_eq!(keyed["prj_file"], out.join("roads.prj"));
        assert!(!keyed.contains_key("sld_file"));
        assert_eq!(std::fs::read(out.join("roads.dbf")).unwrap(), b"dbf");
    }

    #[tokio::test]
    async fn traversal_entries_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../evil.shp", b"x")]);

        let result = expand_archive(&archive, &dir.path().join("out"), None).await;
        assert!(matches!(result, Err(StorageError::SuspiciousFileOperation(_))));
        assert!(!dir.path().join("evil.shp").exists());
    }

    #[tokio::test]
    async fn members_over_the_limit_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bomb.zip");
        let filler = vec![0u8; 4096];
        write_zip(&archive, &[("roads.shp", b"shp"), ("padding.bin", &filler)]);
        let out = dir.path().join("out");

        let result = expand_archive(&archive, &out, Some(1024)).await;
        assert!(matches!(result, Err(StorageError::SizeLimitExceeded { limit: 1024 })));
        assert!(!out.join("padding.bin").exists());

        let keyed = expand_archive(&archive, &out, Some(8192)).await.unwrap();
        assert_eq!(keyed["base_file"], out.join("roads.shp"));
    }

    #[tokio::test]
    async fn taken_names_are_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("roads.dbf"), b"uploaded").unwrap();
        let archive = dir.path().join("roads.zip");
        write_zip(&archive, &[("roads.shp", b"shp"), ("roads.dbf", b"zipped")]);

        let keyed = expand_archive(&archive, &out, None).await.unwrap();
        assert_eq!(keyed["dbf_file"], out.join("1_roads.dbf"));
        assert_eq!(std::fs::read(out.join("roads.dbf")).unwrap(), b"uploaded");
        assert_eq!(std::fs::read(out.join("1_roads.dbf")).unwrap(), b"zipped");
    }

    #[test]
    fn zip_detection_is_case_insensitive() {
        assert!(is_zip(Path::new("/tmp/a.ZIP")));
        assert!(!is_zip(Path::new("/tmp/a.shp")));
    }
}
