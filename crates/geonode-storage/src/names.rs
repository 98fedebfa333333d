//! Shared name handling for storage backends.

use rand::distr::Alphanumeric;
use rand::Rng;
use std::path::{Component, Path};

use crate::traits::{StorageError, StorageResult};

/// Keep alphanumerics, `-`, `_` and `.`; spaces become `_`.
pub fn get_valid_filename(name: &str) -> String {
    name.trim()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' => Some(c),
            _ => None,
        })
        .collect()
}

pub fn generate_filename(name: &str) -> String {
    let path = Path::new(name);
    let file_name = path
        .file_name()
        .map(|n| get_valid_filename(&n.to_string_lossy()))
        .unwrap_or_default();
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            format!("{}/{}", parent.to_string_lossy().trim_end_matches('/'), file_name)
        }
        _ => file_name,
    }
}

/// `dir/stem.ext` becomes `dir/stem_<7 random chars>.ext`.
pub fn alternative_name(name: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect();
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}_{}", stem, suffix),
    };
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(file_name).to_string_lossy().into_owned()
        }
        _ => file_name,
    }
}

/// Object key for a name: no leading `/`, no `..` components.
pub fn object_key(name: &str) -> StorageResult<String> {
    if Path::new(name)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(StorageError::SuspiciousFileOperation(name.to_string()));
    }
    let key = name.trim_start_matches('/');
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty name".to_string()));
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_filename_strips_unsafe_characters() {
        assert_eq!(get_valid_filename(" my file (1).shp "), "my_file_1.shp");
        assert_eq!(generate_filename("dir/sub/a b.tif"), "dir/sub/a_b.tif");
        assert_eq!(generate_filename("a$b.csv"), "ab.csv");
    }

    #[test]
    fn alternative_name_keeps_directory_and_extension() {
        let alt = alternative_name("layers/roads.shp");
        assert!(alt.starts_with("layers/roads_"));
        assert!(alt.ends_with(".shp"));
        assert_eq!(alt.len(), "layers/roads_.shp".len() + 7);
    }

    #[test]
    fn object_key_rejects_traversal() {
        assert_eq!(object_key("/a/b.tif").unwrap(), "a/b.tif");
        assert!(matches!(
            object_key("a/../../etc/passwd"),
            Err(StorageError::SuspiciousFileOperation(_))
        ));
        assert!(object_key("/").is_err());
    }
}
