//! Tile pyramid indexer
//!
//! Enumerates the tile addresses present under a `zoom/x/y.*` directory
//! pyramid. Only file existence and address parsing are consulted; nothing
//! is decoded here. Entries with unparsable names are skipped rather than
//! failing the walk, so a partially populated or untidy pyramid yields a
//! smaller valid set instead of aborting dataset assembly.

use crate::tile::TileAddress;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while enumerating a pyramid.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The pyramid root does not exist or is not a directory
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// I/O failure while listing directory contents
    #[error("Failed to list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Enumerates every tile address with a readable file under `root`.
///
/// Walks `root/<zoom>/<x>/<y>.<ext>` for any extension. Directory names
/// that are not non-negative integers, file stems that do not parse, and
/// addresses outside the `[0, 2^zoom)` range are all skipped silently.
///
/// # Errors
///
/// Returns `IndexError::DirectoryNotFound` if `root` is missing, or
/// `IndexError::Io` if a directory listing fails mid-walk.
pub fn enumerate(root: &Path) -> Result<BTreeSet<TileAddress>, IndexError> {
    if !root.is_dir() {
        return Err(IndexError::DirectoryNotFound(root.to_path_buf()));
    }

    let mut addresses = BTreeSet::new();
    let mut skipped = 0usize;

    for zoom_entry in list_dir(root)? {
        let Some(zoom_name) = dir_name(&zoom_entry) else {
            skipped += 1;
            continue;
        };

        for x_entry in list_dir(&zoom_entry)? {
            let Some(x_name) = dir_name(&x_entry) else {
                skipped += 1;
                continue;
            };

            for y_entry in list_dir(&x_entry)? {
                match tile_stem(&y_entry)
                    .and_then(|y| TileAddress::parse_components(&zoom_name, &x_name, &y))
                {
                    Some(address) => {
                        addresses.insert(address);
                    }
                    None => skipped += 1,
                }
            }
        }
    }

    debug!(
        root = %root.display(),
        tiles = addresses.len(),
        skipped,
        "Enumerated tile pyramid"
    );

    Ok(addresses)
}

/// Lists the entries of one directory, attributing I/O failures to it.
fn list_dir(path: &Path) -> Result<Vec<PathBuf>, IndexError> {
    let entries = fs::read_dir(path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        paths.push(entry.path());
    }
    Ok(paths)
}

/// Returns the name of a directory entry, or `None` for non-directories.
fn dir_name(path: &Path) -> Option<String> {
    if !path.is_dir() {
        return None;
    }
    path.file_name()?.to_str().map(str::to_owned)
}

/// Returns the stem of a regular tile file (`105841` from `105841.png`).
///
/// Files without an extension are skipped: every decodable raster format
/// the pipeline consumes carries one, and extension-less entries in real
/// pyramids are invariably scratch files.
fn tile_stem(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    path.extension()?;
    path.file_stem()?.to_str().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(path).unwrap();
    }

    fn addr(zoom: u8, x: u32, y: u32) -> TileAddress {
        TileAddress::new(zoom, x, y).unwrap()
    }

    #[test]
    fn test_enumerate_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let result = enumerate(&dir.path().join("absent"));
        assert!(matches!(result, Err(IndexError::DirectoryNotFound(_))));
    }

    #[test]
    fn test_enumerate_empty_root() {
        let dir = TempDir::new().unwrap();
        let tiles = enumerate(dir.path()).unwrap();
        assert!(tiles.is_empty());
    }

    #[test]
    fn test_enumerate_finds_tiles() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "18/69105/105841.png");
        touch(dir.path(), "18/69105/105842.png");
        touch(dir.path(), "18/69106/105841.jpg");

        let tiles = enumerate(dir.path()).unwrap();
        assert_eq!(tiles.len(), 3);
        assert!(tiles.contains(&addr(18, 69105, 105841)));
        assert!(tiles.contains(&addr(18, 69105, 105842)));
        assert!(tiles.contains(&addr(18, 69106, 105841)));
    }

    #[test]
    fn test_enumerate_is_extension_agnostic() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "10/1/2.png");
        touch(dir.path(), "10/1/3.webp");
        touch(dir.path(), "10/1/4.tif");

        let tiles = enumerate(dir.path()).unwrap();
        assert_eq!(tiles.len(), 3);
    }

    #[test]
    fn test_enumerate_skips_malformed_directories() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "18/69105/105841.png");
        // Unparsable zoom and x directories must be skipped, not fatal
        fs::create_dir_all(dir.path().join("thumbnails/1")).unwrap();
        touch(dir.path(), "18/notanumber/1.png");
        touch(dir.path(), "-3/1/1.png");

        let tiles = enumerate(dir.path()).unwrap();
        assert_eq!(tiles.len(), 1);
        assert!(tiles.contains(&addr(18, 69105, 105841)));
    }

    #[test]
    fn test_enumerate_skips_unexpected_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "12/100/200.png");
        touch(dir.path(), "12/100/.DS_Store.tmp");
        touch(dir.path(), "12/100/readme.txt");
        touch(dir.path(), "12/100/noextension");
        touch(dir.path(), "stray.json");

        let tiles = enumerate(dir.path()).unwrap();
        assert_eq!(tiles.len(), 1);
    }

    #[test]
    fn test_enumerate_skips_out_of_range_addresses() {
        let dir = TempDir::new().unwrap();
        // x=4 cannot exist at zoom 2 (pyramid is 4 wide)
        touch(dir.path(), "2/4/0.png");
        touch(dir.path(), "2/3/3.png");

        let tiles = enumerate(dir.path()).unwrap();
        assert_eq!(tiles.len(), 1);
        assert!(tiles.contains(&addr(2, 3, 3)));
    }

    #[test]
    fn test_enumerate_mixed_zoom_levels() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "17/34552/52920.png");
        touch(dir.path(), "18/69105/105841.png");

        let tiles = enumerate(dir.path()).unwrap();
        assert_eq!(tiles.len(), 2);

        // BTreeSet yields structural order: zoom 17 before zoom 18
        let ordered: Vec<_> = tiles.iter().copied().collect();
        assert_eq!(ordered[0].zoom, 17);
        assert_eq!(ordered[1].zoom, 18);
    }

    #[test]
    fn test_enumerate_does_not_decode() {
        let dir = TempDir::new().unwrap();
        // Not a real PNG; existence is all that matters here
        let path = dir.path().join("5/1/2.png");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"not image bytes").unwrap();

        let tiles = enumerate(dir.path()).unwrap();
        assert!(tiles.contains(&addr(5, 1, 2)));
    }
}
