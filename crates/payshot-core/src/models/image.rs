//! Image identity: discovered files, cache fingerprints and content hashes.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Folder label used for images sitting directly in the batch root.
pub const ROOT_FOLDER: &str = ".";

/// A discovered image file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,

    /// Path relative to the batch root, `/`-separated.
    pub relative_path: String,

    /// File size in bytes.
    pub size: u64,

    /// Last modification time.
    pub modified: SystemTime,
}

impl ImageRef {
    /// Stat `path` and describe it relative to `root`.
    pub fn from_path(root: &Path, path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            relative_path: relative_string(root, path),
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }

    /// Grouping label: the relative parent directory, or [`ROOT_FOLDER`].
    pub fn folder(&self) -> String {
        match self.relative_path.rsplit_once('/') {
            Some((parent, _)) if !parent.is_empty() => parent.to_string(),
            _ => ROOT_FOLDER.to_string(),
        }
    }

    /// Bare file name.
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.relative_path)
    }

    /// Cache key for this file.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.relative_path, self.size, self.modified)
    }
}

fn relative_string(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Cheap identity key derived from relative path, size and modification time.
///
/// Two files with equal fingerprints are treated as the same logical file for
/// caching, regardless of their content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(relative_path: &str, size: u64, modified: SystemTime) -> Self {
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let mut hasher = Sha256::new();
        hasher.update(format!("{relative_path}:{size}:{nanos}").as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// SHA-256 digest of a file's full content, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn image(relative_path: &str) -> ImageRef {
        ImageRef {
            path: PathBuf::from("/batch").join(relative_path),
            relative_path: relative_path.to_string(),
            size: 10,
            modified: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    #[test]
    fn test_folder_and_file_name() {
        let nested = image("shop/2024/a.jpg");
        assert_eq!(nested.folder(), "shop/2024");
        assert_eq!(nested.file_name(), "a.jpg");

        let top = image("b.png");
        assert_eq!(top.folder(), ROOT_FOLDER);
        assert_eq!(top.file_name(), "b.png");
    }

    #[test]
    fn test_fingerprint_changes_with_size_and_mtime() {
        let base = image("a.jpg");
        let mut resized = base.clone();
        resized.size = 11;
        let mut touched = base.clone();
        touched.modified += Duration::from_secs(1);

        assert_eq!(base.fingerprint(), image("a.jpg").fingerprint());
        assert_ne!(base.fingerprint(), resized.fingerprint());
        assert_ne!(base.fingerprint(), touched.fingerprint());
    }

    #[test]
    fn test_relative_string_uses_forward_slashes() {
        let root = Path::new("/batch");
        let path = root.join("x").join("y.jpg");
        assert_eq!(relative_string(root, &path), "x/y.jpg");
    }
}
