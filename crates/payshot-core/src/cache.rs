//! Persistent fingerprint cache of extraction results.
//!
//! The store is one JSON document per result directory: an object keyed by
//! fingerprint whose values are [`ExtractionRecord`]s. It is loaded once at
//! batch start, mutated in memory, and flushed once after every worker has
//! finished.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::models::image::Fingerprint;
use crate::models::record::ExtractionRecord;

/// In-memory cache store bound to its backing file.
#[derive(Debug, Clone)]
pub struct FingerprintCache {
    path: PathBuf,
    entries: BTreeMap<Fingerprint, ExtractionRecord>,
}

/// Summary of a cache document.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CacheStats {
    /// Stored entries.
    pub entries: usize,
    /// Entries carrying both fields.
    pub complete_entries: usize,
    /// Complete entries per folder label.
    pub folders: BTreeMap<String, usize>,
}

impl FingerprintCache {
    /// Empty store that will flush to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the store at `path`. A missing file is a valid empty cache; an
    /// unreadable or malformed file is discarded with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        if !path.exists() {
            debug!("no cache at {}, starting empty", path.display());
            return Self::empty(path);
        }

        match read_entries(&path) {
            Ok(entries) => {
                info!("Loaded cache: {} records from {}", entries.len(), path.display());
                Self { path, entries }
            }
            Err(e) => {
                warn!("Discarding cache: {}", e);
                Self::empty(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached record for `fingerprint`, only if it is complete.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<ExtractionRecord> {
        self.entries
            .get(fingerprint)
            .filter(|record| record.is_complete())
            .cloned()
    }

    /// Store `record`, replacing any previous entry. Incomplete records are
    /// never stored; returns whether the record was accepted.
    pub fn put(&mut self, fingerprint: Fingerprint, record: ExtractionRecord) -> bool {
        if !record.is_complete() {
            debug!("refusing incomplete cache record for {}", record.relative_path);
            return false;
        }
        self.entries.insert(fingerprint, record);
        true
    }

    /// Write the whole store atomically (temporary file, then rename).
    /// Repeating a flush rewrites identical content.
    pub fn flush(&self) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CacheError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_string_pretty(&self.entries)?;
        let tmp = temp_path(&self.path);

        fs::write(&tmp, content).map_err(|source| CacheError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| CacheError::Write {
            path: self.path.clone(),
            source,
        })?;

        info!("Cache saved: {} records to {}", self.entries.len(), self.path.display());
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            entries: self.entries.len(),
            ..CacheStats::default()
        };

        for record in self.entries.values().filter(|r| r.is_complete()) {
            stats.complete_entries += 1;
            *stats.folders.entry(record.folder.clone()).or_default() += 1;
        }

        stats
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<Fingerprint, ExtractionRecord>, CacheError> {
    let content = fs::read_to_string(path).map_err(|source| CacheError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CacheError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Copy the cache file to `ocr_cache_backup_<timestamp>.json` next to it.
/// Returns `None` when there is nothing to back up.
pub fn backup(path: &Path) -> Result<Option<PathBuf>, CacheError> {
    if !path.exists() {
        return Ok(None);
    }

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let backup = path.with_file_name(format!("ocr_cache_backup_{}.json", timestamp));

    fs::copy(path, &backup).map_err(|source| CacheError::Write {
        path: backup.clone(),
        source,
    })?;

    info!("Backed up cache to {}", backup.display());
    Ok(Some(backup))
}

/// Back up and remove the cache file so the next run recognizes everything.
pub fn clear(path: &Path) -> Result<Option<PathBuf>, CacheError> {
    let backup = backup(path)?;
    if backup.is_some() {
        fs::remove_file(path).map_err(|source| CacheError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn record(order: Option<&str>, amount: Option<&str>) -> ExtractionRecord {
        ExtractionRecord {
            order_number: order.map(str::to_string),
            amount: amount.map(|a| Decimal::from_str(a).unwrap()),
            folder: "shop".to_string(),
            relative_path: "shop/a.jpg".to_string(),
            extraction_time: "2025-09-21 10:00:00".to_string(),
        }
    }

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from(s.to_string())
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FingerprintCache::load(dir.path().join("ocr_cache.json"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_malformed_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocr_cache.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(FingerprintCache::load(&path).is_empty());

        fs::write(&path, r#"{"abc": {"amount": "twelve"}}"#).unwrap();
        assert!(FingerprintCache::load(&path).is_empty());
    }

    #[test]
    fn test_put_flush_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ocr_cache.json");

        let mut cache = FingerprintCache::load(&path);
        assert!(cache.put(fp("k1"), record(Some("420000279120250921795551234"), Some("128.50"))));
        cache.flush().unwrap();
        cache.flush().unwrap();

        let reloaded = FingerprintCache::load(&path);
        assert_eq!(reloaded.len(), 1);
        let hit = reloaded.lookup(&fp("k1")).unwrap();
        assert_eq!(hit.order_number.as_deref(), Some("420000279120250921795551234"));
        assert_eq!(hit.amount, Some(Decimal::from_str("128.5").unwrap()));
        assert!(reloaded.lookup(&fp("k2")).is_none());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_incomplete_records_are_refused() {
        let mut cache = FingerprintCache::empty("unused.json");
        assert!(!cache.put(fp("k"), record(Some("x".repeat(20).as_str()), None)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lookup_revalidates_hand_edited_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocr_cache.json");
        fs::write(
            &path,
            r#"{
                "good": {"order_number": "100012345678901234567890", "amount": 9.9,
                         "folder": ".", "relative_path": "a.jpg", "extraction_time": ""},
                "partial": {"order_number": null, "amount": 9.9,
                            "folder": ".", "relative_path": "b.jpg", "extraction_time": ""}
            }"#,
        )
        .unwrap();

        let cache = FingerprintCache::load(&path);
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&fp("good")).is_some());
        assert!(cache.lookup(&fp("partial")).is_none());
        assert_eq!(cache.stats().complete_entries, 1);
    }

    #[test]
    fn test_clear_backs_up_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocr_cache.json");
        assert_eq!(clear(&path).unwrap(), None);

        let mut cache = FingerprintCache::empty(&path);
        cache.put(fp("k"), record(Some("100012345678901234567890"), Some("1.00")));
        cache.flush().unwrap();

        let backup = clear(&path).unwrap().unwrap();
        assert!(backup.exists());
        assert!(!path.exists());
        assert_eq!(FingerprintCache::load(&backup).len(), 1);
    }
}
