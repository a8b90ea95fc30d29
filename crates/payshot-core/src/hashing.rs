//! Content hashing and byte-identical duplicate detection.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::models::image::{ContentHash, ImageRef};
use crate::models::report::HashFailure;

const CHUNK_SIZE: usize = 64 * 1024;

/// Hash a file's full content, streaming fixed-size chunks.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(ContentHash::from_digest(&hasher.finalize()))
}

/// Images sharing identical content. The first member is canonical.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub hash: ContentHash,
    pub members: Vec<ImageRef>,
}

impl DuplicateGroup {
    pub fn canonical(&self) -> &ImageRef {
        &self.members[0]
    }

    /// Members other than the canonical one.
    pub fn duplicates(&self) -> &[ImageRef] {
        &self.members[1..]
    }
}

/// Result of partitioning a batch by content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashPartition {
    /// One image per distinct content, in stable input order.
    pub canonical: Vec<ImageRef>,
    /// Hashes shared by two or more images, in first-seen order.
    pub groups: Vec<DuplicateGroup>,
    /// Files excluded because hashing failed.
    pub failures: Vec<HashFailure>,
}

impl HashPartition {
    /// Images excluded from recognition as content duplicates.
    pub fn duplicate_file_count(&self) -> usize {
        self.groups.iter().map(|g| g.members.len() - 1).sum()
    }

    /// Images across all duplicate groups, canonical members included.
    pub fn grouped_file_count(&self) -> usize {
        self.groups.iter().map(|g| g.members.len()).sum()
    }
}

/// Partitions an image set by content hash.
pub struct ContentHashIndex;

impl ContentHashIndex {
    /// Hash every image with [`hash_file`] and partition the set.
    pub fn build(images: Vec<ImageRef>) -> HashPartition {
        Self::build_with(images, |image| hash_file(&image.path))
    }

    /// Partition with a caller-supplied hash function.
    ///
    /// Input is sorted by relative path first, so the canonical member of
    /// each group does not depend on discovery order.
    pub fn build_with<F>(mut images: Vec<ImageRef>, mut hash: F) -> HashPartition
    where
        F: FnMut(&ImageRef) -> io::Result<ContentHash>,
    {
        images.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        let mut partition = HashPartition::default();
        let mut seen: HashMap<ContentHash, usize> = HashMap::new();
        let mut group_of: HashMap<ContentHash, usize> = HashMap::new();

        for image in images {
            let digest = match hash(&image) {
                Ok(digest) => digest,
                Err(e) => {
                    warn!("Failed to hash {}: {}", image.relative_path, e);
                    partition.failures.push(HashFailure {
                        relative_path: image.relative_path.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            match seen.get(&digest) {
                None => {
                    seen.insert(digest, partition.canonical.len());
                    partition.canonical.push(image);
                }
                Some(&canonical_idx) => {
                    debug!("Duplicate content {}: {}", digest.short(), image.relative_path);
                    let group_idx = *group_of.entry(digest.clone()).or_insert_with(|| {
                        partition.groups.push(DuplicateGroup {
                            hash: digest.clone(),
                            members: vec![partition.canonical[canonical_idx].clone()],
                        });
                        partition.groups.len() - 1
                    });
                    partition.groups[group_idx].members.push(image);
                }
            }
        }

        info!(
            "Content hashing: {} distinct, {} duplicate groups ({} files), {} failures",
            partition.canonical.len(),
            partition.groups.len(),
            partition.grouped_file_count(),
            partition.failures.len()
        );

        partition
    }
}
