//! Local image store.
//!
//! Images are kept as OCI layouts under `<store>/sha256/<manifest hex>/`,
//! shared between all references that resolve to the same manifest. The
//! reference table lives in memory and is mirrored to `<store>/index.json`
//! after every change.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use restack_core::error::{RestackError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::image::OciImage;
use super::layers::strip_algorithm;

/// One reference in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    /// Fully qualified reference (`docker.io/library/alpine:3.19`)
    pub reference: String,
    /// Manifest digest
    pub digest: String,
    /// Bytes on disk for the layout
    pub size_bytes: u64,
    pub saved_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    /// Layout directory
    pub path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    images: Vec<StoredImage>,
}

/// Disk-backed image store with least-recently-used eviction.
pub struct ImageStore {
    root: PathBuf,
    max_size_bytes: u64,
    images: RwLock<BTreeMap<String, StoredImage>>,
}

impl ImageStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: &Path, max_size_bytes: u64) -> Result<Self> {
        std::fs::create_dir_all(root.join("sha256")).map_err(|e| {
            RestackError::OciImageError(format!(
                "Failed to create image store {}: {}",
                root.display(),
                e
            ))
        })?;

        let images = read_index(&root.join("index.json"))?
            .images
            .into_iter()
            .filter(|image| image.path.is_dir())
            .map(|image| (image.reference.clone(), image))
            .collect();

        Ok(Self {
            root: root.to_path_buf(),
            max_size_bytes,
            images: RwLock::new(images),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for staging data before it is stored.
    pub fn staging_dir(&self) -> Result<tempfile::TempDir> {
        let tmp = self.root.join("tmp");
        std::fs::create_dir_all(&tmp)?;
        Ok(tempfile::Builder::new().prefix("staging-").tempdir_in(tmp)?)
    }

    /// Look up a reference and mark it used.
    pub async fn get(&self, reference: &str) -> Result<Option<StoredImage>> {
        let found = {
            let mut images = self.images.write().await;
            images.get_mut(reference).map(|image| {
                image.last_used = Utc::now();
                image.clone()
            })
        };
        if found.is_some() {
            self.persist().await?;
        }
        Ok(found)
    }

    /// Store `image` under `reference`, replacing any previous entry.
    ///
    /// The layout is copied unless the store already holds the same
    /// manifest.
    pub async fn put(&self, reference: &str, image: &OciImage) -> Result<StoredImage> {
        let digest = image.digest().to_string();
        let target = self.root.join("sha256").join(strip_algorithm(&digest));

        if !target.is_dir() {
            let partial = target.with_extension("partial");
            if partial.exists() {
                std::fs::remove_dir_all(&partial)?;
            }
            copy_layout(image.root_dir(), &partial).map_err(|e| {
                RestackError::OciImageError(format!(
                    "Failed to copy image into store: {}",
                    e
                ))
            })?;
            std::fs::rename(&partial, &target)?;
        }

        let now = Utc::now();
        let stored = StoredImage {
            reference: reference.to_string(),
            digest,
            size_bytes: dir_size(&target),
            saved_at: now,
            last_used: now,
            path: target,
        };

        self.images
            .write()
            .await
            .insert(reference.to_string(), stored.clone());
        self.persist().await?;

        tracing::debug!(reference, digest = %stored.digest, "Stored image");

        let evicted = self.evict(reference).await?;
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), references = ?evicted, "Evicted images from store");
        }
        Ok(stored)
    }

    /// Remove a reference; the layout goes once nothing else points at it.
    pub async fn remove(&self, reference: &str) -> Result<StoredImage> {
        let (removed, shared) = {
            let mut images = self.images.write().await;
            let removed = images.remove(reference).ok_or_else(|| {
                RestackError::OciImageError(format!("Image not found: {}", reference))
            })?;
            let shared = images.values().any(|other| other.path == removed.path);
            (removed, shared)
        };

        if !shared && removed.path.exists() {
            std::fs::remove_dir_all(&removed.path)?;
        }
        self.persist().await?;
        Ok(removed)
    }

    /// All references, sorted.
    pub async fn list(&self) -> Vec<StoredImage> {
        self.images.read().await.values().cloned().collect()
    }

    /// Bytes used by distinct layouts.
    pub async fn total_size(&self) -> u64 {
        let images = self.images.read().await;
        let mut seen = std::collections::HashSet::new();
        images
            .values()
            .filter(|image| seen.insert(image.path.clone()))
            .map(|image| image.size_bytes)
            .sum()
    }

    /// Drop least recently used references until the store fits its limit.
    /// `keep` is never evicted.
    async fn evict(&self, keep: &str) -> Result<Vec<String>> {
        let mut evicted = Vec::new();
        while self.total_size().await > self.max_size_bytes {
            let victim = self
                .images
                .read()
                .await
                .values()
                .filter(|image| image.reference != keep)
                .min_by_key(|image| image.last_used)
                .map(|image| image.reference.clone());

            let Some(victim) = victim else { break };
            self.remove(&victim).await?;
            evicted.push(victim);
        }
        Ok(evicted)
    }

    async fn persist(&self) -> Result<()> {
        let file = IndexFile {
            images: self.images.read().await.values().cloned().collect(),
        };
        let data = serde_json::to_vec_pretty(&file)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&data)?;
        tmp.persist(self.root.join("index.json"))
            .map_err(|e| RestackError::OciImageError(format!("Failed to write store index: {}", e)))?;
        Ok(())
    }
}

fn read_index(path: &Path) -> Result<IndexFile> {
    if !path.exists() {
        return Ok(IndexFile::default());
    }
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| {
        RestackError::OciImageError(format!(
            "Failed to parse image store index {}: {}",
            path.display(),
            e
        ))
    })
}

fn copy_layout(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_layout(&entry.path(), &target)?;
        } else if std::fs::hard_link(entry.path(), &target).is_err() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    std::fs::read_dir(path)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| match entry.metadata() {
                    Ok(meta) if meta.is_dir() => dir_size(&entry.path()),
                    Ok(meta) => meta.len(),
                    Err(_) => 0,
                })
                .sum()
        })
        .unwrap_or(0)
}
