//! OCI image layout reading and writing.
//!
//! [`OciImage`] loads an image layout directory (`oci-layout`, `index.json`,
//! `blobs/sha256/`) and exposes the config, history and layers that the
//! repackaging engine works with. [`LayoutWriter`] builds a new layout one
//! layer at a time on top of a base config.

use std::path::{Path, PathBuf};

use oci_spec::image::{ImageIndex, ImageManifest};
use restack_core::error::{RestackError, Result};
use serde_json::{json, Value};

use super::layers::{sha256_bytes, strip_algorithm, ContentLayer, HistoryEntry};
use super::layers::{OCI_CONFIG, OCI_MANIFEST};

/// An OCI image loaded from an image layout directory.
#[derive(Debug, Clone)]
pub struct OciImage {
    root_dir: PathBuf,
    manifest_digest: String,
    manifest_size: u64,
    config: Value,
    config_size: u64,
    history: Vec<HistoryEntry>,
    layers: Vec<ContentLayer>,
}

impl OciImage {
    /// Load an OCI image from a layout directory.
    ///
    /// The first manifest listed in `index.json` is used. Layers are paired
    /// with the config's `rootfs.diff_ids` by position.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref().to_path_buf();
        Self::validate_oci_layout(&root_dir)?;

        let index = Self::load_index(&root_dir)?;
        let manifest_digest = index
            .manifests()
            .first()
            .ok_or_else(|| RestackError::OciImageError("No manifests in index.json".to_string()))?
            .digest()
            .to_string();

        let manifest_path = blob_path(&root_dir, &manifest_digest);
        let manifest_bytes = read_blob(&manifest_path, "manifest")?;
        let manifest: ImageManifest = serde_json::from_slice(&manifest_bytes).map_err(|e| {
            RestackError::OciImageError(format!("Failed to parse manifest: {}", e))
        })?;

        let config_path = blob_path(&root_dir, manifest.config().digest());
        let config_bytes = read_blob(&config_path, "config")?;
        let config: Value = serde_json::from_slice(&config_bytes)
            .map_err(|e| RestackError::OciImageError(format!("Failed to parse config: {}", e)))?;

        let history = match config.get("history") {
            Some(Value::Null) | None => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                RestackError::OciImageError(format!("Failed to parse config history: {}", e))
            })?,
        };

        let diff_ids = diff_ids_of(&config)?;
        if diff_ids.len() != manifest.layers().len() {
            return Err(RestackError::OciImageError(format!(
                "Config lists {} diff IDs but manifest lists {} layers",
                diff_ids.len(),
                manifest.layers().len()
            )));
        }

        let layers = manifest
            .layers()
            .iter()
            .zip(diff_ids)
            .map(|(descriptor, diff_id)| ContentLayer {
                digest: descriptor.digest().to_string(),
                diff_id,
                size: descriptor.size().max(0) as u64,
                media_type: descriptor.media_type().to_string(),
                path: blob_path(&root_dir, descriptor.digest()),
            })
            .collect();

        Ok(Self {
            root_dir,
            manifest_digest,
            manifest_size: manifest_bytes.len() as u64,
            config,
            config_size: config_bytes.len() as u64,
            history,
            layers,
        })
    }

    /// Root directory of the layout.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Digest of the image manifest (`sha256:<hex>`).
    pub fn digest(&self) -> &str {
        &self.manifest_digest
    }

    /// Raw image config.
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Build history, earliest first.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Layers, base first.
    pub fn layers(&self) -> &[ContentLayer] {
        &self.layers
    }

    /// Diff IDs of all layers, base first.
    pub fn diff_ids(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.diff_id.as_str()).collect()
    }

    /// Total stored size: manifest, config and compressed layers.
    pub fn size(&self) -> u64 {
        self.manifest_size + self.config_size + self.layers.iter().map(|l| l.size).sum::<u64>()
    }

    /// Like [`size`](Self::size), counting layers decompressed.
    pub fn uncompressed_size(&self) -> Result<u64> {
        self.layers.iter().try_fold(
            self.manifest_size + self.config_size,
            |acc, layer| Ok(acc + layer.uncompressed_size()?),
        )
    }

    fn validate_oci_layout(root_dir: &Path) -> Result<()> {
        if !root_dir.is_dir() {
            return Err(RestackError::OciImageError(format!(
                "OCI image directory not found: {}",
                root_dir.display()
            )));
        }

        for required in ["oci-layout", "index.json"] {
            if !root_dir.join(required).is_file() {
                return Err(RestackError::OciImageError(format!(
                    "{} not found in {}",
                    required,
                    root_dir.display()
                )));
            }
        }

        if !root_dir.join("blobs").is_dir() {
            return Err(RestackError::OciImageError(format!(
                "blobs directory not found in {}",
                root_dir.display()
            )));
        }

        Ok(())
    }

    fn load_index(root_dir: &Path) -> Result<ImageIndex> {
        let bytes = read_blob(&root_dir.join("index.json"), "index.json")?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RestackError::OciImageError(format!("Failed to parse index.json: {}", e)))
    }
}

/// Whether `path` looks like an OCI image layout directory.
pub fn is_oci_layout(path: &Path) -> bool {
    path.join("oci-layout").is_file() && path.join("index.json").is_file()
}

/// Location of a blob inside a layout, given its `sha256:<hex>` digest.
pub fn blob_path(root_dir: &Path, digest: &str) -> PathBuf {
    root_dir.join("blobs").join("sha256").join(strip_algorithm(digest))
}

fn read_blob(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        RestackError::OciImageError(format!("Failed to read {} {}: {}", what, path.display(), e))
    })
}

fn diff_ids_of(config: &Value) -> Result<Vec<String>> {
    let Some(raw) = config.pointer("/rootfs/diff_ids") else {
        return Ok(Vec::new());
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| RestackError::OciImageError(format!("Failed to parse rootfs.diff_ids: {}", e)))
}

/// Writes a new OCI image layout one layer at a time.
///
/// The base config is kept as is except for `rootfs.diff_ids` and `history`,
/// which are rebuilt from the appended layers.
pub struct LayoutWriter {
    root_dir: PathBuf,
    blobs_dir: PathBuf,
    config: Value,
    layers: Vec<ContentLayer>,
    history: Vec<HistoryEntry>,
}

impl LayoutWriter {
    /// Create the layout directory structure under `root_dir`.
    pub fn create(root_dir: &Path, base_config: &Value) -> Result<Self> {
        let blobs_dir = root_dir.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs_dir).map_err(|e| {
            RestackError::OciImageError(format!(
                "Failed to create blobs directory {}: {}",
                blobs_dir.display(),
                e
            ))
        })?;

        if !base_config.is_object() {
            return Err(RestackError::OciImageError(
                "Image config is not a JSON object".to_string(),
            ));
        }

        Ok(Self {
            root_dir: root_dir.to_path_buf(),
            blobs_dir,
            config: base_config.clone(),
            layers: Vec::new(),
            history: Vec::new(),
        })
    }

    /// Directory new layer blobs should be written into.
    pub fn blobs_dir(&self) -> &Path {
        &self.blobs_dir
    }

    /// Number of filesystem layers appended so far.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Append a history entry, with its layer if it has one.
    ///
    /// Blobs living outside this layout are hard-linked in, or copied when
    /// linking is not possible.
    pub fn append(&mut self, layer: Option<&ContentLayer>, history: HistoryEntry) -> Result<()> {
        if let Some(layer) = layer {
            let target = self.blobs_dir.join(layer.digest_hex());
            if !target.exists() {
                if std::fs::hard_link(&layer.path, &target).is_err() {
                    std::fs::copy(&layer.path, &target).map_err(|e| {
                        RestackError::OciImageError(format!(
                            "Failed to copy layer {} into {}: {}",
                            layer.digest,
                            self.root_dir.display(),
                            e
                        ))
                    })?;
                }
            }

            self.layers.push(ContentLayer {
                path: target,
                ..layer.clone()
            });
        }

        self.history.push(history);
        Ok(())
    }

    /// Write config, manifest, `index.json` and `oci-layout`, then load the
    /// finished image back.
    pub fn finish(mut self) -> Result<OciImage> {
        let diff_ids: Vec<&str> = self.layers.iter().map(|l| l.diff_id.as_str()).collect();
        let history = serde_json::to_value(&self.history)?;

        let config = self
            .config
            .as_object_mut()
            .ok_or_else(|| RestackError::OciImageError("Image config is not a JSON object".to_string()))?;
        config.insert("history".to_string(), history);
        let rootfs = config
            .entry("rootfs")
            .or_insert_with(|| json!({ "type": "layers" }));
        match rootfs.as_object_mut() {
            Some(rootfs) => {
                rootfs.insert("diff_ids".to_string(), json!(diff_ids));
            }
            None => *rootfs = json!({ "type": "layers", "diff_ids": diff_ids }),
        }

        let config_bytes = serde_json::to_vec(&self.config)?;
        let config_digest = self.write_blob(&config_bytes)?;

        let layer_descriptors: Vec<Value> = self
            .layers
            .iter()
            .map(|l| {
                json!({
                    "mediaType": l.media_type,
                    "digest": l.digest,
                    "size": l.size,
                })
            })
            .collect();

        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST,
            "config": {
                "mediaType": OCI_CONFIG,
                "digest": config_digest,
                "size": config_bytes.len(),
            },
            "layers": layer_descriptors,
        });
        let manifest_bytes = serde_json::to_vec(&manifest)?;
        let manifest_digest = self.write_blob(&manifest_bytes)?;

        let index = json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": OCI_MANIFEST,
                "digest": manifest_digest,
                "size": manifest_bytes.len(),
            }]
        });
        std::fs::write(
            self.root_dir.join("index.json"),
            serde_json::to_vec_pretty(&index)?,
        )?;
        std::fs::write(
            self.root_dir.join("oci-layout"),
            r#"{"imageLayoutVersion":"1.0.0"}"#,
        )?;

        tracing::debug!(
            path = %self.root_dir.display(),
            layers = self.layers.len(),
            history = self.history.len(),
            manifest = %manifest_digest,
            "Wrote OCI image layout"
        );

        OciImage::from_path(&self.root_dir)
    }

    fn write_blob(&self, data: &[u8]) -> Result<String> {
        let hex = sha256_bytes(data);
        std::fs::write(self.blobs_dir.join(&hex), data)?;
        Ok(format!("sha256:{}", hex))
    }
}
