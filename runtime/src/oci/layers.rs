//! Layer and history value types.
//!
//! A [`ContentLayer`] is an immutable handle to a compressed layer blob on
//! disk; a [`HistoryEntry`] is one element of the image config's `history`
//! array. Both are cloned freely and never modified in place.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use restack_core::error::{RestackError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Media type of gzip-compressed OCI layers.
pub const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// Media type of OCI image manifests.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// Media type of OCI image configs.
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
/// Media type of OCI image indexes.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// A filesystem diff blob referenced by an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLayer {
    /// Digest of the compressed blob (`sha256:<hex>`)
    pub digest: String,
    /// Digest of the uncompressed tar stream (`sha256:<hex>`)
    pub diff_id: String,
    /// Compressed size in bytes
    pub size: u64,
    /// Media type as recorded in the manifest
    pub media_type: String,
    /// Location of the blob on disk
    pub path: PathBuf,
}

impl ContentLayer {
    /// Digest without the algorithm prefix.
    pub fn digest_hex(&self) -> &str {
        strip_algorithm(&self.digest)
    }

    /// Open the blob as an uncompressed tar stream.
    ///
    /// Gzip is detected by its magic bytes; anything that is not gzip or
    /// zstd is read as a plain tar.
    pub fn open_uncompressed(&self) -> Result<Box<dyn Read>> {
        let file = File::open(&self.path).map_err(|e| self.extraction_error(e))?;
        let mut reader = BufReader::new(file);

        let (is_gzip, is_zstd) = {
            let head = reader.fill_buf().map_err(|e| self.extraction_error(e))?;
            (head.starts_with(&GZIP_MAGIC), head.starts_with(&ZSTD_MAGIC))
        };

        if is_zstd {
            return Err(RestackError::ExtractionFailed {
                layer: self.digest.clone(),
                message: "zstd-compressed layers are not supported".to_string(),
            });
        }

        if is_gzip {
            Ok(Box::new(MultiGzDecoder::new(reader)))
        } else {
            Ok(Box::new(reader))
        }
    }

    /// Size of the uncompressed tar stream, computed by reading it through.
    pub fn uncompressed_size(&self) -> Result<u64> {
        let mut reader = self.open_uncompressed()?;
        std::io::copy(&mut reader, &mut std::io::sink()).map_err(|e| self.extraction_error(e))
    }

    fn extraction_error(&self, e: std::io::Error) -> RestackError {
        RestackError::ExtractionFailed {
            layer: self.digest.clone(),
            message: e.to_string(),
        }
    }
}

/// One build step from the image config's `history` array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_layer: Option<bool>,
}

impl HistoryEntry {
    /// Whether this step produced no filesystem change.
    pub fn is_empty_layer(&self) -> bool {
        self.empty_layer.unwrap_or(false)
    }

    /// The command that produced this step, or an empty string.
    pub fn created_by_line(&self) -> &str {
        self.created_by.as_deref().unwrap_or("")
    }
}

/// Writer adapter that hashes and counts everything passing through it.
pub(crate) struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Return the inner writer, the hex digest and the byte count.
    pub(crate) fn finish(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Strip a leading `<algorithm>:` from a digest.
pub fn strip_algorithm(digest: &str) -> &str {
    digest.split_once(':').map(|(_, hex)| hex).unwrap_or(digest)
}

/// Compute SHA256 digest of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        RestackError::OciImageError(format!(
            "Failed to open {} for hashing: {}",
            path.display(),
            e
        ))
    })?;

    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compute SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
