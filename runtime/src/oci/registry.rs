//! Registry access for pulling and pushing images.
//!
//! Uses the `oci-distribution` client. Pulled images are written as OCI
//! image layouts so they can be loaded with [`OciImage::from_path`].

use std::path::Path;

use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::manifest::{ImageIndexEntry, OciImageManifest, OciManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::Client;
use restack_core::error::{RestackError, Result};
use tokio::io::AsyncWriteExt;

use super::credentials::CredentialStore;
use super::image::{blob_path, OciImage};
use super::layers::{OCI_INDEX, OCI_MANIFEST};
use super::reference::ImageReference;

/// Credentials for one registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// `REGISTRY_USERNAME`/`REGISTRY_PASSWORD`, if both are set.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("REGISTRY_USERNAME").ok()?;
        let password = std::env::var("REGISTRY_PASSWORD").ok()?;
        Some(Self::basic(username, password))
    }

    /// Credentials for `registry`: the Docker config first, then the
    /// environment, then anonymous.
    pub fn resolve(registry: &str) -> Self {
        let from_docker = CredentialStore::default_path()
            .and_then(|store| store.get(registry))
            .unwrap_or_else(|e| {
                tracing::warn!(registry, error = %e, "Ignoring unreadable Docker credentials");
                None
            });

        if let Some((username, password)) = from_docker {
            return Self::basic(username, password);
        }
        Self::from_env().unwrap_or_else(Self::anonymous)
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Result of a successful push.
#[derive(Debug, Clone)]
pub struct PushResult {
    pub config_url: String,
    pub manifest_url: String,
}

/// Client for one set of registry credentials.
pub struct RegistryClient {
    client: Client,
    auth: RegistryAuth,
}

impl RegistryClient {
    pub fn new(auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }

    /// Client with credentials resolved for `registry`.
    pub fn for_registry(registry: &str) -> Self {
        Self::new(RegistryAuth::resolve(registry))
    }

    /// Pull `reference` into an OCI image layout at `target_dir`.
    ///
    /// Multi-platform indexes are resolved to linux on the host architecture.
    /// Returns the manifest digest.
    pub async fn pull(&self, reference: &ImageReference, target_dir: &Path) -> Result<String> {
        let oci_ref = reference.to_oci_reference();
        let registry_error = |message: String| RestackError::RegistryError {
            registry: reference.registry.clone(),
            message,
        };

        tracing::info!(reference = %reference, target = %target_dir.display(), "Pulling image");

        std::fs::create_dir_all(target_dir.join("blobs").join("sha256"))?;

        let (manifest, digest) = self
            .client
            .pull_image_manifest(&oci_ref, &self.auth.to_oci_auth())
            .await
            .map_err(|e| registry_error(format!("Failed to pull manifest: {}", e)))?;

        for descriptor in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
            tracing::debug!(digest = %descriptor.digest, size = descriptor.size, "Pulling blob");

            let mut file = tokio::fs::File::create(blob_path(target_dir, &descriptor.digest)).await?;
            self.client
                .pull_blob(&oci_ref, descriptor, &mut file)
                .await
                .map_err(|e| registry_error(format!("Failed to pull blob {}: {}", descriptor.digest, e)))?;
            file.flush().await?;
        }

        let manifest_bytes = serde_json::to_vec(&manifest)?;
        std::fs::write(blob_path(target_dir, &digest), &manifest_bytes)?;

        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": manifest.media_type.as_deref().unwrap_or(OCI_MANIFEST),
                "digest": digest,
                "size": manifest_bytes.len(),
                "annotations": { "org.opencontainers.image.ref.name": reference.full_reference() }
            }]
        });
        std::fs::write(target_dir.join("index.json"), serde_json::to_vec_pretty(&index)?)?;
        std::fs::write(
            target_dir.join("oci-layout"),
            r#"{"imageLayoutVersion":"1.0.0"}"#,
        )?;

        tracing::info!(reference = %reference, digest = %digest, "Image pulled");
        Ok(digest)
    }

    /// Push the image layout `image` to `reference`.
    pub async fn push(&self, reference: &ImageReference, image: &OciImage) -> Result<PushResult> {
        let oci_ref = reference.to_oci_reference();
        let registry_error = |message: String| RestackError::RegistryError {
            registry: reference.registry.clone(),
            message,
        };

        tracing::info!(
            reference = %reference,
            source = %image.root_dir().display(),
            layers = image.layers().len(),
            "Pushing image"
        );

        let manifest_bytes = std::fs::read(blob_path(image.root_dir(), image.digest()))?;
        let manifest: OciImageManifest = serde_json::from_slice(&manifest_bytes)?;

        let config_data = std::fs::read(blob_path(image.root_dir(), &manifest.config.digest))?;
        let config = Config::new(config_data, manifest.config.media_type.clone(), None);

        let layers = image
            .layers()
            .iter()
            .map(|layer| {
                let data = std::fs::read(&layer.path).map_err(|e| {
                    RestackError::OciImageError(format!(
                        "Failed to read layer {}: {}",
                        layer.digest, e
                    ))
                })?;
                Ok(ImageLayer::new(data, layer.media_type.clone(), None))
            })
            .collect::<Result<Vec<_>>>()?;

        let response = self
            .client
            .push(&oci_ref, &layers, config, &self.auth.to_oci_auth(), Some(manifest))
            .await
            .map_err(|e| registry_error(format!("Failed to push image: {}", e)))?;

        tracing::info!(reference = %reference, manifest_url = %response.manifest_url, "Image pushed");

        Ok(PushResult {
            config_url: response.config_url,
            manifest_url: response.manifest_url,
        })
    }

    /// Media type of the manifest `reference` points at, without resolving
    /// indexes to a platform.
    pub async fn media_type(&self, reference: &ImageReference) -> Result<String> {
        let (manifest, _digest) = self
            .client
            .pull_manifest(&reference.to_oci_reference(), &self.auth.to_oci_auth())
            .await
            .map_err(|e| RestackError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("Failed to fetch manifest: {}", e),
            })?;

        Ok(match manifest {
            OciManifest::Image(m) => m.media_type.unwrap_or_else(|| OCI_MANIFEST.to_string()),
            OciManifest::ImageIndex(i) => i.media_type.unwrap_or_else(|| OCI_INDEX.to_string()),
        })
    }
}

/// Pick the linux image for the host architecture from an index.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
