//! Resolving image names to loaded images, and saving results.
//!
//! [`ImageLoader`] checks, in order, for a local OCI layout path, the local
//! store and finally the registry. Pulled images are kept in the store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use restack_core::error::Result;

use super::image::{is_oci_layout, OciImage};
use super::reference::ImageReference;
use super::registry::{PushResult, RegistryClient};
use super::store::ImageStore;

/// Where source images come from.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn load(&self, reference: &str) -> Result<OciImage>;
}

/// Where result images go.
#[async_trait]
pub trait ImageSink: Send + Sync {
    async fn save(&self, tag: &str, image: &OciImage) -> Result<OciImage>;
}

/// Store-backed image source and sink.
pub struct ImageLoader {
    store: Arc<ImageStore>,
    push: bool,
}

impl ImageLoader {
    pub fn new(store: Arc<ImageStore>) -> Self {
        Self { store, push: false }
    }

    /// Also push saved images to their registry.
    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    pub fn store(&self) -> &Arc<ImageStore> {
        &self.store
    }

    /// Pull `reference` from its registry into the store, even if present.
    pub async fn pull(&self, reference: &ImageReference) -> Result<OciImage> {
        let staging = self.store.staging_dir()?;
        RegistryClient::for_registry(&reference.registry)
            .pull(reference, staging.path())
            .await?;

        let pulled = OciImage::from_path(staging.path())?;
        let stored = self.store.put(&reference.full_reference(), &pulled).await?;
        OciImage::from_path(&stored.path)
    }

    /// Push the stored image `reference` to its registry.
    pub async fn push(&self, reference: &ImageReference) -> Result<PushResult> {
        let image = self.load(&reference.full_reference()).await?;
        RegistryClient::for_registry(&reference.registry)
            .push(reference, &image)
            .await
    }
}

#[async_trait]
impl ImageSource for ImageLoader {
    async fn load(&self, reference: &str) -> Result<OciImage> {
        let path = Path::new(reference);
        if is_oci_layout(path) {
            tracing::debug!(path = %path.display(), "Loading image layout from path");
            return OciImage::from_path(path);
        }

        let parsed = ImageReference::parse(reference)?;
        let full = parsed.full_reference();

        if let Some(stored) = self.store.get(&full).await? {
            tracing::debug!(reference = %full, digest = %stored.digest, "Using stored image");
            return OciImage::from_path(&stored.path);
        }

        self.pull(&parsed).await
    }
}

#[async_trait]
impl ImageSink for ImageLoader {
    async fn save(&self, tag: &str, image: &OciImage) -> Result<OciImage> {
        let parsed = ImageReference::parse(tag)?;
        let stored = self.store.put(&parsed.full_reference(), image).await?;
        let saved = OciImage::from_path(&stored.path)?;

        tracing::info!(reference = %parsed, digest = %saved.digest(), "Saved image");

        if self.push {
            RegistryClient::for_registry(&parsed.registry)
                .push(&parsed, &saved)
                .await?;
        }
        Ok(saved)
    }
}
