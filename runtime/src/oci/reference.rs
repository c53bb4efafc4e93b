//! Image reference parsing.
//!
//! Turns strings like `alpine`, `ghcr.io/org/app:1.2` or
//! `localhost:5000/app@sha256:...` into their registry, repository, tag and
//! digest parts, applying Docker Hub defaults.

use std::fmt;

use restack_core::error::{RestackError, Result};

const DEFAULT_REGISTRY: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";
const REPACKAGED_SUFFIX: &str = "repackaged";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference.
    ///
    /// A tag of `latest` is implied when neither tag nor digest is given.
    /// Single-component Docker Hub names get the `library/` prefix.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let invalid = |why: &str| {
            RestackError::OciImageError(format!("Invalid image reference '{}': {}", reference, why))
        };

        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (name_tag, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                let valid = digest
                    .split_once(':')
                    .map(|(algo, hex)| !algo.is_empty() && !hex.is_empty())
                    .unwrap_or(false);
                if !valid {
                    return Err(invalid("digest must be <algorithm>:<hex>"));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash separates the tag; earlier colons
        // belong to a registry port.
        let last_segment = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment..].rfind(':') {
            Some(pos) => {
                let split = last_segment + pos;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if tag.as_deref() == Some("") {
            return Err(invalid("empty tag"));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository path component"));
        }
        if repository.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("repository must be lowercase"));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Fully qualified form, used as the key in the local store.
    pub fn full_reference(&self) -> String {
        let mut out = format!("{}/{}", self.registry, self.repository);
        if let Some(tag) = &self.tag {
            out.push(':');
            out.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }

    /// Tag or digest, whichever identifies the image at the registry.
    pub fn tag_or_digest(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// Same repository, tagged `<tag>-repackaged`.
    ///
    /// Digest references become `repackaged`.
    pub fn repackaged(&self) -> Self {
        let tag = match &self.tag {
            Some(tag) => format!("{}-{}", tag, REPACKAGED_SUFFIX),
            None => REPACKAGED_SUFFIX.to_string(),
        };
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag),
            digest: None,
        }
    }

    /// Convert for use with the registry client.
    pub fn to_oci_reference(&self) -> oci_distribution::Reference {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => oci_distribution::Reference::with_digest(
                self.registry.clone(),
                self.repository.clone(),
                digest.clone(),
            ),
            (None, tag) => oci_distribution::Reference::with_tag(
                self.registry.clone(),
                self.repository.clone(),
                tag.clone().unwrap_or_else(|| DEFAULT_TAG.to_string()),
            ),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_reference())
    }
}
