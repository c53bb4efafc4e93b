//! Registry credentials from the Docker client configuration.
//!
//! Reads `$DOCKER_CONFIG/config.json` (default `~/.docker/config.json`), the
//! file `docker login` writes. Only inline `auths` entries are understood;
//! credential helpers are not invoked.

use std::collections::HashMap;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use restack_core::error::{RestackError, Result};
use serde::Deserialize;

const DOCKER_HUB: &str = "docker.io";

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl AuthEntry {
    fn credentials(&self) -> Result<Option<(String, String)>> {
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            return Ok(Some((user.clone(), pass.clone())));
        }

        let Some(encoded) = self.auth.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| RestackError::ConfigError(format!("Invalid base64 in auth entry: {}", e)))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| RestackError::ConfigError("Auth entry is not UTF-8".to_string()))?;

        decoded
            .split_once(':')
            .map(|(user, pass)| Some((user.to_string(), pass.to_string())))
            .ok_or_else(|| {
                RestackError::ConfigError("Auth entry is not of the form user:password".to_string())
            })
    }
}

/// Read-only view of the Docker credential file.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Credential store at the Docker client's default location.
    pub fn default_path() -> Result<Self> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Ok(Self::new(PathBuf::from(dir).join("config.json")));
        }
        let home = dirs::home_dir().ok_or_else(|| {
            RestackError::ConfigError("Cannot determine home directory for credentials".to_string())
        })?;
        Ok(Self::new(home.join(".docker").join("config.json")))
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Credentials for `registry`, as `(username, password)`.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;
        let wanted = normalize_registry(registry);

        match file
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
        {
            Some((_, entry)) => entry.credentials(),
            None => Ok(None),
        }
    }

    /// Registries with an entry in the file, normalized and sorted.
    pub fn list_registries(&self) -> Result<Vec<String>> {
        let mut registries: Vec<String> = self
            .load()?
            .auths
            .keys()
            .map(|k| normalize_registry(k))
            .collect();
        registries.sort();
        registries.dedup();
        Ok(registries)
    }

    fn load(&self) -> Result<DockerConfigFile> {
        if !self.path.exists() {
            return Ok(DockerConfigFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            RestackError::ConfigError(format!(
                "Failed to read credentials {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            RestackError::ConfigError(format!(
                "Failed to parse credentials {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Reduce a registry name or `auths` key to a bare lowercase host.
///
/// `https://index.docker.io/v1/`, `registry-1.docker.io` and `docker.io`
/// all name Docker Hub.
fn normalize_registry(registry: &str) -> String {
    let host = registry.trim().to_lowercase();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(&host);
    let host = host.split('/').next().unwrap_or(host);

    match host {
        "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(dir: &TempDir, json: &str) -> CredentialStore {
        let path = dir.path().join("config.json");
        std::fs::write(&path, json).unwrap();
        CredentialStore::new(path)
    }

    #[test]
    fn test_missing_file_has_no_credentials() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("config.json"));
        assert_eq!(store.get("ghcr.io").unwrap(), None);
        assert!(store.list_registries().unwrap().is_empty());
    }

    #[test]
    fn test_base64_auth() {
        let dir = TempDir::new().unwrap();
        let encoded = STANDARD.encode("user1:pa:ss");
        let store = store_with(
            &dir,
            &format!(r#"{{"auths":{{"ghcr.io":{{"auth":"{}"}}}}}}"#, encoded),
        );

        assert_eq!(
            store.get("ghcr.io").unwrap(),
            Some(("user1".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(store.get("quay.io").unwrap(), None);
    }

    #[test]
    fn test_explicit_username_password() {
        let dir = TempDir::new().unwrap();
        let store = store_with(
            &dir,
            r#"{"auths":{"quay.io":{"username":"u","password":"p"}}}"#,
        );
        assert_eq!(
            store.get("quay.io").unwrap(),
            Some(("u".to_string(), "p".to_string()))
        );
    }

    #[test]
    fn test_docker_hub_aliases() {
        let dir = TempDir::new().unwrap();
        let encoded = STANDARD.encode("hub:secret");
        let store = store_with(
            &dir,
            &format!(
                r#"{{"auths":{{"https://index.docker.io/v1/":{{"auth":"{}"}}}}}}"#,
                encoded
            ),
        );

        let expected = Some(("hub".to_string(), "secret".to_string()));
        assert_eq!(store.get("docker.io").unwrap(), expected);
        assert_eq!(store.get("registry-1.docker.io").unwrap(), expected);
        assert_eq!(store.list_registries().unwrap(), vec!["docker.io"]);
    }

    #[test]
    fn test_entry_without_auth_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, r#"{"auths":{"ghcr.io":{}},"credsStore":"desktop"}"#);
        assert_eq!(store.get("ghcr.io").unwrap(), None);
    }

    #[test]
    fn test_malformed_auth() {
        let dir = TempDir::new().unwrap();
        let encoded = STANDARD.encode("no-colon");
        let store = store_with(
            &dir,
            &format!(r#"{{"auths":{{"ghcr.io":{{"auth":"{}"}}}}}}"#, encoded),
        );
        assert!(matches!(
            store.get("ghcr.io"),
            Err(RestackError::ConfigError(_))
        ));
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let store = store_with(&dir, "{ not json");
        assert!(store.get("ghcr.io").is_err());
    }

    #[test]
    fn test_normalize_registry() {
        assert_eq!(normalize_registry("GHCR.io"), "ghcr.io");
        assert_eq!(normalize_registry("https://quay.io/v2/"), "quay.io");
        assert_eq!(normalize_registry("localhost:5000"), "localhost:5000");
        assert_eq!(normalize_registry("index.docker.io"), "docker.io");
    }
}
