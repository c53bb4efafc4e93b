use std::path::PathBuf;

use thiserror::Error;

/// Restack error types
#[derive(Error, Debug)]
pub enum RestackError {
    /// Image config carries no history, so commands cannot be paired with layers
    #[error("No history available: image config carries no build history")]
    NoHistoryAvailable,

    /// Non-empty history entries and physical layers do not line up
    #[error("Layer count mismatch: {history} non-empty history entries for {layers} layers")]
    LayerCountMismatch { history: usize, layers: usize },

    /// A fixup referenced an entry without filesystem content
    #[error("Cannot fix up layer {index}: it is an empty layer")]
    FixupOnEmptyLayer { index: usize },

    /// A fixup arrived while no picked layer was pending
    #[error("Cannot fix up layer {index}: no preceding pick")]
    FixupWithoutPick { index: usize },

    /// Plan rejected by caller-side validation
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Textual plan could not be parsed
    #[error("Invalid plan syntax at line {line}: {message}")]
    InvalidPlanSyntax { line: usize, message: String },

    /// Packing hit something other than a file, directory or symlink
    #[error("Unsupported file type: {}", path.display())]
    UnsupportedFileType { path: PathBuf },

    /// Layer content could not be unpacked
    #[error("Extraction of layer {layer} failed: {message}")]
    ExtractionFailed { layer: String, message: String },

    /// Directory could not be packed into a layer
    #[error("Materialization of {} failed: {message}", path.display())]
    MaterializationFailed { path: PathBuf, message: String },

    /// OCI image error
    #[error("OCI image error: {0}")]
    OciImageError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for RestackError {
    fn from(err: serde_json::Error) -> Self {
        RestackError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for RestackError {
    fn from(err: serde_yaml::Error) -> Self {
        RestackError::SerializationError(err.to_string())
    }
}

/// Result type alias for restack operations
pub type Result<T> = std::result::Result<T, RestackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_history_display() {
        let error = RestackError::NoHistoryAvailable;
        assert!(error.to_string().starts_with("No history available"));
    }

    #[test]
    fn test_layer_count_mismatch_display() {
        let error = RestackError::LayerCountMismatch {
            history: 3,
            layers: 2,
        };
        assert_eq!(
            error.to_string(),
            "Layer count mismatch: 3 non-empty history entries for 2 layers"
        );
    }

    #[test]
    fn test_fixup_on_empty_layer_display() {
        let error = RestackError::FixupOnEmptyLayer { index: 4 };
        assert_eq!(
            error.to_string(),
            "Cannot fix up layer 4: it is an empty layer"
        );
    }

    #[test]
    fn test_fixup_without_pick_display() {
        let error = RestackError::FixupWithoutPick { index: 0 };
        assert_eq!(error.to_string(), "Cannot fix up layer 0: no preceding pick");
    }

    #[test]
    fn test_invalid_plan_syntax_display() {
        let error = RestackError::InvalidPlanSyntax {
            line: 2,
            message: "unknown intent 'squash'".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid plan syntax at line 2: unknown intent 'squash'"
        );
    }

    #[test]
    fn test_unsupported_file_type_names_path() {
        let error = RestackError::UnsupportedFileType {
            path: PathBuf::from("/tmp/stage/dev/null"),
        };
        assert_eq!(
            error.to_string(),
            "Unsupported file type: /tmp/stage/dev/null"
        );
    }

    #[test]
    fn test_extraction_failed_display() {
        let error = RestackError::ExtractionFailed {
            layer: "sha256:abc".to_string(),
            message: "unexpected EOF".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Extraction of layer sha256:abc failed: unexpected EOF"
        );
    }

    #[test]
    fn test_registry_error_display() {
        let error = RestackError::RegistryError {
            registry: "ghcr.io".to_string(),
            message: "Authentication failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: ghcr.io - Authentication failed"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: RestackError = io_error.into();
        assert!(matches!(error, RestackError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let error: RestackError = result.unwrap_err().into();
        assert!(matches!(error, RestackError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: RestackError = result.unwrap_err().into();
        assert!(matches!(error, RestackError::SerializationError(_)));
    }

    #[test]
    fn test_other_error_display() {
        let error = RestackError::Other("Unknown error occurred".to_string());
        assert_eq!(error.to_string(), "Unknown error occurred");
    }
}
