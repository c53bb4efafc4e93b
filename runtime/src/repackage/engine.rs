//! Plan execution.
//!
//! The engine walks a plan once, holding at most one pending stage. A pick
//! flushes the pending stage and carries its own layer forward untouched; a
//! fixup turns the pending stage into a scratch directory (if it is not one
//! already) and overlays its layer on top. Flushing a merged stage packs the
//! scratch directory into a new layer with a synthesized history entry.

use std::path::{Path, PathBuf};

use restack_core::config::RestackConfig;
use restack_core::error::{RestackError, Result};

use super::materialize::{extract, materialize, ScratchDir};
use super::plan::{Action, Intent, Plan};
use crate::oci::image::{LayoutWriter, OciImage};
use crate::oci::layers::{ContentLayer, HistoryEntry};

/// Settings for combined layers.
#[derive(Debug, Clone)]
pub struct SquashOptions {
    /// Parent directory for scratch directories
    pub scratch_dir: PathBuf,
    /// Gzip level for combined layers
    pub compression_level: u32,
    pub author: String,
    pub comment: String,
    /// Joins the created-by lines of merged steps
    pub separator: String,
}

impl Default for SquashOptions {
    fn default() -> Self {
        Self::from(&RestackConfig::default())
    }
}

impl From<&RestackConfig> for SquashOptions {
    fn from(config: &RestackConfig) -> Self {
        Self {
            scratch_dir: config.scratch_dir.clone(),
            compression_level: config.compression_level,
            author: config.combined_author.clone(),
            comment: config.combined_comment.clone(),
            separator: config.created_by_separator.clone(),
        }
    }
}

/// Pending output of the plan.
enum Stage {
    /// A picked step, emitted as is unless a fixup follows
    Carried {
        layer: Option<ContentLayer>,
        history: HistoryEntry,
    },
    /// Steps being merged in a scratch directory
    Merging {
        scratch: ScratchDir,
        created_by: Vec<String>,
        created: Option<String>,
    },
}

/// Executes plans against source images.
#[derive(Debug, Clone, Default)]
pub struct Squasher {
    options: SquashOptions,
}

impl Squasher {
    pub fn new(options: SquashOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SquashOptions {
        &self.options
    }

    /// Execute `plan` against `source`, writing the result as an OCI image
    /// layout at `output_dir`.
    ///
    /// `output_dir` must not exist or be empty. On error it is removed
    /// together with any scratch storage.
    pub fn run(&self, source: &OciImage, plan: &Plan, output_dir: &Path) -> Result<OciImage> {
        let guard = OutputGuard::claim(output_dir)?;
        let mut writer = LayoutWriter::create(output_dir, source.config())?;
        let mut stage: Option<Stage> = None;

        for action in plan.actions() {
            tracing::debug!(
                index = action.index,
                intent = %action.intent,
                created_by = action.history.created_by_line(),
                "Applying action"
            );

            stage = Some(match action.intent {
                Intent::Pick => {
                    if let Some(pending) = stage.take() {
                        self.flush(pending, &mut writer)?;
                    }
                    Stage::Carried {
                        layer: action.layer.clone(),
                        history: action.history.clone(),
                    }
                }
                Intent::Fixup => {
                    let pending = stage.take().ok_or(RestackError::FixupWithoutPick {
                        index: action.index,
                    })?;
                    self.fixup(pending, action)?
                }
            });
        }

        if let Some(pending) = stage.take() {
            self.flush(pending, &mut writer)?;
        }

        let image = writer.finish()?;
        guard.disarm();

        tracing::info!(
            source = %source.digest(),
            result = %image.digest(),
            layers_before = source.layers().len(),
            layers_after = image.layers().len(),
            "Repackaged image"
        );
        Ok(image)
    }

    fn fixup(&self, pending: Stage, action: &Action) -> Result<Stage> {
        let layer = action
            .layer
            .as_ref()
            .ok_or(RestackError::FixupOnEmptyLayer {
                index: action.index,
            })?;

        let (scratch, mut created_by, created) = match pending {
            Stage::Carried { layer: carried, history } => {
                let scratch = ScratchDir::new_in(&self.options.scratch_dir)?;
                if let Some(carried) = &carried {
                    extract(carried, scratch.path())?;
                }
                (
                    scratch,
                    vec![history.created_by_line().to_string()],
                    history.created,
                )
            }
            Stage::Merging {
                scratch,
                created_by,
                created,
            } => (scratch, created_by, created),
        };

        extract(layer, scratch.path())?;
        created_by.push(action.history.created_by_line().to_string());

        Ok(Stage::Merging {
            scratch,
            created_by,
            created: action.history.created.clone().or(created),
        })
    }

    fn flush(&self, stage: Stage, writer: &mut LayoutWriter) -> Result<()> {
        match stage {
            Stage::Carried { layer, history } => writer.append(layer.as_ref(), history),
            Stage::Merging {
                scratch,
                created_by,
                created,
            } => {
                let layer = materialize(
                    scratch.path(),
                    writer.blobs_dir(),
                    self.options.compression_level,
                )?;
                scratch.close()?;

                let history = HistoryEntry {
                    created,
                    created_by: Some(created_by.join(&self.options.separator)),
                    author: Some(self.options.author.clone()),
                    comment: Some(self.options.comment.clone()),
                    empty_layer: None,
                };
                writer.append(Some(&layer), history)
            }
        }
    }
}

/// Removes a partially written output directory unless disarmed.
struct OutputGuard<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> OutputGuard<'a> {
    fn claim(path: &'a Path) -> Result<Self> {
        if path.exists() {
            let occupied = std::fs::read_dir(path)?.next().is_some();
            if occupied {
                return Err(RestackError::OciImageError(format!(
                    "Output directory {} is not empty",
                    path.display()
                )));
            }
        }
        Ok(Self { path, armed: true })
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for OutputGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove partial output"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_options_follow_config() {
        let config = RestackConfig {
            compression_level: 1,
            combined_author: "ci".to_string(),
            created_by_separator: " && ".to_string(),
            ..Default::default()
        };
        let options = SquashOptions::from(&config);
        assert_eq!(options.compression_level, 1);
        assert_eq!(options.author, "ci");
        assert_eq!(options.comment, "combined layers");
        assert_eq!(options.separator, " && ");
    }

    #[test]
    fn test_output_guard_rejects_non_empty_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("x"), "x").unwrap();
        assert!(OutputGuard::claim(tmp.path()).is_err());
    }

    #[test]
    fn test_output_guard_removes_when_dropped_armed() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        {
            let _guard = OutputGuard::claim(&out).unwrap();
            std::fs::create_dir_all(out.join("blobs")).unwrap();
        }
        assert!(!out.exists());
    }

    #[test]
    fn test_output_guard_disarmed_keeps_dir() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let guard = OutputGuard::claim(&out).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        guard.disarm();
        assert!(out.exists());
    }
}
