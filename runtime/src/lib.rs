//! Restack Runtime - layer repackaging for OCI images.
//!
//! `oci` loads, stores, pulls and pushes images; `repackage` enumerates an
//! image's build steps and rewrites its layer stack according to a
//! pick/fixup plan.

#![allow(clippy::result_large_err)]

pub mod oci;
pub mod repackage;

// Re-export common types
pub use oci::{ContentLayer, HistoryEntry, ImageLoader, ImageReference, ImageSink, ImageSource};
pub use oci::{ImageStore, LayoutWriter, OciImage, RegistryAuth, RegistryClient, StoredImage};
pub use repackage::{layer_records, parse_plan, render_plan, LayerRecord, Plan, Squasher};
pub use repackage::{Action, Intent, SquashOptions};

/// Restack Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
