//! OCI image support.
//!
//! Reading and writing OCI image layouts, and moving them between the local
//! store and container registries.
//!
//! ```text
//! image/
//! ├── oci-layout           (layout marker)
//! ├── index.json           (points at the manifest)
//! └── blobs/sha256/
//!     ├── <manifest>
//!     ├── <config>         (history, rootfs.diff_ids)
//!     └── <layers>
//! ```

pub mod credentials;
pub mod image;
pub mod layers;
pub mod loader;
pub mod reference;
pub mod registry;
pub mod store;

pub use credentials::CredentialStore;
pub use image::{is_oci_layout, LayoutWriter, OciImage};
pub use layers::{ContentLayer, HistoryEntry};
pub use loader::{ImageLoader, ImageSink, ImageSource};
pub use reference::ImageReference;
pub use registry::{PushResult, RegistryAuth, RegistryClient};
pub use store::{ImageStore, StoredImage};
