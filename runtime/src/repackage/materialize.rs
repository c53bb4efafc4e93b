//! Moving layer content between blobs and directories.
//!
//! [`extract`] overlays a layer onto a scratch directory; [`materialize`]
//! packs a directory back into a gzip-compressed layer blob.

use std::collections::{HashMap, HashSet};
use std::fs::{File, Metadata, Permissions};
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use restack_core::error::{RestackError, Result};
use tempfile::{NamedTempFile, TempDir};

use crate::oci::layers::{ContentLayer, DigestWriter, OCI_LAYER_GZIP};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Scratch directory owned by one merging stage.
///
/// The directory and everything in it is deleted when the handle is dropped,
/// including subdirectories a layer made read-only.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl ScratchDir {
    /// Create a fresh scratch directory under `root`.
    pub fn new_in(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix("restack-stage-")
            .tempdir_in(root)
            .map_err(|e| {
                RestackError::Other(format!(
                    "Failed to create scratch directory in {}: {}",
                    root.display(),
                    e
                ))
            })?;
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory now, reporting failures.
    pub fn close(mut self) -> Result<()> {
        if let Some(dir) = self.dir.take() {
            unlock_tree(dir.path())?;
            dir.close()?;
        }
        Ok(())
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = unlock_tree(dir.path()) {
                tracing::warn!(
                    path = %dir.path().display(),
                    error = %e,
                    "Failed to unlock scratch directory"
                );
            }
        }
    }
}

/// Overlay the content of `layer` onto `directory`.
///
/// Entries are applied in archive order. An entry replaces whatever exists
/// at its path, including when the file type changes. Whiteout markers
/// delete the named path (or, for an opaque marker, the directory's
/// existing children) and are kept so the packed result still carries them.
///
/// Entries below a symlink already present in `directory` are rejected
/// before anything is removed. Ownership is restored only when running as
/// root.
pub fn extract(layer: &ContentLayer, directory: &Path) -> Result<()> {
    let fail = |message: String| RestackError::ExtractionFailed {
        layer: layer.digest.clone(),
        message,
    };

    let reader = layer.open_uncompressed()?;
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_preserve_ownerships(running_as_root());
    archive.set_overwrite(true);

    // Directories opened up for writing, with the modes to put back
    let mut locked: HashMap<PathBuf, Permissions> = HashMap::new();
    let applied = apply_entries(&mut archive, directory, &mut locked, &fail);
    let restored = restore_modes(locked).map_err(|e| fail(e.to_string()));
    let count = applied?;
    restored?;

    tracing::debug!(
        layer = %layer.digest,
        target = %directory.display(),
        entries = count,
        "Extracted layer"
    );
    Ok(())
}

fn apply_entries<R: io::Read>(
    archive: &mut tar::Archive<R>,
    directory: &Path,
    locked: &mut HashMap<PathBuf, Permissions>,
    fail: &impl Fn(String) -> RestackError,
) -> Result<usize> {
    // Paths written by this layer; an opaque marker only hides older content
    let mut written: HashSet<PathBuf> = HashSet::new();
    let mut count = 0usize;

    let entries = archive.entries().map_err(|e| fail(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| fail(e.to_string()))?;
        let raw_path = entry.path().map_err(|e| fail(e.to_string()))?.into_owned();
        let Some(rel) = normalize(&raw_path) else {
            continue;
        };

        if let Some(link) =
            symlinked_ancestor(directory, &rel).map_err(|e| fail(e.to_string()))?
        {
            return Err(fail(format!(
                "{}: parent {} is a symlink",
                rel.display(),
                link.display()
            )));
        }

        let name = rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent_rel = rel.parent().map(Path::to_path_buf).unwrap_or_default();
        let parent = directory.join(&parent_rel);
        unlock_nearest(directory, &parent, locked).map_err(|e| fail(e.to_string()))?;

        if name == OPAQUE_WHITEOUT {
            clear_children(&parent, &parent_rel, &written).map_err(|e| fail(e.to_string()))?;
        } else if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
            remove_path(&parent.join(hidden)).map_err(|e| fail(e.to_string()))?;
        } else {
            remove_path(&parent.join(format!("{}{}", WHITEOUT_PREFIX, name)))
                .map_err(|e| fail(e.to_string()))?;
        }

        let target = directory.join(&rel);
        let is_dir = entry.header().entry_type().is_dir();
        replace_on_type_change(&target, is_dir)
            .map_err(|e| fail(format!("{}: {}", rel.display(), e)))?;

        entry
            .unpack_in(directory)
            .map_err(|e| fail(format!("{}: {}", rel.display(), e)))?;

        // The entry just set this directory's mode
        if is_dir {
            locked.remove(&target);
        }

        written.insert(rel);
        count += 1;
    }

    Ok(count)
}

/// Pack `directory` into a gzip-compressed layer blob inside `blobs_dir`.
///
/// The walk is sorted by name. Directories, regular files and symlinks are
/// archived with their metadata; symlinks are stored as links, never
/// followed. Any other file type is rejected.
pub fn materialize(directory: &Path, blobs_dir: &Path, level: u32) -> Result<ContentLayer> {
    let fail = |e: io::Error| RestackError::MaterializationFailed {
        path: directory.to_path_buf(),
        message: e.to_string(),
    };

    let blob = NamedTempFile::new_in(blobs_dir).map_err(fail)?;
    let compressed = DigestWriter::new(blob);
    let encoder = GzEncoder::new(compressed, Compression::new(level));
    let uncompressed = DigestWriter::new(encoder);

    let mut builder = tar::Builder::new(uncompressed);
    builder.follow_symlinks(false);
    append_tree(&mut builder, directory, directory)?;

    let uncompressed = builder.into_inner().map_err(fail)?;
    let (encoder, diff_hex, _) = uncompressed.finish();
    let compressed = encoder.finish().map_err(fail)?;
    let (blob, digest_hex, size) = compressed.finish();

    let path = blobs_dir.join(&digest_hex);
    blob.persist(&path).map_err(|e| fail(e.error))?;

    tracing::debug!(
        source = %directory.display(),
        digest = %digest_hex,
        size,
        "Materialized layer"
    );

    Ok(ContentLayer {
        digest: format!("sha256:{}", digest_hex),
        diff_id: format!("sha256:{}", diff_hex),
        size,
        media_type: OCI_LAYER_GZIP.to_string(),
        path,
    })
}

fn append_tree<W: io::Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    current: &Path,
) -> Result<()> {
    let fail = |path: &Path, e: io::Error| RestackError::MaterializationFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut children = std::fs::read_dir(current)
        .and_then(|entries| entries.collect::<io::Result<Vec<_>>>())
        .map_err(|e| fail(current, e))?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let path = child.path();
        let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let meta = std::fs::symlink_metadata(&path).map_err(|e| fail(&path, e))?;
        let file_type = meta.file_type();

        let mut header = tar::Header::new_gnu();
        header.set_metadata_in_mode(&meta, tar::HeaderMode::Complete);

        if file_type.is_dir() {
            header.set_size(0);
            builder
                .append_data(&mut header, &rel, io::empty())
                .map_err(|e| fail(&path, e))?;
            append_tree(builder, root, &path)?;
        } else if file_type.is_file() {
            let file = File::open(&path).map_err(|e| fail(&path, e))?;
            builder
                .append_data(&mut header, &rel, file)
                .map_err(|e| fail(&path, e))?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&path).map_err(|e| fail(&path, e))?;
            header.set_size(0);
            builder
                .append_link(&mut header, &rel, &target)
                .map_err(|e| fail(&path, e))?;
        } else {
            return Err(RestackError::UnsupportedFileType { path });
        }
    }

    Ok(())
}

/// Relative, `..`-free form of an archive path; `None` for the root itself
/// or for paths escaping it.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

/// First ancestor of `rel` inside `directory` that is a symlink.
fn symlinked_ancestor(directory: &Path, rel: &Path) -> io::Result<Option<PathBuf>> {
    let Some(parent) = rel.parent() else {
        return Ok(None);
    };

    let mut current = PathBuf::new();
    for component in parent.components() {
        current.push(component);
        match std::fs::symlink_metadata(directory.join(&current)) {
            Ok(meta) if meta.file_type().is_symlink() => return Ok(Some(current)),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

fn remove_path(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => remove_tree(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn remove_tree(path: &Path) -> io::Result<()> {
    unlock_tree(path)?;
    std::fs::remove_dir_all(path)
}

fn replace_on_type_change(target: &Path, entry_is_dir: bool) -> io::Result<()> {
    match std::fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() && !entry_is_dir => remove_tree(target),
        Ok(meta) if !meta.is_dir() && entry_is_dir => std::fs::remove_file(target),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn clear_children(dir: &Path, dir_rel: &Path, keep: &HashSet<PathBuf>) -> io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let child_rel = dir_rel.join(entry.file_name());
        if keep.iter().any(|p| p.starts_with(&child_rel)) {
            continue;
        }
        remove_path(&entry.path())?;
    }
    Ok(())
}

/// Give the owner full access to the closest existing directory at or above
/// `path`, remembering its previous mode.
fn unlock_nearest(
    root: &Path,
    path: &Path,
    locked: &mut HashMap<PathBuf, Permissions>,
) -> io::Result<()> {
    let mut current = path;
    loop {
        match std::fs::symlink_metadata(current) {
            Ok(meta) if meta.is_dir() => {
                if let Some(original) = unlock_dir(current, &meta)? {
                    locked.entry(current.to_path_buf()).or_insert(original);
                }
                return Ok(());
            }
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        match current.parent() {
            Some(parent) if current != root => current = parent,
            _ => return Ok(()),
        }
    }
}

/// Put back modes taken away by [`unlock_nearest`], deepest first.
fn restore_modes(locked: HashMap<PathBuf, Permissions>) -> io::Result<()> {
    let mut locked: Vec<_> = locked.into_iter().collect();
    locked.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
    for (path, permissions) in locked {
        std::fs::set_permissions(&path, permissions)?;
    }
    Ok(())
}

/// Give the owner full access to every directory under `path`.
fn unlock_tree(path: &Path) -> io::Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !meta.is_dir() {
        return Ok(());
    }

    unlock_dir(path, &meta)?;
    for entry in std::fs::read_dir(path)? {
        unlock_tree(&entry?.path())?;
    }
    Ok(())
}

#[cfg(unix)]
fn unlock_dir(path: &Path, meta: &Metadata) -> io::Result<Option<Permissions>> {
    use std::os::unix::fs::PermissionsExt;

    let original = meta.permissions();
    let mode = original.mode();
    if mode & 0o700 == 0o700 {
        return Ok(None);
    }
    std::fs::set_permissions(path, Permissions::from_mode(mode | 0o700))?;
    Ok(Some(original))
}

#[cfg(not(unix))]
fn unlock_dir(_path: &Path, _meta: &Metadata) -> io::Result<Option<Permissions>> {
    Ok(None)
}

#[cfg(unix)]
fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}
