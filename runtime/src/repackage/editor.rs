//! Interactive plan editing through the user's editor.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use restack_core::error::{RestackError, Result};

const FALLBACK_EDITORS: [&str; 3] = ["vim", "vi", "nano"];

/// Open `text` in an editor and return what the user saved.
///
/// `$EDITOR` may carry arguments (`code --wait`). Without it, the first of
/// vim, vi and nano found on `PATH` is used.
pub fn edit_plan(text: &str) -> Result<String> {
    let (program, args) = resolve_editor(std::env::var("EDITOR").ok().as_deref())?;

    let mut file = tempfile::Builder::new()
        .prefix("restack-plan-")
        .suffix(".txt")
        .tempfile()?;
    file.write_all(text.as_bytes())?;
    file.flush()?;

    tracing::debug!(editor = %program, path = %file.path().display(), "Launching editor");

    let status = Command::new(&program)
        .args(&args)
        .arg(file.path())
        .status()
        .map_err(|e| RestackError::Other(format!("Failed to launch editor {}: {}", program, e)))?;

    if !status.success() {
        return Err(RestackError::Other(format!(
            "Editor {} exited with {}",
            program, status
        )));
    }

    Ok(std::fs::read_to_string(file.path())?)
}

fn resolve_editor(configured: Option<&str>) -> Result<(String, Vec<String>)> {
    if let Some(value) = configured {
        let mut parts = value.split_whitespace().map(str::to_string);
        if let Some(program) = parts.next() {
            return Ok((program, parts.collect()));
        }
    }

    FALLBACK_EDITORS
        .iter()
        .find_map(|name| find_on_path(name))
        .map(|path| (path.to_string_lossy().into_owned(), Vec::new()))
        .ok_or_else(|| {
            RestackError::Other("No editor found; set $EDITOR to edit the plan".to_string())
        })
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_configured_editor_with_args() {
        let (program, args) = resolve_editor(Some("code --wait -n")).unwrap();
        assert_eq!(program, "code");
        assert_eq!(args, vec!["--wait", "-n"]);
    }

    #[test]
    fn test_resolve_blank_editor_falls_back() {
        // Either a fallback editor exists on this machine or the lookup fails
        match resolve_editor(Some("   ")) {
            Ok((program, args)) => {
                assert!(FALLBACK_EDITORS.iter().any(|e| program.ends_with(e)));
                assert!(args.is_empty());
            }
            Err(e) => assert!(e.to_string().contains("No editor found")),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_edit_plan_with_non_interactive_editor() {
        // `true` leaves the file untouched
        let (program, _) = resolve_editor(Some("true")).unwrap();
        assert_eq!(program, "true");

        std::env::set_var("EDITOR", "true");
        let edited = edit_plan("pick 0\n").unwrap();
        assert_eq!(edited, "pick 0\n");
    }
}
