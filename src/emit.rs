//! Idempotent artifact writes.
//!
//! A file is rewritten only when its contents change, so build systems that
//! key on mtime don't rebuild everything that includes a generated header.
//! New contents go to a temp file next to the target and are renamed over it.

use crate::error::IpdlError;
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::Path;
use std::process;
use std::thread;
use tracing::debug;

/// Write `contents` to `path` unless the file already holds exactly that.
/// Returns whether the file was written.
pub fn write_if_modified(path: &Path, contents: &str) -> Result<bool, IpdlError> {
    match fs::read(path) {
        Ok(existing) if existing == contents.as_bytes() => {
            debug!("unchanged: {}", path.display());
            return Ok(false);
        }
        _ => {}
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| IpdlError::io(parent, e))?;
        }
    }

    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.{}.tmp", file_name, process::id(), thread_id()));
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| IpdlError::io(&temp_path, e))?;
        file.write_all(contents.as_bytes()).map_err(|e| IpdlError::io(&temp_path, e))?;
        file.flush().map_err(|e| IpdlError::io(&temp_path, e))?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(IpdlError::io(path, e));
    }
    debug!("wrote {}", path.display());
    Ok(true)
}

/// Codegen workers write from several threads at once.
fn thread_id() -> u64 {
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_parent_dirs() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("mozilla/dom/PFoo.h");
        assert!(write_if_modified(&path, "// one\n").expect("write"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "// one\n");
    }

    #[test]
    fn skips_identical_contents() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("IPCMessageStart.h");
        assert!(write_if_modified(&path, "a").expect("write"));
        assert!(!write_if_modified(&path, "a").expect("write"));
        assert!(write_if_modified(&path, "b").expect("write"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "b");
        let leftovers = fs::read_dir(dir.path()).expect("dir").count();
        assert_eq!(leftovers, 1);
    }
}
