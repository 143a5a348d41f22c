//! Resolver: turns a handle back into a path via a bounded, pruned
//! directory-tree scan.
//!
//! This is the expensive fallback the path cache exists to avoid. It never
//! trusts the client beyond what [`super::handle::validate`] already
//! checked: a malformed trail just makes the scan explore a few dead ends
//! before giving up.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::handle::{inode_hash, Handle};

/// Decodes `handle` by scanning the filesystem from the export root.
///
/// Returns the resolved path (relative, no leading `/`) and the `lstat`
/// result for the matched object so the caller can warm the attribute
/// cache. Returns `None` if no object under `root` matches.
///
/// A handle with an empty trail (`len == 0`) names either the root itself
/// or a direct child of it -- both encode with no ancestors. The two are
/// told apart by identity, not by `len`: only a handle whose `(dev, ino)`
/// matches the root's own `lstat` is the root.
pub fn resolve(root: &Path, handle: &Handle) -> Option<(PathBuf, std::fs::Metadata)> {
    if handle.len == 0 {
        if let Ok(meta) = std::fs::symlink_metadata(root) {
            if meta.dev() as u32 == handle.dev && meta.ino() as u32 == handle.ino {
                return Some((PathBuf::new(), meta));
            }
        }
    }

    rec(root, root, 0, handle)
}

fn rec(root: &Path, dir: &Path, pos: usize, handle: &Handle) -> Option<(PathBuf, std::fs::Metadata)> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name == "." || name == ".." {
            continue;
        }
        let full = dir.join(&name);
        let meta = match std::fs::symlink_metadata(&full) {
            Ok(meta) => meta,
            Err(_) => continue,
        };

        if meta.dev() as u32 == handle.dev && meta.ino() as u32 == handle.ino {
            let rel = full.strip_prefix(root).unwrap_or(&full).to_path_buf();
            trace!(?rel, "resolver matched handle");
            return Some((rel, meta));
        }

        if pos < handle.len as usize && meta.is_dir() && inode_hash(meta.ino() as u32) == handle.inos[pos] {
            if let Some(found) = rec(root, &full, pos + 1, handle) {
                return Some(found);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fh::handle::{encode, MAX_DEPTH};
    use std::fs;

    #[test]
    fn resolves_root() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _) = encode(dir.path(), dir.path(), true);
        let (rel, _) = resolve(dir.path(), &handle).unwrap();
        assert_eq!(rel, PathBuf::new());
    }

    #[test]
    fn resolves_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/c"), b"hi").unwrap();

        let (handle, _) = encode(dir.path(), &dir.path().join("a/b/c"), false);
        assert_eq!(handle.len, 2);

        let (rel, _) = resolve(dir.path(), &handle).unwrap();
        assert_eq!(rel, PathBuf::from("a/b/c"));
    }

    #[test]
    fn unresolved_when_object_gone() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), b"hi").unwrap();
        let (handle, _) = encode(dir.path(), &dir.path().join("f"), false);
        fs::remove_file(dir.path().join("f")).unwrap();
        assert!(resolve(dir.path(), &handle).is_none());
    }

    #[test]
    fn depth_is_bounded_by_max_depth() {
        let handle =
            super::super::handle::Handle { dev: 1, ino: 1, gen: 0, len: MAX_DEPTH as u8, inos: [0; MAX_DEPTH] };
        let dir = tempfile::tempdir().unwrap();
        // A handle whose len equals MAX_DEPTH must not cause unbounded
        // recursion; with an empty tree it simply fails to resolve.
        assert!(resolve(dir.path(), &handle).is_none());
    }
}
