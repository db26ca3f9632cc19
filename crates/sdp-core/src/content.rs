//! Content store: deterministic path allocation for dataset files.
//!
//! Every dataset owns one directory under the data root. The relative path
//! is a pure function of the dataset id and archived flag, so paths are
//! never reused and concurrent workers never write-collide. The `id mod
//! 1000` bucket bounds directory fan-out to 1000 entries per top level.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Relative storage path for a dataset: `data|archive/<id mod 1000, 3
/// digits>/<id, 8 digits>`.
pub fn relpath(id: i64, archived: bool) -> PathBuf {
    let top = if archived { "archive" } else { "data" };
    PathBuf::from(format!("{}/{:03}/{:08}", top, id % 1000, id))
}

/// Create the dataset's directory under `root`, returning the absolute path.
pub fn ensure_dir(root: &Path, id: i64, archived: bool) -> io::Result<PathBuf> {
    let path = root.join(relpath(id, archived));
    fs::create_dir_all(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_relpath_format() {
        assert_eq!(relpath(1, false), PathBuf::from("data/001/00000001"));
        assert_eq!(relpath(1, true), PathBuf::from("archive/001/00000001"));
        assert_eq!(relpath(1000, false), PathBuf::from("data/000/00001000"));
        assert_eq!(relpath(12345678, false), PathBuf::from("data/678/12345678"));
    }

    #[test]
    fn test_relpath_injective_and_stable() {
        let mut seen = HashSet::new();
        for id in 1..=4000 {
            let path = relpath(id, false);
            assert_eq!(path, relpath(id, false));
            assert!(seen.insert(path), "path reused for id {}", id);
        }
    }

    #[test]
    fn test_bucket_fanout_bounded() {
        for id in [1, 999, 1000, 1001, 99_999_999] {
            let path = relpath(id, false);
            let bucket: i64 = path
                .components()
                .nth(1)
                .and_then(|c| c.as_os_str().to_str())
                .and_then(|s| s.parse().ok())
                .unwrap();
            assert!((0..1000).contains(&bucket));
        }
    }

    #[test]
    fn test_ensure_dir_creates() {
        let root = tempfile::tempdir().unwrap();
        let path = ensure_dir(root.path(), 42, false).unwrap();
        assert!(path.is_dir());
        assert!(path.ends_with("data/042/00000042"));
        // idempotent
        assert_eq!(ensure_dir(root.path(), 42, false).unwrap(), path);
    }
}
