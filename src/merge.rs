//! Reference consumer of flattened source directories.
//!
//! Directories are merged in the order they come in. When two of them contain
//! the same relative path, the later one wins, matching the priority order of
//! [`LayeredSources`](crate::LayeredSources). Directories that do not exist are
//! skipped, since static source sets are usually sparse.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::Directory;
use crate::error::WiringError;

/// Which source file ended up at each relative path of a merged directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub files: BTreeMap<Utf8PathBuf, Utf8PathBuf>,
}

impl MergeReport {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The file that was copied to `relative`.
    pub fn origin(&self, relative: impl AsRef<Utf8Path>) -> Option<&Utf8Path> {
        self.files.get(relative.as_ref()).map(Utf8PathBuf::as_path)
    }
}

/// Lists every file below `dir`, relative to it.
pub fn list_files(dir: &Directory) -> Result<Vec<Utf8PathBuf>, WiringError> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let pattern = format!("{}/**/*", glob::Pattern::escape(dir.path().as_str()));
    let mut files = vec![];

    for entry in glob::glob(&pattern)? {
        let path = Utf8PathBuf::try_from(entry?)?;
        if path.is_file() {
            let relative = path
                .strip_prefix(dir.path())
                .map(Utf8Path::to_path_buf)
                .unwrap_or(path);
            files.push(relative);
        }
    }

    files.sort();
    Ok(files)
}

/// Merges `sources` into `dest`, later directories overriding earlier ones.
///
/// `dest` is recreated from scratch.
pub fn merge_directories(
    sources: &[Directory],
    dest: impl AsRef<Utf8Path>,
) -> Result<MergeReport, WiringError> {
    let dest = dest.as_ref();
    let mut report = MergeReport::default();

    for source in sources {
        for relative in list_files(source)? {
            report.files.insert(relative.clone(), source.file(&relative));
        }
    }

    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    for (relative, origin) in &report.files {
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(origin, &target)?;
    }

    tracing::debug!("merged {} files into {}", report.len(), dest);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    fn write(path: Utf8PathBuf, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_last_layer_wins() {
        let (_guard, root) = root();
        let low = Directory::new(root.join("main"));
        let high = Directory::new(root.join("debug"));

        write(low.file("a.txt"), "main a");
        write(low.file("nested/b.txt"), "main b");
        write(high.file("a.txt"), "debug a");

        let dest = root.join("merged");
        let report = merge_directories(&[low.clone(), high.clone()], &dest).unwrap();

        assert_eq!(report.len(), 2);
        assert_eq!(report.origin("a.txt"), Some(high.file("a.txt").as_path()));
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "debug a");
        assert_eq!(
            fs::read_to_string(dest.join("nested/b.txt")).unwrap(),
            "main b"
        );
    }

    #[test]
    fn test_missing_directories_are_skipped() {
        let (_guard, root) = root();
        let dest = root.join("merged");

        let report = merge_directories(&[Directory::new(root.join("nope"))], &dest).unwrap();

        assert!(report.is_empty());
        assert!(dest.is_dir());
    }

    #[test]
    fn test_dest_is_recreated() {
        let (_guard, root) = root();
        let dest = root.join("merged");
        write(dest.join("stale.txt"), "old");

        merge_directories(&[], &dest).unwrap();

        assert!(!dest.join("stale.txt").exists());
    }
}
