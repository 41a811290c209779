//! Directory utilities: temporary build trees and local file helpers.

use std::path::{Path, PathBuf};

use filetime::FileTime;

/// A temporary directory holding a build root (`build/`) and the root of a
/// local object store (`store/`). Removed on drop.
pub struct BuildTree {
    dir: tempfile::TempDir,
}

impl BuildTree {
    pub fn new() -> anyhow::Result<BuildTree> {
        let dir = tempfile::Builder::new().prefix("stampsync-test").tempdir()?;
        std::fs::create_dir(dir.path().join("build"))?;
        std::fs::create_dir(dir.path().join("store"))?;
        Ok(BuildTree { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn build_root(&self) -> PathBuf {
        self.dir.path().join("build")
    }

    pub fn store_root(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    /// Path below the build root, `relative` using `/` separators.
    pub fn local(&self, relative: &str) -> PathBuf {
        let mut path = self.build_root();
        path.extend(relative.split('/').filter(|c| !c.is_empty()));
        path
    }
}

/// Writes `content` to `path`, creating parent directories.
pub fn write_file(path: &Path, content: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

pub fn set_mtime(path: &Path, unix_seconds: i64) -> anyhow::Result<()> {
    let time = FileTime::from_unix_time(unix_seconds, 0);
    filetime::set_file_times(path, time, time)?;
    Ok(())
}

pub fn mtime(path: &Path) -> anyhow::Result<i64> {
    let metadata = std::fs::metadata(path)?;
    Ok(FileTime::from_last_modification_time(&metadata).unix_seconds())
}

/// All regular files below `root`, relative and with `/` separators, sorted.
pub fn list_files(root: &Path) -> anyhow::Result<Vec<String>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> anyhow::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(root, &path, out)?;
            } else {
                let relative = path.strip_prefix(root)?;
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(parts.join("/"));
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    if root.is_dir() {
        walk(root, root, &mut files)?;
    }
    files.sort();
    Ok(files)
}
