//! Scratch directories that are removed on every exit path.

use std::future::Future;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::errors::HarnessResult;

/// Temporary directory owned by one test or one fetch; deleted on drop.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh directory under `root` (created if missing).
    pub fn new_in(root: &Path, prefix: &str) -> HarnessResult<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize_component(prefix)))
            .tempdir_in(root)?;
        debug!(path = %dir.path().display(), "Created scratch directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Files directly inside the directory with the given extension, sorted.
    pub fn find_by_extension(&self, extension: &str) -> HarnessResult<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(self.path())? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    /// Keep the directory on disk, e.g. to preserve artifacts of a failed run.
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}

/// Run `f` with a scratch directory that is removed whether `f` succeeds or fails.
pub async fn with_scratch_dir<F, Fut, T>(root: &Path, prefix: &str, f: F) -> HarnessResult<T>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
{
    let scratch = ScratchDir::new_in(root, prefix)?;
    let result = f(scratch.path().to_path_buf()).await;
    drop(scratch);
    result
}

/// Make a string safe to use as a single path component.
pub fn sanitize_component(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('.');
    if trimmed.is_empty() {
        "scratch".to_string()
    } else {
        trimmed.to_string()
    }
}
