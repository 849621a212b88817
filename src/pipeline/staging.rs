//! Per-run staging area for downloaded images.
//!
//! Every run stages into its own directory created under the configured
//! staging root (`<root>/run-XXXXXX`). Two overlapping runs therefore never
//! read each other's bytes, and a retried entry never picks up stale bytes
//! left behind by an earlier failed attempt. The directory is a [`TempDir`],
//! so it is removed when the run's `StagingArea` is dropped, on every exit
//! path including panics.
//!
//! A root that cannot be created does not stop the run. The area is marked
//! unavailable and [`StagingArea::ensure_dir`] reports the cause, so every
//! acquisition fails on its own entry.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Staging directory owned by one drain run.
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
    dir: Option<TempDir>,
    unavailable: Option<String>,
}

impl StagingArea {
    /// Create a fresh run directory under `root`, creating `root` if needed.
    pub async fn for_run(root: &Path) -> Self {
        match create_run_dir(root).await {
            Ok(dir) => {
                debug!("Staging into {}", dir.path().display());
                Self {
                    path: dir.path().to_path_buf(),
                    dir: Some(dir),
                    unavailable: None,
                }
            }
            Err(e) => {
                warn!("Staging root {} is unusable: {}", root.display(), e);
                Self {
                    path: root.join("run-unavailable"),
                    dir: None,
                    unavailable: Some(format!("{}: {}", root.display(), e)),
                }
            }
        }
    }

    /// False when the run directory could not be created.
    pub fn is_available(&self) -> bool {
        self.dir.is_some()
    }

    /// The run directory.
    pub fn root(&self) -> &Path {
        &self.path
    }

    /// Where the image for `id` is staged. Derived purely from `id`.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.path.join(format!("{}.img", sanitize(id)))
    }

    /// Recreate the run directory if something removed it. Idempotent.
    pub async fn ensure_dir(&self) -> io::Result<()> {
        if let Some(ref cause) = self.unavailable {
            return Err(io::Error::other(format!("staging unavailable ({cause})")));
        }
        tokio::fs::create_dir_all(&self.path).await
    }

    /// Remove the staged file for `id`, ignoring a file that is already gone.
    pub async fn discard(&self, id: &str) {
        if !self.is_available() {
            return;
        }
        let path = self.path_for(id);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != io::ErrorKind::NotFound {
                debug!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
}

async fn create_run_dir(root: &Path) -> io::Result<TempDir> {
    tokio::fs::create_dir_all(root).await?;
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || tempfile::Builder::new().prefix("run-").tempdir_in(root))
        .await
        .map_err(io::Error::other)?
}

/// Keep ids usable as a single file-name component.
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
