//! Scoped temporary directory holding the segments of a single sort invocation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const DIR_PREFIX: &str = "sort.";

/// Owns a uniquely named temporary directory and every segment path allocated inside it.
///
/// Paths are tracked as soon as they are allocated, before anything is written to them. When the directory is
/// dropped every tracked path is removed, then the directory itself. Removal failures are logged and left behind.
pub struct ScratchDir {
    path: PathBuf,
    dir: Option<tempfile::TempDir>,
    segments: Vec<PathBuf>,
}

impl ScratchDir {
    /// Creates a new scratch directory inside `root`. If `root` is [`None`] the default OS temporary directory
    /// is used.
    pub fn new(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(DIR_PREFIX);

        let dir = if let Some(root) = root {
            builder.tempdir_in(root)
        } else {
            builder.tempdir()
        }?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(ScratchDir {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
            segments: Vec::new(),
        });
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocates and tracks the path of the next segment.
    /// Segments are numbered sequentially starting from zero.
    pub fn register(&mut self, extension: &str) -> PathBuf {
        let path = self.path.join(format!("{:06}.{}", self.segments.len(), extension));
        self.segments.push(path.clone());

        path
    }

    /// Returns tracked segment paths in allocation order.
    pub fn segments(&self) -> &[PathBuf] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        for segment in self.segments.drain(..) {
            match fs::remove_file(&segment) {
                Ok(()) => log::trace!("removed {}", segment.display()),
                // allocated but never written
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => log::error!("failed to remove temporary file {}: {}", segment.display(), err),
            }
        }

        // non-recursive removal, anything left behind has already been reported
        if let Some(dir) = self.dir.take() {
            let path = dir.keep();
            match fs::remove_dir(&path) {
                Ok(()) => log::debug!("removed temporary directory {}", path.display()),
                Err(err) => log::error!("failed to remove temporary directory {}: {}", path.display(), err),
            }
        }
    }
}
