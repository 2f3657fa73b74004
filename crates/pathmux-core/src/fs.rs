//! Filesystem access used by the resolver and the default loader.
//!
//! Resolution only ever asks four questions of the filesystem, so they are
//! collected behind [`FileSystem`]. [`OsFileSystem`] answers them from disk;
//! [`MemoryFileSystem`] answers them from a fixed set of files, which lets a
//! host resolve against an overlay or a test fixture rooted at `/project`.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

/// Read-only view of a filesystem.
///
/// Implementations must be thread-safe: one instance is shared by every
/// in-flight request of a session.
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    /// Whether `path` exists and is a regular file.
    fn is_file(&self, path: &Path) -> bool;

    /// Whether `path` exists and is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Read a file as UTF-8 (invalid sequences replaced).
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Produce the canonical identity of an existing path.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem {
    /// Keep symlinked paths as found instead of following them.
    pub preserve_symlinks: bool,
}

impl OsFileSystem {
    #[must_use]
    pub fn new(preserve_symlinks: bool) -> Self {
        Self { preserve_symlinks }
    }
}

impl FileSystem for OsFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        pathmux_util::fs::read_to_string_lossy(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        if self.preserve_symlinks {
            Ok(pathmux_util::path::normalize(path))
        } else {
            dunce::canonicalize(path)
        }
    }
}

/// An in-memory filesystem.
///
/// Directories are implied by the files inserted beneath them.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeSet<PathBuf>,
}

impl MemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file (builder style).
    #[must_use]
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    /// Add or replace a file, creating its parent directories.
    pub fn insert(&mut self, path: impl AsRef<Path>, contents: impl Into<String>) {
        let path = pathmux_util::path::normalize(path.as_ref());
        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir.as_os_str().is_empty() || !self.dirs.insert(dir.to_path_buf()) {
                break;
            }
            parent = dir.parent();
        }
        self.files.insert(path, contents.into());
    }

    fn key(path: &Path) -> PathBuf {
        pathmux_util::path::normalize(path)
    }
}

impl FileSystem for MemoryFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(&Self::key(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(&Self::key(path))
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(&Self::key(path)).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )
        })
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let key = Self::key(path);
        if self.files.contains_key(&key) || self.dirs.contains(&key) {
            Ok(key)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such path: {}", path.display()),
            ))
        }
    }
}
