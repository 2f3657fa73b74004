//! Lexical path helpers.
//!
//! Nothing here touches the filesystem: `..` is folded against the preceding
//! component, so symlinked parents are not followed.

use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path, removing `.` components and folding `..`.
///
/// A `..` that would climb above the root is dropped for absolute paths and
/// kept for relative ones.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(name) => {
                out.push(name);
                depth += 1;
            }
        }
    }

    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Join `rel` onto `base` and normalize the result.
///
/// An absolute `rel` replaces `base`, as with [`Path::join`].
#[must_use]
pub fn join_normalized(base: &Path, rel: &str) -> PathBuf {
    normalize(&base.join(rel))
}

/// Whether a string looks like an absolute path on any supported platform.
///
/// Leading `/` counts as absolute everywhere so that root-style alias
/// targets behave the same on Windows.
#[must_use]
pub fn is_absolute_like(s: &str) -> bool {
    s.starts_with('/') || Path::new(s).is_absolute()
}
