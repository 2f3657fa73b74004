//! Filesystem resolution of (already alias-rewritten) specifiers.
//!
//! ## Probe order
//!
//! For a relative or absolute target the first existing candidate wins:
//!
//! 1. the exact path, if it is a file
//! 2. the path with each configured extension appended, in configured order
//! 3. if the path is a directory, `index` + each extension
//! 4. if the directory has a `package.json`, its entry (`exports["."]`, then
//!    the configured main fields), probed with steps 1-3
//!
//! Bare specifiers walk up from the importer's directory through
//! `node_modules`. Specifiers matching `external` (and `node:` builtins) are
//! not probed at all.

mod package;

use crate::config::Config;
use crate::error::ResolutionError;
use crate::fs::FileSystem;
use pathmux_util::path::{is_absolute_like, join_normalized, normalize};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Maximum number of tried paths to record.
const MAX_TRIED_PATHS: usize = 32;

/// The concrete identity of a resolved import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPath {
    /// The specifier as written by the importer.
    pub specifier: String,
    /// Canonical file path. For external modules this is the (rewritten)
    /// module id, passed through untouched.
    pub absolute_path: PathBuf,
    /// Whether the module is left to the runtime instead of being loaded.
    pub is_external: bool,
}

impl ResolvedPath {
    #[must_use]
    pub fn file(specifier: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            specifier: specifier.into(),
            absolute_path: path.into(),
            is_external: false,
        }
    }

    #[must_use]
    pub fn external(specifier: impl Into<String>, id: impl Into<PathBuf>) -> Self {
        Self {
            specifier: specifier.into(),
            absolute_path: id.into(),
            is_external: true,
        }
    }
}

/// Turns specifiers into files.
#[derive(Debug, Clone)]
pub struct FileResolver {
    config: Arc<Config>,
    fs: Arc<dyn FileSystem>,
}

impl FileResolver {
    #[must_use]
    pub fn new(config: Arc<Config>, fs: Arc<dyn FileSystem>) -> Self {
        Self { config, fs }
    }

    /// Locate `specifier` relative to `base_dir`.
    pub fn locate(
        &self,
        specifier: &str,
        base_dir: &Path,
    ) -> Result<ResolvedPath, ResolutionError> {
        self.locate_as(specifier, specifier, base_dir)
    }

    /// Locate `target`, reporting results and failures under `specifier`.
    ///
    /// Used when `target` is the alias-rewritten form of what the importer
    /// actually wrote.
    pub fn locate_as(
        &self,
        specifier: &str,
        target: &str,
        base_dir: &Path,
    ) -> Result<ResolvedPath, ResolutionError> {
        if target.is_empty() {
            return Err(ResolutionError::new(specifier, base_dir));
        }

        if self.is_external(target) {
            trace!(specifier, target, "external");
            return Ok(ResolvedPath::external(specifier, target));
        }

        let mut tried = Vec::new();
        let found = if is_absolute_like(target) {
            self.probe(&normalize(Path::new(target)), &mut tried, true)
        } else if is_relative(target) {
            self.probe(&join_normalized(base_dir, target), &mut tried, true)
        } else {
            self.resolve_bare(target, base_dir, &mut tried)
        };

        let Some(found) = found else {
            debug!(
                specifier,
                target,
                base_dir = %base_dir.display(),
                tried = tried.len(),
                "unresolved"
            );
            return Err(ResolutionError::new(specifier, base_dir).with_tried(tried));
        };

        let canonical = self.fs.canonicalize(&found).map_err(|e| {
            debug!(path = %found.display(), error = %e, "canonicalize failed");
            ResolutionError::new(specifier, base_dir).with_tried(tried.clone())
        })?;

        debug!(specifier, path = %canonical.display(), "resolved");
        Ok(ResolvedPath::file(specifier, canonical))
    }

    /// Whether `target` is left unresolved on purpose.
    #[must_use]
    pub fn is_external(&self, target: &str) -> bool {
        if target.starts_with("node:") {
            return true;
        }
        self.config.external.iter().any(|ext| {
            target == ext
                || target
                    .strip_prefix(ext.as_str())
                    .is_some_and(|rest| rest.starts_with('/') || ext.ends_with('/'))
        })
    }

    /// Steps 1-4 of the probe order. `with_manifest` is false while probing a
    /// manifest's own entry so that entries cannot recurse.
    fn probe(
        &self,
        path: &Path,
        tried: &mut Vec<PathBuf>,
        with_manifest: bool,
    ) -> Option<PathBuf> {
        if let Some(hit) = self.probe_file(path, tried) {
            return Some(hit);
        }

        if !self.fs.is_dir(path) {
            return None;
        }

        let index = path.join("index");
        for ext in &self.config.extensions {
            let candidate = append_extension(&index, ext);
            if self.check(&candidate, tried) {
                return Some(candidate);
            }
        }

        if with_manifest {
            return self.probe_manifest(path, tried);
        }
        None
    }

    /// Steps 1-2: the exact file, then each extension.
    fn probe_file(&self, path: &Path, tried: &mut Vec<PathBuf>) -> Option<PathBuf> {
        if self.check(path, tried) {
            return Some(path.to_path_buf());
        }
        for ext in &self.config.extensions {
            let candidate = append_extension(path, ext);
            if self.check(&candidate, tried) {
                return Some(candidate);
            }
        }
        None
    }

    /// Step 4: the entry declared by `dir/package.json`.
    fn probe_manifest(&self, dir: &Path, tried: &mut Vec<PathBuf>) -> Option<PathBuf> {
        let manifest = self.read_manifest(dir)?;
        for entry in package::entry_candidates(&manifest, &self.config.main_fields) {
            let candidate = join_normalized(dir, &entry);
            if let Some(hit) = self.probe(&candidate, tried, false) {
                return Some(hit);
            }
        }
        None
    }

    /// Resolve `pkg` or `pkg/sub` from the nearest `node_modules`.
    fn resolve_bare(
        &self,
        target: &str,
        base_dir: &Path,
        tried: &mut Vec<PathBuf>,
    ) -> Option<PathBuf> {
        let (name, subpath) = package::parse_bare_specifier(target);

        let mut current = Some(base_dir);
        while let Some(dir) = current {
            let pkg_dir = dir.join("node_modules").join(name);
            if self.fs.is_dir(&pkg_dir) {
                trace!(package = name, dir = %pkg_dir.display(), "found package directory");
                let hit = match subpath {
                    Some(sub) => self.probe_package_subpath(&pkg_dir, sub, tried),
                    None => self
                        .probe_manifest(&pkg_dir, tried)
                        .or_else(|| self.probe(&pkg_dir, tried, false)),
                };
                if hit.is_some() {
                    return hit;
                }
            }
            current = dir.parent();
        }
        None
    }

    fn probe_package_subpath(
        &self,
        pkg_dir: &Path,
        sub: &str,
        tried: &mut Vec<PathBuf>,
    ) -> Option<PathBuf> {
        if let Some(manifest) = self.read_manifest(pkg_dir) {
            if let Some(exports) = manifest.get("exports") {
                if let Some(entry) = package::resolve_exports(exports, &format!("./{sub}")) {
                    let candidate = join_normalized(pkg_dir, &entry);
                    if self.check(&candidate, tried) {
                        return Some(candidate);
                    }
                }
            }
        }
        self.probe(&join_normalized(pkg_dir, sub), tried, true)
    }

    fn read_manifest(&self, dir: &Path) -> Option<Value> {
        let path = dir.join("package.json");
        if !self.fs.is_file(&path) {
            return None;
        }
        let content = self.fs.read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring unparsable package.json");
                None
            }
        }
    }

    fn check(&self, candidate: &Path, tried: &mut Vec<PathBuf>) -> bool {
        if tried.len() < MAX_TRIED_PATHS {
            tried.push(candidate.to_path_buf());
        }
        self.fs.is_file(candidate)
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// `button` + `.ts` → `button.ts`; unlike `Path::with_extension` this keeps
/// existing dots (`button.test` → `button.test.ts`).
fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(ext);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fs::{MemoryFileSystem, OsFileSystem};

    fn resolver(fs: MemoryFileSystem, extensions: &[&str]) -> FileResolver {
        let config = Config::builder("/project")
            .extensions(extensions.iter().map(|e| (*e).to_string()).collect())
            .build()
            .unwrap();
        FileResolver::new(Arc::new(config), Arc::new(fs))
    }

    #[test]
    fn test_absolute_with_extension_probe() {
        let fs = MemoryFileSystem::new().with_file("/project/src/widgets/button.ts", "");
        let r = resolver(fs, &[".ts", ".js"]);

        let resolved = r
            .locate("/project/src/widgets/button", Path::new("/project"))
            .unwrap();
        assert_eq!(
            resolved.absolute_path,
            PathBuf::from("/project/src/widgets/button.ts")
        );
        assert!(!resolved.is_external);
    }

    #[test]
    fn test_exact_file_wins_over_extension() {
        let fs = MemoryFileSystem::new()
            .with_file("/project/src/data", "")
            .with_file("/project/src/data.ts", "");
        let r = resolver(fs, &[".ts"]);

        let resolved = r.locate("./data", Path::new("/project/src")).unwrap();
        assert_eq!(resolved.absolute_path, PathBuf::from("/project/src/data"));
    }

    #[test]
    fn test_extension_order_is_configured_order() {
        let fs = MemoryFileSystem::new()
            .with_file("/project/src/index.ts", "")
            .with_file("/project/src/index.js", "");

        let r = resolver(fs.clone(), &[".ts", ".js"]);
        for _ in 0..5 {
            let resolved = r.locate("./src", Path::new("/project")).unwrap();
            assert_eq!(resolved.absolute_path, PathBuf::from("/project/src/index.ts"));
        }

        let r = resolver(fs, &[".js", ".ts"]);
        let resolved = r.locate("./src/index", Path::new("/project")).unwrap();
        assert_eq!(resolved.absolute_path, PathBuf::from("/project/src/index.js"));
    }

    #[test]
    fn test_relative_parent() {
        let fs = MemoryFileSystem::new().with_file("/project/lib/util.js", "");
        let r = resolver(fs, &[".ts", ".js"]);

        let resolved = r.locate("../lib/util", Path::new("/project/src")).unwrap();
        assert_eq!(resolved.absolute_path, PathBuf::from("/project/lib/util.js"));
    }

    #[test]
    fn test_index_before_manifest() {
        let fs = MemoryFileSystem::new()
            .with_file("/project/pkg/index.ts", "")
            .with_file("/project/pkg/package.json", r#"{"main": "main.js"}"#)
            .with_file("/project/pkg/main.js", "");
        let r = resolver(fs, &[".ts", ".js"]);

        let resolved = r.locate("./pkg", Path::new("/project")).unwrap();
        assert_eq!(resolved.absolute_path, PathBuf::from("/project/pkg/index.ts"));
    }

    #[test]
    fn test_manifest_entry() {
        let fs = MemoryFileSystem::new()
            .with_file("/project/pkg/package.json", r#"{"main": "lib/entry"}"#)
            .with_file("/project/pkg/lib/entry.js", "");
        let r = resolver(fs, &[".ts", ".js"]);

        let resolved = r.locate("./pkg", Path::new("/project")).unwrap();
        assert_eq!(
            resolved.absolute_path,
            PathBuf::from("/project/pkg/lib/entry.js")
        );
    }

    #[test]
    fn test_bare_specifier_node_modules() {
        let fs = MemoryFileSystem::new()
            .with_file(
                "/project/node_modules/vue/package.json",
                r#"{"module": "dist/vue.esm.js", "main": "index.js"}"#,
            )
            .with_file("/project/node_modules/vue/dist/vue.esm.js", "")
            .with_file("/project/node_modules/vue/index.js", "");
        let r = resolver(fs, &[".ts", ".js"]);

        let resolved = r.locate("vue", Path::new("/project/src/components")).unwrap();
        assert_eq!(
            resolved.absolute_path,
            PathBuf::from("/project/node_modules/vue/dist/vue.esm.js")
        );
    }

    #[test]
    fn test_bare_specifier_subpath_exports() {
        let fs = MemoryFileSystem::new()
            .with_file(
                "/project/node_modules/@scope/ui/package.json",
                r#"{"exports": {"./button": {"import": "./esm/button.js"}}}"#,
            )
            .with_file("/project/node_modules/@scope/ui/esm/button.js", "");
        let r = resolver(fs, &[".js"]);

        let resolved = r.locate("@scope/ui/button", Path::new("/project/src")).unwrap();
        assert_eq!(
            resolved.absolute_path,
            PathBuf::from("/project/node_modules/@scope/ui/esm/button.js")
        );
    }

    #[test]
    fn test_external_and_builtin() {
        let config = Config::builder("/project")
            .external(vec!["react".to_string()])
            .build()
            .unwrap();
        let r = FileResolver::new(Arc::new(config), Arc::new(MemoryFileSystem::new()));

        let resolved = r.locate("react/jsx-runtime", Path::new("/project")).unwrap();
        assert!(resolved.is_external);
        assert_eq!(resolved.absolute_path, PathBuf::from("react/jsx-runtime"));

        assert!(r.locate("node:fs", Path::new("/project")).unwrap().is_external);
        assert!(r.locate("react-dom", Path::new("/project")).is_err());
    }

    #[test]
    fn test_not_found_reports_specifier_and_tried() {
        let r = resolver(MemoryFileSystem::new(), &[".ts", ".js"]);

        let err = r
            .locate_as("@/missing/file", "/project/src/missing/file", Path::new("/project/src"))
            .unwrap_err();
        assert_eq!(err.specifier, "@/missing/file");
        assert_eq!(err.base_dir, PathBuf::from("/project/src"));
        assert_eq!(
            err.tried,
            vec![
                PathBuf::from("/project/src/missing/file"),
                PathBuf::from("/project/src/missing/file.ts"),
                PathBuf::from("/project/src/missing/file.js"),
            ]
        );
    }

    #[test]
    fn test_empty_specifier() {
        let r = resolver(MemoryFileSystem::new(), &[".ts"]);
        assert!(r.locate("", Path::new("/project")).is_err());
    }

    #[test]
    fn test_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        std::fs::create_dir_all(root.join("src/widgets")).unwrap();
        std::fs::write(root.join("src/widgets/button.tsx"), "export {}").unwrap();

        let config = Config::builder(&root).build().unwrap();
        let r = FileResolver::new(Arc::new(config), Arc::new(OsFileSystem::default()));

        let resolved = r.locate("./widgets/button", &root.join("src")).unwrap();
        assert_eq!(resolved.absolute_path, root.join("src/widgets/button.tsx"));
    }
}
