//! A resolution session: one validated config plus everything built from it.
//!
//! Per request the session
//!
//! 1. rewrites the specifier through the alias rules,
//! 2. locates the rewritten target on the filesystem,
//! 3. lets resolve hooks override that answer (or supply one when the
//!    filesystem had none),
//!
//! and then, for [`Session::process`], loads and transforms the module.

use crate::alias::AliasResolver;
use crate::cache::{CacheStats, ResolveCache, ResolveKey};
use crate::config::Config;
use crate::error::{ConfigError, Error, Result};
use crate::fs::{FileSystem, OsFileSystem};
use crate::plugin::{
    Hook, InvocationState, PipelineContext, PluginPipeline, PluginRegistry, SourceOutput,
};
use crate::resolver::{FileResolver, ResolvedPath};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use pathmux_util::path::normalize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared cancellation flag.
///
/// Cloning yields a handle to the same flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelToken").field(&self.is_cancelled()).finish()
    }
}

/// A fully processed module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedModule {
    pub resolved: ResolvedPath,
    /// Transformed source; `None` for external modules, which are not loaded.
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
}

/// Resolves and processes modules under one configuration.
///
/// All state is read-only after construction except the resolution cache,
/// so a session can serve requests from many threads at once.
#[derive(Debug)]
pub struct Session {
    config: Arc<Config>,
    aliases: AliasResolver,
    resolver: FileResolver,
    pipeline: PluginPipeline,
    fs: Arc<dyn FileSystem>,
    cache: Option<ResolveCache>,
    cancel: CancelToken,
}

impl Session {
    /// Build a session with the built-in plugins on the real filesystem.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn builder(config: Config) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn pipeline(&self) -> &PluginPipeline {
        &self.pipeline
    }

    /// Token shared by every request of this session.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Resolve `specifier` as imported from `importer` (or from the project
    /// root when there is no importer).
    pub fn resolve(&self, specifier: &str, importer: Option<&Path>) -> Result<ResolvedPath> {
        self.ensure_open(specifier)?;

        let base_dir = importer
            .and_then(Path::parent)
            .unwrap_or(&self.config.root)
            .to_path_buf();

        let resolved = match &self.cache {
            Some(cache) => {
                let key = ResolveKey::new(specifier, base_dir.clone());
                cache.get_or_resolve(&key, || self.resolve_uncached(specifier, importer, &base_dir))
            }
            None => self.resolve_uncached(specifier, importer, &base_dir),
        }?;

        // A close that raced the request discards its result.
        self.ensure_open(specifier)?;
        Ok(resolved)
    }

    fn resolve_uncached(
        &self,
        specifier: &str,
        importer: Option<&Path>,
        base_dir: &Path,
    ) -> Result<ResolvedPath> {
        let rewritten = self.aliases.resolve(specifier);
        let located = self.resolver.locate_as(specifier, &rewritten, base_dir);

        if !self.pipeline.handles(Hook::Resolve) {
            return located.map_err(Error::from);
        }

        let mut ctx = PipelineContext::new(specifier, rewritten, self.config.root.clone())
            .with_cancel(self.cancel.clone());
        ctx.importer = importer.map(Path::to_path_buf);
        ctx.resolved = located.as_ref().ok().cloned();

        match self.pipeline.run_hook(Hook::Resolve, &mut ctx)? {
            InvocationState::ShortCircuited => match ctx.resolved.take() {
                Some(resolved) => Ok(resolved),
                None => located.map_err(Error::from),
            },
            _ => located.map_err(Error::from),
        }
    }

    /// Resolve many specifiers from the same importer in parallel.
    ///
    /// Results come back in input order.
    pub fn resolve_many<S>(&self, specifiers: &[S], importer: Option<&Path>) -> Vec<Result<ResolvedPath>>
    where
        S: AsRef<str> + Sync,
    {
        specifiers
            .par_iter()
            .map(|specifier| self.resolve(specifier.as_ref(), importer))
            .collect()
    }

    /// Load a resolved module through the load hooks, falling back to the
    /// session's filesystem.
    pub fn load(&self, resolved: &ResolvedPath) -> Result<SourceOutput> {
        self.ensure_open(&resolved.specifier)?;

        let id = resolved.absolute_path.to_string_lossy().into_owned();
        let mut ctx = PipelineContext::new(&resolved.specifier, id, self.config.root.clone())
            .with_resolved(resolved.clone())
            .with_cancel(self.cancel.clone());

        if self.pipeline.run_hook(Hook::Load, &mut ctx)? == InvocationState::ShortCircuited {
            return Ok(SourceOutput {
                code: ctx.code.unwrap_or_default(),
                map: ctx.map,
            });
        }

        if resolved.is_external {
            return Err(Error::Load {
                path: resolved.absolute_path.clone(),
                message: "external modules are not loaded".to_string(),
            });
        }

        let code = self
            .fs
            .read_to_string(&resolved.absolute_path)
            .map_err(|e| Error::Load {
                path: resolved.absolute_path.clone(),
                message: e.to_string(),
            })?;
        Ok(SourceOutput::code(code))
    }

    /// Run the transform hooks over `code`.
    pub fn transform(&self, id: &str, code: impl Into<String>) -> Result<SourceOutput> {
        self.ensure_open(id)?;

        let mut ctx = PipelineContext::new(id, id, self.config.root.clone())
            .with_code(code)
            .with_cancel(self.cancel.clone());
        self.pipeline.run_hook(Hook::Transform, &mut ctx)?;

        Ok(SourceOutput {
            code: ctx.code.unwrap_or_default(),
            map: ctx.map,
        })
    }

    /// Resolve, load and transform one import.
    pub fn process(&self, specifier: &str, importer: Option<&Path>) -> Result<ProcessedModule> {
        let resolved = self.resolve(specifier, importer)?;
        if resolved.is_external {
            return Ok(ProcessedModule {
                resolved,
                code: None,
                map: None,
            });
        }

        let loaded = self.load(&resolved)?;
        let id = resolved.absolute_path.to_string_lossy().into_owned();
        let mut ctx = PipelineContext::new(specifier, id, self.config.root.clone())
            .with_resolved(resolved.clone())
            .with_code(loaded.code)
            .with_cancel(self.cancel.clone());
        ctx.map = loaded.map;
        self.pipeline.run_hook(Hook::Transform, &mut ctx)?;

        Ok(ProcessedModule {
            resolved,
            code: ctx.code,
            map: ctx.map,
        })
    }

    /// Forget cached resolutions that point at `path` (a file changed).
    ///
    /// `path` is canonicalized the way resolution does, so a watcher may
    /// report it through a symlink or with `.` segments. Relative paths are
    /// taken from the project root, and a deleted file is matched through its
    /// canonical parent directory.
    pub fn invalidate_path(&self, path: &Path) -> usize {
        let Some(cache) = &self.cache else {
            return 0;
        };
        let canonical = self.canonical_form(path);
        let mut count = cache.invalidate_path(&canonical);
        if canonical != path {
            count += cache.invalidate_path(path);
        }
        count
    }

    fn canonical_form(&self, path: &Path) -> PathBuf {
        let path = self.config.root.join(path);
        if let Ok(canonical) = self.fs.canonicalize(&path) {
            return canonical;
        }
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => self
                .fs
                .canonicalize(parent)
                .map_or_else(|_| normalize(&path), |dir| dir.join(name)),
            _ => normalize(&path),
        }
    }

    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(ResolveCache::stats)
    }

    /// Close the session. In-flight requests are abandoned after their
    /// current hook and new requests fail with [`Error::Cancelled`].
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!(root = %self.config.root.display(), "closing session");
        }
        self.cancel.cancel();
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn ensure_open(&self, specifier: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                specifier: specifier.to_string(),
            });
        }
        Ok(())
    }
}

/// Configures how a [`Session`] is assembled.
#[derive(Debug)]
pub struct SessionBuilder {
    config: Config,
    registry: PluginRegistry,
    fs: Option<Arc<dyn FileSystem>>,
}

impl SessionBuilder {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: PluginRegistry::with_builtins(),
            fs: None,
        }
    }

    /// Use `registry` to instantiate the configured plugins.
    #[must_use]
    pub fn registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Resolve against `fs` instead of the real filesystem.
    #[must_use]
    pub fn fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Instantiate every plugin and compile the alias rules.
    ///
    /// An unknown plugin name or bad plugin options fail here, before any
    /// request is served.
    pub fn build(self) -> Result<Session, ConfigError> {
        let config = Arc::new(self.config);
        let fs = self
            .fs
            .unwrap_or_else(|| Arc::new(OsFileSystem::new(config.preserve_symlinks)));

        let aliases = AliasResolver::new(&config.aliases)?;
        let pipeline = PluginPipeline::from_config(&config, &self.registry)?;
        let resolver = FileResolver::new(Arc::clone(&config), Arc::clone(&fs));
        let cache = config.cache.then(ResolveCache::new);

        debug!(
            root = %config.root.display(),
            aliases = config.aliases.len(),
            plugins = pipeline.len(),
            cache = cache.is_some(),
            "session ready"
        );

        Ok(Session {
            config,
            aliases,
            resolver,
            pipeline,
            fs,
            cache,
            cancel: CancelToken::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasRule;
    use crate::fs::MemoryFileSystem;
    use crate::plugin::{Capabilities, HookOutcome, Plugin, PluginDescriptor};
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::sync::OnceLock;

    fn project_fs() -> Arc<dyn FileSystem> {
        Arc::new(
            MemoryFileSystem::new()
                .with_file("/project/src/widgets/button.ts", "export const Button = 1;")
                .with_file("/project/src/main.ts", "import '@/widgets/button';")
                .with_file("/project/src/data.json", r#"{ "answer": 42 }"#)
                .with_file("/project/src/lib/index.js", "export {};"),
        )
    }

    fn config() -> crate::config::ConfigBuilder {
        Config::builder("/project")
            .alias(AliasRule::prefix("@", "/project/src"))
            .extensions(vec![".ts".to_string(), ".js".to_string()])
    }

    fn session(builder: crate::config::ConfigBuilder) -> Session {
        Session::builder(builder.build().unwrap())
            .fs(project_fs())
            .build()
            .unwrap()
    }

    #[test]
    fn test_alias_then_extension_probe() {
        let session = session(config());
        let resolved = session.resolve("@/widgets/button", None).unwrap();
        assert_eq!(resolved.specifier, "@/widgets/button");
        assert_eq!(
            resolved.absolute_path,
            PathBuf::from("/project/src/widgets/button.ts")
        );
        assert!(!resolved.is_external);
    }

    #[test]
    fn test_unresolvable_reports_original_specifier() {
        let session = session(config());
        let err = session.resolve("@/missing/file", None).unwrap_err();
        let Error::Resolution(err) = err else {
            panic!("expected a resolution error, got {err:?}");
        };
        assert_eq!(err.specifier, "@/missing/file");
        assert!(err
            .tried
            .contains(&PathBuf::from("/project/src/missing/file.ts")));
    }

    #[test]
    fn test_relative_to_importer() {
        let session = session(config());
        let resolved = session
            .resolve("./lib", Some(Path::new("/project/src/main.ts")))
            .unwrap();
        assert_eq!(resolved.absolute_path, PathBuf::from("/project/src/lib/index.js"));
    }

    #[test]
    fn test_resolve_many_keeps_order() {
        let session = session(config());
        let results = session.resolve_many(&["@/main", "@/nope", "@/lib"], None);
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].as_ref().unwrap().absolute_path,
            PathBuf::from("/project/src/main.ts")
        );
        assert!(results[1].is_err());
        assert_eq!(
            results[2].as_ref().unwrap().absolute_path,
            PathBuf::from("/project/src/lib/index.js")
        );
    }

    #[test]
    fn test_process_json_module() {
        let session = session(config().plugin(PluginDescriptor::new("json")));
        let module = session.process("@/data.json", None).unwrap();
        assert_eq!(module.code.as_deref(), Some(r#"export default { "answer": 42 };"#));
    }

    #[test]
    fn test_virtual_module_overrides_failed_lookup() {
        let session = session(config().plugin(
            PluginDescriptor::new("virtual").with_options(json!({ "env": "export const mode = 'dev';" })),
        ));

        let module = session.process("virtual:env", None).unwrap();
        assert_eq!(module.resolved.absolute_path, PathBuf::from("\0virtual:env"));
        assert_eq!(module.code.as_deref(), Some("export const mode = 'dev';"));
    }

    #[test]
    fn test_resolve_hook_overrides_filesystem() {
        struct Redirect;
        impl Plugin for Redirect {
            fn name(&self) -> &str {
                "redirect"
            }
            fn capabilities(&self) -> Capabilities {
                Capabilities::RESOLVE
            }
            fn resolve(&self, ctx: &mut PipelineContext) -> HookOutcome<ResolvedPath> {
                if ctx.resolved.is_some() && ctx.id.ends_with("button") {
                    return HookOutcome::ShortCircuit(ResolvedPath::file(
                        ctx.specifier.clone(),
                        "/project/src/lib/index.js",
                    ));
                }
                HookOutcome::Continue
            }
        }

        let mut registry = PluginRegistry::with_builtins();
        registry.register("redirect", |_| Ok(Arc::new(Redirect) as Arc<dyn Plugin>));
        let session = Session::builder(
            config()
                .plugin(PluginDescriptor::new("redirect"))
                .build()
                .unwrap(),
        )
        .registry(registry)
        .fs(project_fs())
        .build()
        .unwrap();

        let resolved = session.resolve("@/widgets/button", None).unwrap();
        assert_eq!(resolved.absolute_path, PathBuf::from("/project/src/lib/index.js"));

        // Without an override the filesystem answer stands.
        let resolved = session.resolve("@/main", None).unwrap();
        assert_eq!(resolved.absolute_path, PathBuf::from("/project/src/main.ts"));
    }

    #[test]
    fn test_transform_chain_and_failure() {
        let session = session(
            config()
                .plugin(PluginDescriptor::new("define").with_options(json!({ "__DEV__": "false" })))
                .plugin(PluginDescriptor::new("json")),
        );

        let out = session.transform("/project/src/a.ts", "if (__DEV__) {}").unwrap();
        assert_eq!(out.code, "if (false) {}");

        let err = session.transform("/project/src/bad.json", "{").unwrap_err();
        let Error::Plugin(failure) = err else {
            panic!("expected plugin failure");
        };
        assert_eq!(failure.plugin, "json");
        assert_eq!(failure.hook, "transform");
    }

    #[test]
    fn test_externals_are_not_loaded() {
        let session = session(config().external(vec!["vue".to_string()]));
        let module = session.process("vue", None).unwrap();
        assert!(module.resolved.is_external);
        assert!(module.code.is_none());

        assert!(matches!(
            session.load(&module.resolved),
            Err(Error::Load { .. })
        ));
    }

    #[test]
    fn test_cache_and_invalidation() {
        let session = session(config());
        session.resolve("@/main", None).unwrap();
        session.resolve("@/main", None).unwrap();

        let stats = session.cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        assert_eq!(session.invalidate_path(Path::new("/project/src/main.ts")), 1);
        assert_eq!(session.cache_stats().unwrap().entry_count, 0);
    }

    #[test]
    fn test_invalidate_non_canonical_path() {
        let session = session(config());
        session.resolve("@/main", None).unwrap();
        session.resolve("@/widgets/button", None).unwrap();

        assert_eq!(
            session.invalidate_path(Path::new("/project/src/widgets/../main.ts")),
            1
        );
        assert_eq!(session.invalidate_path(Path::new("src/./widgets/button.ts")), 1);
        assert_eq!(session.cache_stats().unwrap().entry_count, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_invalidate_through_symlinked_dir() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir_all(real.join("src")).unwrap();
        std::fs::write(real.join("src/main.ts"), "export {};").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let root = dunce::canonicalize(&real).unwrap();
        let config = Config::builder(root.clone())
            .alias(AliasRule::prefix("@", "./src"))
            .build()
            .unwrap();
        let session = Session::new(config).unwrap();
        session.resolve("@/main", None).unwrap();

        assert_eq!(session.invalidate_path(&link.join("src/main.ts")), 1);
        assert_eq!(session.cache_stats().unwrap().entry_count, 0);
    }

    #[test]
    fn test_cache_disabled() {
        let session = session(config().cache(false));
        session.resolve("@/main", None).unwrap();
        assert!(session.cache_stats().is_none());
        assert_eq!(session.invalidate_path(Path::new("/project/src/main.ts")), 0);
    }

    #[test]
    fn test_closed_session_rejects_requests() {
        let session = session(config());
        session.close();
        assert!(session.is_closed());
        assert!(matches!(
            session.resolve("@/main", None),
            Err(Error::Cancelled { specifier }) if specifier == "@/main"
        ));
        assert!(matches!(
            session.transform("/x.ts", ""),
            Err(Error::Cancelled { .. })
        ));
    }

    /// Resolve hook that closes its session, then answers anyway.
    struct ClosesSession {
        token: Arc<OnceLock<CancelToken>>,
    }

    impl Plugin for ClosesSession {
        fn name(&self) -> &str {
            "closer"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::RESOLVE
        }

        fn resolve(&self, ctx: &mut PipelineContext) -> HookOutcome<ResolvedPath> {
            if let Some(token) = self.token.get() {
                token.cancel();
            }
            HookOutcome::ShortCircuit(ResolvedPath::file(ctx.specifier.clone(), "/project/late.ts"))
        }
    }

    #[test]
    fn test_close_during_resolve_hook_discards_result() {
        let token = Arc::new(OnceLock::new());
        let after = Arc::new(AtomicUsize::new(0));

        let mut registry = PluginRegistry::with_builtins();
        let shared = Arc::clone(&token);
        registry.register("closer", move |_| {
            Ok(Arc::new(ClosesSession {
                token: Arc::clone(&shared),
            }) as Arc<dyn Plugin>)
        });
        let counter = Arc::clone(&after);
        registry.register("after", move |_| {
            Ok(Arc::new(CountsResolves {
                calls: Arc::clone(&counter),
            }) as Arc<dyn Plugin>)
        });

        let config = config()
            .plugin(PluginDescriptor::new("closer"))
            .plugin(PluginDescriptor::new("after"))
            .build()
            .unwrap();
        let session = Session::builder(config)
            .registry(registry)
            .fs(project_fs())
            .build()
            .unwrap();
        token.set(session.cancel_token()).unwrap();

        assert!(matches!(
            session.resolve("@/main", None),
            Err(Error::Cancelled { specifier }) if specifier == "@/main"
        ));
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(session.cache_stats().unwrap().entry_count, 0);
    }

    struct CountsResolves {
        calls: Arc<AtomicUsize>,
    }

    impl Plugin for CountsResolves {
        fn name(&self) -> &str {
            "after"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::RESOLVE
        }

        fn resolve(&self, _ctx: &mut PipelineContext) -> HookOutcome<ResolvedPath> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            HookOutcome::Continue
        }
    }

    /// Filesystem that closes the session while a file is being located.
    #[derive(Debug)]
    struct ClosingFs {
        inner: MemoryFileSystem,
        token: OnceLock<CancelToken>,
    }

    impl FileSystem for ClosingFs {
        fn is_file(&self, path: &Path) -> bool {
            self.inner.is_file(path)
        }

        fn is_dir(&self, path: &Path) -> bool {
            self.inner.is_dir(path)
        }

        fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
            self.inner.read_to_string(path)
        }

        fn canonicalize(&self, path: &Path) -> std::io::Result<PathBuf> {
            if let Some(token) = self.token.get() {
                token.cancel();
            }
            self.inner.canonicalize(path)
        }
    }

    #[test]
    fn test_close_during_locate_discards_result() {
        let fs = Arc::new(ClosingFs {
            inner: MemoryFileSystem::new().with_file("/project/src/main.ts", ""),
            token: OnceLock::new(),
        });
        let session = Session::builder(config().build().unwrap())
            .fs(Arc::clone(&fs) as Arc<dyn FileSystem>)
            .build()
            .unwrap();
        fs.token.set(session.cancel_token()).unwrap();

        assert!(matches!(
            session.resolve("@/main", None),
            Err(Error::Cancelled { .. })
        ));
    }

    #[test]
    fn test_unknown_plugin_fails_startup() {
        let config = config().plugin(PluginDescriptor::new("vue")).build().unwrap();
        let err = Session::builder(config).fs(project_fs()).build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownPlugin {
                name: "vue".to_string()
            }
        );
    }

    #[test]
    fn test_opaque_framework_plugin_does_not_block_resolution() {
        let config = config().plugin(PluginDescriptor::new("vue")).build().unwrap();
        let mut registry = PluginRegistry::with_builtins();
        registry.register_opaque("vue");
        let session = Session::builder(config)
            .registry(registry)
            .fs(project_fs())
            .build()
            .unwrap();

        assert!(!session.pipeline().handles(Hook::Resolve));
        assert_eq!(
            session.resolve("@/main", None).unwrap().absolute_path,
            PathBuf::from("/project/src/main.ts")
        );
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
