//! Configuration loading and validation.
//!
//! A [`Config`] is built once per session and is read-only afterwards; every
//! component receives it through an `Arc`. Changing configuration means
//! building a new session.
//!
//! ## Sources
//!
//! - `pathmux.json`:
//!
//! ```json
//! {
//!   "root": ".",
//!   "aliases": [{ "pattern": "@", "replacement": "./src" }],
//!   "plugins": ["json", { "name": "define", "options": { "__DEV__": "false" } }],
//!   "extensions": [".ts", ".js"]
//! }
//! ```
//!
//! - `vite.config.{ts,mts,js,mjs}`, see [`js`].

pub mod js;

use crate::alias::{AliasPattern, AliasResolver, AliasRule};
use crate::error::ConfigError;
use crate::plugin::PluginDescriptor;
use pathmux_util::path::{is_absolute_like, join_normalized, normalize};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default extensions for probing.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".json"];

/// Default package.json fields consulted for a package entry.
pub const DEFAULT_MAIN_FIELDS: &[&str] = &["module", "main"];

/// Config file names in priority order.
pub const CONFIG_FILES: &[&str] = &[
    "pathmux.json",
    "vite.config.ts",
    "vite.config.mts",
    "vite.config.js",
    "vite.config.mjs",
];

/// Validated, immutable session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub(crate) root: PathBuf,
    pub(crate) aliases: Vec<AliasRule>,
    pub(crate) plugins: Vec<PluginDescriptor>,
    pub(crate) extensions: Vec<String>,
    pub(crate) main_fields: Vec<String>,
    pub(crate) external: Vec<String>,
    pub(crate) preserve_symlinks: bool,
    pub(crate) cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) source: Option<PathBuf>,
}

impl Config {
    /// Start building a config rooted at `root`.
    pub fn builder(root: impl Into<PathBuf>) -> ConfigBuilder {
        ConfigBuilder::new(root)
    }

    /// Load a config file, choosing the format by extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let source =
            pathmux_util::fs::read_to_string_lossy(path).map_err(|e| ConfigError::Read {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let dir = path.parent().map_or_else(|| PathBuf::from("."), normalize);
        let builder = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            ConfigBuilder::from_json_str(&source, &dir)
        } else {
            js::parse_config(&source, &dir)
        }
        .map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        builder.source(path).build()
    }

    /// Find a config file in `root` (see [`CONFIG_FILES`]) and load it.
    ///
    /// Returns a default config rooted at `root` when there is none.
    pub fn discover(root: &Path) -> Result<Self, ConfigError> {
        match find_config_file(root) {
            Some(path) => Self::load(&path),
            None => Self::builder(root).build(),
        }
    }

    /// Project root; relative specifiers without an importer and root-relative
    /// alias targets are anchored here.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Alias rules in declaration order, replacements made absolute.
    #[must_use]
    pub fn aliases(&self) -> &[AliasRule] {
        &self.aliases
    }

    /// Plugin descriptors in registration order.
    #[must_use]
    pub fn plugins(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    /// Extensions probed by the file resolver, in order.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    #[must_use]
    pub fn main_fields(&self) -> &[String] {
        &self.main_fields
    }

    /// Specifier prefixes left to the runtime.
    #[must_use]
    pub fn external(&self) -> &[String] {
        &self.external
    }

    #[must_use]
    pub fn preserve_symlinks(&self) -> bool {
        self.preserve_symlinks
    }

    /// Whether sessions memoize resolutions.
    #[must_use]
    pub fn cache(&self) -> bool {
        self.cache
    }

    /// File this config was loaded from.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Find a config file in the given root directory.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// Unvalidated configuration.
///
/// All checks happen in [`ConfigBuilder::build`]; a single invalid entry
/// fails the whole build.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    root: PathBuf,
    aliases: Vec<AliasRule>,
    plugins: Vec<PluginDescriptor>,
    extensions: Option<Vec<String>>,
    main_fields: Option<Vec<String>>,
    external: Vec<String>,
    preserve_symlinks: bool,
    cache: bool,
    source: Option<PathBuf>,
}

impl ConfigBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            aliases: Vec::new(),
            plugins: Vec::new(),
            extensions: None,
            main_fields: None,
            external: Vec::new(),
            preserve_symlinks: false,
            cache: true,
            source: None,
        }
    }

    /// Parse a `pathmux.json` document. A relative `root` is taken relative
    /// to `dir`, and an absent one means `dir` itself.
    pub fn from_json_str(source: &str, dir: &Path) -> Result<Self, String> {
        let raw: RawConfig = serde_json::from_str(source).map_err(|e| e.to_string())?;
        raw.into_builder(dir)
    }

    #[must_use]
    pub fn alias(mut self, rule: AliasRule) -> Self {
        self.aliases.push(rule);
        self
    }

    #[must_use]
    pub fn aliases(mut self, rules: Vec<AliasRule>) -> Self {
        self.aliases = rules;
        self
    }

    #[must_use]
    pub fn plugin(mut self, descriptor: PluginDescriptor) -> Self {
        self.plugins.push(descriptor);
        self
    }

    #[must_use]
    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = Some(extensions);
        self
    }

    #[must_use]
    pub fn main_fields(mut self, fields: Vec<String>) -> Self {
        self.main_fields = Some(fields);
        self
    }

    #[must_use]
    pub fn external(mut self, external: Vec<String>) -> Self {
        self.external = external;
        self
    }

    #[must_use]
    pub fn preserve_symlinks(mut self, preserve: bool) -> Self {
        self.preserve_symlinks = preserve;
        self
    }

    #[must_use]
    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    #[must_use]
    pub fn source(mut self, path: &Path) -> Self {
        self.source = Some(path.to_path_buf());
        self
    }

    /// Validate everything and freeze the result.
    pub fn build(self) -> Result<Config, ConfigError> {
        if !is_absolute_like(&self.root.to_string_lossy()) {
            return Err(ConfigError::RelativeRoot { root: self.root });
        }
        let root = normalize(&self.root);

        let mut aliases = Vec::with_capacity(self.aliases.len());
        for (index, rule) in self.aliases.into_iter().enumerate() {
            aliases.push(absolutize_alias(index, rule, &root)?);
        }
        AliasResolver::new(&aliases)?.validate()?;

        let extensions = self
            .extensions
            .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_string()).collect());
        if let Some(bad) = extensions.iter().find(|e| !e.starts_with('.') || e.len() < 2) {
            return Err(ConfigError::InvalidExtension {
                extension: bad.clone(),
            });
        }

        let mut names = HashSet::new();
        for descriptor in &self.plugins {
            if descriptor.name.is_empty() {
                return Err(ConfigError::UnknownPlugin {
                    name: String::new(),
                });
            }
            if !names.insert(descriptor.name.as_str()) {
                return Err(ConfigError::DuplicatePlugin {
                    name: descriptor.name.clone(),
                });
            }
        }

        Ok(Config {
            root,
            aliases,
            plugins: self.plugins,
            extensions,
            main_fields: self
                .main_fields
                .unwrap_or_else(|| DEFAULT_MAIN_FIELDS.iter().map(|f| (*f).to_string()).collect()),
            external: self.external,
            preserve_symlinks: self.preserve_symlinks,
            cache: self.cache,
            source: self.source,
        })
    }
}

/// Check an alias's shape and anchor a root-relative replacement at `root`.
fn absolutize_alias(index: usize, rule: AliasRule, root: &Path) -> Result<AliasRule, ConfigError> {
    if rule.pattern.source().is_empty() {
        return Err(ConfigError::EmptyPattern { index });
    }

    let replacement = &rule.replacement;
    let absolute = if is_absolute_like(replacement) {
        replacement.clone()
    } else if replacement == "." || replacement.starts_with("./") || replacement.starts_with("../")
    {
        let joined = join_normalized(root, replacement).to_string_lossy().into_owned();
        if replacement.ends_with('/') && !joined.ends_with('/') {
            format!("{joined}/")
        } else {
            joined
        }
    } else {
        return Err(ConfigError::InvalidReplacement {
            pattern: rule.pattern.to_string(),
            replacement: replacement.clone(),
        });
    };

    Ok(AliasRule::new(rule.pattern, absolute))
}

/// `pathmux.json` as written.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    root: Option<PathBuf>,
    #[serde(default)]
    aliases: Option<RawAliases>,
    #[serde(default)]
    plugins: Vec<RawPlugin>,
    #[serde(default)]
    extensions: Option<Vec<String>>,
    #[serde(default)]
    main_fields: Option<Vec<String>>,
    #[serde(default)]
    external: Vec<String>,
    #[serde(default)]
    preserve_symlinks: bool,
    #[serde(default)]
    cache: Option<bool>,
}

/// Either an ordered list of rules or an object map (key order kept).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAliases {
    List(Vec<RawAlias>),
    Map(Map<String, Value>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAlias {
    #[serde(alias = "find")]
    pattern: RawPattern,
    replacement: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Text(String),
    Regex { regex: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPlugin {
    Name(String),
    Descriptor {
        name: String,
        #[serde(default)]
        options: Value,
    },
}

impl RawConfig {
    fn into_builder(self, dir: &Path) -> Result<ConfigBuilder, String> {
        let root = match self.root {
            Some(root) => normalize(&dir.join(root)),
            None => dir.to_path_buf(),
        };

        let aliases = match self.aliases {
            None => Vec::new(),
            Some(RawAliases::List(list)) => list
                .into_iter()
                .map(|raw| {
                    let pattern = match raw.pattern {
                        RawPattern::Text(s) => AliasPattern::from_str_pattern(&s),
                        RawPattern::Regex { regex } => AliasPattern::Regex(regex),
                    };
                    AliasRule::new(pattern, raw.replacement)
                })
                .collect(),
            Some(RawAliases::Map(map)) => alias_map(map)?,
        };

        let plugins = self
            .plugins
            .into_iter()
            .map(|raw| match raw {
                RawPlugin::Name(name) => PluginDescriptor::new(name),
                RawPlugin::Descriptor { name, options } => {
                    PluginDescriptor::new(name).with_options(options)
                }
            })
            .collect();

        let mut builder = ConfigBuilder::new(root)
            .aliases(aliases)
            .external(self.external)
            .preserve_symlinks(self.preserve_symlinks);
        builder.plugins = plugins;
        builder.extensions = self.extensions;
        builder.main_fields = self.main_fields;
        if let Some(cache) = self.cache {
            builder.cache = cache;
        }
        Ok(builder)
    }
}

/// `{ "@": "./src" }` → prefix/glob rules in key order.
pub(crate) fn alias_map(map: Map<String, Value>) -> Result<Vec<AliasRule>, String> {
    map.into_iter()
        .map(|(key, value)| match value {
            Value::String(replacement) => Ok(AliasRule::new(
                AliasPattern::from_str_pattern(&key),
                replacement,
            )),
            other => Err(format!("alias '{key}' must map to a string, got {other}")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::builder("/project").build().unwrap();
        assert_eq!(config.root(), Path::new("/project"));
        assert_eq!(config.extensions()[0], ".ts");
        assert_eq!(config.main_fields(), &["module", "main"]);
        assert!(config.cache());
        assert!(config.aliases().is_empty());
    }

    #[test]
    fn test_relative_root_rejected() {
        let err = Config::builder("project").build().unwrap_err();
        assert!(matches!(err, ConfigError::RelativeRoot { .. }));
    }

    #[test]
    fn test_root_relative_replacement() {
        let config = Config::builder("/project")
            .alias(AliasRule::prefix("@", "./src"))
            .alias(AliasRule::prefix("~/", "./lib/"))
            .build()
            .unwrap();
        assert_eq!(config.aliases()[0].replacement, "/project/src");
        assert_eq!(config.aliases()[1].replacement, "/project/lib/");
    }

    #[test]
    fn test_invalid_replacement() {
        let err = Config::builder("/project")
            .alias(AliasRule::prefix("@", "src"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidReplacement {
                pattern: "@".to_string(),
                replacement: "src".to_string()
            }
        );
    }

    #[test]
    fn test_empty_pattern() {
        let err = Config::builder("/project")
            .alias(AliasRule::prefix("@", "/src"))
            .alias(AliasRule::prefix("", "/lib"))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::EmptyPattern { index: 1 });
    }

    #[test]
    fn test_duplicate_alias_fails_load() {
        let err = Config::builder("/project")
            .alias(AliasRule::prefix("@/", "/src/"))
            .alias(AliasRule::prefix("@/", "/other/"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateAlias { .. }));
    }

    #[test]
    fn test_cyclic_aliases_fail_load() {
        let err = Config::builder("/project")
            .alias(AliasRule::prefix("/project/a", "./b"))
            .alias(AliasRule::prefix("/project/b", "./a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::AliasCycle { .. }));
    }

    #[test]
    fn test_prefix_and_regex_cycle_fails_load() {
        let err = Config::builder("/project")
            .alias(AliasRule::prefix("/a", "/b"))
            .alias(AliasRule::new(
                AliasPattern::Regex("^/b/x(.*)$".to_string()),
                "/a/$1",
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::AliasCycle { .. }));
    }

    #[test]
    fn test_invalid_extension() {
        let err = Config::builder("/project")
            .extensions(vec![".ts".to_string(), "js".to_string()])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidExtension {
                extension: "js".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_plugin_descriptor() {
        let err = Config::builder("/project")
            .plugin(PluginDescriptor::new("json"))
            .plugin(PluginDescriptor::new("json"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePlugin { .. }));
    }

    #[test]
    fn test_json_list_form() {
        let source = r##"{
            "root": "app",
            "aliases": [
                { "pattern": "@", "replacement": "./src" },
                { "find": { "regex": "^~(.*)$" }, "replacement": "./lib$1" },
                { "pattern": "#icons/*", "replacement": "/assets/icons/*.svg" }
            ],
            "plugins": ["json", { "name": "define", "options": { "__DEV__": "false" } }],
            "extensions": [".ts", ".js"],
            "external": ["react"],
            "cache": false
        }"##;

        let config = ConfigBuilder::from_json_str(source, Path::new("/work"))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.root(), Path::new("/work/app"));
        assert_eq!(config.aliases().len(), 3);
        assert_eq!(config.aliases()[0].replacement, "/work/app/src");
        assert_eq!(
            config.aliases()[1].pattern,
            AliasPattern::Regex("^~(.*)$".to_string())
        );
        assert_eq!(config.aliases()[1].replacement, "/work/app/lib$1");
        assert_eq!(
            config.aliases()[2].pattern,
            AliasPattern::Glob("#icons/*".to_string())
        );
        assert_eq!(config.plugins()[0].name, "json");
        assert_eq!(config.plugins()[1].options["__DEV__"], "false");
        assert_eq!(config.extensions(), &[".ts", ".js"]);
        assert_eq!(config.external(), &["react"]);
        assert!(!config.cache());
    }

    #[test]
    fn test_json_map_form_keeps_order() {
        let source = r#"{ "aliases": { "@components": "./src/components", "@": "./src" } }"#;
        let config = ConfigBuilder::from_json_str(source, Path::new("/p"))
            .unwrap()
            .build()
            .unwrap();

        let patterns: Vec<_> = config
            .aliases()
            .iter()
            .map(|r| r.pattern.source().to_string())
            .collect();
        assert_eq!(patterns, vec!["@components", "@"]);
    }

    #[test]
    fn test_json_unknown_field_rejected() {
        assert!(ConfigBuilder::from_json_str(r#"{ "alias": {} }"#, Path::new("/p")).is_err());
    }

    #[test]
    fn test_load_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();

        let config = Config::discover(&root).unwrap();
        assert_eq!(config.root(), root.as_path());
        assert!(config.source().is_none());

        std::fs::write(
            root.join("pathmux.json"),
            r#"{ "aliases": [{ "pattern": "@", "replacement": "./src" }] }"#,
        )
        .unwrap();
        let config = Config::discover(&root).unwrap();
        assert_eq!(config.source(), Some(root.join("pathmux.json").as_path()));
        assert_eq!(
            config.aliases()[0].replacement,
            root.join("src").to_string_lossy()
        );
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("pathmux.json");
        assert!(matches!(
            Config::load(&missing),
            Err(ConfigError::NotFound { .. })
        ));

        std::fs::write(&missing, "{ not json").unwrap();
        assert!(matches!(
            Config::load(&missing),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_find_config_priority() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_config_file(dir.path()).is_none());

        std::fs::write(dir.path().join("vite.config.js"), "export default {}").unwrap();
        assert_eq!(
            find_config_file(dir.path()).unwrap(),
            dir.path().join("vite.config.js")
        );

        std::fs::write(dir.path().join("pathmux.json"), "{}").unwrap();
        assert_eq!(
            find_config_file(dir.path()).unwrap(),
            dir.path().join("pathmux.json")
        );
    }
}
