//! Subcommand implementations.
//!
//! Every command prints exactly one JSON object to stdout with `--json`:
//! `{"ok": true, ...}` on success, `{"ok": false, "error": {"code", "message"}}`
//! on failure. Failures exit with status 1.

pub mod config;
pub mod resolve;
pub mod transform;

use pathmux_core::{Config, ConfigError, Error, PluginRegistry, Session};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Framework plugins accepted without running them. The CLI has no
/// single-file-component compiler of its own.
pub const DEFAULT_OPAQUE_PLUGINS: &[&str] = &["vue"];

/// Options shared by all commands.
#[derive(Debug, Clone)]
pub struct Context {
    pub cwd: PathBuf,
    pub config: Option<PathBuf>,
    pub json: bool,
    /// Extra plugin names to accept as opaque, on top of the defaults.
    pub opaque_plugins: Vec<String>,
}

impl Context {
    /// Absolute form of a user-supplied path.
    pub fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    /// Load the explicit config file, or discover one in `cwd`.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        match &self.config {
            Some(path) => Config::load(&self.absolute(path)),
            None => Config::discover(&self.cwd),
        }
    }

    /// Built-in plugins plus opaque stand-ins for framework plugins.
    ///
    /// A name the built-ins already provide keeps its real implementation.
    pub fn registry(&self) -> PluginRegistry {
        let mut registry = PluginRegistry::with_builtins();
        let names = DEFAULT_OPAQUE_PLUGINS
            .iter()
            .copied()
            .chain(self.opaque_plugins.iter().map(String::as_str));
        for name in names {
            if !registry.contains(name) {
                debug!(plugin = name, "registering opaque plugin");
                registry.register_opaque(name);
            }
        }
        registry
    }

    pub fn session(&self) -> Result<Session, ConfigError> {
        self.session_for(self.load_config()?)
    }

    pub fn session_for(&self, config: Config) -> Result<Session, ConfigError> {
        Session::builder(config).registry(self.registry()).build()
    }
}

/// Print `err` in the selected format and exit with status 1.
pub fn fail(json: bool, err: &Error) -> ! {
    if json {
        println!("{}", serde_json::json!({ "ok": false, "error": error_json(err) }));
    } else {
        eprintln!("error: {err}");
        if let Error::Resolution(resolution) = err {
            for path in &resolution.tried {
                eprintln!("  tried {}", path.display());
            }
        }
    }
    std::process::exit(1);
}

/// `{"code", "message"}` (plus `tried` or `plugin` when known).
pub fn error_json(err: &Error) -> serde_json::Value {
    let mut value = serde_json::json!({
        "code": err.code(),
        "message": err.to_string(),
    });
    match err {
        Error::Resolution(resolution) => {
            value["tried"] = resolution
                .tried
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
        }
        Error::Plugin(failure) => {
            value["plugin"] = failure.plugin.clone().into();
            value["hook"] = failure.hook.into();
        }
        _ => {}
    }
    value
}
