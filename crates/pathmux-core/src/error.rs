use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results produced by pathmux.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Core error type for pathmux operations.
///
/// `Config` is fatal to a session; the remaining variants are reported per
/// request and leave the session usable.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Plugin(#[from] PluginFailure),

    #[error("failed to load {}: {message}", .path.display())]
    Load { path: PathBuf, message: String },

    #[error("request for '{specifier}' abandoned: session closed")]
    Cancelled { specifier: String },
}

impl Error {
    /// Stable SCREAMING_SNAKE_CASE code for machine-readable output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Resolution(_) => "RESOLUTION_ERROR",
            Self::Plugin(_) => "PLUGIN_FAILURE",
            Self::Load { .. } => "LOAD_ERROR",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }
}

/// Malformed or ambiguous configuration, detected at load time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("failed to parse config at {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("root directory must be absolute: {root}")]
    RelativeRoot { root: PathBuf },

    #[error("alias #{index} has an empty pattern")]
    EmptyPattern { index: usize },

    #[error("alias '{pattern}' must map to an absolute or root-relative path, got '{replacement}'")]
    InvalidReplacement { pattern: String, replacement: String },

    #[error("alias '{pattern}' is not a valid pattern: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("alias pattern '{pattern}' is declared more than once")]
    DuplicateAlias { pattern: String },

    #[error("alias rules rewrite into each other: {}", .cycle.join(" -> "))]
    AliasCycle { cycle: Vec<String> },

    #[error("extension '{extension}' must start with '.'")]
    InvalidExtension { extension: String },

    #[error("plugin '{name}' is registered more than once")]
    DuplicatePlugin { name: String },

    #[error("unknown plugin '{name}'")]
    UnknownPlugin { name: String },

    #[error("invalid options for plugin '{name}': {message}")]
    InvalidPluginOptions { name: String, message: String },
}

/// A specifier could not be mapped to a file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot resolve '{specifier}' from '{}'", .base_dir.display())]
pub struct ResolutionError {
    /// The specifier as written by the importer.
    pub specifier: String,
    /// Directory the lookup was anchored at.
    pub base_dir: PathBuf,
    /// Candidates probed, in probe order.
    pub tried: Vec<PathBuf>,
}

impl ResolutionError {
    #[must_use]
    pub fn new(specifier: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            specifier: specifier.into(),
            base_dir: base_dir.into(),
            tried: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tried(mut self, tried: Vec<PathBuf>) -> Self {
        self.tried = tried;
        self
    }
}

/// A plugin hook failed or panicked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{plugin}] {hook} hook failed for '{id}': {message}")]
pub struct PluginFailure {
    /// Name of the offending plugin.
    pub plugin: String,
    /// Hook that failed.
    pub hook: &'static str,
    /// Specifier or module id being processed.
    pub id: String,
    /// Error message reported by the plugin.
    pub message: String,
}
