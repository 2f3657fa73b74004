//! Plugin system.
//!
//! A plugin declares which hooks it implements through [`Capabilities`]; the
//! [`PluginPipeline`] only ever dispatches a hook to plugins that declared it.
//! Every hook returns a [`HookOutcome`]:
//!
//! - `Continue` hands the request to the next plugin. Transform hooks chain by
//!   rewriting `ctx.code` in place before continuing.
//! - `ShortCircuit(value)` ends the chain for this request with a definitive
//!   result.
//! - `Fail(message)` aborts the request with a [`PluginFailure`] naming the
//!   plugin.
//!
//! ## Example
//!
//! ```ignore
//! use pathmux_core::plugin::{Capabilities, HookOutcome, PipelineContext, Plugin, SourceOutput};
//!
//! struct TextPlugin;
//!
//! impl Plugin for TextPlugin {
//!     fn name(&self) -> &str { "text" }
//!     fn capabilities(&self) -> Capabilities { Capabilities::TRANSFORM }
//!
//!     fn transform(&self, ctx: &mut PipelineContext) -> HookOutcome<SourceOutput> {
//!         if ctx.id.ends_with(".txt") {
//!             let code = format!("export default {:?};", ctx.code());
//!             return HookOutcome::ShortCircuit(SourceOutput::code(code));
//!         }
//!         HookOutcome::Continue
//!     }
//! }
//! ```
//!
//! [`PluginFailure`]: crate::error::PluginFailure

mod builtin;
mod pipeline;
mod registry;

pub use builtin::{BannerPlugin, DefinePlugin, JsonPlugin, OpaquePlugin, VirtualPlugin};
pub use pipeline::{PluginPipeline, PluginPipelineBuilder};
pub use registry::{PluginFactory, PluginRegistry};

use crate::resolver::ResolvedPath;
use crate::session::CancelToken;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

bitflags::bitflags! {
    /// Hooks a plugin implements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const RESOLVE = 1 << 0;
        const LOAD = 1 << 1;
        const TRANSFORM = 1 << 2;
    }
}

/// A pipeline lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hook {
    Resolve,
    Load,
    Transform,
}

impl Hook {
    pub const ALL: [Hook; 3] = [Hook::Resolve, Hook::Load, Hook::Transform];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Load => "load",
            Self::Transform => "transform",
        }
    }

    #[must_use]
    pub fn capability(self) -> Capabilities {
        match self {
            Self::Resolve => Capabilities::RESOLVE,
            Self::Load => Capabilities::LOAD,
            Self::Transform => Capabilities::TRANSFORM,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Resolve => 0,
            Self::Load => 1,
            Self::Transform => 2,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single hook invocation decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome<T> {
    /// Not handled (or handled by mutating the context); ask the next plugin.
    Continue,
    /// Definitive result; skip the remaining plugins for this request.
    ShortCircuit(T),
    /// The hook failed.
    Fail(String),
}

impl<T> HookOutcome<T> {
    /// Build a failure from anything displayable.
    pub fn fail(error: impl fmt::Display) -> Self {
        Self::Fail(error.to_string())
    }
}

impl<T> From<Option<T>> for HookOutcome<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Continue, Self::ShortCircuit)
    }
}

/// Module source produced by a load or transform hook.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceOutput {
    pub code: String,
    pub map: Option<String>,
}

impl SourceOutput {
    #[must_use]
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }
}

/// State of one hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Pending,
    Running,
    Completed,
    ShortCircuited,
    Failed,
}

/// A plugin entry as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

impl PluginDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

/// Per-request scratch state threaded through a hook chain.
///
/// One context belongs to exactly one request; it is never shared between
/// requests and is dropped when the request completes.
#[derive(Debug)]
pub struct PipelineContext {
    /// The specifier as written by the importer.
    pub specifier: String,
    /// Working module id: the alias-rewritten specifier while resolving, the
    /// resolved file path while loading and transforming.
    pub id: String,
    /// File containing the import, if any.
    pub importer: Option<PathBuf>,
    /// Project root.
    pub root: PathBuf,
    /// Current resolution, if the filesystem or a plugin produced one.
    pub resolved: Option<ResolvedPath>,
    /// Current module source, once loaded.
    pub code: Option<String>,
    /// Source map accompanying `code`.
    pub map: Option<String>,
    meta: HashMap<String, String>,
    state: InvocationState,
    short_circuited_by: Option<String>,
    cancel: Option<CancelToken>,
}

impl PipelineContext {
    /// Create a context for `id` with nothing resolved or loaded yet.
    pub fn new(specifier: impl Into<String>, id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            specifier: specifier.into(),
            id: id.into(),
            importer: None,
            root: root.into(),
            resolved: None,
            code: None,
            map: None,
            meta: HashMap::new(),
            state: InvocationState::Pending,
            short_circuited_by: None,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_importer(mut self, importer: impl Into<PathBuf>) -> Self {
        self.importer = Some(importer.into());
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_resolved(mut self, resolved: ResolvedPath) -> Self {
        self.resolved = Some(resolved);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The current source, or `""` before anything was loaded.
    #[must_use]
    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or_default()
    }

    /// Set a metadata value (for inter-plugin communication).
    pub fn set_meta(&mut self, key: &str, value: impl Into<String>) {
        self.meta.insert(key.to_string(), value.into());
    }

    /// Get a metadata value.
    #[must_use]
    pub fn get_meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    /// State of the most recent hook invocation.
    #[must_use]
    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// Plugin that ended the most recent invocation early, if any.
    #[must_use]
    pub fn short_circuited_by(&self) -> Option<&str> {
        self.short_circuited_by.as_deref()
    }

    pub(crate) fn set_state(&mut self, state: InvocationState) {
        self.state = state;
    }

    pub(crate) fn set_short_circuited_by(&mut self, plugin: Option<String>) {
        self.short_circuited_by = plugin;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// A unit of pipeline behavior.
///
/// Only the hooks named by [`Plugin::capabilities`] are ever invoked; the
/// defaults simply continue.
pub trait Plugin: Send + Sync {
    /// Plugin name, unique within a pipeline. Used in error messages.
    fn name(&self) -> &str;

    /// The hooks this plugin implements.
    fn capabilities(&self) -> Capabilities;

    /// Override or adjust the location of `ctx.specifier`.
    ///
    /// `ctx.resolved` holds the filesystem answer when there is one.
    fn resolve(&self, _ctx: &mut PipelineContext) -> HookOutcome<ResolvedPath> {
        HookOutcome::Continue
    }

    /// Provide the source for `ctx.id`.
    fn load(&self, _ctx: &mut PipelineContext) -> HookOutcome<SourceOutput> {
        HookOutcome::Continue
    }

    /// Transform `ctx.code`.
    fn transform(&self, _ctx: &mut PipelineContext) -> HookOutcome<SourceOutput> {
        HookOutcome::Continue
    }
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
