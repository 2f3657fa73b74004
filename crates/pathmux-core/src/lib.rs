#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Import specifier resolution and plugin pipeline.
//!
//! A [`Session`] is built from a validated [`Config`]. Each request runs the
//! specifier through the alias rules ([`AliasResolver`]), locates the result
//! on disk ([`FileResolver`]) and lets resolve hooks of the
//! [`PluginPipeline`] override it; load and transform hooks then process the
//! module source.

pub mod alias;
pub mod cache;
pub mod config;
pub mod error;
pub mod fs;
pub mod plugin;
pub mod resolver;
pub mod session;

pub use alias::{AliasPattern, AliasResolver, AliasRule, MatchResult, PathMatcher};
pub use config::{Config, ConfigBuilder};
pub use error::{ConfigError, Error, PluginFailure, ResolutionError, Result};
pub use plugin::{
    Capabilities, Hook, HookOutcome, InvocationState, PipelineContext, Plugin, PluginDescriptor,
    PluginPipeline, PluginRegistry, SourceOutput,
};
pub use resolver::{FileResolver, ResolvedPath};
pub use session::{CancelToken, ProcessedModule, Session, SessionBuilder};
