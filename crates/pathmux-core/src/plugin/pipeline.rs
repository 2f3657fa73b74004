//! Ordered hook dispatch.

use super::{Hook, HookOutcome, InvocationState, PipelineContext, Plugin, PluginRegistry};
use crate::config::Config;
use crate::error::{ConfigError, Error, PluginFailure};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of dispatching to one plugin.
enum Step {
    Continue,
    Stop,
    Fail(String),
}

/// An immutable, ordered list of plugins.
///
/// The per-hook subsets are computed once here, so dispatching a hook never
/// looks at plugins that did not declare it.
#[derive(Debug, Clone, Default)]
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
    by_hook: [Vec<usize>; 3],
}

impl PluginPipeline {
    #[must_use]
    pub fn builder() -> PluginPipelineBuilder {
        PluginPipelineBuilder::default()
    }

    /// Instantiate the plugins declared by `config`, in declaration order.
    pub fn from_config(config: &Config, registry: &PluginRegistry) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        for descriptor in config.plugins() {
            builder = builder.plugin_arc(registry.create(descriptor)?);
        }
        builder.build()
    }

    /// Plugin names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.plugins.iter().map(|p| p.name())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Whether any plugin implements `hook`.
    #[must_use]
    pub fn handles(&self, hook: Hook) -> bool {
        !self.by_hook[hook.index()].is_empty()
    }

    /// Run `hook` over every plugin that declared it, in registration order.
    ///
    /// Returns `Completed` when every plugin continued and `ShortCircuited`
    /// when one of them produced a definitive result (written into `ctx`).
    /// A failing or panicking hook leaves `ctx` in `Failed` and is returned as
    /// [`Error::Plugin`]. If the request's session was closed, the chain stops
    /// before the next plugin and [`Error::Cancelled`] is returned.
    pub fn run_hook(&self, hook: Hook, ctx: &mut PipelineContext) -> Result<InvocationState, Error> {
        ctx.set_state(InvocationState::Running);
        ctx.set_short_circuited_by(None);

        for &index in &self.by_hook[hook.index()] {
            abandon_if_cancelled(hook, ctx)?;

            let plugin = &self.plugins[index];
            trace!(plugin = plugin.name(), hook = %hook, id = %ctx.id, "dispatch");

            let step = dispatch(plugin.as_ref(), hook, ctx);
            // A close during the hook discards whatever it produced.
            if !matches!(step, Step::Fail(_)) {
                abandon_if_cancelled(hook, ctx)?;
            }

            match step {
                Step::Continue => {}
                Step::Stop => {
                    debug!(plugin = plugin.name(), hook = %hook, id = %ctx.id, "short-circuit");
                    ctx.set_state(InvocationState::ShortCircuited);
                    ctx.set_short_circuited_by(Some(plugin.name().to_string()));
                    return Ok(InvocationState::ShortCircuited);
                }
                Step::Fail(message) => {
                    ctx.set_state(InvocationState::Failed);
                    return Err(PluginFailure {
                        plugin: plugin.name().to_string(),
                        hook: hook.as_str(),
                        id: ctx.id.clone(),
                        message,
                    }
                    .into());
                }
            }
        }

        ctx.set_state(InvocationState::Completed);
        Ok(InvocationState::Completed)
    }
}

fn abandon_if_cancelled(hook: Hook, ctx: &mut PipelineContext) -> Result<(), Error> {
    if ctx.is_cancelled() {
        ctx.set_state(InvocationState::Failed);
        debug!(hook = %hook, id = %ctx.id, "session closed, abandoning hook chain");
        return Err(Error::Cancelled {
            specifier: ctx.specifier.clone(),
        });
    }
    Ok(())
}

/// Call the typed hook and fold its outcome into the context.
fn dispatch(plugin: &dyn Plugin, hook: Hook, ctx: &mut PipelineContext) -> Step {
    let guarded = catch_unwind(AssertUnwindSafe(|| match hook {
        Hook::Resolve => apply(plugin.resolve(ctx), ctx, |ctx, resolved| {
            ctx.resolved = Some(resolved);
        }),
        Hook::Load | Hook::Transform => {
            let outcome = if hook == Hook::Load {
                plugin.load(ctx)
            } else {
                plugin.transform(ctx)
            };
            apply(outcome, ctx, |ctx, source| {
                ctx.code = Some(source.code);
                ctx.map = source.map;
            })
        }
    }));

    guarded.unwrap_or_else(|payload| Step::Fail(panic_message(payload.as_ref())))
}

fn apply<T>(
    outcome: HookOutcome<T>,
    ctx: &mut PipelineContext,
    store: impl FnOnce(&mut PipelineContext, T),
) -> Step {
    match outcome {
        HookOutcome::Continue => Step::Continue,
        HookOutcome::ShortCircuit(value) => {
            store(ctx, value);
            Step::Stop
        }
        HookOutcome::Fail(message) => Step::Fail(message),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Assembles a [`PluginPipeline`].
#[derive(Default)]
pub struct PluginPipelineBuilder {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginPipelineBuilder {
    /// Append a plugin. Registration order is dispatch order.
    #[must_use]
    pub fn plugin(self, plugin: impl Plugin + 'static) -> Self {
        self.plugin_arc(Arc::new(plugin))
    }

    #[must_use]
    pub fn plugin_arc(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Freeze the plugin list, rejecting duplicate names.
    pub fn build(self) -> Result<PluginPipeline, ConfigError> {
        let mut seen = HashSet::new();
        let mut by_hook: [Vec<usize>; 3] = Default::default();

        for (index, plugin) in self.plugins.iter().enumerate() {
            if !seen.insert(plugin.name().to_string()) {
                return Err(ConfigError::DuplicatePlugin {
                    name: plugin.name().to_string(),
                });
            }
            let caps = plugin.capabilities();
            for hook in Hook::ALL {
                if caps.contains(hook.capability()) {
                    by_hook[hook.index()].push(index);
                }
            }
        }

        Ok(PluginPipeline {
            plugins: self.plugins,
            by_hook,
        })
    }
}
