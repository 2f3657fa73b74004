//! Built-in plugins.

use super::{Capabilities, HookOutcome, PipelineContext, Plugin, SourceOutput};
use crate::resolver::ResolvedPath;
use serde_json::Value;
use std::collections::HashMap;

/// Id prefix for modules that only exist in memory.
const VIRTUAL_PREFIX: &str = "\0virtual:";

/// Replaces global identifiers with values.
///
/// Useful for replacing `process.env.NODE_ENV` with `"production"`.
/// Replacements apply in declaration order.
#[derive(Debug, Default)]
pub struct DefinePlugin {
    replacements: Vec<(String, String)>,
}

impl DefinePlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a replacement.
    #[must_use]
    pub fn replace(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.replacements.push((from.into(), to.into()));
        self
    }

    /// Replace `process.env.KEY` with the quoted value.
    #[must_use]
    pub fn env(self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        self.replace(format!("process.env.{key}"), format!("\"{value}\""))
    }

    /// Options: an object of `{ "FROM": "to" }`. Non-string values are
    /// inserted as their JSON text (`true`, `42`).
    pub fn from_options(options: &Value) -> Result<Self, String> {
        let map = match options {
            Value::Null => return Ok(Self::new()),
            Value::Object(map) => map,
            other => return Err(format!("expected an object of replacements, got {other}")),
        };

        Ok(map.iter().fold(Self::new(), |plugin, (from, to)| {
            let to = match to {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            plugin.replace(from.clone(), to)
        }))
    }
}

impl Plugin for DefinePlugin {
    fn name(&self) -> &str {
        "define"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::TRANSFORM
    }

    fn transform(&self, ctx: &mut PipelineContext) -> HookOutcome<SourceOutput> {
        let Some(code) = ctx.code.as_mut() else {
            return HookOutcome::Continue;
        };
        for (from, to) in &self.replacements {
            if code.contains(from.as_str()) {
                *code = code.replace(from.as_str(), to);
            }
        }
        HookOutcome::Continue
    }
}

/// Serves modules that don't exist on disk.
///
/// `virtual:name` and plain `name` both resolve to the module registered as
/// `name`.
#[derive(Debug, Default)]
pub struct VirtualPlugin {
    modules: HashMap<String, String>,
}

impl VirtualPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a virtual module.
    #[must_use]
    pub fn module(mut self, id: impl Into<String>, code: impl Into<String>) -> Self {
        self.modules.insert(id.into(), code.into());
        self
    }

    /// Options: an object of `{ "id": "source" }`.
    pub fn from_options(options: &Value) -> Result<Self, String> {
        let Value::Object(map) = options else {
            return Err("expected an object mapping module ids to source".to_string());
        };
        map.iter().try_fold(Self::new(), |plugin, (id, code)| match code {
            Value::String(code) => Ok(plugin.module(id.clone(), code.clone())),
            _ => Err(format!("source for virtual module '{id}' must be a string")),
        })
    }
}

impl Plugin for VirtualPlugin {
    fn name(&self) -> &str {
        "virtual"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RESOLVE | Capabilities::LOAD
    }

    fn resolve(&self, ctx: &mut PipelineContext) -> HookOutcome<ResolvedPath> {
        let id = ctx.id.strip_prefix("virtual:").unwrap_or(&ctx.id);
        if self.modules.contains_key(id) {
            return HookOutcome::ShortCircuit(ResolvedPath::file(
                ctx.specifier.clone(),
                format!("{VIRTUAL_PREFIX}{id}"),
            ));
        }
        HookOutcome::Continue
    }

    fn load(&self, ctx: &mut PipelineContext) -> HookOutcome<SourceOutput> {
        ctx.id
            .strip_prefix(VIRTUAL_PREFIX)
            .and_then(|id| self.modules.get(id))
            .map(SourceOutput::code)
            .into()
    }
}

/// Converts JSON files into ES modules.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPlugin;

impl Plugin for JsonPlugin {
    fn name(&self) -> &str {
        "json"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::TRANSFORM
    }

    fn transform(&self, ctx: &mut PipelineContext) -> HookOutcome<SourceOutput> {
        if !ctx.id.ends_with(".json") {
            return HookOutcome::Continue;
        }
        let Some(code) = ctx.code.as_deref() else {
            return HookOutcome::Continue;
        };
        if let Err(e) = serde_json::from_str::<Value>(code) {
            return HookOutcome::fail(format!("invalid JSON: {e}"));
        }
        ctx.code = Some(format!("export default {};", code.trim()));
        HookOutcome::Continue
    }
}

/// Stands in for a plugin the host cannot run, such as a framework compiler.
///
/// It keeps the configured name so ordering and duplicate checks still apply,
/// but declares no hooks and is never dispatched.
#[derive(Debug, Clone)]
pub struct OpaquePlugin {
    name: String,
}

impl OpaquePlugin {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Plugin for OpaquePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }
}

/// Adds a banner/footer to every module whose id ends with one of `include`.
#[derive(Debug, Default)]
pub struct BannerPlugin {
    banner: Option<String>,
    footer: Option<String>,
    include: Vec<String>,
}

impl BannerPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the banner (prepended to output).
    #[must_use]
    pub fn banner(mut self, text: impl Into<String>) -> Self {
        self.banner = Some(text.into());
        self
    }

    /// Set the footer (appended to output).
    #[must_use]
    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(text.into());
        self
    }

    /// Restrict to ids ending with `suffix`. With no suffixes every module
    /// matches.
    #[must_use]
    pub fn include(mut self, suffix: impl Into<String>) -> Self {
        self.include.push(suffix.into());
        self
    }

    /// Options: `{ "banner": "...", "footer": "...", "include": [".js"] }`.
    pub fn from_options(options: &Value) -> Result<Self, String> {
        let Value::Object(map) = options else {
            return Err("expected an object with 'banner' and/or 'footer'".to_string());
        };

        let text = |key: &str| -> Result<Option<String>, String> {
            match map.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(format!("'{key}' must be a string")),
            }
        };

        let mut plugin = Self {
            banner: text("banner")?,
            footer: text("footer")?,
            include: Vec::new(),
        };

        if let Some(include) = map.get("include") {
            let Value::Array(items) = include else {
                return Err("'include' must be an array of suffixes".to_string());
            };
            for item in items {
                let Value::String(suffix) = item else {
                    return Err("'include' must be an array of suffixes".to_string());
                };
                plugin = plugin.include(suffix.clone());
            }
        }

        Ok(plugin)
    }
}

impl Plugin for BannerPlugin {
    fn name(&self) -> &str {
        "banner"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::TRANSFORM
    }

    fn transform(&self, ctx: &mut PipelineContext) -> HookOutcome<SourceOutput> {
        if self.banner.is_none() && self.footer.is_none() {
            return HookOutcome::Continue;
        }
        if !self.include.is_empty() && !self.include.iter().any(|s| ctx.id.ends_with(s.as_str())) {
            return HookOutcome::Continue;
        }

        let mut result = String::new();
        if let Some(banner) = &self.banner {
            result.push_str(banner);
            result.push('\n');
        }
        result.push_str(ctx.code());
        if let Some(footer) = &self.footer {
            result.push('\n');
            result.push_str(footer);
        }

        ctx.code = Some(result);
        HookOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(id: &str, code: &str) -> PipelineContext {
        PipelineContext::new(id, id, "/project").with_code(code)
    }

    #[test]
    fn test_define_plugin() {
        let plugin = DefinePlugin::new()
            .replace("__DEV__", "false")
            .env("NODE_ENV", "production");

        let mut cx = ctx(
            "/project/src/main.ts",
            "if (__DEV__) { log(); }\nconst env = process.env.NODE_ENV;",
        );
        assert_eq!(plugin.transform(&mut cx), HookOutcome::Continue);
        assert!(cx.code().contains("if (false)"));
        assert!(cx.code().contains(r#"const env = "production""#));
    }

    #[test]
    fn test_define_from_options() {
        let plugin = DefinePlugin::from_options(&json!({
            "__APP_VERSION__": "\"1.0.0\"",
            "__DEV__": true
        }))
        .unwrap();

        let mut cx = ctx("/a.js", "[__APP_VERSION__, __DEV__]");
        plugin.transform(&mut cx);
        assert_eq!(cx.code(), r#"["1.0.0", true]"#);

        assert!(DefinePlugin::from_options(&json!("nope")).is_err());
    }

    #[test]
    fn test_virtual_plugin() {
        let plugin = VirtualPlugin::new().module("my-module", "export const x = 1;");

        let mut cx = PipelineContext::new("virtual:my-module", "virtual:my-module", "/project");
        let HookOutcome::ShortCircuit(resolved) = plugin.resolve(&mut cx) else {
            panic!("expected virtual module to resolve");
        };
        assert_eq!(
            resolved.absolute_path,
            std::path::PathBuf::from("\0virtual:my-module")
        );

        let mut cx = PipelineContext::new("my-module", "\0virtual:my-module", "/project");
        assert_eq!(
            plugin.load(&mut cx),
            HookOutcome::ShortCircuit(SourceOutput::code("export const x = 1;"))
        );

        let mut cx = PipelineContext::new("other", "other", "/project");
        assert_eq!(plugin.resolve(&mut cx), HookOutcome::Continue);
    }

    #[test]
    fn test_virtual_from_options() {
        let plugin = VirtualPlugin::from_options(&json!({ "env": "export default {}" })).unwrap();
        let mut cx = PipelineContext::new("env", "env", "/project");
        assert!(matches!(plugin.resolve(&mut cx), HookOutcome::ShortCircuit(_)));

        assert!(VirtualPlugin::from_options(&json!({ "env": 1 })).is_err());
    }

    #[test]
    fn test_json_plugin() {
        let plugin = JsonPlugin;

        let mut cx = ctx("/project/data.json", r#"{"key": "value"}"#);
        assert_eq!(plugin.transform(&mut cx), HookOutcome::Continue);
        assert_eq!(cx.code(), r#"export default {"key": "value"};"#);

        let mut cx = ctx("/project/index.js", "const x = 1;");
        plugin.transform(&mut cx);
        assert_eq!(cx.code(), "const x = 1;");

        let mut cx = ctx("/project/broken.json", "{");
        assert!(matches!(plugin.transform(&mut cx), HookOutcome::Fail(_)));
    }

    #[test]
    fn test_banner_plugin() {
        let plugin = BannerPlugin::from_options(&json!({
            "banner": "/* Copyright 2024 */",
            "footer": "/* end */",
            "include": [".js"]
        }))
        .unwrap();

        let mut cx = ctx("/project/main.js", "const x = 1;");
        plugin.transform(&mut cx);
        assert!(cx.code().starts_with("/* Copyright 2024 */"));
        assert!(cx.code().ends_with("/* end */"));

        let mut cx = ctx("/project/style.css", "body {}");
        plugin.transform(&mut cx);
        assert_eq!(cx.code(), "body {}");
    }
}
