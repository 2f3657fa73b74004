//! Static evaluation of `vite.config.{ts,js}` files.
//!
//! Only the default export is read, and only as a literal:
//!
//! ```js
//! import vue from '@vitejs/plugin-vue'
//! import { resolve } from 'node:path'
//!
//! export default defineConfig({
//!   plugins: [vue()],
//!   resolve: {
//!     alias: { '@': resolve(__dirname, './src') },
//!     extensions: ['.ts', '.vue', '.js'],
//!   },
//!   define: { __DEV__: 'false' },
//! })
//! ```
//!
//! Everything before `export default` is ignored. Inside the literal:
//!
//! - `defineConfig(x)` is `x`
//! - `resolve(...)`, `join(...)` (bare or `path.`-qualified) over string
//!   arguments evaluate to a path; `__dirname`, `import.meta.dirname` and
//!   `process.cwd()` are the config file's directory
//! - `fileURLToPath(new URL('./src', import.meta.url))` is a path too
//! - `/re/` is a regex alias pattern
//! - any other call, `vue()` or `vue({ ... })`, is a plugin descriptor
//!
//! Keys this crate doesn't use (`server`, `build`, ...) are ignored.

use super::{alias_map, ConfigBuilder};
use crate::alias::{AliasPattern, AliasRule};
use crate::plugin::PluginDescriptor;
use pathmux_util::path::normalize;
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};

/// Marker key for a call expression that is not a known helper.
const PLUGIN_KEY: &str = "$plugin";
/// Marker key for a regex literal.
const REGEX_KEY: &str = "$regex";

const EXPORT_MARKERS: &[&str] = &["export default", "module.exports ="];

/// Parse a JS/TS config file located in `dir`.
pub fn parse_config(source: &str, dir: &Path) -> Result<ConfigBuilder, String> {
    let value = evaluate_default_export(source, dir)?;
    into_builder(value, dir)
}

/// Evaluate the default export of `source` to JSON.
pub fn evaluate_default_export(source: &str, dir: &Path) -> Result<Value, String> {
    let stripped = strip_comments(source);
    let start = EXPORT_MARKERS
        .iter()
        .find_map(|marker| stripped.find(marker).map(|i| i + marker.len()))
        .ok_or_else(|| "no `export default` found in config file".to_string())?;

    let mut parser = Parser::new(&stripped[start..], dir);
    parser.parse_value()
}

/// Strip `//` and `/* */` comments, leaving string contents alone.
fn strip_comments(source: &str) -> String {
    let mut result = String::with_capacity(source.len());
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut i = 0;
    let mut in_string: Option<char> = None;
    // Last non-whitespace character copied, to tell a regex from a division.
    let mut last: Option<char> = None;

    while i < len {
        if let Some(quote) = in_string {
            result.push(chars[i]);
            if chars[i] == '\\' && i + 1 < len {
                result.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if chars[i] == quote {
                in_string = None;
                last = Some(quote);
            }
            i += 1;
        } else if i + 1 < len && chars[i] == '/' && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
        } else if i + 1 < len && chars[i] == '/' && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                if chars[i] == '\n' {
                    result.push('\n');
                }
                i += 1;
            }
            i += 2;
        } else if chars[i] == '/' && starts_regex(last) {
            i = copy_regex(&chars, i, &mut result);
            last = Some('/');
        } else {
            if matches!(chars[i], '"' | '\'' | '`') {
                in_string = Some(chars[i]);
            }
            if !chars[i].is_whitespace() {
                last = Some(chars[i]);
            }
            result.push(chars[i]);
            i += 1;
        }
    }

    result
}

/// Whether a `/` after `last` opens a regex literal rather than dividing.
fn starts_regex(last: Option<char>) -> bool {
    last.map_or(true, |c| "(,=:[!&|?{};+-*%<>~^".contains(c))
}

/// Copy the regex literal starting at `start` verbatim, flags included, and
/// return the index just past it.
fn copy_regex(chars: &[char], start: usize, out: &mut String) -> usize {
    out.push('/');
    let mut i = start + 1;
    let mut in_class = false;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        i += 1;
        match c {
            '\\' => {
                if let Some(&next) = chars.get(i) {
                    out.push(next);
                    i += 1;
                }
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => break,
            '\n' => break,
            _ => {}
        }
    }
    while i < chars.len() && chars[i].is_ascii_alphabetic() {
        out.push(chars[i]);
        i += 1;
    }
    i
}

/// Recursive-descent evaluator for the literal subset described above.
struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    dir: &'a Path,
}

impl<'a> Parser<'a> {
    fn new(input: &str, dir: &'a Path) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            dir,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        self.skip_whitespace();
        match self.advance() {
            Some(ch) if ch == expected => Ok(()),
            other => Err(format!(
                "expected '{expected}' at position {}, got {other:?}",
                self.pos
            )),
        }
    }

    fn parse_value(&mut self) -> Result<Value, String> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => self.parse_object(),
            Some('[') => self.parse_array(),
            Some('"' | '\'' | '`') => self.parse_string().map(Value::String),
            Some('/') => self.parse_regex(),
            Some(ch) if ch == '-' || ch.is_ascii_digit() => self.parse_number(),
            Some(ch) if is_ident_start(ch) => self.parse_expression(),
            Some(ch) => Err(format!("unexpected character '{ch}' at position {}", self.pos)),
            None => Err("unexpected end of input".to_string()),
        }
    }

    fn parse_object(&mut self) -> Result<Value, String> {
        self.advance();
        let mut map = Map::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('}') => {
                    self.advance();
                    return Ok(Value::Object(map));
                }
                None => return Err("unterminated object".to_string()),
                _ => {}
            }

            let key = self.parse_key()?;
            self.expect(':')?;
            let value = self.parse_value()?;
            map.insert(key, value);

            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some('}') => {}
                None => return Err("unterminated object".to_string()),
                Some(ch) => return Err(format!("expected ',' or '}}' in object, got '{ch}'")),
            }
        }
    }

    fn parse_array(&mut self) -> Result<Value, String> {
        self.advance();
        let mut items = Vec::new();
        self.parse_list(']', &mut items)?;
        Ok(Value::Array(items))
    }

    /// Comma-separated values up to and including `close`.
    fn parse_list(&mut self, close: char, items: &mut Vec<Value>) -> Result<(), String> {
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(ch) if ch == close => {
                    self.advance();
                    return Ok(());
                }
                None => return Err(format!("unterminated list, expected '{close}'")),
                _ => {}
            }

            items.push(self.parse_value()?);

            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some(ch) if ch == close => {}
                None => return Err(format!("unterminated list, expected '{close}'")),
                Some(ch) => return Err(format!("expected ',' or '{close}', got '{ch}'")),
            }
        }
    }

    fn parse_key(&mut self) -> Result<String, String> {
        self.skip_whitespace();
        match self.peek() {
            Some('"' | '\'') => self.parse_string(),
            Some(ch) if is_ident_start(ch) || ch.is_ascii_digit() => Ok(self.parse_identifier()),
            other => Err(format!("expected object key, got {other:?}")),
        }
    }

    fn parse_identifier(&mut self) -> String {
        let mut ident = String::new();
        while let Some(ch) = self.peek() {
            if is_ident_start(ch) || ch.is_ascii_digit() {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        ident
    }

    /// A dotted name like `path.resolve` or `import.meta.url`.
    fn parse_dotted(&mut self) -> String {
        let mut name = self.parse_identifier();
        while self.peek() == Some('.')
            && self.chars.get(self.pos + 1).copied().is_some_and(is_ident_start)
        {
            self.advance();
            name.push('.');
            name.push_str(&self.parse_identifier());
        }
        name
    }

    fn parse_string(&mut self) -> Result<String, String> {
        let quote = self.advance().ok_or("unterminated string")?;
        let mut s = String::new();

        loop {
            match self.advance() {
                Some(ch) if ch == quote => return Ok(s),
                Some('$') if quote == '`' && self.peek() == Some('{') => {
                    return Err("template literals with substitutions are not supported".to_string())
                }
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('\\') => s.push('\\'),
                    Some(ch) if ch == quote => s.push(ch),
                    Some(ch) => {
                        s.push('\\');
                        s.push(ch);
                    }
                    None => return Err("unterminated string escape".to_string()),
                },
                Some(ch) => s.push(ch),
                None => return Err("unterminated string".to_string()),
            }
        }
    }

    /// `/source/flags` → `{ "$regex": "source" }`. Flags are dropped.
    fn parse_regex(&mut self) -> Result<Value, String> {
        self.advance();
        let mut source = String::new();
        let mut in_class = false;

        loop {
            match self.advance() {
                Some('/') if !in_class => break,
                Some('\\') => match self.advance().ok_or("unterminated regex")? {
                    // `/` only needs escaping as the JS delimiter.
                    '/' => source.push('/'),
                    escaped => {
                        source.push('\\');
                        source.push(escaped);
                    }
                },
                Some(ch) => {
                    match ch {
                        '[' => in_class = true,
                        ']' => in_class = false,
                        _ => {}
                    }
                    source.push(ch);
                }
                None => return Err("unterminated regex".to_string()),
            }
        }
        while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.advance();
        }

        let mut map = Map::new();
        map.insert(REGEX_KEY.to_string(), Value::String(source));
        Ok(Value::Object(map))
    }

    fn parse_number(&mut self) -> Result<Value, String> {
        let mut text = String::new();
        if self.peek() == Some('-') {
            text.push('-');
            self.advance();
        }
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '.' || ch == '_' {
                if ch != '_' {
                    text.push(ch);
                }
                self.advance();
            } else {
                break;
            }
        }

        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Number(n.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("invalid number '{text}'"))
    }

    /// Identifiers, keywords, `new` and call expressions.
    fn parse_expression(&mut self) -> Result<Value, String> {
        let name = self.parse_dotted();
        match name.as_str() {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "null" | "undefined" => return Ok(Value::Null),
            "new" => {
                self.skip_whitespace();
                let ctor = self.parse_dotted();
                let args = self.parse_call_args()?;
                return self.construct(&ctor, args);
            }
            _ => {}
        }

        self.skip_whitespace();
        if self.peek() == Some('(') {
            let args = self.parse_call_args()?;
            return self.call(&name, args);
        }

        match name.as_str() {
            "__dirname" | "import.meta.dirname" => Ok(self.dir_value()),
            "import.meta.url" => Ok(Value::String(file_url(self.dir))),
            _ => Err(format!("cannot evaluate '{name}' statically")),
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Value>, String> {
        self.expect('(')?;
        let mut args = Vec::new();
        self.parse_list(')', &mut args)?;
        Ok(args)
    }

    fn dir_value(&self) -> Value {
        Value::String(self.dir.to_string_lossy().into_owned())
    }

    fn call(&self, callee: &str, args: Vec<Value>) -> Result<Value, String> {
        let helper = callee.rsplit('.').next().unwrap_or(callee);
        let qualified = callee == helper || callee.starts_with("path.") || callee.starts_with("posix.");
        let all_strings = !args.is_empty() && args.iter().all(Value::is_string);

        match helper {
            "defineConfig" => Ok(args.into_iter().next().unwrap_or(Value::Null)),
            "cwd" if callee == "process.cwd" => Ok(self.dir_value()),
            "resolve" | "join" if qualified && all_strings => {
                let mut path = self.dir.to_path_buf();
                for (i, arg) in args.iter().filter_map(Value::as_str).enumerate() {
                    if helper == "join" && i == 0 {
                        path = PathBuf::from(arg);
                    } else if helper == "resolve" && Path::new(arg).is_absolute() {
                        path = PathBuf::from(arg);
                    } else {
                        path.push(arg);
                    }
                }
                Ok(Value::String(normalize(&path).to_string_lossy().into_owned()))
            }
            "fileURLToPath" if all_strings => {
                let url = args[0].as_str().unwrap_or_default();
                url.strip_prefix("file://")
                    .map(|p| Value::String(p.to_string()))
                    .ok_or_else(|| format!("fileURLToPath expects a file URL, got '{url}'"))
            }
            _ => {
                let mut map = Map::new();
                map.insert(PLUGIN_KEY.to_string(), Value::String(callee.to_string()));
                map.insert(
                    "options".to_string(),
                    args.into_iter().next().unwrap_or(Value::Null),
                );
                Ok(Value::Object(map))
            }
        }
    }

    fn construct(&self, ctor: &str, args: Vec<Value>) -> Result<Value, String> {
        if ctor != "URL" {
            return Err(format!("cannot evaluate 'new {ctor}' statically"));
        }
        let (Some(Value::String(input)), Some(Value::String(base))) = (args.first(), args.get(1))
        else {
            return Err("new URL() needs a relative path and import.meta.url".to_string());
        };
        let base = base
            .strip_prefix("file://")
            .ok_or_else(|| format!("unsupported URL base '{base}'"))?;
        Ok(Value::String(file_url(&normalize(&Path::new(base).join(input)))))
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.to_string_lossy())
}

/// Map an evaluated vite config onto a builder.
fn into_builder(value: Value, dir: &Path) -> Result<ConfigBuilder, String> {
    let Value::Object(mut obj) = value else {
        return Err("default export must be an object".to_string());
    };

    let root = match obj.remove("root") {
        Some(Value::String(root)) => normalize(&dir.join(root)),
        None | Some(Value::Null) => dir.to_path_buf(),
        Some(other) => return Err(format!("'root' must be a string, got {other}")),
    };
    let mut builder = ConfigBuilder::new(root);

    if let Some(Value::Object(mut resolve)) = obj.remove("resolve") {
        builder.aliases = match resolve.remove("alias") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(map)) => alias_map(map)?,
            Some(Value::Array(list)) => list.into_iter().map(alias_entry).collect::<Result<_, _>>()?,
            Some(other) => return Err(format!("'resolve.alias' must be an object or array, got {other}")),
        };
        if let Some(extensions) = resolve.remove("extensions") {
            builder.extensions = Some(string_list("resolve.extensions", extensions)?);
        }
        if let Some(fields) = resolve.remove("mainFields") {
            builder.main_fields = Some(string_list("resolve.mainFields", fields)?);
        }
        if let Some(Value::Bool(preserve)) = resolve.remove("preserveSymlinks") {
            builder.preserve_symlinks = preserve;
        }
    }

    let mut plugins = Vec::new();
    if let Some(list) = obj.remove("plugins") {
        collect_plugins(list, &mut plugins)?;
    }
    if let Some(define) = obj.remove("define") {
        if !define.is_object() {
            return Err("'define' must be an object".to_string());
        }
        if !plugins.iter().any(|p: &PluginDescriptor| p.name == "define") {
            plugins.push(PluginDescriptor::new("define").with_options(define));
        }
    }
    builder.plugins = plugins;

    if let Some(external) = obj
        .get("build")
        .and_then(|b| b.get("rollupOptions"))
        .and_then(|r| r.get("external"))
    {
        builder.external = string_list("build.rollupOptions.external", external.clone())?;
    }

    Ok(builder)
}

/// `{ find, replacement }`.
fn alias_entry(entry: Value) -> Result<AliasRule, String> {
    let find = entry.get("find").ok_or("alias entry is missing 'find'")?;
    let pattern = match find {
        Value::String(s) => AliasPattern::from_str_pattern(s),
        Value::Object(map) => match map.get(REGEX_KEY) {
            Some(Value::String(src)) => AliasPattern::Regex(src.clone()),
            _ => return Err(format!("alias 'find' must be a string or regex, got {find}")),
        },
        other => return Err(format!("alias 'find' must be a string or regex, got {other}")),
    };
    let replacement = entry
        .get("replacement")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("alias '{}' is missing a string 'replacement'", pattern))?;
    Ok(AliasRule::new(pattern, replacement))
}

/// Flatten `plugins`, skipping falsy entries the way vite does.
fn collect_plugins(value: Value, out: &mut Vec<PluginDescriptor>) -> Result<(), String> {
    match value {
        Value::Null | Value::Bool(false) => Ok(()),
        Value::Array(items) => items.into_iter().try_for_each(|item| collect_plugins(item, out)),
        Value::String(name) => {
            out.push(PluginDescriptor::new(name));
            Ok(())
        }
        Value::Object(mut map) => {
            let name = match map.remove(PLUGIN_KEY).or_else(|| map.remove("name")) {
                Some(Value::String(name)) => name,
                _ => return Err("plugin entry has no name".to_string()),
            };
            let options = map.remove("options").unwrap_or(Value::Null);
            out.push(PluginDescriptor::new(name).with_options(options));
            Ok(())
        }
        other => Err(format!("unsupported plugin entry {other}")),
    }
}

fn string_list(key: &str, value: Value) -> Result<Vec<String>, String> {
    let Value::Array(items) = value else {
        return Err(format!("'{key}' must be an array of strings"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            _ => Err(format!("'{key}' must be an array of strings")),
        })
        .collect()
}
