//! `package.json` entry point and bare specifier helpers.

use serde_json::Value;

/// Split a bare specifier into package name and optional subpath.
///
/// `lodash/get` → (`lodash`, `Some("get")`), `@babel/core/lib/parse` →
/// (`@babel/core`, `Some("lib/parse")`).
pub(crate) fn parse_bare_specifier(specifier: &str) -> (&str, Option<&str>) {
    let split_at = if specifier.starts_with('@') {
        specifier
            .match_indices('/')
            .nth(1)
            .map(|(i, _)| i)
    } else {
        specifier.find('/')
    };

    match split_at {
        Some(i) => {
            let sub = &specifier[i + 1..];
            (&specifier[..i], (!sub.is_empty()).then_some(sub))
        }
        None => (specifier, None),
    }
}

/// Entry candidates declared by a manifest, most preferred first.
///
/// `exports["."]` comes first, then each of `main_fields` in order.
pub(crate) fn entry_candidates(manifest: &Value, main_fields: &[String]) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(exports) = manifest.get("exports") {
        if let Some(entry) = resolve_exports(exports, ".") {
            out.push(entry);
        }
    }

    for field in main_fields {
        if let Some(entry) = manifest.get(field).and_then(Value::as_str) {
            if !entry.is_empty() && !out.iter().any(|e| e == entry) {
                out.push(entry.to_string());
            }
        }
    }

    out
}

/// Look up `subpath` (`"."` or `"./feature"`) in an `exports` value.
pub(crate) fn resolve_exports(exports: &Value, subpath: &str) -> Option<String> {
    match exports {
        Value::String(s) => (subpath == ".").then(|| s.clone()),
        Value::Object(map) => {
            if let Some(value) = map.get(subpath) {
                return resolve_export_value(value);
            }
            // Conditions directly at the root apply to ".".
            let is_conditions = map.keys().all(|k| !k.starts_with('.'));
            if subpath == "." && is_conditions {
                return resolve_export_value(exports);
            }
            None
        }
        _ => None,
    }
}

/// Pick a target from a conditional export: import > default > require.
fn resolve_export_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("import")
            .or_else(|| map.get("default"))
            .or_else(|| map.get("require"))
            .and_then(resolve_export_value),
        Value::Array(items) => items.iter().find_map(resolve_export_value),
        _ => None,
    }
}
