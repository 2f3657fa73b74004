//! `pathmux resolve` command implementation.

use super::{error_json, fail, Context};
use miette::{IntoDiagnostic, Result};
use pathmux_core::{Error, ResolvedPath};
use serde::Serialize;
use std::path::Path;

/// One line of `--json` output.
#[derive(Serialize)]
struct ResolveResultJson {
    specifier: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    external: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<serde_json::Value>,
}

impl ResolveResultJson {
    fn new(specifier: &str, result: &Result<ResolvedPath, Error>) -> Self {
        match result {
            Ok(resolved) => Self {
                specifier: specifier.to_string(),
                ok: true,
                path: Some(resolved.absolute_path.to_string_lossy().into_owned()),
                external: resolved.is_external,
                error: None,
            },
            Err(err) => Self {
                specifier: specifier.to_string(),
                ok: false,
                path: None,
                external: false,
                error: Some(error_json(err)),
            },
        }
    }
}

/// Resolve every specifier as imported from `from`.
///
/// All specifiers are attempted; the command fails if any of them did.
pub fn run(ctx: &Context, specifiers: &[String], from: Option<&Path>) -> Result<()> {
    let session = ctx
        .session()
        .unwrap_or_else(|e| fail(ctx.json, &Error::Config(e)));
    let importer = from.map(|p| ctx.absolute(p));

    let results = session.resolve_many(specifiers, importer.as_deref());
    let ok = results.iter().all(std::result::Result::is_ok);

    if ctx.json {
        let entries: Vec<_> = specifiers
            .iter()
            .zip(&results)
            .map(|(spec, result)| ResolveResultJson::new(spec, result))
            .collect();
        let out = serde_json::json!({ "ok": ok, "results": entries });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else {
        for (spec, result) in specifiers.iter().zip(&results) {
            match result {
                Ok(resolved) if resolved.is_external => {
                    println!("{spec} -> {} (external)", resolved.absolute_path.display());
                }
                Ok(resolved) => println!("{spec} -> {}", resolved.absolute_path.display()),
                Err(err) => {
                    eprintln!("error: {err}");
                    if let Error::Resolution(resolution) = err {
                        for path in &resolution.tried {
                            eprintln!("  tried {}", path.display());
                        }
                    }
                }
            }
        }
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
