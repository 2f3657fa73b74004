//! `pathmux transform` command implementation.

use super::{fail, Context};
use miette::{IntoDiagnostic, Result};
use pathmux_core::Error;
use std::path::Path;

/// Load `file` and print it after the transform hooks ran.
pub fn run(ctx: &Context, file: &Path) -> Result<()> {
    let session = ctx
        .session()
        .unwrap_or_else(|e| fail(ctx.json, &Error::Config(e)));

    let path = ctx.absolute(file);
    let specifier = path.to_string_lossy();
    let module = session
        .process(&specifier, None)
        .unwrap_or_else(|e| fail(ctx.json, &e));

    if ctx.json {
        let out = serde_json::json!({
            "ok": true,
            "id": module.resolved.absolute_path.to_string_lossy(),
            "code": module.code,
            "map": module.map,
        });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else if let Some(code) = module.code {
        print!("{code}");
        if !code.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}
