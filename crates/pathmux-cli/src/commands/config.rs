//! `pathmux config` command implementation.

use super::{fail, Context};
use miette::{IntoDiagnostic, Result};
use pathmux_core::{Config, Error};

/// Print the validated configuration.
///
/// The config is also used to build a session, so unknown plugins are
/// reported here just as they would be by the other commands.
pub fn run(ctx: &Context) -> Result<()> {
    let config = ctx
        .load_config()
        .unwrap_or_else(|e| fail(ctx.json, &Error::Config(e)));
    if let Err(e) = ctx.session_for(config.clone()) {
        fail(ctx.json, &Error::Config(e));
    }

    if ctx.json {
        let out = serde_json::json!({ "ok": true, "config": config });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else {
        print_human(&config);
    }

    Ok(())
}

fn print_human(config: &Config) {
    match config.source() {
        Some(source) => println!("Config:     {}", source.display()),
        None => println!("Config:     (defaults)"),
    }
    println!("Root:       {}", config.root().display());
    println!("Extensions: {}", config.extensions().join(" "));
    println!("Main:       {}", config.main_fields().join(" "));

    if !config.aliases().is_empty() {
        println!("\nAliases:");
        for rule in config.aliases() {
            println!("  {} -> {}", rule.pattern, rule.replacement);
        }
    }

    if !config.plugins().is_empty() {
        println!("\nPlugins:");
        for plugin in config.plugins() {
            println!("  {}", plugin.name);
        }
    }

    if !config.external().is_empty() {
        println!("\nExternal:   {}", config.external().join(" "));
    }
}
