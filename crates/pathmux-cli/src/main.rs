#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pathmux")]
#[command(author, version, about = "Resolve import specifiers and run plugin pipelines", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Config file to use instead of discovering one in the working directory
    #[arg(long, global = true, value_name = "FILE", env = "PATHMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Accept a plugin the config names without running it (repeatable)
    #[arg(
        long = "opaque-plugin",
        global = true,
        value_name = "NAME",
        env = "PATHMUX_OPAQUE_PLUGINS",
        value_delimiter = ','
    )]
    opaque_plugins: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Resolve import specifiers to files
    Resolve {
        /// Specifiers as they appear in import statements
        #[arg(required = true)]
        specifiers: Vec<String>,

        /// File the imports appear in (defaults to the project root)
        #[arg(long, value_name = "FILE")]
        from: Option<PathBuf>,
    },

    /// Load a file and run the transform hooks over it
    Transform {
        /// File to transform
        file: PathBuf,
    },

    /// Print the validated configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);

    logging::init(cli.verbose, cli.json);

    let ctx = commands::Context {
        cwd,
        config: cli.config,
        json: cli.json,
        opaque_plugins: cli.opaque_plugins,
    };

    match cli.command {
        Commands::Resolve { specifiers, from } => {
            let span = tracing::info_span!("resolve", cmd = "resolve", cwd = %ctx.cwd.display());
            let _guard = span.enter();
            commands::resolve::run(&ctx, &specifiers, from.as_deref())
        }
        Commands::Transform { file } => {
            let span = tracing::info_span!("transform", cmd = "transform", cwd = %ctx.cwd.display());
            let _guard = span.enter();
            commands::transform::run(&ctx, &file)
        }
        Commands::Config => commands::config::run(&ctx),
    }
}
