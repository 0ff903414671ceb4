//! Kiln CLI: the command-line front end of the incremental compilation driver.
//!
//! Provides `kiln rebuild` for a from-scratch build, `kiln make` for an
//! incremental build of everything out of date, and `kiln compile` for
//! forcing recompilation of a selection.

#![warn(missing_docs)]

mod compile;
mod logging;
mod project;
mod resources;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

/// Kiln, an incremental build driver.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln incremental build driver")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Control colored output.
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Path to a custom `kiln.toml` configuration file or its directory.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discard all caches and outputs and build the whole project.
    Rebuild,
    /// Build everything out of date in the selection.
    Make(ScopeArgs),
    /// Recompile the selection regardless of its state.
    Compile(CompileArgs),
}

/// Selection of modules and files. Empty means the whole project.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ScopeArgs {
    /// Module to include (repeatable).
    #[arg(long)]
    pub module: Vec<String>,

    /// Source file to include (repeatable).
    #[arg(long)]
    pub file: Vec<PathBuf>,
}

/// Arguments for the `kiln compile` subcommand.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct CompileArgs {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub scope: ScopeArgs,

    /// Also recompile everything that depends on the selection.
    #[arg(long)]
    pub track_dependencies: bool,
}

/// Controls whether colored output is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    /// Detect from terminal capabilities.
    Auto,
    /// Always produce colored output.
    Always,
    /// Never produce colored output.
    Never,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Whether to use colored output.
    pub color: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let color = match cli.color {
        ColorChoice::Auto => std::io::stderr().is_terminal(),
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        color,
        config: cli.config,
    };

    if let Err(e) = logging::init_logging(global.quiet, global.verbose) {
        eprintln!("warning: {e}");
    }

    match compile::run(&cli.command, &global) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
