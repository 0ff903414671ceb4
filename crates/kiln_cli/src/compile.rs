//! `kiln rebuild`, `kiln make` and `kiln compile`.
//!
//! Each command loads the project, registers the shipped stages, hands one
//! request to the background compiler, and prints every message of the run
//! followed by the status line.

use std::sync::Arc;

use kiln_config::ProjectConfig;
use kiln_diagnostics::{MessageRenderer, TerminalRenderer};
use kiln_driver::{
    status_message, BackgroundCompiler, CompileDriver, CompileNotification, CompileRequest,
    DriverOptions, ExitStatus, Stage,
};
use kiln_project::Project;

use crate::project::{build_scope, load_project};
use crate::resources::ResourceStage;
use crate::{Command, GlobalArgs};

/// Process exit code of a cancelled run (128 + SIGINT).
const EXIT_CANCELLED: i32 = 130;

/// Runs a compile command. Returns the process exit code.
pub fn run(command: &Command, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let (config, project) = load_project(global)?;
    if !global.quiet {
        eprintln!("   Compiling {}", config.project.name);
    }
    let request = match command {
        Command::Rebuild => CompileRequest::Rebuild,
        Command::Make(args) => CompileRequest::Make(build_scope(&project, args)?),
        Command::Compile(args) => CompileRequest::Compile {
            scope: build_scope(&project, &args.scope)?,
            track_dependencies: args.track_dependencies,
        },
    };

    let driver = create_driver(&config, project);
    let compiler = BackgroundCompiler::start(Arc::new(driver))?;
    let result = compiler
        .submit(request)
        .recv()
        .map_err(|_| "compiler worker stopped before reporting a result")?;

    report(&result.notification, global);
    let status = result.outcome?;
    Ok(exit_code(status))
}

/// The driver with every stage the binary ships.
pub fn create_driver(config: &ProjectConfig, project: Project) -> CompileDriver {
    let stages = vec![Stage::Translating(Box::new(ResourceStage::new(
        &config.build.resource_extensions,
    )))];
    let options = DriverOptions {
        clear_output_directory: config.build.clear_output_directory,
        ..DriverOptions::default()
    };
    CompileDriver::new(Arc::new(project), stages, options)
}

fn report(notification: &CompileNotification, global: &GlobalArgs) {
    let renderer = TerminalRenderer::new(global.color);
    for message in &notification.messages {
        if global.quiet && !message.category.is_error() {
            continue;
        }
        eprint!("{}", renderer.render(message));
    }
    if global.quiet {
        return;
    }
    match notification.status {
        // Runs that reported anything end with their own status message.
        Some(status) if notification.messages.is_empty() => {
            eprintln!("{}", status_message(status, 0, 0));
        }
        _ if notification.aborted => eprintln!("   Aborted"),
        _ => {}
    }
}

/// 0 for success or up-to-date, 1 for errors, 130 for cancellation.
pub fn exit_code(status: ExitStatus) -> i32 {
    match status {
        ExitStatus::Success | ExitStatus::UpToDate => 0,
        ExitStatus::Errors => 1,
        ExitStatus::Cancelled => EXIT_CANCELLED,
    }
}
