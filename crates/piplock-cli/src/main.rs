use std::io::Write;

use clap::Parser;
use color_eyre::Result;
use piplock_core::{
    CommandContext, CommandStatus, Config, ExecutionOutcome, ExportRequest, InstallRequest,
    RequirementsRequest, VerifyRequest,
};
use serde_json::{json, Value};

mod cli;

use cli::{CommandCli, PiplockCli};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = PiplockCli::parse();
    let config = Config::from_env();
    init_tracing(cli.trace, cli.verbose, config.debug());

    let ctx = CommandContext::new(std::env::current_dir()?, config);
    let outcome = dispatch(&ctx, &cli.command)
        .unwrap_or_else(|err| ExecutionOutcome::failure(format!("{err:#}"), json!({})));
    let code = emit_output(&outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, debug: bool) {
    let level = if trace {
        "trace"
    } else if debug {
        "debug"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };

    let filter = format!("warn,piplock={level},piplock_core={level},piplock_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn dispatch(ctx: &CommandContext, command: &CommandCli) -> anyhow::Result<ExecutionOutcome> {
    match command {
        CommandCli::Install(args) => piplock_core::install(
            ctx,
            &InstallRequest {
                method: args.method.method,
                dev: args.dev,
                deploy: args.deploy,
                pip_args: args.pip_args.clone(),
            },
        ),
        CommandCli::Requirements(args) => piplock_core::requirements(
            ctx,
            &RequirementsRequest {
                method: args.method.method,
                options: args.render_options(),
            },
        ),
        CommandCli::Export(args) => piplock_core::export(
            ctx,
            &ExportRequest {
                method: args.method.method,
                output: args.output.clone(),
            },
        ),
        CommandCli::Verify(args) => piplock_core::verify(
            ctx,
            &VerifyRequest {
                method: args.method.method,
            },
        ),
    }
}

fn emit_output(outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();
    let mut stdout = std::io::stdout().lock();
    match outcome.status {
        CommandStatus::Ok => {
            if let Some(text) = outcome.details.get("requirements").and_then(Value::as_str) {
                write!(stdout, "{text}")?;
            } else if let Some(document) = outcome.details.get("snapshot") {
                writeln!(stdout, "{}", serde_json::to_string_pretty(document)?)?;
            } else {
                writeln!(stdout, "{}", outcome.message)?;
            }
        }
        CommandStatus::UserError | CommandStatus::Failure => {
            eprintln!("error: {}", outcome.message);
            for line in failed_packages(&outcome.details) {
                eprintln!("  {line}");
            }
        }
    }
    stdout.flush()?;
    Ok(code)
}

fn failed_packages(details: &Value) -> Vec<String> {
    let Some(groups) = details.get("groups").and_then(Value::as_array) else {
        return Vec::new();
    };
    groups
        .iter()
        .filter_map(|group| group.get("failed").and_then(Value::as_array))
        .flatten()
        .filter_map(|failed| {
            let name = failed.get("name")?.as_str()?;
            let attempts = failed.get("attempts")?.as_u64()?;
            let error = failed
                .get("last_error")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(format!("{name} (after {attempts} attempts): {error}"))
        })
        .collect()
}
