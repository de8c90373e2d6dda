//! Dependency-ordered work item runner.
//!
//! Reads a markdown checklist (`tasks.md` by default), selects the next item
//! whose dependencies are done, and drives it through the configured stage
//! pipeline under `.taskrunner/config.toml`.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use taskrunner::check::check_root;
use taskrunner::exit_codes;
use taskrunner::io::config::load_config;
use taskrunner::io::init::{WorkspacePaths, init_workspace};
use taskrunner::io::progress::format_duration;
use taskrunner::logging;
use taskrunner::pipeline::context::{HaltReason, RunContext, StopReason};
use taskrunner::pipeline::engine::RunOutcome;
use taskrunner::pipeline::run_pipeline;
use taskrunner::select::{SelectOutcome, select_from_root};

#[derive(Parser)]
#[command(
    name = "taskrunner",
    version,
    about = "Dependency-ordered work item runner with verify and repair"
)]
struct Cli {
    /// Project root holding the checklist and `.taskrunner/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.taskrunner/config.toml` and a starter checklist if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Validate the checklist and print a dependency-respecting order.
    Check,
    /// Print the id of the next eligible item.
    Next,
    /// Run the pipeline until no work remains or the run stops.
    Run {
        /// Override `max_iterations` from the config.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Keep going after an item exhausts its repair attempts.
        #[arg(long)]
        continue_on_failure: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let directive = match cli.command {
        Command::Run { .. } => "info",
        _ => "warn",
    };
    logging::init(directive);

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli.root.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Check => cmd_check(root),
        Command::Next => cmd_next(root),
        Command::Run {
            max_iterations,
            continue_on_failure,
        } => cmd_run(root, max_iterations, continue_on_failure),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(root, force)?;
    println!("initialized {}", paths.state_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_check(root: &Path) -> Result<i32> {
    let report = check_root(root)?;
    print!("{}", report.render());
    Ok(if report.is_ok() {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

fn cmd_next(root: &Path) -> Result<i32> {
    match select_from_root(root)? {
        SelectOutcome::Ready(item) => {
            println!("{}", item.id);
            Ok(exit_codes::OK)
        }
        SelectOutcome::Complete => Ok(exit_codes::COMPLETE),
        SelectOutcome::Blocked(report) => {
            eprint!("no eligible item:\n{}", report.render());
            Ok(exit_codes::BLOCKED)
        }
        SelectOutcome::MissingReferences(missing) => {
            eprintln!(
                "{} references unknown ids: {}",
                missing.item,
                missing.missing.join(", ")
            );
            Ok(exit_codes::INVALID)
        }
    }
}

fn cmd_run(root: &Path, max_iterations: Option<u32>, continue_on_failure: bool) -> Result<i32> {
    let paths = WorkspacePaths::new(root);
    let mut config = load_config(&paths.config_path).context("load config")?;
    if let Some(max) = max_iterations {
        config.max_iterations = max;
    }
    if continue_on_failure {
        config.stop_on_failure = false;
    }
    config.validate()?;

    let (ctx, outcome) = run_pipeline(root, config)?;
    print_run_summary(&ctx, &outcome);
    Ok(run_exit_code(&ctx, &outcome))
}

fn print_run_summary(ctx: &RunContext, outcome: &RunOutcome) {
    println!(
        "{}: {} iterations, {} done, {} failed, {} skipped in {}",
        outcome.stop,
        outcome.iterations,
        ctx.stats.completed,
        ctx.stats.failed,
        ctx.stats.skipped,
        format_duration(ctx.run_elapsed_ms()),
    );
    if let StopReason::Halted {
        reason: HaltReason::Blocked(report),
        ..
    } = &outcome.stop
    {
        print!("{}", report.render());
    }
}

fn run_exit_code(ctx: &RunContext, outcome: &RunOutcome) -> i32 {
    match &outcome.stop {
        StopReason::Complete if ctx.stats.failed > 0 => exit_codes::STOPPED,
        StopReason::Complete => exit_codes::OK,
        StopReason::IterationLimit { .. } => exit_codes::STOPPED,
        StopReason::Halted { reason, .. } => match reason {
            HaltReason::Blocked(_) => exit_codes::BLOCKED,
            HaltReason::ItemFailed { .. } => exit_codes::STOPPED,
            HaltReason::Integrity(_)
            | HaltReason::MissingReferences { .. }
            | HaltReason::StageHalted { .. }
            | HaltReason::StageFailed { .. } => exit_codes::INVALID,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["taskrunner", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_run_overrides_with_global_root() {
        let cli = Cli::parse_from([
            "taskrunner",
            "run",
            "--max-iterations",
            "5",
            "--continue-on-failure",
            "--root",
            "/work",
        ]);
        assert_eq!(cli.root, PathBuf::from("/work"));
        assert!(matches!(
            cli.command,
            Command::Run {
                max_iterations: Some(5),
                continue_on_failure: true
            }
        ));
    }

    #[test]
    fn parse_next_and_check() {
        assert!(matches!(
            Cli::parse_from(["taskrunner", "next"]).command,
            Command::Next
        ));
        assert!(matches!(
            Cli::parse_from(["taskrunner", "--root", "x", "check"]).command,
            Command::Check
        ));
    }
}
