//! Orchestrator Acceptance Tests - runner
//!
//! Provisions a stemcell, a release and a deployment on a live director,
//! exercises them through the orchestrator CLI and tears everything down.

#![forbid(unsafe_code)]

mod report;
mod suite;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use oat_common::{Director, Expectation, LogConfig, TestEnvironment, init_logging};
use tracing::{error, info};

use crate::report::RunSummary;
use crate::suite::Group;

#[derive(Parser)]
#[command(name = "oat")]
#[command(author, version, about = "Orchestrator acceptance tests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run acceptance groups against the configured director
    Run {
        /// Group to run (repeatable). Defaults to every enabled group.
        #[arg(short, long = "group")]
        groups: Vec<String>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,

        /// List the selected groups and their tests without running them
        #[arg(long)]
        list: bool,
    },

    /// Print the resolved environment with secrets masked
    Env,

    /// Run one orchestrator CLI command and match its result
    Check {
        /// Regex the command's stdout must match
        #[arg(short, long)]
        expect: Option<String>,

        /// Require a non-zero exit instead of success
        #[arg(long)]
        expect_failure: bool,

        /// Subcommand and arguments passed to the CLI
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    match cli.command {
        Commands::Run { groups, json, list } => run(&groups, json, list).await,
        Commands::Env => {
            let env = TestEnvironment::load()?;
            for (key, value) in env.summary() {
                println!("{key:<16} {value}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check {
            expect,
            expect_failure,
            args,
        } => check(expect.as_deref(), expect_failure, &args).await,
    }
}

async fn run(requested: &[String], json: bool, list: bool) -> Result<ExitCode> {
    let env = Arc::new(TestEnvironment::load().context("Failed to load test environment")?);
    let groups = suite::select(requested, &env)?;

    if list {
        for group in groups {
            println!("{} ({})", group.title(), group.key());
            for case in group.cases() {
                println!("  {}", case.name());
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let started_at = Utc::now();
    let mut reports = Vec::with_capacity(groups.len());
    for group in groups {
        reports.push(run_group(group, &env).await?);
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&RunSummary::new(started_at, &reports))?
        );
    } else {
        print!("{}", report::render_human(&reports));
    }

    Ok(if report::succeeded(&reports) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_group(group: Group, env: &Arc<TestEnvironment>) -> Result<oat_common::GroupReport> {
    let director = Director::new(env.clone())
        .with_context(|| format!("Failed to prepare director for group '{}'", group.key()))?;
    let fixture = group.build(env.clone(), director);

    // An unreachable director fails the group, not the run.
    let login = fixture.graph().backend().login().await;
    let report = match login {
        Ok(()) => fixture.run().await,
        Err(e) => {
            error!(group = group.key(), error = %e, "Cannot target director");
            fixture.skip(format!("cannot target director: {e}"))
        }
    };
    info!(
        group = group.key(),
        succeeded = report.succeeded(),
        duration_ms = report.duration_ms,
        "Group finished"
    );
    Ok(report)
}

async fn check(pattern: Option<&str>, expect_failure: bool, args: &[String]) -> Result<ExitCode> {
    let env = Arc::new(TestEnvironment::load().context("Failed to load test environment")?);
    let director = Director::new(env)?;

    let mut expectation = if expect_failure {
        Expectation::failure()
    } else {
        Expectation::success()
    };
    if let Some(pattern) = pattern {
        expectation = expectation.with_pattern(pattern)?;
    }

    let line = args
        .iter()
        .map(|arg| shell_escape::escape(arg.as_str().into()))
        .collect::<Vec<_>>()
        .join(" ");
    let result = director.cli(&line).await?;
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);

    match expectation.check(&result) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(failure) => {
            eprintln!("check failed: {}", failure.message);
            Ok(ExitCode::FAILURE)
        }
    }
}
