//! CLI command definitions for biomlbench-agents.
//!
//! Host-side commands build images; `launch` and `oneshot` run inside an
//! agent container.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::builder::{AgentBuilder, BuildOptions, ImageRef};
use crate::config::HarnessLayout;
use crate::docker::DockerRuntime;
use crate::error::BuildError;
use crate::launcher::{LaunchStatus, Launcher, RunContext};
use crate::oneshot::{self, OneShotArgs};
use crate::query::{create_query, OpenAiClient, QueryStrategy};
use crate::registry::secrets::{layered_lookup, read_env_file, ENV_FILE};
use crate::registry::{AgentDescriptor, AgentRegistry, ValidationIssue};

/// Build and launch pluggable ML-solving agents for BioML benchmarks.
#[derive(Parser)]
#[command(name = "biomlbench-agents")]
#[command(about = "Build and launch pluggable ML-solving agents for BioML benchmarks")]
#[command(version)]
#[command(
    long_about = "biomlbench-agents builds the shared base environment and per-agent Docker images, and launches an agent's entrypoint inside its container under a hard time limit.\n\nExample usage:\n  biomlbench-agents build-base-env\n  biomlbench-agents build-agent aide --force"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Root of the harness checkout (holds agents/ and environment/).
    #[arg(long, env = "BIOMLBENCH_ROOT", default_value = ".", global = true)]
    pub repo_root: PathBuf,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Build and smoke-test an agent image.
    BuildAgent(BuildAgentArgs),

    /// Build the shared base environment image.
    BuildBaseEnv(BuildBaseEnvArgs),

    /// Run an agent's entrypoint; reads its run context from the environment.
    Launch(LaunchArgs),

    /// List registered agents and validation issues.
    #[command(alias = "ls")]
    Agents(AgentsArgs),

    /// Run the built-in one-shot agent.
    Oneshot(OneShotCliArgs),
}

#[derive(Parser, Debug)]
pub struct BuildAgentArgs {
    /// Agent id (its directory name under agents/).
    pub agent_id: String,

    /// Rebuild without the Docker layer cache.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct BuildBaseEnvArgs {
    /// Rebuild without the Docker layer cache.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct LaunchArgs {
    /// Agent id to launch.
    pub agent_id: String,
}

#[derive(Parser, Debug)]
pub struct AgentsArgs {
    /// Output JSON instead of a table.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct OneShotCliArgs {
    /// Task data directory.
    #[arg(long, env = "DATA_DIR", default_value = "/home/data")]
    pub data_dir: PathBuf,

    /// Where the submission is written.
    #[arg(long, env = "SUBMISSION_DIR", default_value = "/home/submission")]
    pub submission_dir: PathBuf,

    /// Where generated code is copied.
    #[arg(long, env = "CODE_DIR", default_value = "/home/code")]
    pub code_dir: PathBuf,

    /// Where logs are written.
    #[arg(long, env = "LOGS_DIR", default_value = "/home/logs")]
    pub logs_dir: PathBuf,

    /// Model name passed to the OpenAI-compatible endpoint.
    #[arg(short = 'm', long)]
    pub model: String,

    /// Sampling temperature.
    #[arg(long, default_value = "1.0")]
    pub temperature: f64,

    /// How the model is queried (plain or function_calling).
    #[arg(long, env = "QUERY_STRATEGY", default_value = "plain")]
    pub query_strategy: QueryStrategy,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let layout = HarnessLayout::new(&cli.repo_root);
    match cli.command {
        Commands::BuildAgent(args) => run_build_agent_command(layout, args).await,
        Commands::BuildBaseEnv(args) => run_build_base_env_command(layout, args).await,
        Commands::Launch(args) => run_launch_command(layout, args).await,
        Commands::Agents(args) => run_agents_command(layout, args),
        Commands::Oneshot(args) => run_oneshot_command(args).await,
    }
}

// ============================================================================
// Build commands
// ============================================================================

fn describe_build_error(err: BuildError) -> anyhow::Error {
    anyhow::anyhow!("{}: {}", err.check_name(), err)
}

fn print_image(image: &ImageRef) {
    match image.agent_id {
        Some(ref id) => println!("Built image {} for agent {}", image.image, id),
        None => println!("Built image {}", image.image),
    }
}

async fn run_build_agent_command(layout: HarnessLayout, args: BuildAgentArgs) -> anyhow::Result<()> {
    let builder = AgentBuilder::new(Box::new(DockerRuntime::new()), layout);
    let options = BuildOptions {
        force_no_cache: args.force,
    };
    let image = builder
        .build(&args.agent_id, options)
        .await
        .map_err(describe_build_error)?;
    print_image(&image);
    Ok(())
}

async fn run_build_base_env_command(layout: HarnessLayout, args: BuildBaseEnvArgs) -> anyhow::Result<()> {
    let builder = AgentBuilder::new(Box::new(DockerRuntime::new()), layout);
    let options = BuildOptions {
        force_no_cache: args.force,
    };
    let image = builder
        .build_base_env(options)
        .await
        .map_err(describe_build_error)?;
    print_image(&image);
    Ok(())
}

// ============================================================================
// Launch command
// ============================================================================

async fn run_launch_command(layout: HarnessLayout, args: LaunchArgs) -> anyhow::Result<()> {
    let registry = AgentRegistry::load(&layout.agents_dir)?;
    for issue in registry.issues() {
        warn!("{}", issue);
    }
    let descriptor = registry
        .get(&args.agent_id)
        .context("agent registered")?;

    let mut ctx = RunContext::from_env().context("run context")?;
    let file_values = read_env_file(&layout.repo_root.join(ENV_FILE));
    let resolved = descriptor
        .resolve_env_vars(layered_lookup(|name| std::env::var(name).ok(), &file_values))
        .context("agent env vars")?;
    for (key, value) in resolved {
        ctx = ctx.with_env(key, value);
    }

    let result = Launcher::new().launch(descriptor, ctx).await?;

    println!(
        "Agent {} {} (limit {}, hardware {})",
        result.agent_id, result.status, result.time_limit_label, result.hardware
    );
    if let Some(best) = result.best_solution() {
        println!("Best solution: {}", best.display());
    }

    match result.status {
        LaunchStatus::Crashed => Err(anyhow::anyhow!(
            "agent routine: exited with code {}",
            result
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string())
        )),
        LaunchStatus::Completed | LaunchStatus::TimedOut => Ok(()),
    }
}

// ============================================================================
// Agents command
// ============================================================================

#[derive(Debug, Serialize)]
struct AgentsOutput<'a> {
    agents_dir: PathBuf,
    agents: Vec<&'a AgentDescriptor>,
    issues: &'a [ValidationIssue],
}

fn run_agents_command(layout: HarnessLayout, args: AgentsArgs) -> anyhow::Result<()> {
    let registry = AgentRegistry::load(&layout.agents_dir)?;

    if args.json {
        let output = AgentsOutput {
            agents_dir: registry.agents_dir().to_path_buf(),
            agents: registry.agents().collect(),
            issues: registry.issues(),
        };
        let json = serde_json::to_string_pretty(&output)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json);
        return Ok(());
    }

    println!("{:<20} {:<30} {:<10} {}", "ID", "IMAGE", "GPU", "ENVIRONMENT");
    for agent in registry.agents() {
        println!(
            "{:<20} {:<30} {:<10} {}",
            agent.id,
            agent.image,
            agent.gpu,
            agent.environment.as_deref().unwrap_or("-")
        );
    }
    for issue in registry.issues() {
        println!("excluded: {}", issue);
    }
    info!(
        "{} agent(s) registered, {} excluded",
        registry.len(),
        registry.issues().len()
    );
    Ok(())
}

// ============================================================================
// One-shot command
// ============================================================================

async fn run_oneshot_command(args: OneShotCliArgs) -> anyhow::Result<()> {
    let client = OpenAiClient::from_env().context("model client")?;
    let model = create_query(args.query_strategy, client);
    let args = OneShotArgs {
        data_dir: args.data_dir,
        submission_dir: args.submission_dir,
        code_dir: args.code_dir,
        logs_dir: args.logs_dir,
        model: args.model,
        temperature: args.temperature,
    };
    oneshot::run(&args, model.as_ref())
        .await
        .context("one-shot agent")?;
    println!("One-shot agent completed successfully");
    Ok(())
}
