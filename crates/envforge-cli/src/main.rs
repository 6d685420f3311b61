//! Envforge CLI — entry point.
//!
//! # Commands
//!
//! - `envforge generate --goal "..." --output-dir DIR [...]` — run a full
//!   multi-agent generation
//! - `envforge preflight` — check the host environment and exit
//!
//! # Exit codes
//!
//! - `0` — successful delivery
//! - `1` — generation error
//! - `2` — pre-flight hard failure (no available ports)

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::error;

use envforge_agent::{OrchestrateError, Orchestrator, OrchestratorConfig};
use envforge_core::process::port_is_free;
use envforge_providers::HttpLlmClient;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Envforge — multi-agent web application generator
#[derive(Parser)]
#[command(name = "envforge", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a complete application from a natural-language goal
    Generate {
        /// Project name
        #[arg(long, default_value = "generated_app")]
        name: String,

        /// What to build, in natural language
        #[arg(long)]
        goal: String,

        /// Additional requirement (repeatable)
        #[arg(long = "requirement")]
        requirements: Vec<String>,

        /// Reference image copied into the workspace (repeatable)
        #[arg(long = "reference-image")]
        reference_images: Vec<PathBuf>,

        /// Workspace directory to generate into
        #[arg(long)]
        output_dir: PathBuf,

        /// Resume from an existing checkpoint in the output directory
        #[arg(long, default_value_t = false)]
        resume: bool,

        /// Ceiling on the whole generation, in seconds
        #[arg(long, default_value_t = 7200)]
        max_duration: u64,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },

    /// Check docker, node, and common ports without generating anything
    Preflight {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            name,
            goal,
            requirements,
            reference_images,
            output_dir,
            resume,
            max_duration,
            verbose,
        } => {
            init_logging(verbose);
            run_generate(
                name,
                goal,
                requirements,
                reference_images,
                output_dir,
                resume,
                max_duration,
            )
            .await
        }
        Commands::Preflight { verbose } => {
            init_logging(verbose);
            run_preflight().await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_generate(
    name: String,
    goal: String,
    requirements: Vec<String>,
    reference_images: Vec<PathBuf>,
    output_dir: PathBuf,
    resume: bool,
    max_duration: u64,
) -> ExitCode {
    let llm = match HttpLlmClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            return ExitCode::from(1);
        }
    };

    let mut config = OrchestratorConfig::new(name, output_dir);
    config.reference_images = reference_images;
    config.resume = resume;
    config.delivery_timeout = Duration::from_secs(max_duration);

    let mut orchestrator = match Orchestrator::new(config, llm) {
        Ok(o) => o,
        Err(e) => return exit_code_for(&e),
    };

    match orchestrator.run(&goal, &requirements).await {
        Ok(result) if result.success => {
            println!(
                "{} {} ({})",
                "delivered:".green(),
                result.project_path.display(),
                result.summary
            );
            ExitCode::from(0)
        }
        Ok(result) => {
            eprintln!("{} {}", "failed:".red(), result.summary);
            ExitCode::from(1)
        }
        Err(e) => {
            error!(error = %e, "generation aborted");
            eprintln!("{} {e}", "error:".red());
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(e: &OrchestrateError) -> ExitCode {
    match e {
        // No available ports is the documented pre-flight hard failure
        OrchestrateError::Ports(_) => ExitCode::from(2),
        _ => ExitCode::from(1),
    }
}

async fn run_preflight() -> ExitCode {
    let docker = tokio::process::Command::new("docker")
        .arg("info")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);
    let node = tokio::process::Command::new("node")
        .arg("--version")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);

    print_check("docker", docker);
    print_check("node", node);

    for port in [3000u16, 5432, 8080] {
        print_check(&format!("port {port}"), port_is_free(port));
    }
    ExitCode::from(0)
}

fn print_check(label: &str, ok: bool) {
    if ok {
        println!("{} {label}", "[ok]".green());
    } else {
        println!("{} {label}", "[warn]".yellow());
    }
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("envforge=debug,info")
    } else {
        EnvFilter::new("envforge=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
