//! Salt master CLI - provision the Tinkerbell salt master.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use saltmaster::bootstrap::{BootstrapConfig, CloudInitComposer, Composer};
use saltmaster::orchestrator::RunJournal;
use saltmaster::providers::equinix::EquinixMetal;
use saltmaster::providers::ns1::Ns1;
use saltmaster::providers::random::UuidTokenSource;
use saltmaster::providers::PeerToken;
use saltmaster::{config, Orchestrator, StackState};

/// Salt master CLI - provision the salt master and its Teleport endpoint.
#[derive(Parser)]
#[command(name = "saltmaster")]
#[command(about = "Provision the SaltStack master on Equinix Metal")]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision (or reconcile) the salt master.
    Up {
        /// Stack configuration file.
        #[arg(long, default_value = "stack.yaml")]
        config: PathBuf,

        /// Override the stack name from the configuration file.
        #[arg(long)]
        stack: Option<String>,

        /// Directory holding stack state.
        #[arg(long, default_value = ".saltmaster")]
        state_dir: PathBuf,

        /// Equinix Metal API token (or set `METAL_AUTH_TOKEN` env var).
        #[arg(long, env = "METAL_AUTH_TOKEN", hide_env_values = true)]
        metal_token: String,

        /// NS1 API key (or set `NS1_API_KEY` env var).
        #[arg(long, env = "NS1_API_KEY", hide_env_values = true)]
        ns1_api_key: String,
    },

    /// Print the bootstrap payload for a given peer token.
    Render {
        /// Stack configuration file.
        #[arg(long, default_value = "stack.yaml")]
        config: PathBuf,

        /// Peer token to render with.
        #[arg(long)]
        token: String,
    },

    /// Print the outputs recorded for a stack.
    Outputs {
        /// Stack name.
        #[arg(long)]
        stack: String,

        /// Directory holding stack state.
        #[arg(long, default_value = ".saltmaster")]
        state_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Up {
            config,
            stack,
            state_dir,
            metal_token,
            ns1_api_key,
        } => {
            let mut request = config::load(&config)
                .with_context(|| format!("Failed to load {}", config.display()))?;
            if let Some(stack) = stack {
                request = request.with_stack(stack);
            }

            let metal = EquinixMetal::new(&metal_token, &request.project_id)
                .context("Failed to create Equinix Metal provider")?;
            let dns = Ns1::new(&ns1_api_key).context("Failed to create NS1 provider")?;
            let orchestrator =
                Orchestrator::new(Arc::new(metal), Arc::new(dns), Arc::new(UuidTokenSource))
                    .context("Failed to compile bootstrap template")?;

            let mut state = StackState::load_or_new(&state_dir, &request.stack)?;
            let journal = RunJournal::new();

            info!(stack = %request.stack, "Starting provisioning run");
            let outcome = orchestrator
                .run_with_journal(&request, &mut state, &journal)
                .await;

            println!("\n{:<6} {:<24} {:<10}", "SEQ", "STEP", "PHASE");
            println!("{}", "-".repeat(42));
            for entry in journal.entries() {
                println!(
                    "{:<6} {:<24} {:<10}",
                    entry.seq,
                    entry.step.to_string(),
                    entry.phase.to_string()
                );
            }

            let provisioned = outcome.context("Provisioning failed")?;
            println!("\n{}", serde_json::to_string_pretty(&provisioned.outputs)?);
            for resource in &provisioned.retired_pending {
                println!("⚠️  superseded resource not yet deleted: {resource:?}");
            }
        }

        Commands::Render { config, token } => {
            let request = config::load(&config)
                .with_context(|| format!("Failed to load {}", config.display()))?;
            let bootstrap = BootstrapConfig::builder(&request).peer_token(&PeerToken::new(token));
            let payload = CloudInitComposer::new()?.compose(&bootstrap)?;
            print!("{payload}");
        }

        Commands::Outputs { stack, state_dir } => {
            let state = StackState::load(&state_dir, &stack)?
                .with_context(|| format!("No state recorded for stack {stack}"))?;
            println!("{}", serde_json::to_string_pretty(&state.outputs)?);
        }
    }

    Ok(())
}
