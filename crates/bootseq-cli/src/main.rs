mod cmd;
mod output;
mod root;

use bootseq_core::{BootError, RunMode, SeedPolicy};
use clap::{Parser, Subcommand};
use cmd::{check::CheckSubcommand, config::ConfigSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "bootseq",
    about = "Container entrypoint: wait for the datastore, run migrations and seeds, then exec the service",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: bootseq.yaml found from the current directory upward)
    #[arg(long, global = true, env = "BOOTSEQ_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Defaults to `run` when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the startup sequence and hand the process over to the service
    Run {
        /// development or production (overrides RUN_MODE)
        #[arg(long)]
        mode: Option<RunMode>,

        /// fatal or warn (overrides SEED_POLICY)
        #[arg(long)]
        seed_policy: Option<SeedPolicy>,

        /// Skip identity provider provisioning
        #[arg(long)]
        skip_identity: bool,
    },

    /// Probe a single dependency once
    Check {
        #[command(subcommand)]
        subcommand: CheckSubcommand,
    },

    /// Provision the identity provider on its own (failures are fatal here)
    ProvisionIdp,

    /// Print the service command `run` would exec
    Plan {
        /// development or production (overrides RUN_MODE)
        #[arg(long)]
        mode: Option<RunMode>,
    },

    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        None | Some(Commands::Run { .. }) | Some(Commands::ProvisionIdp) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = root::resolve_config(cli.config.as_deref());
    let config_path = config_path.as_deref();

    let command = cli.command.unwrap_or(Commands::Run {
        mode: None,
        seed_policy: None,
        skip_identity: false,
    });

    let result = match command {
        Commands::Run {
            mode,
            seed_policy,
            skip_identity,
        } => cmd::run::run(
            config_path,
            cmd::run::Overrides {
                mode,
                seed_policy,
                skip_identity,
            },
        ),
        Commands::Check { subcommand } => cmd::check::run(config_path, subcommand, cli.json),
        Commands::ProvisionIdp => cmd::provision::run(config_path, cli.json),
        Commands::Plan { mode } => cmd::plan::run(config_path, mode, cli.json),
        Commands::Config { subcommand } => cmd::config::run(config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        let code = e
            .chain()
            .find_map(|cause| cause.downcast_ref::<BootError>())
            .map_or(1, BootError::exit_code);
        std::process::exit(code);
    }
}
