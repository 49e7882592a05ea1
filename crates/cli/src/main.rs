//! Tripweave CLI, the main entry point.
//!
//! Commands:
//! - `init`    : Write a default config file
//! - `ask`     : Orchestrate one message and print the envelope
//! - `skill`   : Run a registered skill
//! - `status`  : Show the effective configuration
//! - `doctor`  : Diagnose config and cache health
//! - `cache`   : Inspect or clear the hybrid cache

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tripweave_config::AppConfig;
use tripweave_core::request::UserTier;

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "tripweave",
    about = "Tripweave: request orchestration for a travel assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Orchestrate a single message
    Ask {
        /// The user message
        message: String,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,

        /// Caller user id
        #[arg(short, long, env = "TRIPWEAVE_USER")]
        user: Option<String>,

        /// Caller tier (guest, standard, premium)
        #[arg(short, long)]
        tier: Option<UserTier>,

        /// Dispatch these capabilities instead of detecting intent
        #[arg(long = "capability")]
        capabilities: Vec<String>,

        /// Structured parameter as key=value (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Fail unless every capability succeeds
        #[arg(long)]
        require_all: bool,
    },

    /// Run a registered skill
    Skill {
        /// Skill name
        name: String,

        /// JSON parameters
        #[arg(default_value = "{}")]
        params: String,

        /// Conversation whose shared state the skill sees
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// Show the effective configuration
    Status,

    /// Diagnose config and cache health
    Doctor,

    /// Inspect or clear the hybrid cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print cache health as JSON
    Health,
    /// Remove every entry from both tiers
    Clear,
}

fn init_tracing(config: &AppConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        return commands::init::run(force);
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Ask {
            message,
            conversation,
            user,
            tier,
            capabilities,
            params,
            require_all,
        } => {
            let args = commands::ask::AskArgs {
                message,
                conversation,
                user,
                tier,
                capabilities,
                params,
                require_all,
            };
            commands::ask::run(&config, args).await?
        }
        Commands::Skill {
            name,
            params,
            conversation,
        } => commands::skill::run(&config, &name, &params, conversation).await?,
        Commands::Status => commands::status::run(&config)?,
        Commands::Doctor => commands::doctor::run(&config).await?,
        Commands::Cache { action } => match action {
            CacheAction::Health => commands::cache::health(&config).await?,
            CacheAction::Clear => commands::cache::clear(&config).await?,
        },
    }

    Ok(())
}
