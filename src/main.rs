// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;

use kinetic_graph::kinetic::config::EngineConfig;
use kinetic_graph::kinetic::drill::Drill;
use kinetic_graph::KineticError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine config file (YAML); defaults plus KINETIC_* variables otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a config file and print the effective settings
    Config {
        /// Path to the config file
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Print a stored checkpoint as JSON
    Inspect {
        #[arg(short, long)]
        session: String,
    },
    /// List stored session keys
    Sessions,
    /// Delete a session's checkpoint
    Reset {
        #[arg(short, long)]
        session: String,
    },
    /// Run the built-in agent/tools graph against a flaky resource
    Drill {
        #[arg(short, long)]
        session: String,

        /// Number of resource calls that fail before it recovers
        #[arg(long, default_value_t = 2)]
        fail_first: usize,

        /// Park refunds with the configured approval broker, denied once
        /// `approval.timeout_secs` passes, instead of denying outright
        #[arg(long)]
        broker: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, KineticError> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<(), KineticError> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Config { file } => {
            let config = EngineConfig::load(&file)?;
            println!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Inspect { session } => {
            let store = load_config(args.config.as_ref())?.open_store()?;
            match store.load(&session)? {
                Some(checkpoint) => println!("{}", serde_json::to_string_pretty(&checkpoint)?),
                None => println!("No checkpoint for session '{}'", session),
            }
        }
        Commands::Sessions => {
            let store = load_config(args.config.as_ref())?.open_store()?;
            let sessions = store.list_sessions()?;
            if sessions.is_empty() {
                println!("No stored sessions");
            }
            for key in sessions {
                println!("{}", key);
            }
        }
        Commands::Reset { session } => {
            let store = load_config(args.config.as_ref())?.open_store()?;
            if store.delete(&session)? {
                println!("Deleted checkpoint for session '{}'", session);
            } else {
                println!("No checkpoint for session '{}'", session);
            }
        }
        Commands::Drill {
            session,
            fail_first,
            broker,
        } => {
            let config = load_config(args.config.as_ref())?;
            if config.checkpoint.path.is_none() {
                log::warn!("No checkpoint path configured; drill state will not outlive this process");
            }
            let store = config.open_store()?;
            let mut drill = Drill::from_config(&config, fail_first);
            if broker {
                drill = drill.with_approval_broker(&config)?;
            }
            let report = drill.run(store, &session).await?;
            let outcome = &report.outcome;

            println!("Session:        {}", session);
            println!("Termination:    {}", outcome.reason);
            println!(
                "Steps:          {} this run, {} total",
                outcome.steps, outcome.iteration
            );
            if let Some(node) = outcome.last_node {
                println!("Last node:      {}", node);
            }
            println!("Resource calls: {}", report.resource_calls);
            println!(
                "Resolution:     {}",
                outcome.state.get_str("resolution_status").unwrap_or("none")
            );
            if let Some(reason) = outcome.state.get_str("fallback_reason") {
                println!("Fallback:       {}", reason);
            }
            println!("Errors logged:  {}", outcome.state.len_of("errors"));
            println!("Breakers:");
            for status in &report.breakers {
                println!(
                    "  {:<16} {:<10} failures={}",
                    status.key.as_str(),
                    status.state.to_string(),
                    status.failures
                );
            }
            println!("Messages:");
            if let Some(messages) = outcome.state.get("messages").and_then(|v| v.as_array()) {
                for message in messages {
                    println!("  - {}", message.as_str().unwrap_or_default());
                }
            }
        }
    }

    Ok(())
}
