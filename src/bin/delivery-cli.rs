use std::path::PathBuf;

use clap::{Parser, Subcommand};

use delivery_engine::config::{load_config, EngineConfig};
use delivery_engine::resilience::RetryPolicy;
use delivery_engine::{Priority, SubmitRequest};

#[derive(Parser)]
#[command(name = "delivery-cli")]
#[command(about = "Offline tooling for delivery-engine configs and submissions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and report every problem
    Validate { config: PathBuf },
    /// Print the fully-defaulted configuration as TOML
    Defaults,
    /// Show the retry schedule a configuration produces
    Schedule { config: Option<PathBuf> },
    /// Emit a submit request line for the daemon's stdin
    Submit {
        #[arg(short, long)]
        pool: String,
        /// JSON payload
        #[arg(short = 'd', long, default_value = "{}")]
        payload: String,
        #[arg(long, default_value = "normal")]
        priority: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => match load_config(&config) {
            Ok(config) => {
                println!(
                    "OK: {} pool(s), {} target(s)",
                    config.pools.len(),
                    config.pools.iter().map(|p| p.targets.len()).sum::<usize>()
                );
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Defaults => {
            println!("{}", toml::to_string_pretty(&EngineConfig::default())?);
        }
        Commands::Schedule { config } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => EngineConfig::default(),
            };
            let policy = RetryPolicy::from(&config.retries);
            println!(
                "strategy: {:?}, max attempts: {}",
                policy.strategy, policy.max_attempts
            );
            for attempt in 1..policy.max_attempts {
                println!(
                    "after attempt {}: wait {:?}",
                    attempt,
                    policy.next_delay(attempt)
                );
            }
            println!("after attempt {}: dead-letter", policy.max_attempts);
        }
        Commands::Submit {
            pool,
            payload,
            priority,
            subject,
            ttl_secs,
        } => {
            let priority: Priority = serde_json::from_value(serde_json::Value::String(priority))?;
            let request = SubmitRequest {
                pool,
                payload: serde_json::from_str(&payload)?,
                priority,
                subject,
                affinity_key: None,
                ttl_secs,
                max_attempts: None,
            };
            println!("{}", serde_json::to_string(&request)?);
        }
    }

    Ok(())
}
