use anyhow::{Context, Result};
use cachestack::{CacheConfig, CachePool, LoggingConfig};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cachestack-cli")]
#[command(about = "Cachestack CLI - run cache operations against a configured provider stack", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long, default_value = "cachestack.yml")]
    config: PathBuf,

    /// Namespace to operate in
    #[arg(short = 'n', long)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a value
    Get { key: String },
    /// Store a JSON value (plain text is stored as a string)
    Set {
        key: String,
        value: String,
        /// Time to live in seconds (0 = forever)
        #[arg(long, default_value_t = 0)]
        ttl: u64,
    },
    /// Delete a key
    Delete { key: String },
    /// Check whether a key exists
    Has { key: String },
    /// Clear the whole cache, or only the active namespace
    Clear {
        #[arg(long)]
        namespace_only: bool,
    },
    /// Per-provider statistics
    Stats,
    /// Self-test every provider
    Test,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = CacheConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_tracing(&config.logging);

    info!("Starting Cachestack CLI v{}", env!("CARGO_PKG_VERSION"));

    let manager = config.build_manager()?;
    if let Some(namespace) = &args.namespace {
        manager.set_namespace(namespace)?;
    }

    let output = match args.command {
        Command::Get { key } => {
            let value = manager.get(&key, None)?;
            json!({
                "key": key,
                "hit": value.is_some(),
                "value": value,
                "provider": manager.selected_provider(),
            })
        }
        Command::Set { key, value, ttl } => {
            let ttl = (ttl > 0).then(|| Duration::from_secs(ttl));
            let ok = manager.set(&key, parse_value(&value), ttl)?;
            json!({ "key": key, "success": ok })
        }
        Command::Delete { key } => {
            let ok = manager.delete(&key)?;
            json!({ "key": key, "success": ok })
        }
        Command::Has { key } => {
            let exists = manager.has(&key)?;
            json!({ "key": key, "exists": exists })
        }
        Command::Clear { namespace_only } => {
            let ok = if namespace_only {
                manager.clear_namespace()?
            } else {
                manager.clear()?
            };
            json!({ "namespace": manager.namespace(), "success": ok })
        }
        Command::Stats => json!({
            "manager": manager.stats(),
            "providers": manager.get_stats(),
        }),
        Command::Test => {
            let healthy = manager.test();
            json!({ "healthy": healthy, "providers": manager.providers() })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_value("Prefect"), json!("Prefect"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "cachestack-cli",
            "-c",
            "x.yml",
            "set",
            "Ford",
            "Prefect",
            "--ttl",
            "20",
        ]);
        assert_eq!(args.config, PathBuf::from("x.yml"));
        match args.command {
            Command::Set { key, value, ttl } => {
                assert_eq!(key, "Ford");
                assert_eq!(value, "Prefect");
                assert_eq!(ttl, 20);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
