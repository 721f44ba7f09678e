use async_trait::async_trait;
use beacon_rs::beacon::{ActionExecutor, ActionRequest, DispatchReport, Engine};
use beacon_rs::eval::error::ExecutorError;
use beacon_rs::eval::condition::parse_duration;
use beacon_rs::eval::property::catalogue;
use beacon_rs::eval::property::{PropertyKind, PropertyRegistry, Value};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a JSON or YAML configuration document
    #[arg(short, long)]
    config: PathBuf,

    /// Property value as key=value, repeatable
    #[arg(short, long = "property", value_name = "KEY=VALUE")]
    properties: Vec<String>,

    /// API key (defaults to BEACON_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Evaluation timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a named condition
    Check {
        /// Condition name
        #[arg(short, long)]
        name: String,

        /// Default expression, used when the configuration has no override
        #[arg(short, long)]
        expression: String,
    },
    /// Send an event and report the actions it dispatched
    Send {
        /// Event name
        #[arg(short, long)]
        event: String,

        /// How long to wait for dispatches, in milliseconds
        #[arg(long, default_value_t = 500)]
        wait_ms: u64,
    },
    /// Perform an action directly, bypassing triggers
    Perform {
        /// Action id
        #[arg(short, long)]
        action: String,
    },
    /// Validate the configuration document and exit
    Validate,
}

/// Prints actions instead of rendering them
struct LoggingExecutor;

#[async_trait]
impl ActionExecutor for LoggingExecutor {
    async fn execute(&self, request: &ActionRequest) -> Result<(), ExecutorError> {
        log::info!("Executing {} action '{}'", request.kind, request.action_id);
        println!(
            "Action: {} (kind: {}, trigger: {}) params: {}",
            request.action_id,
            request.kind,
            request.trigger_id.as_deref().unwrap_or("-"),
            request.params
        );
        Ok(())
    }
}

fn register_properties(
    registry: &PropertyRegistry,
    properties: &[String],
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    registry.register_static("platform", std::env::consts::OS.into())?;
    registry.register_static("os_version", "unknown".into())?;
    registry.register_static("app_version", env!("CARGO_PKG_VERSION").into())?;

    for entry in properties {
        let (key, raw) = entry
            .split_once('=')
            .ok_or_else(|| format!("Property '{}' must be KEY=VALUE", entry))?;
        let key = key.trim();

        match catalogue::BUILT_IN.get(key) {
            Some(spec) => {
                let value = match spec.kind {
                    PropertyKind::String => Value::String(raw.to_string()),
                    PropertyKind::Duration => Value::Duration(
                        parse_duration(raw).map_err(|e| format!("Property '{}': {}", key, e))?,
                    ),
                    _ => Value::parse_loose(raw),
                };
                registry.register_static(key, value)?;
            }
            None => registry.register_client_property(key, Value::parse_loose(raw))?,
        }
        log::info!("Registered property: {}", key);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let (tx, mut reports) = mpsc::channel::<DispatchReport>(64);
    let engine = Engine::builder()
        .executor(Arc::new(LoggingExecutor))
        .evaluation_timeout(Duration::from_millis(args.timeout_ms))
        .reports(tx)
        .build()?;

    register_properties(engine.registry(), &args.properties)?;

    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("BEACON_API_KEY").ok())
        .ok_or("No API key: pass --api-key or set BEACON_API_KEY")?;
    engine.set_api_key(&api_key)?;

    let path = std::fs::canonicalize(&args.config)?;
    let url = Url::from_file_path(&path)
        .map_err(|_| format!("Cannot build a file URL for {}", path.display()))?;
    engine.set_config_url(url.as_str())?;

    if let Commands::Validate = args.command {
        let rejected = engine.reload_configuration().await?;
        if rejected.is_empty() {
            println!("Configuration OK");
        } else {
            println!("Configuration OK, rejected overrides: {}", rejected.join(", "));
        }
        return Ok(());
    }

    engine.start().await?;

    match args.command {
        Commands::Check { name, expression } => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            engine.check_named_condition_with_handler(&name, &expression, move |matched, err| {
                let _ = tx.send((matched, err));
            });
            let (matched, err) = rx.await?;
            match err {
                Some(e) => println!("{}: false (error: {})", name, e),
                None => println!("{}: {}", name, matched),
            }
        }
        Commands::Send { event, wait_ms } => {
            engine.send_event(&event)?;
            let deadline = tokio::time::sleep(Duration::from_millis(wait_ms));
            tokio::pin!(deadline);
            let mut dispatched = 0;
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    report = reports.recv() => match report {
                        Some(report) => {
                            dispatched += 1;
                            if let Err(e) = report.outcome {
                                println!("Action {} failed: {}", report.request.action_id, e);
                            }
                        }
                        None => break,
                    },
                }
            }
            println!("Event '{}' dispatched {} action(s)", event, dispatched);
        }
        Commands::Perform { action } => {
            if engine.perform_named_action(&action).await? {
                println!("Performed {}", action);
            } else {
                println!("Skipped {}: condition not met", action);
            }
        }
        Commands::Validate => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_rs::eval::property::PropertyProvider;

    #[test]
    fn test_register_properties_parses_durations() {
        let registry = PropertyRegistry::new();
        let properties = vec!["app_install_age=7d".to_string(), "plan=pro".to_string()];
        register_properties(&registry, &properties).unwrap();

        let provider = registry.provider("app_install_age").unwrap();
        assert_eq!(provider.kind(), PropertyKind::Duration);

        let registry = PropertyRegistry::new();
        let properties = vec!["app_install_age=soon".to_string()];
        assert!(register_properties(&registry, &properties).is_err());
    }
}
