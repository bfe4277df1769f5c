//! # TaskVault: self-hosted task orchestration
//!
//! Usage:
//!   taskvault run                              # Start the runtime (default config)
//!   taskvault --config ./taskvault.toml run    # Custom config file
//!   taskvault run --port 8080                  # Override the API port
//!   taskvault check-config                     # Validate and print the effective config
//!   taskvault validate-recipe ./recipes/*.toml # Check recipe files without running them

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taskvault_core::TaskVaultConfig;
use taskvault_runtime::Runtime;
use taskvault_runtime::recipes::load_recipe;
use taskvault_scheduler::KindRegistry;

#[derive(Parser)]
#[command(
    name = "taskvault",
    version,
    about = "🗄️ TaskVault: weighted task scheduler with component supervision"
)]
struct Cli {
    /// Config file (default: ~/.taskvault/taskvault.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the vault, bus, recipe loader, sentry and API
    Run {
        /// Override the API port
        #[arg(short, long)]
        port: Option<u16>,

        /// Disable the HTTP API
        #[arg(long)]
        no_api: bool,
    },
    /// Load, validate and print the effective configuration
    CheckConfig {
        /// Write the effective configuration to the config path
        #[arg(long)]
        write: bool,
    },
    /// Parse recipe files and build every task they define, without submitting
    ValidateRecipe {
        /// Recipe files (*.toml or *.json)
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

fn config_path(cli: &Cli) -> PathBuf {
    match &cli.config {
        Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
        None => TaskVaultConfig::default_path(),
    }
}

fn load_config(path: &Path) -> Result<TaskVaultConfig> {
    if path.exists() {
        TaskVaultConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))
    } else {
        tracing::info!("📄 No config at {}, using defaults", path.display());
        Ok(TaskVaultConfig::default())
    }
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        "taskvault=debug,taskvault_core=debug,taskvault_scheduler=debug,taskvault_bus=debug,taskvault_runtime=debug,tower_http=debug"
    } else {
        "taskvault=info,taskvault_core=info,taskvault_scheduler=info,taskvault_bus=info,taskvault_runtime=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build every task in each recipe. Returns the number of files with problems.
fn validate_recipes(paths: &[String], config: &TaskVaultConfig) -> usize {
    let registry = KindRegistry::builtin();
    let mut bad = 0;
    for raw in paths {
        let path = PathBuf::from(shellexpand::tilde(raw).to_string());
        let payloads = match load_recipe(&path) {
            Ok(p) => p,
            Err(e) => {
                println!("❌ {}: {e}", path.display());
                bad += 1;
                continue;
            }
        };
        let mut file_ok = true;
        for payload in &payloads {
            match registry.build_task(payload, &config.tasks) {
                Ok(task) => println!(
                    "✅ {}: '{}' ({}, priority {}, weight {}, repeat {})",
                    path.display(),
                    task.name,
                    task.kind(),
                    task.priority,
                    task.weight,
                    task.repeat
                ),
                Err(e) => {
                    println!("❌ {}: {e}", path.display());
                    file_ok = false;
                }
            }
        }
        if !file_ok {
            bad += 1;
        }
    }
    bad
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let path = config_path(&cli);
    let mut config = load_config(&path)?;

    match cli.command {
        Command::Run { port, no_api } => {
            if let Some(port) = port {
                config.api.port = port;
            }
            if no_api {
                config.api.enabled = false;
            }
            let runtime = Runtime::new(config)?;
            runtime.run_until_shutdown().await?;
        }
        Command::CheckConfig { write } => {
            config.validate()?;
            println!("✅ Config OK ({})", path.display());
            println!("{}", toml::to_string_pretty(&config)?);
            if write {
                config.save_to(&path)?;
                println!("💾 Written to {}", path.display());
            }
        }
        Command::ValidateRecipe { paths } => {
            let bad = validate_recipes(&paths, &config);
            if bad > 0 {
                anyhow::bail!("{bad} recipe file(s) failed validation");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["taskvault", "--config", "/tmp/tv.toml", "run", "--port", "9000"])
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some("/tmp/tv.toml"));
        assert!(matches!(cli.command, Command::Run { port: Some(9000), no_api: false }));

        let cli = Cli::try_parse_from(["taskvault", "validate-recipe", "a.toml", "b.json", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::ValidateRecipe { paths } => assert_eq!(paths, vec!["a.toml", "b.json"]),
            _ => panic!("expected validate-recipe"),
        }

        assert!(Cli::try_parse_from(["taskvault", "validate-recipe"]).is_err());
    }

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/taskvault.toml")).unwrap();
        assert_eq!(config.api.port, 7070);
    }

    #[test]
    fn test_validate_recipes_counts_bad_files() {
        let dir = std::env::temp_dir().join(format!("taskvault-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let good = dir.join("good.toml");
        let bad = dir.join("bad.json");
        std::fs::write(&good, "type = \"sleep\"\nseconds = 1\n").unwrap();
        std::fs::write(&bad, r#"{"type": "teleport"}"#).unwrap();

        let paths = vec![
            good.to_string_lossy().into_owned(),
            bad.to_string_lossy().into_owned(),
            dir.join("missing.toml").to_string_lossy().into_owned(),
        ];
        assert_eq!(validate_recipes(&paths, &TaskVaultConfig::default()), 2);
        std::fs::remove_dir_all(&dir).ok();
    }
}
