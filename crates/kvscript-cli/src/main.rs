//! kvscript - run sandboxed data-query scripts against a seeded store
//!
//! ## Commands
//!
//! - `run`: execute a script and print its outcome as JSON
//! - `check`: validate and compile a script without executing it

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, Level};

use kvscript_core::{ScriptConfig, ScriptExecutionService, METRICS};
use kvscript_store::MemoryStore;

#[derive(Parser)]
#[command(name = "kvscript")]
#[command(author = "Stevedores Org")]
#[command(version = kvscript_core::VERSION)]
#[command(about = "Sandboxed script execution against a key-value store", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script and print the outcome
    Run {
        #[command(flatten)]
        source: ScriptSource,

        /// JSON object used to seed the in-memory store
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// TOML config file with a [script] table
        #[arg(short, long, env = "KVSCRIPT_CONFIG")]
        config: Option<PathBuf>,

        /// Mark the execution as a dry run (writes still apply)
        #[arg(long)]
        dry_run: bool,

        /// Override the configured time budget
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Validate and compile a script without running it
    Check {
        #[command(flatten)]
        source: ScriptSource,

        /// TOML config file with a [script] table
        #[arg(short, long, env = "KVSCRIPT_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ScriptSource {
    /// Path to the script file
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Script text given inline
    #[arg(short, long)]
    inline: Option<String>,
}

#[derive(Serialize)]
struct CheckReport {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    kvscript_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            source,
            data,
            config,
            dry_run,
            timeout_ms,
        } => {
            cmd_run(
                &source,
                data.as_deref(),
                config.as_deref(),
                dry_run,
                timeout_ms,
            )
            .await
        }
        Commands::Check { source, config } => cmd_check(&source, config.as_deref()).await,
    }
}

async fn cmd_run(
    source: &ScriptSource,
    data: Option<&Path>,
    config: Option<&Path>,
    dry_run: bool,
    timeout_ms: Option<u64>,
) -> Result<ExitCode> {
    let script = read_script(source)?;
    let store = Arc::new(load_store(data)?);
    let service = ScriptExecutionService::new(load_config(config)?, store)
        .context("Failed to build script service")?;

    let outcome = match timeout_ms {
        Some(ms) => {
            service
                .execute_with_timeout(&script, dry_run, Duration::from_millis(ms))
                .await
        }
        None => service.execute(&script, dry_run).await,
    };
    METRICS.flush();

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_check(source: &ScriptSource, config: Option<&Path>) -> Result<ExitCode> {
    let script = read_script(source)?;
    let service = ScriptExecutionService::new(load_config(config)?, Arc::new(MemoryStore::new()))
        .context("Failed to build script service")?;

    let (report, code) = match service.check(&script).await {
        Ok(digest) => (
            CheckReport {
                ok: true,
                digest: Some(digest.to_hex()),
                error: None,
            },
            ExitCode::SUCCESS,
        ),
        Err(err) => (
            CheckReport {
                ok: false,
                digest: None,
                error: Some(err.to_string()),
            },
            ExitCode::FAILURE,
        ),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(code)
}

fn read_script(source: &ScriptSource) -> Result<String> {
    match (&source.script, &source.inline) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script file: {:?}", path)),
        (None, Some(text)) => Ok(text.clone()),
        (None, None) => anyhow::bail!("either --script or --inline is required"),
    }
}

fn load_config(path: Option<&Path>) -> Result<ScriptConfig> {
    match path {
        Some(path) => ScriptConfig::load(path)
            .with_context(|| format!("Failed to load config: {:?}", path)),
        None => Ok(ScriptConfig::default()),
    }
}

fn load_store(path: Option<&Path>) -> Result<MemoryStore> {
    let Some(path) = path else {
        return Ok(MemoryStore::new());
    };
    let seed: serde_json::Value = read_json_file(path)?;
    let store = MemoryStore::from_json(&seed)
        .with_context(|| format!("Invalid seed data in {:?}", path))?;
    debug!(keys = store.len(), "store seeded");
    Ok(store)
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use kvscript_store::KeyValueStore;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["kvscript", "run"]).is_err());
        assert!(Cli::try_parse_from([
            "kvscript", "run", "--script", "a.rhai", "--inline", "1"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["kvscript", "run", "--inline", "get(\"k1\")"]).is_ok());
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "kvscript",
            "--json",
            "run",
            "--inline",
            "1",
            "--dry-run",
            "--timeout-ms",
            "250",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run {
                dry_run,
                timeout_ms,
                ..
            } => {
                assert!(dry_run);
                assert_eq!(timeout_ms, Some(250));
            }
            Commands::Check { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_load_store_from_seed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, r#"{"k1": "v1", "user:1": {"name": "alice"}}"#).unwrap();

        let store = load_store(Some(&path)).unwrap();
        assert_eq!(store.get("k1").unwrap().as_deref(), Some("v1"));
        assert_eq!(store.hget("user:1", "name").unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_load_store_rejects_non_object_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(load_store(Some(&path)).is_err());
    }

    #[test]
    fn test_read_inline_script() {
        let source = ScriptSource {
            script: None,
            inline: Some("1 + 1".into()),
        };
        assert_eq!(read_script(&source).unwrap(), "1 + 1");
    }
}
