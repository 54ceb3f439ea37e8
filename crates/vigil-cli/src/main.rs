//! Vigil CLI - run untrusted code in a sandbox and explain what happened
//!
//! Usage:
//!   vigil run <FILE>     - Screen, execute and analyze a source file
//!   vigil screen <FILE>  - Security screen only, nothing runs
//!   vigil reclaim        - Remove orphaned sandbox containers
//!   vigil stats          - CPU/memory of running sandboxes
//!   vigil config         - Print the effective configuration

mod render;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_core::{EngineConfig, ExecutionEngine, ExecutionOptions, Language};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(author = "HeyBattle1")]
#[command(version)]
#[command(about = "Fail-closed sandboxed code execution", long_about = None)]
struct Cli {
    /// Config file (default: ~/.vigil/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a source file in a sandbox
    Run {
        /// Source file to execute
        file: PathBuf,

        /// Language (inferred from the extension when omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// Wall-clock limit in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Line fed to stdin (repeatable)
        #[arg(short, long = "input")]
        inputs: Vec<String>,

        /// Output the program is expected to print
        #[arg(short, long)]
        expect: Option<String>,

        /// Print the diagnostic as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the security screen without executing anything
    Screen {
        file: PathBuf,

        #[arg(short, long)]
        language: Option<String>,
    },

    /// Remove sandbox containers older than the age threshold
    Reclaim {
        /// Override the configured threshold
        #[arg(long)]
        max_age_secs: Option<u64>,
    },

    /// Resource usage of running sandboxes
    Stats,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    tracing::debug!(
        sandbox_dir = %config.sandbox.sandbox_dir.display(),
        memory = %config.sandbox.memory_limit,
        cpu = %config.sandbox.cpu_limit,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Run {
            file,
            language,
            timeout_ms,
            inputs,
            expect,
            json,
        } => {
            let code = read_source(&file)?;
            let language = resolve_language(&file, language.as_deref())?;

            let mut options = ExecutionOptions::new(language.as_str());
            options.timeout_ms = timeout_ms;
            options.inputs = inputs;
            options.expected_output = expect;

            let engine = ExecutionEngine::connect(config)?;
            let diagnostic = engine.execute(&code, &options).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&diagnostic)?);
            } else {
                render::diagnostic(&diagnostic);
            }

            if !diagnostic.success {
                std::process::exit(1);
            }
        }

        Commands::Screen { file, language } => {
            let code = read_source(&file)?;
            let language = resolve_language(&file, language.as_deref())?;

            let screen = vigil_core::SecurityScreen::new(config.max_code_bytes)?;
            let verdict = screen.screen(&code, language);
            render::verdict(&verdict);

            if !verdict.allowed {
                std::process::exit(1);
            }
        }

        Commands::Reclaim { max_age_secs } => {
            let mut config = config;
            if let Some(secs) = max_age_secs {
                config.sandbox.orphan_max_age_secs = secs;
            }

            let engine = ExecutionEngine::connect(config)?;
            let report = engine.reclaim_orphans().await;
            render::reclaim(&report);

            if !report.errors.is_empty() {
                std::process::exit(1);
            }
        }

        Commands::Stats => {
            let engine = ExecutionEngine::connect(config)?;
            let usage = engine
                .resource_snapshot()
                .await
                .context("Failed to query the container daemon")?;
            render::usage(&usage);
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn resolve_language(file: &Path, explicit: Option<&str>) -> anyhow::Result<Language> {
    if let Some(name) = explicit {
        return Ok(name.parse()?);
    }

    let ext = file.extension().and_then(|e| e.to_str()).unwrap_or_default();
    match Language::from_extension(ext) {
        Some(language) => Ok(language),
        None => bail!(
            "Cannot infer language from {}; pass --language",
            file.display()
        ),
    }
}
