//! uiproof CLI - Main Entry Point
//!
//! Runs declarative UI test definitions against a real browser and
//! writes verdicts plus evidence paths to `test-results.json`.
//!
//! Exit codes: 0 when every test passed (partial passes included),
//! 1 when any test failed or errored, 2 when the runner itself failed.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use uiproof_engine::{BrowserKind, EngineConfig, PlaywrightBrowser, TestDefinition, TestExecutor};

mod output;

/// uiproof - evidence-backed UI verification
#[derive(Parser)]
#[command(name = "uiproof")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    debug: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test definitions in a browser
    Run(RunArgs),

    /// Parse and validate definitions without launching a browser
    Validate {
        /// Definition file or directory of definitions
        path: PathBuf,
    },

    /// Write a configuration file with every default spelled out
    InitConfig {
        #[arg(default_value = "uiproof.toml")]
        path: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Definition file or directory of definitions
    path: PathBuf,

    /// Engine configuration (TOML); defaults apply when absent
    #[arg(short, long, default_value = "uiproof.toml")]
    config: PathBuf,

    /// Evidence directory (overrides the configuration)
    #[arg(long)]
    evidence_dir: Option<PathBuf>,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long)]
    browser: Option<String>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Output directory for test-results.json
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// Summary format printed to stdout
    #[arg(long, value_enum, default_value = "table")]
    format: output::OutputFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.log_format);

    let outcome = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Validate { path } => validate(&path),
        Commands::InitConfig { path } => init_config(&path),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}

fn init_logging(debug: bool, format: LogFormat) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_definitions(path: &Path) -> Result<Vec<TestDefinition>> {
    let definitions = if path.is_dir() {
        TestDefinition::load_all(path)
            .with_context(|| format!("loading definitions from {}", path.display()))?
    } else {
        vec![TestDefinition::from_file(path)
            .with_context(|| format!("loading definition {}", path.display()))?]
    };
    if definitions.is_empty() {
        bail!("no test definitions found in {}", path.display());
    }
    Ok(definitions)
}

async fn run(args: RunArgs) -> Result<bool> {
    let definitions = load_definitions(&args.path)?;

    let mut config = EngineConfig::load(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    if let Some(dir) = args.evidence_dir {
        config = config.with_evidence_dir(dir);
    }
    if let Some(browser) = &args.browser {
        config.browser.kind = browser.parse::<BrowserKind>()?;
    }
    if args.headed {
        config.browser.headless = false;
    }

    info!(
        "Running {} test(s) in {} (evidence: {})",
        definitions.len(),
        config.browser.kind.as_str(),
        config.evidence_dir.display()
    );

    let browser = PlaywrightBrowser::launch(&config.browser)
        .await
        .context("launching browser")?;
    let executor = TestExecutor::with_browser(Arc::new(browser), config)?;

    let summary = executor.run_all(&definitions).await;
    if let Err(e) = executor.shutdown().await {
        warn!("Browser shutdown failed: {}", e);
    }

    let results = output::write_results(&args.output, &summary)?;
    output::print_summary(&summary, args.format)?;
    info!("Results written to {}", results.display());

    Ok(summary.all_passed())
}

fn validate(path: &Path) -> Result<bool> {
    let definitions = load_definitions(path)?;
    for definition in &definitions {
        output::print_success(&format!(
            "{} ({} action(s), {} expectation(s))",
            definition.id,
            definition.actions.len(),
            definition.expectations.len()
        ));
    }
    Ok(true)
}

fn init_config(path: &Path) -> Result<bool> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    EngineConfig::default()
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    output::print_success(&format!("Wrote {}", path.display()));
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "uiproof", "--debug", "run", "tests/ui", "--browser", "firefox", "--headed", "-o", "out",
        ])
        .unwrap();
        assert!(cli.debug);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.path, PathBuf::from("tests/ui"));
                assert_eq!(args.browser.as_deref(), Some("firefox"));
                assert!(args.headed);
                assert_eq!(args.output, PathBuf::from("out"));
                assert_eq!(args.config, PathBuf::from("uiproof.toml"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_empty_directory_has_no_definitions() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(load_definitions(tmp.path()).is_err());
    }
}
