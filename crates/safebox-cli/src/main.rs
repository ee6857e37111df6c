//! Safebox CLI
//!
//! A command-line tool for running untrusted code in locked-down containers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use safebox::{Config, EXAMPLE_CONFIG, IsolationPolicy, RunRequest, Runner};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "safebox")]
#[command(about = "A tool for running untrusted code in locked-down containers")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: safebox.toml)
        #[arg(short, long, default_value = "safebox.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a source file and print the JSON response
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// File whose contents are written to the program's stdin
        #[arg(short = 'i', long = "stdin", value_name = "FILE")]
        stdin: Option<PathBuf>,

        /// Wall-clock timeout in milliseconds (clamped to 1000..=60000)
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Show effective configuration and the fixed isolation policy
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // Logs go to stderr so stdout carries only the response
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            stdin,
            timeout_ms,
        } => run(config, &source, stdin.as_deref(), timeout_ms).await,
        Commands::ShowConfig => show_config(&config),
    }
}

async fn run(
    config: Config,
    source: &Path,
    stdin: Option<&Path>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let mut request = RunRequest::new(code);
    if let Some(path) = stdin {
        let input = tokio::fs::read_to_string(path)
            .await
            .context("failed to read stdin file")?;
        request = request.stdin(input);
    }
    if let Some(ms) = timeout_ms {
        request = request.timeout_ms(ms);
    }

    info!(image = %config.guest.image, "running program");
    let runner = Runner::new(config);
    let response = runner.execute(request).await.map_err(|e| {
        if e.is_client_error() {
            anyhow::Error::new(e).context("request rejected")
        } else {
            anyhow::Error::new(e).context("execution failed")
        }
    })?;

    let json = serde_json::to_string_pretty(&response).context("failed to encode response")?;
    println!("{json}");

    info!(
        exit_code = ?response.exit_code,
        timed_out = response.timed_out,
        "execution result"
    );

    if response.timed_out {
        std::process::exit(1);
    }
    match response.exit_code {
        Some(0) => Ok(()),
        Some(code) => std::process::exit(code),
        None => std::process::exit(1),
    }
}

fn show_config(config: &Config) -> Result<()> {
    let effective = serde_json::to_string_pretty(config).context("failed to encode config")?;
    println!("Effective configuration:\n{effective}");
    println!();

    let policy = serde_json::to_string_pretty(&IsolationPolicy::FIXED)
        .context("failed to encode isolation policy")?;
    println!("Isolation policy (fixed):\n{policy}");
    println!();
    println!("Result path: {}", config.guest.result_path());
    Ok(())
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
