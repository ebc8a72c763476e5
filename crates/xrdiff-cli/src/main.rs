//! xrdiff - preview composite resource changes as a GNU-style diff
//!
//! Reads candidate composite resources from files or stdin, renders them
//! through their matching composition pipelines via an external render
//! engine, and prints the diff against current cluster state. The cluster
//! is never mutated; only reads and server-side dry-run applies are issued.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use xrdiff_kube::ApiClusterClient;
use xrdiff_processor::{DiffOptions, DiffProcessor};

mod error;
mod exit_codes;
mod input;
mod render;

use error::CliError;
use render::ExecRenderer;

#[derive(Parser)]
#[command(name = "xrdiff")]
#[command(version)]
#[command(about = "Preview composite resource changes as a GNU-style diff", long_about = None)]
struct Cli {
    /// Composite resource files to preview; '-' or no files reads stdin
    files: Vec<PathBuf>,

    /// Default namespace for namespaced lookups of the input XRs
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Disable ANSI color in diff output
    #[arg(long)]
    no_color: bool,

    /// Compact diff output: changed lines plus a few lines of context
    #[arg(long)]
    compact: bool,

    /// Overall deadline for the whole operation (e.g. "30s", "2m")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Render engine command; receives render inputs on stdin as YAML
    #[arg(long, default_value = "xrdiff-render")]
    renderer: String,

    /// Enable debug output
    #[arg(long)]
    debug: bool,
}

fn main() -> miette::Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::internal(format!("cannot start runtime: {e}")))?;

    if let Err(e) = runtime.block_on(run(&cli)) {
        let code = e.exit_code();
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(code);
    }

    Ok(())
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "xrdiff=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: &Cli) -> Result<(), CliError> {
    let resources = input::load(&cli.files)?;
    if resources.is_empty() {
        return Ok(());
    }

    let client = kube::Client::try_default()
        .await
        .map_err(|e| CliError::cluster(format!("cannot connect to cluster: {e}")))?;
    let cluster = Arc::new(ApiClusterClient::new(client));
    let renderer = Arc::new(ExecRenderer::new(cli.renderer.clone()));

    let options = DiffOptions {
        use_colors: !cli.no_color,
        compact: cli.compact,
        ..DiffOptions::default()
    };
    let processor = DiffProcessor::new(cluster, renderer, cli.namespace.clone(), options);

    let work = async {
        processor
            .initialize()
            .await
            .map_err(|e| CliError::cluster(e.to_string()))?;

        let mut stdout = std::io::stdout();
        processor
            .process_all(&mut stdout, &resources)
            .await
            .map_err(|e| CliError::diff(e.to_string()))
    };

    match cli.timeout {
        Some(deadline) => tokio::time::timeout(deadline, work)
            .await
            .map_err(|_| CliError::Timeout(humantime::format_duration(deadline).to_string()))?,
        None => work.await,
    }
}
