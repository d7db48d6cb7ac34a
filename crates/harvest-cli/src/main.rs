mod profile;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use harvest_client::{HttpRenderer, SelectorExtractor};
use harvest_core::collect::FailurePolicy;
use harvest_core::output::OutputConfig;
use harvest_core::pipeline::{Pipeline, PipelineConfig, RunMode, RunSummary};
use harvest_core::traits::PageRenderer;

use crate::profile::SiteProfile;

#[derive(Parser)]
#[command(
    name = "harvest",
    version,
    about = "Resumable two-phase catalog harvester"
)]
struct Cli {
    /// Phases to run: discover, collect or full
    #[arg(short, long, env = "HARVEST_MODE", default_value = "full")]
    mode: RunMode,

    /// Show the browser window instead of running headless
    #[arg(long, env = "HARVEST_HEADED", default_value_t = false)]
    headed: bool,

    /// Ignore existing checkpoints and start every phase over
    #[arg(long, default_value_t = false)]
    no_resume: bool,

    /// Page renderer (defaults to browser when built with the `browser` feature)
    #[arg(long, env = "HARVEST_RENDERER", value_enum)]
    renderer: Option<RendererKind>,

    /// Site profile JSON (defaults to the built-in profile)
    #[arg(short, long, env = "HARVEST_PROFILE")]
    profile: Option<PathBuf>,

    /// Directory for checkpoint files
    #[arg(long, env = "HARVEST_CHECKPOINT_DIR", default_value = "checkpoints")]
    checkpoint_dir: PathBuf,

    /// Directory for the final CSV / JSON outputs
    #[arg(short, long, env = "HARVEST_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Navigation timeout in seconds
    #[arg(long, env = "HARVEST_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Override the profile's entity failure policy
    #[arg(long, env = "HARVEST_ON_FAILURE", value_enum)]
    on_failure: Option<OnFailure>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RendererKind {
    Browser,
    Http,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OnFailure {
    Abort,
    Skip,
}

impl From<OnFailure> for FailurePolicy {
    fn from(value: OnFailure) -> Self {
        match value {
            OnFailure::Abort => FailurePolicy::Abort,
            OnFailure::Skip => FailurePolicy::Skip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harvest=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let profile = SiteProfile::load(cli.profile.as_deref())?;
    tracing::info!(profile = %profile.name, "Loaded site profile");

    let extractor =
        SelectorExtractor::new(&profile.extraction).context("Invalid extraction settings in profile")?;

    let mut collection = profile.collection;
    if let Some(policy) = cli.on_failure {
        collection.on_failure = policy.into();
    }
    let config = PipelineConfig {
        discovery: profile.discovery,
        collection,
        output: OutputConfig::new(&cli.output_dir).with_columns(profile.columns),
        checkpoint_dir: cli.checkpoint_dir.clone(),
        resume: !cli.no_resume,
    };
    let pipeline = Pipeline::new(extractor, config).context("Invalid site profile")?;

    let timeout = Duration::from_secs(cli.timeout);
    let kind = cli.renderer.unwrap_or(default_renderer());
    tracing::info!(renderer = ?kind, headed = cli.headed, "Selected renderer");
    if headed_is_ignored(&cli, kind) {
        tracing::warn!("--headed has no effect with the http renderer");
    }
    let summary = match kind {
        RendererKind::Http => {
            let renderer = HttpRenderer::with_timeout(timeout)?;
            run(&pipeline, cli.mode, &renderer).await?
        }
        RendererKind::Browser => run_browser(&pipeline, &cli, timeout).await?,
    };

    print_summary(cli.mode, &summary, &cli);
    Ok(())
}

fn default_renderer() -> RendererKind {
    if cfg!(feature = "browser") {
        RendererKind::Browser
    } else {
        RendererKind::Http
    }
}

fn headed_is_ignored(cli: &Cli, kind: RendererKind) -> bool {
    cli.headed && matches!(kind, RendererKind::Http)
}

async fn run<R: PageRenderer>(
    pipeline: &Pipeline<SelectorExtractor>,
    mode: RunMode,
    renderer: &R,
) -> Result<RunSummary> {
    pipeline
        .run(mode, renderer)
        .await
        .with_context(|| format!("{mode} run failed"))
}

#[cfg(feature = "browser")]
async fn run_browser(
    pipeline: &Pipeline<SelectorExtractor>,
    cli: &Cli,
    timeout: Duration,
) -> Result<RunSummary> {
    let mut renderer = harvest_client::ChromiumRenderer::new().with_timeout(timeout);
    if cli.headed {
        renderer = renderer.headed();
    }
    run(pipeline, cli.mode, &renderer).await
}

#[cfg(not(feature = "browser"))]
async fn run_browser(
    _pipeline: &Pipeline<SelectorExtractor>,
    _cli: &Cli,
    _timeout: Duration,
) -> Result<RunSummary> {
    anyhow::bail!(
        "harvest was built without the `browser` feature; rebuild with --features browser or pass --renderer http"
    )
}

fn print_summary(mode: RunMode, summary: &RunSummary, cli: &Cli) {
    println!("Mode:      {mode}");
    println!("Entities:  {}", summary.entities);
    if mode.collects() {
        println!(
            "Records:   {} ({} entities collected this run)",
            summary.records, summary.collected
        );
    }
    if !summary.failed.is_empty() {
        println!(
            "Skipped:   {} (retried on the next run: {})",
            summary.failed.len(),
            summary.failed.join(", ")
        );
    }
    println!("Output:    {}", cli.output_dir.display());
}
