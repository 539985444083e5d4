use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use ffgraph::{OutputFormat, Quality};
use jobs::{JobManager, JobStatus, ManagerConfig, MemoryJobStore, RenderBackend, RenderRequest};
use timeline::TimelineDocument;

#[derive(Parser)]
#[command(name = "renderline-cli")]
#[command(about = "Renderline CLI - Headless timeline rendering")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a timeline document to a video file
    Render {
        /// Timeline document JSON
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Render backend (codec, composition)
        #[arg(long, default_value = "codec")]
        backend: String,

        /// Output format (mp4, webm, mov)
        #[arg(long, default_value = "mp4")]
        format: String,

        /// Quality tier (low, medium, high, ultra)
        #[arg(long, default_value = "medium")]
        quality: String,

        /// Root directory for locally uploaded assets
        #[arg(long)]
        upload_root: Option<PathBuf>,
    },

    /// Print the transition render groups of a timeline document
    Groups {
        /// Timeline document JSON
        input: PathBuf,

        /// Write the groups to a JSON file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Render {
            input,
            output,
            backend,
            format,
            quality,
            upload_root,
        } => render_command(input, output, backend, format, quality, upload_root).await,
        Commands::Groups { input, output } => groups_command(input, output).await,
    }
}

async fn render_command(
    input: PathBuf,
    output: PathBuf,
    backend: String,
    format: String,
    quality: String,
    upload_root: Option<PathBuf>,
) -> Result<()> {
    let doc = load_document(&input)?;
    info!(
        "Rendering {:?} ({}x{} @ {}fps, {}ms)",
        input, doc.size.width, doc.size.height, doc.fps, doc.duration
    );

    let backend = parse_backend(&backend)?;
    let format = parse_format(&format)?;
    let quality = parse_quality(&quality)?;

    let mut config = ManagerConfig::default();
    if let Some(root) = upload_root {
        config.asset_config.upload_root = root;
    }
    let manager = JobManager::new(Arc::new(MemoryJobStore::new()), config);

    let id = manager.submit(RenderRequest {
        doc,
        backend,
        format,
        quality,
    })?;
    info!("Submitted render job: {}", id);

    let mut last_progress = 0u8;
    let job = loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let job = manager
            .job(&id)
            .ok_or_else(|| anyhow!("job {} disappeared", id))?;
        if job.progress > last_progress {
            last_progress = job.progress;
            info!("Progress: {}%", job.progress);
        }
        if job.status.is_terminal() {
            break job;
        }
    };

    match job.status {
        JobStatus::Completed => {
            let rendered = PathBuf::from(
                job.output_url
                    .ok_or_else(|| anyhow!("completed job has no output"))?,
            );
            if rendered != output {
                if let Some(parent) = output.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&rendered, &output)
                    .with_context(|| format!("copy render output to {:?}", output))?;
            }
            info!("Render completed: {:?}", output);
            Ok(())
        }
        _ => Err(anyhow!(
            "render failed: {}",
            job.error.unwrap_or_else(|| "unknown error".into())
        )),
    }
}

async fn groups_command(input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let doc = load_document(&input)?;
    let groups = timeline::group_track_items(&doc);
    info!("{} render groups in {:?}", groups.len(), input);

    let json = serde_json::to_string_pretty(&groups)?;
    if let Some(path) = output {
        std::fs::write(&path, json)?;
        info!("Groups written to: {:?}", path);
    } else {
        println!("{}", json);
    }
    Ok(())
}

fn load_document(path: &PathBuf) -> Result<TimelineDocument> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read timeline document {:?}", path))?;
    let doc: TimelineDocument =
        serde_json::from_str(&raw).with_context(|| format!("parse timeline document {:?}", path))?;
    doc.validate()?;
    Ok(doc)
}

fn parse_backend(value: &str) -> Result<RenderBackend> {
    match value {
        "codec" => Ok(RenderBackend::Codec),
        "composition" => Ok(RenderBackend::Composition),
        _ => {
            warn!("Unknown backend '{}', expected codec or composition", value);
            Err(anyhow!("unknown backend: {}", value))
        }
    }
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    match value {
        "mp4" => Ok(OutputFormat::Mp4),
        "webm" => Ok(OutputFormat::Webm),
        "mov" => Ok(OutputFormat::Mov),
        _ => Err(anyhow!("unknown format: {}", value)),
    }
}

fn parse_quality(value: &str) -> Result<Quality> {
    match value {
        "low" => Ok(Quality::Low),
        "medium" => Ok(Quality::Medium),
        "high" => Ok(Quality::High),
        "ultra" => Ok(Quality::Ultra),
        _ => Err(anyhow!("unknown quality: {}", value)),
    }
}
