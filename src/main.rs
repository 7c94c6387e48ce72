use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use mediagrid::{Config, MediaLibrary, ScanEvent, ThumbnailEvent};

/// Index a photo/video tree and optionally pre-render its thumbnails.
#[derive(Debug, Parser)]
#[command(name = "mediagrid", version)]
struct Args {
    /// Directory to scan.
    root: PathBuf,

    /// Thumbnail edge length in pixels.
    #[arg(long)]
    size: Option<u32>,

    /// Do not read or write the thumbnail cache.
    #[arg(long)]
    no_cache: bool,

    /// Remove all cached thumbnails before scanning.
    #[arg(long)]
    clear_cache: bool,

    /// Render thumbnails for every indexed file.
    #[arg(long)]
    thumbnails: bool,

    /// Settings file (defaults to the per-user config.json).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mediagrid=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = match args.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    if let Some(size) = args.size {
        config.thumbnails.size = size;
    }
    if args.no_cache {
        config.thumbnails.cache_enabled = false;
    }

    let library = MediaLibrary::new(config).context("Failed to start thumbnail generator")?;

    if args.clear_cache {
        let removed = library
            .clear_thumbnail_cache()
            .context("Failed to clear thumbnail cache")?;
        info!(removed, "Cleared thumbnail cache");
    }

    let Some(count) = run_scan(&library, &args.root).await? else {
        println!("Scan cancelled, {} items indexed", library.index().count());
        return Ok(());
    };

    let index = library.index();
    println!(
        "Indexed {} items in {} folders",
        count,
        index.folders().len()
    );

    let duplicates = index.find_duplicate_groups();
    for group in &duplicates {
        println!("Duplicate set ({} files):", group.len());
        for item in group {
            println!("  {}", item.path.display());
        }
    }

    if args.thumbnails {
        render_thumbnails(&library).await?;
    }

    Ok(())
}

/// Runs a scan to completion. Returns `None` if it was cancelled by Ctrl-C.
async fn run_scan(library: &MediaLibrary, root: &Path) -> Result<Option<usize>> {
    let events = library.scan_events();
    library
        .start_scan(root)
        .with_context(|| format!("Failed to start scan of {:?}", root))?;

    loop {
        tokio::select! {
            event = events.recv_async() => match event {
                Ok(ScanEvent::Started { root }) => info!(?root, "Scanning"),
                Ok(ScanEvent::Progress { current, total }) => {
                    if current % 500 == 0 || current == total {
                        info!(current, total, "Progress");
                    }
                }
                Ok(ScanEvent::FileError { path, message }) => warn!(?path, %message, "Skipped file"),
                Ok(ScanEvent::ItemFound(_)) => {}
                Ok(ScanEvent::Finished { count }) => return Ok(Some(count)),
                Ok(ScanEvent::Cancelled) => return Ok(None),
                Ok(ScanEvent::Failed { path, message }) => {
                    bail!("Scan of {:?} failed: {}", path, message)
                }
                Err(_) => bail!("Scanner stopped without finishing"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, cancelling scan");
                library.cancel_scan();
            }
        }
    }
}

async fn render_thumbnails(library: &MediaLibrary) -> Result<()> {
    let size = library.config().thumbnails.size;
    let events = library.thumbnail_events();
    let progress = library.thumbnail_progress();
    let paths: Vec<PathBuf> = library
        .index()
        .all_sorted()
        .iter()
        .map(|item| item.path.clone())
        .collect();

    let expected = library.request_thumbnails_batch(paths, size)?;
    info!(expected, size, "Rendering thumbnails");

    let (mut ready, mut failed) = (0usize, 0usize);
    while ready + failed < expected {
        tokio::select! {
            event = events.recv_async() => match event {
                Ok(ThumbnailEvent::Ready(_)) => ready += 1,
                Ok(ThumbnailEvent::Failed { .. }) => failed += 1,
                Err(_) => bail!("Thumbnail generator stopped"),
            },
            Ok(step) = progress.recv_async() => {
                debug!(completed = step.completed, remaining = step.remaining, "Thumbnail progress");
            }
            _ = tokio::signal::ctrl_c() => {
                let dropped = library.cancel_thumbnails();
                info!(dropped, "Interrupted, cancelled pending thumbnails");
                break;
            }
        }
    }

    println!("Thumbnails: {} ready, {} failed", ready, failed);
    Ok(())
}
