use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use video_summary_rust::chunking::{Chunker, TimeRangeMapper};
use video_summary_rust::document::strip_part_headers;
use video_summary_rust::transcript::{dedupe_rolling_captions, parse_subtitles, Transcript};
use video_summary_rust::{ArtifactCache, Config};

#[derive(Parser)]
#[command(name = "inspect-chunks")]
#[command(about = "Chunk boundary and summary cache utility")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print chunk boundaries and time ranges for a subtitle file
    Chunks {
        /// SRT/VTT subtitle file
        subtitle: PathBuf,
        /// Remove rolling-caption repetition first
        #[arg(long)]
        dedup_captions: bool,
        /// Print the chunk texts too
        #[arg(long)]
        show_text: bool,
    },
    /// Summary cache statistics
    Stats {
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Remove every cached summary
    Clear {
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Remove `## 第 N 部分` lines from a finished document in place
    StripHeaders {
        document: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("video_summary_rust=info,inspect_chunks=info,warn")
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chunks {
            subtitle,
            dedup_captions,
            show_text,
        } => {
            let config = Config::load(cli.config.as_deref())?;
            config.validate()?;

            let content = tokio::fs::read_to_string(&subtitle)
                .await
                .with_context(|| format!("cannot read {}", subtitle.display()))?;
            let mut transcript = parse_subtitles(&content)?;
            if dedup_captions || config.processing.dedupe_captions {
                transcript = Transcript::new(dedupe_rolling_captions(transcript.cues().to_vec()));
            }

            let (language, profile) = config.chunking.classifier().classify(transcript.text());
            let chunks = Chunker::new(profile)?.chunk(&transcript);
            let ranges = TimeRangeMapper::map_all(&chunks, transcript.cues());

            info!(
                "📊 {} cues, {:?}, {} chunks (size {}, overlap {}, unit {:?})",
                transcript.len(),
                language,
                chunks.len(),
                profile.chunk_size,
                profile.overlap,
                profile.unit
            );

            for (chunk, range) in chunks.iter().zip(&ranges) {
                info!(
                    "  {:02}: cues {}-{} ({} shared) {} ({:.0}s)",
                    chunk.index,
                    chunk.cue_range.first + 1,
                    chunk.cue_range.last + 1,
                    chunk.overlap_prefix_len,
                    range.label(),
                    range.duration().as_secs_f64()
                );
                if show_text {
                    println!("{}\n", chunk.text);
                }
            }
        }

        Commands::Stats { output_dir } => {
            let cache = ArtifactCache::for_output_dir(&output_dir);
            let stats = cache.stats().await?;

            info!("📊 Summary cache: {}", cache.cache_dir().display());
            info!("  Total files: {}", stats.total_files);
            info!("  Valid entries: {}", stats.valid_files);
            if stats.corrupt_files > 0 {
                warn!("  Corrupt entries: {}", stats.corrupt_files);
            }
            info!("  Size: {:.1} KB", stats.total_bytes as f64 / 1024.0);
        }

        Commands::Clear { output_dir } => {
            let cache = ArtifactCache::for_output_dir(&output_dir);
            let removed = cache.clear().await?;
            info!("🗑️  Removed {} cached summaries", removed);
        }

        Commands::StripHeaders { document } => {
            let content = tokio::fs::read_to_string(&document)
                .await
                .with_context(|| format!("cannot read {}", document.display()))?;
            let (stripped, removed) = strip_part_headers(&content);
            if removed > 0 {
                tokio::fs::write(&document, stripped).await?;
            }
            info!("✂️  Removed {} part headers from {}", removed, document.display());
        }
    }

    Ok(())
}
