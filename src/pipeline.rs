//! End-to-end run: source resolution, chunking, production, assembly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::cache::ArtifactCache;
use crate::chunking::{Chunk, Chunker, TimeRange, TimeRangeMapper};
use crate::config::Config;
use crate::document::{AssemblyOptions, ChunkManifest, DocumentAssembler};
use crate::error::{PipelineError, Result};
use crate::llm::summary::{build_summary_producer, PromptTemplate, SummaryProducer};
use crate::orchestrator::{ChunkOrchestrator, ChunkWork, SummaryLog};
use crate::source::{sanitize_title, sibling_subtitle, VideoDownloader};
use crate::transcript::{
    dedupe_rolling_captions, parse_subtitles, ChunkProfile, Language, Transcript,
};
use crate::video::{FfmpegFrameProducer, FrameProducer, VideoProcessor};

/// Subtitle extensions picked up by batch mode
pub const BATCH_EXTENSIONS: [&str; 3] = ["srt", "vtt", "txt"];

/// Fixed output file names for one title
#[derive(Debug, Clone)]
pub struct OutputLayout {
    dir: PathBuf,
    title: String,
}

impl OutputLayout {
    pub fn new(dir: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            title: title.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.dir.join(format!("{}_transcript.txt", self.title))
    }

    pub fn summary_log_path(&self) -> PathBuf {
        self.dir.join(format!("{}_summary_temp.md", self.title))
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.dir.join(format!("{}_frames", self.title))
    }

    pub fn document_path(&self) -> PathBuf {
        self.dir.join(format!("{}_最终总结.md", self.title))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(format!("{}_chunks.json", self.title))
    }
}

/// What the user pointed the run at
#[derive(Debug, Clone)]
pub enum SourceInput {
    /// Remote video page handled by yt-dlp
    Url(String),
    /// Local files; at least one must be given
    Local {
        video: Option<PathBuf>,
        subtitle: Option<PathBuf>,
    },
}

/// Concrete files for one run
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub title: String,
    pub subtitle: PathBuf,
    pub video: Option<PathBuf>,
    /// Shown in the document header
    pub source_name: String,
}

impl ResolvedSource {
    /// Subtitle-only source titled after the file stem
    pub fn text(subtitle: PathBuf, title: Option<String>) -> Self {
        let title = title.unwrap_or_else(|| stem_title(&subtitle));
        let source_name = file_name(&subtitle);
        Self {
            title,
            subtitle,
            video: None,
            source_name,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn stem_title(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    sanitize_title(&stem)
}

/// Deterministic part of a run: transcript and chunk boundaries
#[derive(Debug, Clone)]
pub struct PreparedTranscript {
    pub transcript: Transcript,
    pub language: Language,
    pub profile: ChunkProfile,
    pub chunks: Vec<Chunk>,
    pub ranges: Vec<TimeRange>,
}

impl PreparedTranscript {
    pub fn work(&self) -> Vec<ChunkWork> {
        self.chunks
            .iter()
            .zip(&self.ranges)
            .map(|(chunk, range)| ChunkWork {
                chunk: chunk.clone(),
                time_range: *range,
                fresh_text: chunk.fresh_text(&self.transcript),
            })
            .collect()
    }
}

/// Result of one completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub title: String,
    pub document_path: PathBuf,
    pub language: Language,
    pub chunk_count: usize,
    pub failed_chunks: Vec<usize>,
    pub processing_time: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcessingStatus {
    Completed,
    Failed,
}

/// Outcome of one batch file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub subtitle: PathBuf,
    pub status: ProcessingStatus,
    pub document_path: Option<PathBuf>,
    pub failed_chunks: Vec<usize>,
    pub error_message: Option<String>,
}

/// Overall batch results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_time: Duration,
    pub results: Vec<BatchItem>,
}

pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    /// Validates `config` up front
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self, title: &str) -> OutputLayout {
        OutputLayout::new(&self.config.output.base_dir, title)
    }

    /// Resolve, produce and assemble one source
    pub async fn run(&self, input: &SourceInput) -> Result<RunOutcome> {
        // Key problems surface before any download or model call
        let summary = self.summary_producer().await?;
        if summary.is_external() && !summary.is_available().await {
            warn!(
                "🔌 {:?} model {} did not answer the availability check; summaries may fail",
                self.config.llm.provider, self.config.llm.model
            );
        }
        let source = self.resolve_source(input).await?;
        let layout = self.layout(&source.title);
        let frames = self.frame_producer(&source, &layout).await;
        self.execute(&source, summary, frames).await
    }

    /// Summary producer for this configuration
    pub async fn summary_producer(&self) -> Result<Arc<dyn SummaryProducer>> {
        let template = PromptTemplate::load(self.config.processing.prompt_file.as_deref()).await;
        let cache = if self.config.output.cache_summaries && !self.config.processing.test_mode {
            let cache = ArtifactCache::for_output_dir(&self.config.output.base_dir);
            cache.initialize().await?;
            Some(cache)
        } else {
            None
        };
        build_summary_producer(
            &self.config.llm,
            self.config.processing.test_mode,
            template,
            cache,
        )
    }

    /// Turn the input into a subtitle file, an optional video and a title
    pub async fn resolve_source(&self, input: &SourceInput) -> Result<ResolvedSource> {
        let processing = &self.config.processing;
        let title_override = self
            .config
            .output
            .title
            .as_deref()
            .map(sanitize_title)
            .filter(|title| !title.is_empty());

        let source = match input {
            SourceInput::Url(url) => {
                let parsed = url::Url::parse(url)
                    .map_err(|e| PipelineError::Config(format!("invalid URL {}: {}", url, e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(PipelineError::Config(format!(
                        "unsupported URL scheme {}",
                        parsed.scheme()
                    )));
                }
                let downloader = VideoDownloader::new(
                    self.config.output.base_dir.clone(),
                    processing.cookies_path.clone(),
                );
                let download = downloader
                    .download(url, processing.text_only)
                    .await
                    .map_err(|e| PipelineError::fatal("source", format!("{:#}", e)))?;
                let subtitle = download.subtitle.ok_or_else(|| {
                    PipelineError::Config(format!("no subtitles available for {}", url))
                })?;
                let source_name = download
                    .video
                    .as_deref()
                    .map(file_name)
                    .unwrap_or_else(|| url.clone());
                ResolvedSource {
                    title: title_override.unwrap_or(download.title),
                    subtitle,
                    video: download.video,
                    source_name,
                }
            }
            SourceInput::Local { video, subtitle } => {
                let subtitle = match (subtitle, video) {
                    (Some(subtitle), _) => subtitle.clone(),
                    (None, Some(video)) => sibling_subtitle(video).ok_or_else(|| {
                        PipelineError::Config(format!(
                            "no subtitle given and none found next to {}",
                            video.display()
                        ))
                    })?,
                    (None, None) => {
                        return Err(PipelineError::Config(
                            "neither a video nor a subtitle source was given".to_string(),
                        ))
                    }
                };
                if !subtitle.is_file() {
                    return Err(PipelineError::Config(format!(
                        "subtitle file {} does not exist",
                        subtitle.display()
                    )));
                }

                let video = if processing.text_only {
                    None
                } else {
                    video.clone()
                };
                if let Some(video) = &video {
                    if !video.is_file() {
                        return Err(PipelineError::Config(format!(
                            "video file {} does not exist",
                            video.display()
                        )));
                    }
                }

                let title = title_override.unwrap_or_else(|| stem_title(&subtitle));
                let source_name = video
                    .as_deref()
                    .map(file_name)
                    .unwrap_or_else(|| file_name(&subtitle));
                ResolvedSource {
                    title,
                    subtitle,
                    video,
                    source_name,
                }
            }
        };

        info!("🎬 Title: {}", source.title);
        debug!("Subtitle: {}", source.subtitle.display());
        Ok(source)
    }

    /// Frame producer for the resolved video, `None` in text-only runs
    pub async fn frame_producer(
        &self,
        source: &ResolvedSource,
        layout: &OutputLayout,
    ) -> Option<Arc<dyn FrameProducer>> {
        if self.config.processing.text_only {
            info!("📝 Text-only mode: no frames will be extracted");
            return None;
        }
        let Some(video) = source.video.clone() else {
            warn!("No video available, continuing without frames");
            return None;
        };

        match VideoProcessor::new().get_video_info(&video).await {
            Ok(video_info) => info!(
                "📹 {} ({}x{}, {:.1}s)",
                video_info.filename,
                video_info.width,
                video_info.height,
                video_info.duration.as_secs_f64()
            ),
            Err(e) => warn!("Could not probe {}: {:#}", video.display(), e),
        }

        Some(Arc::new(FfmpegFrameProducer::new(
            video,
            layout.frames_dir(),
            self.config.processing.frame_settings(),
        )))
    }

    /// Parse, clean, classify and chunk a subtitle file
    pub async fn prepare(&self, subtitle: &Path) -> Result<PreparedTranscript> {
        let raw = tokio::fs::read(subtitle).await?;
        let content = String::from_utf8_lossy(&raw);
        let parsed = parse_subtitles(&content)?;

        let transcript = if self.config.processing.dedupe_captions {
            let before = parsed.len();
            let cues = dedupe_rolling_captions(parsed.cues().to_vec());
            if cues.is_empty() {
                return Err(PipelineError::Parse(
                    "no cues left after caption cleanup".to_string(),
                ));
            }
            info!("🧹 Caption cleanup: {} -> {} cues", before, cues.len());
            Transcript::new(cues)
        } else {
            parsed
        };

        let (language, profile) = self.config.chunking.classifier().classify(transcript.text());
        let chunker = Chunker::new(profile)?;
        let chunks = chunker.chunk(&transcript);
        let ranges = TimeRangeMapper::map_all(&chunks, transcript.cues());

        info!(
            "✂️  {} cues, language {:?}, {} chunks (size {}, overlap {})",
            transcript.len(),
            language,
            chunks.len(),
            profile.chunk_size,
            profile.overlap
        );

        Ok(PreparedTranscript {
            transcript,
            language,
            profile,
            chunks,
            ranges,
        })
    }

    /// Run a resolved source with the given producers
    pub async fn execute(
        &self,
        source: &ResolvedSource,
        summary: Arc<dyn SummaryProducer>,
        frames: Option<Arc<dyn FrameProducer>>,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        let layout = self.layout(&source.title);
        tokio::fs::create_dir_all(layout.dir()).await?;

        let prepared = self.prepare(&source.subtitle).await?;

        tokio::fs::write(layout.transcript_path(), prepared.transcript.text()).await?;
        debug!("Transcript written to {}", layout.transcript_path().display());

        if self.config.output.write_manifest {
            ChunkManifest::new(
                &source.title,
                prepared.language,
                prepared.profile,
                prepared.transcript.len(),
                &prepared.chunks,
                &prepared.ranges,
            )
            .write(&layout.manifest_path())
            .await?;
        }

        if frames.is_some() {
            tokio::fs::create_dir_all(layout.frames_dir()).await?;
        }

        let chunk_count = prepared.chunks.len();
        let log = SummaryLog::create(&layout.summary_log_path(), &source.title, chunk_count).await?;
        let orchestrator = ChunkOrchestrator::new(
            summary,
            frames,
            self.config.performance.max_workers,
            self.config.retry.clone(),
        );
        let mut report = orchestrator.run(prepared.work(), Some(log)).await?;

        let options = AssemblyOptions {
            include_transcript: self.config.output.include_transcript,
            strip_part_headers: self.config.output.strip_part_headers,
        };
        let document_path = layout.document_path();
        let document = DocumentAssembler::new(
            &source.title,
            &source.source_name,
            &document_path,
            options,
        )
        .assemble(&report.results, &mut report.tracker)?;
        tokio::fs::write(&document_path, document).await?;

        let failed_chunks = report.failed_chunks();
        if failed_chunks.is_empty() {
            info!("✅ Document written to {}", document_path.display());
        } else {
            warn!(
                "⚠️  Document written to {} with failed chunks {:?}",
                document_path.display(),
                failed_chunks
            );
        }

        Ok(RunOutcome {
            title: source.title.clone(),
            document_path,
            language: prepared.language,
            chunk_count,
            failed_chunks,
            processing_time: started.elapsed(),
        })
    }

    /// Summarize every subtitle file under `input_dir` without frames
    pub async fn run_batch(&self, input_dir: &Path) -> Result<BatchResult> {
        let started = Instant::now();
        if !input_dir.is_dir() {
            return Err(PipelineError::Config(format!(
                "input directory {} does not exist",
                input_dir.display()
            )));
        }

        let files = discover_subtitles(input_dir);
        info!("📁 Found {} subtitle files in {}", files.len(), input_dir.display());
        if files.is_empty() {
            warn!("No subtitle files found in {}", input_dir.display());
        }

        let summary = self.summary_producer().await?;
        tokio::fs::create_dir_all(&self.config.output.base_dir).await?;

        let total = files.len();
        let mut results = Vec::with_capacity(total);
        for (position, subtitle) in files.into_iter().enumerate() {
            info!("[{}/{}] {}", position + 1, total, subtitle.display());
            let source = ResolvedSource::text(subtitle.clone(), None);

            let item = match self.execute(&source, Arc::clone(&summary), None).await {
                Ok(outcome) => BatchItem {
                    subtitle,
                    status: ProcessingStatus::Completed,
                    document_path: Some(outcome.document_path),
                    failed_chunks: outcome.failed_chunks,
                    error_message: None,
                },
                Err(e) => {
                    error!("❌ Failed: {} - {}", subtitle.display(), e);
                    BatchItem {
                        subtitle,
                        status: ProcessingStatus::Failed,
                        document_path: None,
                        failed_chunks: Vec::new(),
                        error_message: Some(e.to_string()),
                    }
                }
            };
            results.push(item);
        }

        let successful = results
            .iter()
            .filter(|item| matches!(item.status, ProcessingStatus::Completed))
            .count();
        let batch = BatchResult {
            total,
            successful,
            failed: total - successful,
            total_time: started.elapsed(),
            results,
        };

        let results_path = self.config.output.base_dir.join("batch_results.json");
        tokio::fs::write(&results_path, serde_json::to_string_pretty(&batch)?).await?;
        info!("💾 Results saved to: {}", results_path.display());

        Ok(batch)
    }
}

/// Subtitle files under `dir`, sorted
pub fn discover_subtitles(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| BATCH_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}
