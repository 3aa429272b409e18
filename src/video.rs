use anyhow::{anyhow, Context};
use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chunking::TimeRange;
use crate::error::{PipelineError, Result};
use crate::transcript::SubtitleFormatter;

const PRODUCER: &str = "frames";
const SIGNATURE_WIDTH: u32 = 128;
const SIGNATURE_HEIGHT: u32 = 72;

/// Video information extracted from file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub filename: String,
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub format: String,
}

/// Thin wrapper over the ffprobe command line tool
#[derive(Clone, Default)]
pub struct VideoProcessor;

impl VideoProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Extract video information using ffprobe
    pub async fn get_video_info(&self, video_path: &Path) -> anyhow::Result<VideoInfo> {
        let output = tokio::process::Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(video_path)
            .output()
            .await
            .context("failed to run ffprobe")?;

        if !output.status.success() {
            return Err(anyhow!("ffprobe failed for {}", video_path.display()));
        }

        let ffprobe_data: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        let format = &ffprobe_data["format"];
        let video_stream = ffprobe_data["streams"]
            .as_array()
            .and_then(|streams| streams.iter().find(|s| s["codec_type"] == "video"))
            .ok_or_else(|| anyhow!("No video stream found"))?;

        let duration_seconds: f64 = format["duration"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        let video_info = VideoInfo {
            path: video_path.to_path_buf(),
            filename: video_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            duration: Duration::from_secs_f64(duration_seconds.max(0.0)),
            width: video_stream["width"].as_u64().unwrap_or(0) as u32,
            height: video_stream["height"].as_u64().unwrap_or(0) as u32,
            fps: video_stream["r_frame_rate"]
                .as_str()
                .and_then(parse_frame_rate)
                .unwrap_or(0.0),
            format: format["format_name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
        };

        info!(
            "📹 Analyzed video: {} ({}x{}, {:.1}fps, {:.1}s)",
            video_info.filename,
            video_info.width,
            video_info.height,
            video_info.fps,
            video_info.duration.as_secs_f64()
        );

        Ok(video_info)
    }
}

fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => rate.parse().ok(),
    }
}

/// Downscaled grayscale thumbnail used to compare frames
#[derive(Debug, Clone, PartialEq)]
pub struct PerceptualSignature {
    pixels: Vec<u8>,
}

impl PerceptualSignature {
    pub fn from_image(image: &DynamicImage) -> Self {
        let pixels = image
            .grayscale()
            .resize_exact(SIGNATURE_WIDTH, SIGNATURE_HEIGHT, FilterType::Triangle)
            .to_luma8()
            .into_raw();
        Self { pixels }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let image = image::open(path).map_err(|e| {
            PipelineError::fatal(PRODUCER, format!("cannot decode {}: {}", path.display(), e))
        })?;
        Ok(Self::from_image(&image))
    }

    /// `1 - MSE / 255²`; 1.0 means identical
    pub fn similarity(&self, other: &Self) -> f64 {
        if self.pixels.len() != other.pixels.len() || self.pixels.is_empty() {
            return 0.0;
        }

        let squared_error: f64 = self
            .pixels
            .iter()
            .zip(&other.pixels)
            .map(|(a, b)| {
                let diff = *a as f64 - *b as f64;
                diff * diff
            })
            .sum();
        let mse = squared_error / self.pixels.len() as f64;
        1.0 - mse / (255.0 * 255.0)
    }
}

/// Collapses candidates that look like the last kept frame
#[derive(Debug)]
pub struct FrameDeduplicator {
    threshold: f64,
    enabled: bool,
    last_kept: Option<PerceptualSignature>,
    skipped: usize,
}

impl FrameDeduplicator {
    pub fn new(threshold: f64, enabled: bool) -> Self {
        Self {
            threshold,
            enabled,
            last_kept: None,
            skipped: 0,
        }
    }

    /// Returns whether the candidate is kept
    pub fn admit(&mut self, signature: &PerceptualSignature) -> bool {
        if self.enabled {
            if let Some(last) = &self.last_kept {
                if signature.similarity(last) >= self.threshold {
                    self.skipped += 1;
                    return false;
                }
            }
        }
        self.last_kept = Some(signature.clone());
        true
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// A kept frame image
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRef {
    pub path: PathBuf,
    pub offset_in_range: Duration,
    pub signature: PerceptualSignature,
}

/// Frame sampling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSettings {
    pub interval: Duration,
    pub similarity_threshold: f64,
    pub skip_similar: bool,
    /// ffmpeg `-q:v` value, 2 is near lossless
    pub jpeg_quality: u8,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            similarity_threshold: 0.95,
            skip_similar: true,
            jpeg_quality: 2,
        }
    }
}

/// Offsets `0, interval, 2*interval, ...` strictly below `duration`, never empty
pub fn sampling_ticks(duration: Duration, interval: Duration) -> Vec<Duration> {
    let mut ticks = Vec::new();
    if !interval.is_zero() {
        let mut offset = Duration::ZERO;
        while offset < duration {
            ticks.push(offset);
            offset += interval;
        }
    }
    if ticks.is_empty() {
        ticks.push(Duration::ZERO);
    }
    ticks
}

/// `chunk_<NN>_<MMmSSs>-<MMmSSs>`
pub fn chunk_dir_name(index: usize, range: &TimeRange) -> String {
    format!("chunk_{:02}_{}", index, range.label())
}

/// `frame_<NNN>_<HHMMSS>.jpg` with the absolute video timestamp
pub fn frame_file_name(kept_index: usize, timestamp: Duration) -> String {
    format!(
        "frame_{:03}_{}.jpg",
        kept_index,
        SubtitleFormatter::format_compact(timestamp)
    )
}

/// Absolute timestamp encoded in a frame file name
fn timestamp_from_file_name(name: &str) -> Option<Duration> {
    let stem = name.strip_suffix(".jpg")?;
    let compact = stem.rsplit('_').next()?;
    if compact.len() != 6 || !compact.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: u64 = compact[0..2].parse().ok()?;
    let minutes: u64 = compact[2..4].parse().ok()?;
    let seconds: u64 = compact[4..6].parse().ok()?;
    Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

/// One frame extraction request
#[derive(Debug, Clone, Copy)]
pub struct FrameRequest {
    pub chunk_index: usize,
    pub time_range: TimeRange,
}

/// Produces the deduplicated frames of one chunk
#[async_trait]
pub trait FrameProducer: Send + Sync {
    async fn produce(&self, request: FrameRequest) -> Result<Vec<FrameRef>>;
}

/// Samples a local video file with ffmpeg
pub struct FfmpegFrameProducer {
    video_path: PathBuf,
    frames_root: PathBuf,
    settings: FrameSettings,
}

impl FfmpegFrameProducer {
    pub fn new(video_path: PathBuf, frames_root: PathBuf, settings: FrameSettings) -> Self {
        Self {
            video_path,
            frames_root,
            settings,
        }
    }

    pub fn chunk_dir(&self, request: &FrameRequest) -> PathBuf {
        self.frames_root
            .join(chunk_dir_name(request.chunk_index, &request.time_range))
    }

    /// Reuse a previously completed chunk directory
    async fn load_existing(&self, dir: PathBuf, range: TimeRange) -> Result<Vec<FrameRef>> {
        let frames = tokio::task::spawn_blocking(move || -> Result<Vec<FrameRef>> {
            let mut names: Vec<String> = std::fs::read_dir(&dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().to_string())
                .filter(|name| name.starts_with("frame_") && name.ends_with(".jpg"))
                .collect();
            names.sort();

            names
                .into_iter()
                .map(|name| {
                    let path = dir.join(&name);
                    Ok(FrameRef {
                        signature: PerceptualSignature::from_path(&path)?,
                        offset_in_range: offset_from_file_name(&name, &range),
                        path,
                    })
                })
                .collect()
        })
        .await
        .map_err(|e| PipelineError::fatal(PRODUCER, e.to_string()))??;

        Ok(frames)
    }

    async fn run_ffmpeg(&self, range: &TimeRange, tick_count: usize, out_dir: &Path) -> Result<()> {
        let interval = self.settings.interval.as_secs_f64();
        let pattern = out_dir.join("candidate_%05d.jpg");

        let output = tokio::process::Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-ss", &format!("{:.3}", range.start.as_secs_f64())])
            .arg("-i")
            .arg(&self.video_path)
            .args(["-t", &format!("{:.3}", range.duration().as_secs_f64())])
            .args(["-vf", &format!("fps=1/{}", interval)])
            .args(["-frames:v", &tick_count.to_string()])
            .args(["-q:v", &self.settings.jpeg_quality.to_string()])
            .arg(&pattern)
            .output()
            .await
            .map_err(|e| PipelineError::fatal(PRODUCER, format!("failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::fatal(
                PRODUCER,
                format!("ffmpeg exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FrameProducer for FfmpegFrameProducer {
    async fn produce(&self, request: FrameRequest) -> Result<Vec<FrameRef>> {
        let range = request.time_range;
        let final_dir = self.chunk_dir(&request);

        if final_dir.is_dir() {
            let frames = self.load_existing(final_dir, range).await?;
            info!(
                "♻️  Chunk {}: reusing {} existing frames",
                request.chunk_index,
                frames.len()
            );
            return Ok(frames);
        }

        tokio::fs::create_dir_all(&self.frames_root).await?;
        let candidates = tempfile::Builder::new()
            .prefix(".candidates_")
            .tempdir_in(&self.frames_root)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging_")
            .tempdir_in(&self.frames_root)?;

        let ticks = sampling_ticks(range.duration(), self.settings.interval);
        debug!(
            "Chunk {}: sampling {} ticks in {}",
            request.chunk_index,
            ticks.len(),
            range.label()
        );
        self.run_ffmpeg(&range, ticks.len(), candidates.path()).await?;

        let candidate_dir = candidates.path().to_path_buf();
        let staging_dir = staging.path().to_path_buf();
        let settings = self.settings.clone();

        let (kept, skipped) = tokio::task::spawn_blocking(move || {
            select_frames(&candidate_dir, &staging_dir, &ticks, range, &settings)
        })
        .await
        .map_err(|e| PipelineError::fatal(PRODUCER, e.to_string()))??;

        // Publish the finished directory in one rename
        let staged_path = staging.keep();
        tokio::fs::rename(&staged_path, &final_dir).await?;

        let frames = kept
            .into_iter()
            .map(|mut frame| {
                if let Some(name) = frame.path.file_name() {
                    frame.path = final_dir.join(name);
                }
                frame
            })
            .collect::<Vec<_>>();

        info!(
            "🖼️  Chunk {}: kept {} frames ({} near-duplicates skipped)",
            request.chunk_index,
            frames.len(),
            skipped
        );
        Ok(frames)
    }
}

/// Offset of a reused frame, clamped to zero when it predates the range
fn offset_from_file_name(name: &str, range: &TimeRange) -> Duration {
    let timestamp = timestamp_from_file_name(name).unwrap_or(range.start);
    if timestamp < range.start {
        warn!(
            "Frame {} predates chunk range {}, using offset 0",
            name,
            range.label()
        );
    }
    timestamp.saturating_sub(range.start)
}

/// Dedup ffmpeg candidates in tick order and move the kept ones into `staging_dir`
fn select_frames(
    candidate_dir: &Path,
    staging_dir: &Path,
    ticks: &[Duration],
    range: TimeRange,
    settings: &FrameSettings,
) -> Result<(Vec<FrameRef>, usize)> {
    let mut dedup = FrameDeduplicator::new(settings.similarity_threshold, settings.skip_similar);
    let mut kept = Vec::new();

    for (position, offset) in ticks.iter().enumerate() {
        let candidate = candidate_dir.join(format!("candidate_{:05}.jpg", position + 1));
        if !candidate.exists() {
            // video ended before the range did
            break;
        }

        let signature = PerceptualSignature::from_path(&candidate)?;
        if !dedup.admit(&signature) {
            continue;
        }

        let target = staging_dir.join(frame_file_name(kept.len(), range.start + *offset));
        std::fs::rename(&candidate, &target)?;
        kept.push(FrameRef {
            path: target,
            offset_in_range: *offset,
            signature,
        });
    }

    Ok((kept, dedup.skipped()))
}
