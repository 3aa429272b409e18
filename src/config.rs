use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::llm::{LLMConfig, LLMProvider};
use crate::retry::RetryPolicy;
use crate::transcript::{ChunkProfile, ChunkUnit, LanguageClassifier};
use crate::video::FrameSettings;

/// Configuration for the video summary pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run mode and frame sampling settings
    pub processing: ProcessingConfig,

    /// Language profiles for chunk sizing
    pub chunking: ChunkingConfig,

    /// Summary model settings
    pub llm: LLMConfig,

    /// Backoff for transient producer failures
    pub retry: RetryPolicy,

    /// Output and document settings
    pub output: OutputConfig,

    /// Worker pool settings
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Frame sampling period in seconds
    pub interval_secs: f64,

    /// Similarity at or above which a frame counts as a near-duplicate
    pub similarity_threshold: f64,

    /// Drop near-duplicate frames
    pub skip_similar: bool,

    /// ffmpeg JPEG quality (2-31, lower is better)
    pub jpeg_quality: u8,

    /// Write the instruction text instead of calling the model
    pub test_mode: bool,

    /// Skip video acquisition and frame extraction
    pub text_only: bool,

    /// Remove rolling-caption repetition before chunking
    pub dedupe_captions: bool,

    /// Cookies file passed to yt-dlp
    pub cookies_path: Option<PathBuf>,

    /// Custom summary prompt template
    pub prompt_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// CJK ideograph ratio selecting the CJK profile
    pub cjk_threshold: f64,
    pub cjk_chunk_size: usize,
    pub cjk_overlap: usize,
    pub non_cjk_chunk_size: usize,
    pub non_cjk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Base output directory
    pub base_dir: PathBuf,

    /// Override for the derived title
    pub title: Option<String>,

    /// Add each chunk's transcript in a collapsible block
    pub include_transcript: bool,

    /// Remove `## 第 N 部分` lines from the final document
    pub strip_part_headers: bool,

    /// Keep model summaries on disk and reuse them
    pub cache_summaries: bool,

    /// Write `<title>_chunks.json`
    pub write_manifest: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Maximum number of in-flight producer calls
    pub max_workers: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        let frames = FrameSettings::default();
        Self {
            interval_secs: frames.interval.as_secs_f64(),
            similarity_threshold: frames.similarity_threshold,
            skip_similar: frames.skip_similar,
            jpeg_quality: frames.jpeg_quality,
            test_mode: false,
            text_only: false,
            dedupe_captions: false,
            cookies_path: None,
            prompt_file: None,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let cjk = ChunkProfile::cjk_default();
        let non_cjk = ChunkProfile::non_cjk_default();
        Self {
            cjk_threshold: 0.1,
            cjk_chunk_size: cjk.chunk_size,
            cjk_overlap: cjk.overlap,
            non_cjk_chunk_size: non_cjk.chunk_size,
            non_cjk_overlap: non_cjk.overlap,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("output"),
            title: None,
            include_transcript: false,
            strip_part_headers: false,
            cache_summaries: true,
            write_manifest: true,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            // Available cores, max 8, at least 2
            max_workers: num_cpus::get().min(8).max(2),
        }
    }
}

impl ChunkingConfig {
    pub fn classifier(&self) -> LanguageClassifier {
        LanguageClassifier::new(
            self.cjk_threshold,
            ChunkProfile {
                chunk_size: self.cjk_chunk_size,
                overlap: self.cjk_overlap,
                unit: ChunkUnit::Characters,
            },
            ChunkProfile {
                chunk_size: self.non_cjk_chunk_size,
                overlap: self.non_cjk_overlap,
                unit: ChunkUnit::Words,
            },
        )
    }
}

impl ProcessingConfig {
    pub fn frame_settings(&self) -> FrameSettings {
        FrameSettings {
            interval: Duration::from_secs_f64(self.interval_secs.max(0.0)),
            similarity_threshold: self.similarity_threshold,
            skip_similar: self.skip_similar,
            jpeg_quality: self.jpeg_quality,
        }
    }
}

const CONFIG_PATHS: [&str; 2] = ["video-summary.toml", "config/video-summary.toml"];

impl Config {
    /// Load configuration, then apply environment overrides.
    ///
    /// An explicit path must exist and parse. Otherwise the default locations
    /// are tried in order and built-in defaults are used when none parses.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::from_default_locations(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = toml::from_str(&config_str).map_err(|e| {
            PipelineError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    fn from_default_locations() -> Self {
        for path in CONFIG_PATHS {
            let path = Path::new(path);
            if !path.exists() {
                continue;
            }
            match Self::from_file(path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("Skipping config file: {}", e),
            }
        }
        tracing::debug!("No configuration file found, using defaults");
        Self::default()
    }

    /// Apply `VIDEO_SUMMARY_*` and provider key variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(workers) = lookup("VIDEO_SUMMARY_WORKERS") {
            match workers.parse() {
                Ok(workers) => self.performance.max_workers = workers,
                Err(_) => tracing::warn!("Ignoring invalid VIDEO_SUMMARY_WORKERS={}", workers),
            }
        }

        if let Some(interval) = lookup("VIDEO_SUMMARY_INTERVAL") {
            match interval.parse() {
                Ok(interval) => self.processing.interval_secs = interval,
                Err(_) => tracing::warn!("Ignoring invalid VIDEO_SUMMARY_INTERVAL={}", interval),
            }
        }

        if let Some(output_dir) = lookup("VIDEO_SUMMARY_OUTPUT_DIR") {
            self.output.base_dir = PathBuf::from(output_dir);
        }

        if let Some(model) = lookup("VIDEO_SUMMARY_MODEL") {
            self.llm.model = model;
        }

        if self.llm.api_key.is_none() {
            if let Some(env) = self.llm.provider.api_key_env() {
                self.llm.api_key = lookup(env).filter(|key| !key.trim().is_empty());
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Reject settings that cannot produce a valid run
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        for (name, size, overlap) in [
            ("cjk", chunking.cjk_chunk_size, chunking.cjk_overlap),
            ("non_cjk", chunking.non_cjk_chunk_size, chunking.non_cjk_overlap),
        ] {
            if size == 0 {
                return Err(PipelineError::Config(format!(
                    "{}_chunk_size must be greater than 0",
                    name
                )));
            }
            if overlap >= size {
                return Err(PipelineError::Config(format!(
                    "{}_overlap ({}) must be smaller than {}_chunk_size ({})",
                    name, overlap, name, size
                )));
            }
        }

        if !(0.0..=1.0).contains(&chunking.cjk_threshold) {
            return Err(PipelineError::Config(
                "cjk_threshold must be within [0, 1]".to_string(),
            ));
        }

        if self.performance.max_workers == 0 {
            return Err(PipelineError::Config(
                "max_workers must be greater than 0".to_string(),
            ));
        }

        let interval = self.processing.interval_secs;
        if !interval.is_finite() || interval <= 0.0 {
            return Err(PipelineError::Config(format!(
                "interval must be positive, got {}",
                interval
            )));
        }

        let threshold = self.processing.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(PipelineError::Config(format!(
                "similarity_threshold must be within (0, 1], got {}",
                threshold
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Video Summary Configuration:\n\
            - Workers: {}\n\
            - Frame Interval: {}s\n\
            - Similarity Threshold: {}\n\
            - LLM: {:?} ({})\n\
            - Output Directory: {}\n\
            - Test Mode: {}\n\
            - Text Only: {}",
            self.performance.max_workers,
            self.processing.interval_secs,
            self.processing.similarity_threshold,
            self.llm.provider,
            self.llm.model,
            self.output.base_dir.display(),
            self.processing.test_mode,
            self.processing.text_only
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.performance.max_workers = workers;
        self
    }

    pub fn with_interval(mut self, interval_secs: f64) -> Self {
        self.config.processing.interval_secs = interval_secs;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.base_dir = dir;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.config.output.title = Some(title.into());
        self
    }

    pub fn with_provider(mut self, provider: LLMProvider) -> Self {
        self.config.llm.provider = provider;
        self
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.config.llm.api_key = Some(api_key);
        self
    }

    pub fn with_cookies(mut self, cookies: PathBuf) -> Self {
        self.config.processing.cookies_path = Some(cookies);
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.config.chunking = chunking;
        self
    }

    pub fn test_mode(mut self, enable: bool) -> Self {
        self.config.processing.test_mode = enable;
        self
    }

    pub fn text_only(mut self, enable: bool) -> Self {
        self.config.processing.text_only = enable;
        self
    }

    pub fn dedupe_captions(mut self, enable: bool) -> Self {
        self.config.processing.dedupe_captions = enable;
        self
    }

    pub fn enable_caching(mut self, enable: bool) -> Self {
        self.config.output.cache_summaries = enable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.processing.interval_secs, 2.0);
        assert_eq!(config.chunking.cjk_chunk_size, 2000);
        assert_eq!(config.chunking.non_cjk_overlap, 120);
        assert!(config.performance.max_workers >= 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_workers(3)
            .with_interval(5.0)
            .with_title("Lecture 01")
            .test_mode(true)
            .build();

        assert_eq!(config.performance.max_workers, 3);
        assert_eq!(config.processing.frame_settings().interval, Duration::from_secs(5));
        assert_eq!(config.output.title.as_deref(), Some("Lecture 01"));
        assert!(config.processing.test_mode);
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let overlap = ConfigBuilder::new()
            .with_chunking(ChunkingConfig {
                non_cjk_chunk_size: 100,
                non_cjk_overlap: 100,
                ..ChunkingConfig::default()
            })
            .build();
        assert!(matches!(overlap.validate(), Err(PipelineError::Config(_))));

        assert!(ConfigBuilder::new().with_workers(0).build().validate().is_err());
        assert!(ConfigBuilder::new().with_interval(0.0).build().validate().is_err());

        let mut threshold = Config::default();
        threshold.processing.similarity_threshold = 1.5;
        assert!(threshold.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("video-summary.toml");
        std::fs::write(
            &path,
            "[processing]\ninterval_secs = 4.0\n\n[llm]\nprovider = \"OpenAI\"\nmodel = \"gpt-4o\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.processing.interval_secs, 4.0);
        assert_eq!(config.llm.provider, LLMProvider::OpenAI);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.chunking.cjk_overlap, 150);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = Config::load(Some(Path::new("/nonexistent/video-summary.toml")));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("VIDEO_SUMMARY_WORKERS", "6"),
            ("VIDEO_SUMMARY_INTERVAL", "3.5"),
            ("VIDEO_SUMMARY_MODEL", "gemini-2.5-flash"),
            ("GEMINI_API_KEY", "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.performance.max_workers, 6);
        assert_eq!(config.processing.interval_secs, 3.5);
        assert_eq!(config.llm.model, "gemini-2.5-flash");
        assert_eq!(config.llm.api_key.as_deref(), Some("secret"));
    }
}
