//! Final document assembly and its post-processing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Component, Path};
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::chunking::{Chunk, TimeRange};
use crate::error::{PipelineError, Result};
use crate::orchestrator::{ChunkResult, ChunkState, ChunkTracker, FramesOutcome};
use crate::transcript::{ChunkProfile, Language};

static PART_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*##\s+第\s+\d+\s+部分\s*$").expect("part header pattern is valid")
});

pub fn summary_failure_placeholder(index: usize, reason: &str) -> String {
    format!("> [错误: 第 {} 部分总结失败: {}]", index, reason)
}

pub fn frames_failure_placeholder(index: usize, reason: &str) -> String {
    format!("> [错误: 第 {} 部分截图提取失败: {}]", index, reason)
}

/// Link target for `target` as seen from `document_dir`.
///
/// Relative and `/`-separated, each segment percent-encoded. Falls back to the
/// encoded absolute path when no relative path exists.
pub fn markdown_link_path(target: &Path, document_dir: &Path) -> String {
    let (path, absolute) = match pathdiff::diff_paths(target, document_dir) {
        Some(relative) => (relative, false),
        None => (target.to_path_buf(), target.is_absolute()),
    };

    let segments: Vec<String> = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(urlencoding::encode(&part.to_string_lossy()).into_owned()),
            Component::ParentDir => Some("..".to_string()),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => None,
        })
        .collect();

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Optional document sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyOptions {
    /// Append each chunk's non-overlapping transcript in a collapsible block
    pub include_transcript: bool,
    /// Remove `## 第 N 部分` lines after assembly
    pub strip_part_headers: bool,
}

/// Merges chunk results into the final Markdown document in index order
pub struct DocumentAssembler {
    title: String,
    source_name: String,
    document_dir: std::path::PathBuf,
    generated_at: String,
    options: AssemblyOptions,
}

impl DocumentAssembler {
    pub fn new(
        title: impl Into<String>,
        source_name: impl Into<String>,
        document_path: &Path,
        options: AssemblyOptions,
    ) -> Self {
        Self {
            title: title.into(),
            source_name: source_name.into(),
            document_dir: document_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            options,
        }
    }

    /// Pin the generation time shown in the header
    pub fn with_generated_at(mut self, generated_at: impl Into<String>) -> Self {
        self.generated_at = generated_at.into();
        self
    }

    /// Assemble every chunk, marking each merged as it is emitted.
    ///
    /// All chunks must be `Ready`. Input order does not matter.
    pub fn assemble(&self, results: &[ChunkResult], tracker: &mut ChunkTracker) -> Result<String> {
        let by_index: BTreeMap<usize, &ChunkResult> =
            results.iter().map(|result| (result.index, result)).collect();

        let mut document = String::new();
        let _ = write!(
            document,
            "# {} 视频总结\n\n> 生成时间: {}\n\n> 源视频: {}\n\n---\n\n",
            self.title, self.generated_at, self.source_name
        );

        for index in 1..=tracker.len() {
            let result = by_index.get(&index).ok_or_else(|| {
                PipelineError::Config(format!("result for chunk {} is missing", index))
            })?;
            if tracker.state(index) != Some(ChunkState::Ready) {
                return Err(PipelineError::Config(format!(
                    "chunk {} is not ready for assembly",
                    index
                )));
            }

            self.write_chunk(&mut document, result);
            tracker.advance(index, ChunkState::Merged)?;
        }

        if self.options.strip_part_headers {
            let (stripped, removed) = strip_part_headers(&document);
            debug!("Removed {} part headers", removed);
            document = stripped;
        }

        info!("📄 Assembled document with {} parts", tracker.len());
        Ok(document)
    }

    fn write_chunk(&self, document: &mut String, result: &ChunkResult) {
        let _ = write!(document, "## 第 {} 部分\n\n", result.index);

        match &result.frames {
            FramesOutcome::Ready(frames) if !frames.is_empty() => {
                document.push_str("### 📸 相关截图\n\n");
                for frame in frames {
                    let link = markdown_link_path(&frame.path, &self.document_dir);
                    let _ = write!(document, "![截图]({})\n\n", link);
                }
            }
            FramesOutcome::Failed(_) => {
                if let Some(placeholder) = result.frames_placeholder() {
                    document.push_str("### 📸 相关截图\n\n");
                    let _ = write!(document, "{}\n\n", placeholder);
                }
            }
            _ => {}
        }

        let summary = result.summary_markdown();
        document.push_str(summary.trim());
        document.push_str("\n\n");

        if self.options.include_transcript && !result.fresh_text.is_empty() {
            let _ = write!(
                document,
                "<details>\n<summary>原文 ({})</summary>\n\n{}\n\n</details>\n\n",
                result.time_range.label(),
                result.fresh_text
            );
        }

        document.push_str("---\n\n");
    }
}

/// Remove lines consisting only of `## 第 N 部分`; returns the new text and the count removed
pub fn strip_part_headers(markdown: &str) -> (String, usize) {
    let mut removed = 0;
    let kept: Vec<&str> = markdown
        .split_inclusive('\n')
        .filter(|line| {
            let is_header = PART_HEADER.is_match(line.trim_end_matches(['\n', '\r']));
            if is_header {
                removed += 1;
            }
            !is_header
        })
        .collect();
    (kept.concat(), removed)
}

/// One chunk boundary in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub first_cue: usize,
    pub last_cue: usize,
    pub overlap_prefix_len: usize,
    pub time_range: TimeRange,
    pub label: String,
}

/// Chunk boundaries of a run, identical for identical input and configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkManifest {
    pub title: String,
    pub language: Language,
    pub profile: ChunkProfile,
    pub cue_count: usize,
    pub chunks: Vec<ManifestEntry>,
}

impl ChunkManifest {
    pub fn new(
        title: impl Into<String>,
        language: Language,
        profile: ChunkProfile,
        cue_count: usize,
        chunks: &[Chunk],
        ranges: &[TimeRange],
    ) -> Self {
        let chunks = chunks
            .iter()
            .zip(ranges)
            .map(|(chunk, range)| ManifestEntry {
                index: chunk.index,
                first_cue: chunk.cue_range.first,
                last_cue: chunk.cue_range.last,
                overlap_prefix_len: chunk.overlap_prefix_len,
                time_range: *range,
                label: range.label(),
            })
            .collect();

        Self {
            title: title.into(),
            language,
            profile,
            cue_count,
            chunks,
        }
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}
