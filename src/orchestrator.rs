//! Concurrent per-chunk summary and frame production with ordered collection.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::chunking::{Chunk, TimeRange};
use crate::document::{frames_failure_placeholder, summary_failure_placeholder};
use crate::error::{PipelineError, Result};
use crate::llm::summary::{PositionInfo, SummaryProducer};
use crate::retry::{retry_producer, RetryPolicy};
use crate::video::{FrameProducer, FrameRef, FrameRequest};

/// Lifecycle of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChunkState {
    Pending,
    Running,
    Ready,
    Merged,
}

/// Per-chunk state machine; transitions only move forward one step
#[derive(Debug, Clone)]
pub struct ChunkTracker {
    states: Vec<ChunkState>,
}

impl ChunkTracker {
    pub fn new(chunk_count: usize) -> Self {
        Self {
            states: vec![ChunkState::Pending; chunk_count],
        }
    }

    pub fn state(&self, index: usize) -> Option<ChunkState> {
        index
            .checked_sub(1)
            .and_then(|slot| self.states.get(slot))
            .copied()
    }

    /// Advance chunk `index` (1-based) to `to`
    pub fn advance(&mut self, index: usize, to: ChunkState) -> Result<()> {
        let slot = index
            .checked_sub(1)
            .filter(|slot| *slot < self.states.len())
            .ok_or_else(|| PipelineError::Config(format!("unknown chunk index {}", index)))?;

        let from = self.states[slot];
        let allowed = matches!(
            (from, to),
            (ChunkState::Pending, ChunkState::Running)
                | (ChunkState::Running, ChunkState::Ready)
                | (ChunkState::Ready, ChunkState::Merged)
        );
        if !allowed {
            return Err(PipelineError::Config(format!(
                "chunk {} cannot move from {:?} to {:?}",
                index, from, to
            )));
        }

        self.states[slot] = to;
        Ok(())
    }

    pub fn all_in(&self, state: ChunkState) -> bool {
        self.states.iter().all(|s| *s == state)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SummaryOutcome {
    Ready(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FramesOutcome {
    Ready(Vec<FrameRef>),
    /// Text-only run
    Skipped,
    Failed(String),
}

/// Results of both producers for one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResult {
    pub index: usize,
    pub time_range: TimeRange,
    pub summary: SummaryOutcome,
    pub frames: FramesOutcome,
    /// Transcript text not shared with the previous chunk
    pub fresh_text: String,
}

impl ChunkResult {
    pub fn has_failure(&self) -> bool {
        matches!(self.summary, SummaryOutcome::Failed(_))
            || matches!(self.frames, FramesOutcome::Failed(_))
    }

    /// Summary text, or its failure placeholder
    pub fn summary_markdown(&self) -> String {
        match &self.summary {
            SummaryOutcome::Ready(text) => text.clone(),
            SummaryOutcome::Failed(reason) => summary_failure_placeholder(self.index, reason),
        }
    }

    pub fn frames(&self) -> &[FrameRef] {
        match &self.frames {
            FramesOutcome::Ready(frames) => frames,
            _ => &[],
        }
    }

    pub fn frames_placeholder(&self) -> Option<String> {
        match &self.frames {
            FramesOutcome::Failed(reason) => Some(frames_failure_placeholder(self.index, reason)),
            _ => None,
        }
    }
}

/// Input of one chunk task
#[derive(Debug, Clone)]
pub struct ChunkWork {
    pub chunk: Chunk,
    pub time_range: TimeRange,
    pub fresh_text: String,
}

/// Append-only log of chunk summaries, written in chunk order
pub struct SummaryLog {
    path: PathBuf,
    file: tokio::fs::File,
}

impl SummaryLog {
    pub async fn create(path: &Path, title: &str, chunk_count: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        let header = format!(
            "# {} 学习笔记\n\n> 由 AI 生成，共 {} 部分\n\n",
            title, chunk_count
        );
        file.write_all(header.as_bytes()).await?;
        file.flush().await?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&mut self, result: &ChunkResult) -> Result<()> {
        let entry = format!(
            "\n## 第 {} 部分\n\n{}\n\n---\n",
            result.index,
            result.summary_markdown()
        );
        self.file.write_all(entry.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Everything the orchestrator hands to assembly
#[derive(Debug)]
pub struct OrchestrationReport {
    /// In chunk-index order
    pub results: Vec<ChunkResult>,
    pub tracker: ChunkTracker,
}

impl OrchestrationReport {
    pub fn failed_chunks(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| r.has_failure())
            .map(|r| r.index)
            .collect()
    }
}

/// Runs summary and frame work for every chunk on a shared bounded pool
pub struct ChunkOrchestrator {
    summary: Arc<dyn SummaryProducer>,
    frames: Option<Arc<dyn FrameProducer>>,
    worker_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    retry: RetryPolicy,
}

impl ChunkOrchestrator {
    pub fn new(
        summary: Arc<dyn SummaryProducer>,
        frames: Option<Arc<dyn FrameProducer>>,
        max_concurrent: usize,
        retry: RetryPolicy,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        info!("🔧 Chunk orchestrator with {} workers", max_concurrent);
        Self {
            summary,
            frames,
            worker_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            retry,
        }
    }

    pub async fn run(
        &self,
        work: Vec<ChunkWork>,
        mut log: Option<SummaryLog>,
    ) -> Result<OrchestrationReport> {
        let total = work.len();
        let mut tracker = ChunkTracker::new(total);
        let started = Instant::now();
        let (tx, mut rx) = mpsc::channel::<ChunkResult>(self.max_concurrent.max(total).max(1));

        let mut pending = BTreeMap::new();
        for item in work {
            let index = item.chunk.index;
            tracker.advance(index, ChunkState::Running)?;
            pending.insert(index, (item.time_range, item.fresh_text.clone()));

            let summary_task = self.spawn_summary(&item, total);
            let frames_task = self.spawn_frames(&item);
            let tx = tx.clone();

            tokio::spawn(async move {
                let (summary, frames) = tokio::join!(summary_task, frames_task);
                let result = ChunkResult {
                    index,
                    time_range: item.time_range,
                    summary: summary_outcome(summary),
                    frames: frames_outcome(frames),
                    fresh_text: item.fresh_text,
                };
                if let Err(e) = tx.send(result).await {
                    error!("Failed to send result of chunk {}: {}", index, e);
                }
            });
        }

        // Close the channel once every chunk task has reported
        drop(tx);

        let mut ready: BTreeMap<usize, ChunkResult> = BTreeMap::new();
        let mut next_to_log = 1;

        while let Some(result) = rx.recv().await {
            let index = result.index;
            tracker.advance(index, ChunkState::Ready)?;
            if result.has_failure() {
                warn!("❌ Chunk {}/{} finished with a failure", index, total);
            } else {
                info!(
                    "✅ Chunk {}/{} ready ({} frames)",
                    index,
                    total,
                    result.frames().len()
                );
            }
            ready.insert(index, result);

            // Single writer: append the contiguous prefix in index order
            while let Some(result) = ready.get(&next_to_log) {
                if let Some(log) = log.as_mut() {
                    log.append(result).await?;
                }
                next_to_log += 1;
            }
        }

        // A chunk task that died before reporting still gets a slot
        for (index, (time_range, fresh_text)) in pending {
            if ready.contains_key(&index) {
                continue;
            }
            warn!("Chunk {} never reported a result", index);
            tracker.advance(index, ChunkState::Ready)?;
            let lost = "chunk task stopped before reporting".to_string();
            let result = ChunkResult {
                index,
                time_range,
                summary: SummaryOutcome::Failed(lost.clone()),
                frames: FramesOutcome::Failed(lost),
                fresh_text,
            };
            ready.insert(index, result);
        }
        while let Some(result) = ready.get(&next_to_log) {
            if let Some(log) = log.as_mut() {
                log.append(result).await?;
            }
            next_to_log += 1;
        }

        let results: Vec<ChunkResult> = ready.into_values().collect();
        info!(
            "🏁 {} chunks processed in {:.2}s",
            results.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(OrchestrationReport { results, tracker })
    }

    fn spawn_summary(
        &self,
        item: &ChunkWork,
        total: usize,
    ) -> tokio::task::JoinHandle<Result<String>> {
        let producer = Arc::clone(&self.summary);
        let semaphore = Arc::clone(&self.worker_semaphore);
        let retry = self.retry.clone();
        let text = item.chunk.text.clone();
        let position = PositionInfo {
            current: item.chunk.index,
            total,
        };

        tokio::spawn(async move {
            let _permit = acquire(semaphore, "summary").await?;
            debug!("Summary task {}/{} started", position.current, position.total);

            let producer = &producer;
            let text = text.as_str();
            retry_producer(&retry, "summary", || producer.produce(text, position)).await
        })
    }

    fn spawn_frames(
        &self,
        item: &ChunkWork,
    ) -> tokio::task::JoinHandle<Option<Result<Vec<FrameRef>>>> {
        let producer = self.frames.clone();
        let semaphore = Arc::clone(&self.worker_semaphore);
        let retry = self.retry.clone();
        let request = FrameRequest {
            chunk_index: item.chunk.index,
            time_range: item.time_range,
        };

        tokio::spawn(async move {
            let producer = producer?;
            Some(produce_frames(producer, semaphore, retry, request).await)
        })
    }
}

async fn acquire(
    semaphore: Arc<Semaphore>,
    producer: &str,
) -> Result<tokio::sync::OwnedSemaphorePermit> {
    semaphore
        .acquire_owned()
        .await
        .map_err(|e| PipelineError::fatal(producer, e.to_string()))
}

async fn produce_frames(
    producer: Arc<dyn FrameProducer>,
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
    request: FrameRequest,
) -> Result<Vec<FrameRef>> {
    let _permit = acquire(semaphore, "frames").await?;
    debug!("Frame task {} started", request.chunk_index);

    let producer = &producer;
    retry_producer(&retry, "frames", || producer.produce(request)).await
}

fn summary_outcome(joined: std::result::Result<Result<String>, JoinError>) -> SummaryOutcome {
    match joined {
        Ok(Ok(text)) => SummaryOutcome::Ready(text),
        Ok(Err(e)) => {
            warn!("Summary failed: {}", e);
            SummaryOutcome::Failed(e.reason())
        }
        Err(e) => SummaryOutcome::Failed(format!("summary task aborted: {}", e)),
    }
}

fn frames_outcome(
    joined: std::result::Result<Option<Result<Vec<FrameRef>>>, JoinError>,
) -> FramesOutcome {
    match joined {
        Ok(None) => FramesOutcome::Skipped,
        Ok(Some(Ok(frames))) => FramesOutcome::Ready(frames),
        Ok(Some(Err(e))) => {
            warn!("Frame extraction failed: {}", e);
            FramesOutcome::Failed(e.reason())
        }
        Err(e) => FramesOutcome::Failed(format!("frame task aborted: {}", e)),
    }
}
