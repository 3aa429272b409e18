//! Video Summary - Rust Implementation
//!
//! Turns a long lecture video's subtitle track into illustrated study notes:
//! language-aware overlapping chunks, one model summary and one set of
//! deduplicated frames per chunk, merged in chunk order into one Markdown document.

pub mod cache;
pub mod chunking;
pub mod config;
pub mod document;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod transcript;
pub mod video;

// Re-export main types for easy access
pub use crate::cache::ArtifactCache;
pub use crate::chunking::{Chunk, Chunker, CueRange, TimeRange, TimeRangeMapper};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::document::{AssemblyOptions, ChunkManifest, DocumentAssembler};
pub use crate::error::{PipelineError, Result};
pub use crate::llm::summary::{PositionInfo, PromptTemplate, SummaryProducer};
pub use crate::llm::{LLMConfig, LLMProvider};
pub use crate::orchestrator::{ChunkOrchestrator, ChunkResult, ChunkState, ChunkWork};
pub use crate::pipeline::{BatchResult, OutputLayout, Pipeline, ResolvedSource, RunOutcome, SourceInput};
pub use crate::retry::RetryPolicy;
pub use crate::transcript::{parse_subtitles, Cue, Language, LanguageClassifier, Transcript};
pub use crate::video::{FrameProducer, FrameRef, FrameRequest, FrameSettings};
