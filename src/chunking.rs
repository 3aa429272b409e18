//! Overlapping chunk segmentation over whole cues and the mapping from chunks
//! back to video time ranges.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::transcript::language::count_tokens;
use crate::transcript::{ChunkProfile, Cue, SubtitleFormatter, Transcript};

/// Inclusive span of cue indices (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueRange {
    pub first: usize,
    pub last: usize,
}

/// One summarization/extraction unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 1-based position in the chunk sequence
    pub index: usize,
    pub cue_range: CueRange,
    /// Cue texts of the whole range joined with newlines
    pub text: String,
    /// Leading cues shared with the previous chunk
    pub overlap_prefix_len: usize,
}

impl Chunk {
    /// Cues of this chunk that no earlier chunk contains
    pub fn fresh_cues<'a>(&self, cues: &'a [Cue]) -> &'a [Cue] {
        let first = self.cue_range.first + self.overlap_prefix_len;
        &cues[first..=self.cue_range.last]
    }

    pub fn fresh_text(&self, transcript: &Transcript) -> String {
        self.fresh_cues(transcript.cues())
            .iter()
            .map(|cue| cue.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Splits a transcript into overlapping chunks on cue boundaries
#[derive(Debug, Clone)]
pub struct Chunker {
    profile: ChunkProfile,
}

impl Chunker {
    pub fn new(profile: ChunkProfile) -> Result<Self> {
        if profile.chunk_size == 0 {
            return Err(PipelineError::Config(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if profile.overlap >= profile.chunk_size {
            return Err(PipelineError::Config(format!(
                "overlap ({}) must be smaller than chunk size ({})",
                profile.overlap, profile.chunk_size
            )));
        }
        Ok(Self { profile })
    }

    pub fn profile(&self) -> &ChunkProfile {
        &self.profile
    }

    pub fn chunk(&self, transcript: &Transcript) -> Vec<Chunk> {
        let cues = transcript.cues();
        if cues.is_empty() {
            return Vec::new();
        }

        // offsets[k] = tokens in cues[..k]
        let mut offsets = Vec::with_capacity(cues.len() + 1);
        offsets.push(0usize);
        for cue in cues {
            let weight = count_tokens(&cue.text).max(1);
            offsets.push(offsets[offsets.len() - 1] + weight);
        }
        let cue_count = cues.len();

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut overlap_prefix_len = 0;

        loop {
            let target = offsets[start] + self.profile.chunk_size;
            // exclusive end: first boundary reaching the target
            let end = (start + 1..=cue_count)
                .find(|&k| offsets[k] >= target)
                .unwrap_or(cue_count);

            let text = cues[start..end]
                .iter()
                .map(|cue| cue.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            chunks.push(Chunk {
                index: chunks.len() + 1,
                cue_range: CueRange {
                    first: start,
                    last: end - 1,
                },
                text,
                overlap_prefix_len,
            });

            if end >= cue_count {
                break;
            }

            let resume_at = offsets[end].saturating_sub(self.profile.overlap);
            let next = offsets
                .partition_point(|&offset| offset < resume_at)
                .clamp(start + 1, end);

            overlap_prefix_len = end - next;
            start = next;
        }

        debug!(
            "Split {} cues into {} chunks (size {}, overlap {})",
            cue_count,
            chunks.len(),
            self.profile.chunk_size,
            self.profile.overlap
        );
        chunks
    }
}

/// Video time span of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Duration,
    pub end: Duration,
}

impl TimeRange {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    /// Human-readable `MMmSSs-MMmSSs`
    pub fn label(&self) -> String {
        format!(
            "{}-{}",
            SubtitleFormatter::format_minutes(self.start),
            SubtitleFormatter::format_minutes(self.end)
        )
    }
}

pub struct TimeRangeMapper;

impl TimeRangeMapper {
    pub fn map(chunk: &Chunk, cues: &[Cue]) -> TimeRange {
        TimeRange {
            start: cues[chunk.cue_range.first].start,
            end: cues[chunk.cue_range.last].end,
        }
    }

    pub fn map_all(chunks: &[Chunk], cues: &[Cue]) -> Vec<TimeRange> {
        chunks.iter().map(|chunk| Self::map(chunk, cues)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::ChunkUnit;

    fn profile(chunk_size: usize, overlap: usize) -> ChunkProfile {
        ChunkProfile {
            chunk_size,
            overlap,
            unit: ChunkUnit::Words,
        }
    }

    /// Cues with `words` words each, 50 seconds apart
    fn transcript(cue_count: usize, words: usize) -> Transcript {
        let cues = (0..cue_count)
            .map(|i| {
                let text = (0..words)
                    .map(|w| format!("c{}w{}", i, w))
                    .collect::<Vec<_>>()
                    .join(" ");
                Cue::new(
                    Duration::from_secs(i as u64 * 50),
                    Duration::from_secs((i as u64 + 1) * 50),
                    text,
                )
            })
            .collect();
        Transcript::new(cues)
    }

    #[test]
    fn test_twelve_cue_scenario() {
        let transcript = transcript(12, 10);
        let chunker = Chunker::new(profile(70, 10)).unwrap();
        let chunks = chunker.chunk(&transcript);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].cue_range, CueRange { first: 0, last: 6 });
        assert_eq!(chunks[1].cue_range, CueRange { first: 6, last: 11 });
        assert_eq!(chunks[1].overlap_prefix_len, 1);

        let ranges = TimeRangeMapper::map_all(&chunks, transcript.cues());
        assert_eq!(ranges[0].start, Duration::ZERO);
        assert_eq!(ranges[0].end, Duration::from_secs(350));
        assert_eq!(ranges[1].start, Duration::from_secs(300));
        assert_eq!(ranges[1].end, Duration::from_secs(600));
        assert_eq!(ranges[1].label(), "05m00s-10m00s");
    }

    #[test]
    fn test_fresh_text_round_trips_transcript() {
        let transcript = transcript(37, 7);
        for (size, overlap) in [(20, 5), (21, 20), (50, 0), (8, 7), (300, 299)] {
            let chunks = Chunker::new(profile(size, overlap)).unwrap().chunk(&transcript);
            let rebuilt = chunks
                .iter()
                .map(|chunk| chunk.fresh_text(&transcript))
                .collect::<Vec<_>>()
                .join("\n");
            assert_eq!(rebuilt, transcript.text(), "size {} overlap {}", size, overlap);
        }
    }

    #[test]
    fn test_every_cue_is_covered_and_starts_increase() {
        let transcript = transcript(25, 3);
        let chunks = Chunker::new(profile(10, 9)).unwrap().chunk(&transcript);

        assert_eq!(chunks[0].cue_range.first, 0);
        assert_eq!(chunks.last().unwrap().cue_range.last, 24);
        for pair in chunks.windows(2) {
            assert!(pair[1].cue_range.first > pair[0].cue_range.first);
            assert!(pair[1].cue_range.first <= pair[0].cue_range.last + 1);
            assert_eq!(pair[1].index, pair[0].index + 1);
        }

        let ranges = TimeRangeMapper::map_all(&chunks, transcript.cues());
        for pair in ranges.windows(2) {
            assert!(pair[1].start >= pair[0].start);
        }
    }

    #[test]
    fn test_short_transcript_yields_single_chunk() {
        let transcript = transcript(4, 5);
        let chunks = Chunker::new(profile(1700, 120)).unwrap().chunk(&transcript);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].cue_range, CueRange { first: 0, last: 3 });
        assert_eq!(chunks[0].overlap_prefix_len, 0);
        assert_eq!(chunks[0].text, transcript.text());
    }

    #[test]
    fn test_overlap_not_below_size_is_config_error() {
        assert!(matches!(
            Chunker::new(profile(100, 100)),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            Chunker::new(profile(0, 0)),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let transcript = transcript(40, 6);
        let chunker = Chunker::new(profile(30, 8)).unwrap();
        assert_eq!(chunker.chunk(&transcript), chunker.chunk(&transcript));
    }
}
