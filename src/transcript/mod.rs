pub mod parser;
pub mod language;
pub mod dedup;

pub use parser::{parse_subtitles, SubtitleFormatter};
pub use language::{ChunkProfile, ChunkUnit, Language, LanguageClassifier};
pub use dedup::dedupe_rolling_captions;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One timestamped subtitle entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    /// Start timestamp
    pub start: Duration,
    /// End timestamp, always after `start`
    pub end: Duration,
    /// Dialogue with whitespace normalized to single spaces
    pub text: String,
}

impl Cue {
    pub fn new(start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Ordered cues plus the flat text derived from them.
///
/// Built once per run and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    cues: Vec<Cue>,
    text: String,
}

impl Transcript {
    pub fn new(cues: Vec<Cue>) -> Self {
        let text = cues
            .iter()
            .map(|cue| cue.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self { cues, text }
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    /// Cue texts joined with newlines
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// End of the last cue
    pub fn total_duration(&self) -> Duration {
        self.cues
            .iter()
            .map(|cue| cue.end)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_flat_text() {
        let transcript = Transcript::new(vec![
            Cue::new(Duration::from_secs(0), Duration::from_secs(2), "first line"),
            Cue::new(Duration::from_secs(2), Duration::from_secs(5), "second line"),
        ]);

        assert_eq!(transcript.text(), "first line\nsecond line");
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.total_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_empty_transcript() {
        let transcript = Transcript::new(Vec::new());
        assert!(transcript.is_empty());
        assert_eq!(transcript.text(), "");
        assert_eq!(transcript.total_duration(), Duration::ZERO);
    }
}
