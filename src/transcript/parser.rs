use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Cue, Transcript};
use crate::error::{PipelineError, Result};

static CUE_TIMING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:\d+:)?\d{1,2}:\d{2}[,.]\d{3})\s*-->\s*((?:\d+:)?\d{1,2}:\d{2}[,.]\d{3})")
        .expect("cue timing pattern is valid")
});

static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("markup pattern is valid"));

/// Cue under construction while scanning lines
struct PendingCue {
    start: Duration,
    end: Duration,
    lines: Vec<String>,
}

/// Parse SRT or WebVTT content into a transcript.
///
/// A timing line opens a cue and a blank line closes it. A line directly
/// before a timing line is a cue identifier (the SRT index or a VTT id) and
/// is dropped, so files missing the blank separator still split correctly.
/// Lines outside a cue, including `NOTE`, `STYLE` and `REGION` blocks, are
/// ignored. Multi-line dialogue is joined with single spaces.
pub fn parse_subtitles(content: &str) -> Result<Transcript> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let body = strip_vtt_header(&content);
    let lines: Vec<&str> = body.lines().map(str::trim).collect();

    let mut cues = Vec::new();
    let mut current: Option<PendingCue> = None;
    let mut saw_timing = false;

    for (position, line) in lines.iter().enumerate() {
        if let Some(captures) = CUE_TIMING.captures(line) {
            saw_timing = true;
            if let Some(pending) = current.take() {
                push_cue(&mut cues, pending);
            }

            let start = SubtitleFormatter::parse_timestamp(&captures[1])?;
            let end = SubtitleFormatter::parse_timestamp(&captures[2])?;
            current = Some(PendingCue {
                start,
                end,
                lines: Vec::new(),
            });
            continue;
        }

        if line.is_empty() {
            if let Some(pending) = current.take() {
                push_cue(&mut cues, pending);
            }
            continue;
        }

        let is_identifier = lines
            .get(position + 1)
            .is_some_and(|next| CUE_TIMING.is_match(next));
        if is_identifier {
            continue;
        }

        if let Some(pending) = current.as_mut() {
            pending.lines.push(line.to_string());
        }
    }

    if let Some(pending) = current.take() {
        push_cue(&mut cues, pending);
    }

    if !saw_timing {
        return Err(PipelineError::Parse(
            "no well-formed timestamp lines found".to_string(),
        ));
    }
    if cues.is_empty() {
        return Err(PipelineError::Parse(
            "timestamp lines found but no cue carries dialogue".to_string(),
        ));
    }

    cues.sort_by_key(|cue| cue.start);
    debug!("Parsed {} cues", cues.len());
    Ok(Transcript::new(cues))
}

fn push_cue(cues: &mut Vec<Cue>, pending: PendingCue) {
    let joined = pending.lines.join(" ");
    let text = SubtitleFormatter::clean_text(&MARKUP_TAG.replace_all(&joined, ""));

    if text.is_empty() {
        return;
    }

    if pending.end <= pending.start {
        warn!(
            "Skipping cue with non-positive duration at {}",
            SubtitleFormatter::format_timestamp(pending.start)
        );
        return;
    }

    cues.push(Cue::new(pending.start, pending.end, text));
}

/// Drop a leading `WEBVTT` header block, up to the first blank line
fn strip_vtt_header(content: &str) -> &str {
    if !content.starts_with("WEBVTT") {
        return content;
    }
    match content.find("\n\n") {
        Some(pos) => &content[pos + 2..],
        None => "",
    }
}

/// Subtitle formatting utilities
pub struct SubtitleFormatter;

impl SubtitleFormatter {
    /// Format duration as an SRT timestamp (HH:MM:SS,mmm)
    pub fn format_timestamp(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;
        let milliseconds = duration.subsec_millis();

        format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, milliseconds)
    }

    /// Format duration as HHMMSS, used in frame file names
    pub fn format_compact(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        format!(
            "{:02}{:02}{:02}",
            total_seconds / 3600,
            (total_seconds % 3600) / 60,
            total_seconds % 60
        )
    }

    /// Format duration as MMmSSs, used in chunk directory names
    pub fn format_minutes(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        format!("{:02}m{:02}s", total_seconds / 60, total_seconds % 60)
    }

    /// Parse `HH:MM:SS,mmm`, `HH:MM:SS.mmm` or `MM:SS.mmm`
    pub fn parse_timestamp(timestamp: &str) -> Result<Duration> {
        let invalid = || PipelineError::Parse(format!("invalid timestamp: {}", timestamp));

        let (clock, millis) = timestamp
            .trim()
            .rsplit_once([',', '.'])
            .ok_or_else(invalid)?;

        let fields: Vec<&str> = clock.split(':').collect();
        let (hours, minutes, seconds) = match fields.as_slice() {
            [h, m, s] => (*h, *m, *s),
            [m, s] => ("0", *m, *s),
            _ => return Err(invalid()),
        };

        let hours: u64 = hours.parse().map_err(|_| invalid())?;
        let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
        let seconds: u64 = seconds.parse().map_err(|_| invalid())?;
        let milliseconds: u64 = millis.parse().map_err(|_| invalid())?;

        if minutes >= 60 || seconds >= 60 {
            return Err(invalid());
        }

        let total_millis = hours
            .checked_mul(3600)
            .and_then(|secs| secs.checked_add(minutes * 60 + seconds))
            .and_then(|secs| secs.checked_mul(1000))
            .and_then(|millis| millis.checked_add(milliseconds))
            .ok_or_else(invalid)?;
        Ok(Duration::from_millis(total_millis))
    }

    /// Collapse all whitespace runs into single spaces
    pub fn clean_text(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SRT: &str = "1\n00:00:01,000 --> 00:00:03,500\nHello there\n\n2\n00:00:04,000 --> 00:00:06,000\nGeneral\n  Kenobi\n\n";

    #[test]
    fn test_parse_basic_srt() {
        let transcript = parse_subtitles(SAMPLE_SRT).unwrap();
        let cues = transcript.cues();

        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start, Duration::from_millis(1000));
        assert_eq!(cues[0].end, Duration::from_millis(3500));
        assert_eq!(cues[0].text, "Hello there");
        assert_eq!(cues[1].text, "General Kenobi");
        assert_eq!(transcript.text(), "Hello there\nGeneral Kenobi");
    }

    #[test]
    fn test_bom_and_crlf_are_normalized() {
        let content = format!("\u{feff}{}", SAMPLE_SRT.replace('\n', "\r\n"));
        let transcript = parse_subtitles(&content).unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.cues()[0].text, "Hello there");
    }

    #[test]
    fn test_parse_vtt_with_header_and_tags() {
        let content = "WEBVTT\nKind: captions\nLanguage: en\n\n00:01.000 --> 00:02.500 align:start\n<c>rendering</c> pipeline\n\n00:00:03.000 --> 00:00:04.000\nshadow maps\n";
        let transcript = parse_subtitles(content).unwrap();
        let cues = transcript.cues();

        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start, Duration::from_millis(1000));
        assert_eq!(cues[0].text, "rendering pipeline");
        assert_eq!(cues[1].end, Duration::from_secs(4));
    }

    #[test]
    fn test_missing_blank_separator_still_splits() {
        let content = "1\n00:00:01,000 --> 00:00:02,000\nfirst\n2\n00:00:02,000 --> 00:00:03,000\nsecond\n";
        let transcript = parse_subtitles(content).unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.cues()[1].text, "second");
    }

    #[test]
    fn test_no_timestamps_is_parse_error() {
        let result = parse_subtitles("just some text\nwithout timing\n");
        assert!(matches!(result, Err(PipelineError::Parse(_))));
    }

    #[test]
    fn test_zero_length_cue_is_skipped() {
        let content = "00:00:05,000 --> 00:00:05,000\nnothing\n\n00:00:06,000 --> 00:00:07,000\nkept\n";
        let transcript = parse_subtitles(content).unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.cues()[0].text, "kept");
    }

    #[test]
    fn test_timestamp_formatting() {
        assert_eq!(SubtitleFormatter::format_timestamp(Duration::from_secs(3661)), "01:01:01,000");
        assert_eq!(SubtitleFormatter::format_timestamp(Duration::from_millis(1500)), "00:00:01,500");
        assert_eq!(SubtitleFormatter::format_compact(Duration::from_secs(754)), "001234");
        assert_eq!(SubtitleFormatter::format_minutes(Duration::from_secs(330)), "05m30s");
    }

    #[test]
    fn test_timestamp_parsing_rejects_garbage() {
        assert!(SubtitleFormatter::parse_timestamp("00:61:00,000").is_err());
        assert!(SubtitleFormatter::parse_timestamp("abc").is_err());
        assert_eq!(
            SubtitleFormatter::parse_timestamp("01:02:03.004").unwrap(),
            Duration::from_millis(3_723_004)
        );
    }

    #[test]
    fn test_vtt_cue_identifiers_are_not_dialogue() {
        let content = "WEBVTT\n\nintro\n00:00.000 --> 00:01.000\nHello\n\nchapter-two\n00:01.000 --> 00:02.000\nWorld\n";
        let transcript = parse_subtitles(content).unwrap();
        let texts: Vec<&str> = transcript.cues().iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["Hello", "World"]);
        assert_eq!(transcript.cues()[1].start, Duration::from_secs(1));
    }

    #[test]
    fn test_vtt_note_and_style_blocks_are_ignored() {
        let content = "WEBVTT\n\n00:00.000 --> 00:01.000\nHello\n\nNOTE reviewer comment\nspanning two lines\n\nSTYLE\n::cue { color: red }\n\n00:01.000 --> 00:02.000\nWorld\n";
        let transcript = parse_subtitles(content).unwrap();
        let texts: Vec<&str> = transcript.cues().iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["Hello", "World"]);
    }

    #[test]
    fn test_numeric_dialogue_is_kept() {
        let content = "1\n00:00:01,000 --> 00:00:02,000\n42\n\n2\n00:00:02,000 --> 00:00:03,000\nanswer\n";
        let transcript = parse_subtitles(content).unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.cues()[0].text, "42");
    }

    #[test]
    fn test_huge_hour_field_is_parse_error() {
        assert!(matches!(
            SubtitleFormatter::parse_timestamp("99999999999999999:00:00,000"),
            Err(PipelineError::Parse(_))
        ));
        let content = "99999999999999999:00:00,000 --> 99999999999999999:00:01,000\nboom\n";
        assert!(matches!(parse_subtitles(content), Err(PipelineError::Parse(_))));
    }

    #[test]
    fn test_text_cleaning() {
        let clean = SubtitleFormatter::clean_text("  This\thas\n\rmultiple   spaces  ");
        assert_eq!(clean, "This has multiple spaces");
    }
}
