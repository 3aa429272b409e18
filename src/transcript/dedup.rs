use tracing::debug;

use super::Cue;

const MIN_OVERLAP_CHARS: usize = 4;

/// Remove text that auto-generated captions repeat from the previous cue.
///
/// Each cue loses its longest prefix that is also a suffix of the previous
/// kept cue's original text. Cues left with at most one character are dropped.
pub fn dedupe_rolling_captions(cues: Vec<Cue>) -> Vec<Cue> {
    let before = cues.len();
    let mut kept = Vec::with_capacity(before);
    let mut previous: Option<Vec<char>> = None;

    for cue in cues {
        let current: Vec<char> = cue.text.chars().collect();
        let overlap = previous
            .as_deref()
            .map(|prev| shared_boundary(prev, &current))
            .unwrap_or(0);

        let remainder: String = current[overlap..].iter().collect();
        let remainder = remainder.trim();

        if remainder.chars().count() <= 1 {
            continue;
        }

        previous = Some(current);
        kept.push(Cue::new(cue.start, cue.end, remainder));
    }

    debug!("Rolling caption cleanup kept {}/{} cues", kept.len(), before);
    kept
}

/// Length of the longest suffix of `previous` that prefixes `current`
fn shared_boundary(previous: &[char], current: &[char]) -> usize {
    let longest = previous.len().min(current.len());
    (MIN_OVERLAP_CHARS..=longest)
        .rev()
        .find(|&k| previous[previous.len() - k..] == current[..k])
        .unwrap_or(0)
}
