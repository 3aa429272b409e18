use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x{4e00}-\x{9fff}]|[a-zA-Z0-9]+").expect("token pattern is valid")
});

/// Coarse language tag used to pick chunk sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Cjk,
    NonCjk,
    Unknown,
}

/// Unit in which a chunk profile is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkUnit {
    Characters,
    Words,
}

/// Chunk sizing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkProfile {
    pub chunk_size: usize,
    pub overlap: usize,
    pub unit: ChunkUnit,
}

impl ChunkProfile {
    pub fn cjk_default() -> Self {
        Self {
            chunk_size: 2000,
            overlap: 150,
            unit: ChunkUnit::Characters,
        }
    }

    pub fn non_cjk_default() -> Self {
        Self {
            chunk_size: 1700,
            overlap: 120,
            unit: ChunkUnit::Words,
        }
    }
}

/// Selects a chunk profile from the ratio of CJK ideographs in the text
#[derive(Debug, Clone)]
pub struct LanguageClassifier {
    cjk_ratio_threshold: f64,
    cjk_profile: ChunkProfile,
    non_cjk_profile: ChunkProfile,
}

impl Default for LanguageClassifier {
    fn default() -> Self {
        Self {
            cjk_ratio_threshold: 0.1,
            cjk_profile: ChunkProfile::cjk_default(),
            non_cjk_profile: ChunkProfile::non_cjk_default(),
        }
    }
}

impl LanguageClassifier {
    pub fn new(
        cjk_ratio_threshold: f64,
        cjk_profile: ChunkProfile,
        non_cjk_profile: ChunkProfile,
    ) -> Self {
        Self {
            cjk_ratio_threshold,
            cjk_profile,
            non_cjk_profile,
        }
    }

    pub fn detect(&self, text: &str) -> Language {
        let total = text.chars().count();
        if total == 0 {
            return Language::Unknown;
        }

        let cjk = text.chars().filter(|c| is_cjk_ideograph(*c)).count();
        if cjk as f64 / total as f64 >= self.cjk_ratio_threshold {
            Language::Cjk
        } else {
            Language::NonCjk
        }
    }

    pub fn classify(&self, text: &str) -> (Language, ChunkProfile) {
        let language = self.detect(text);
        let profile = match language {
            Language::Cjk => self.cjk_profile,
            Language::NonCjk | Language::Unknown => self.non_cjk_profile,
        };
        (language, profile)
    }
}

pub fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Count tokens: one per CJK ideograph, one per ASCII alphanumeric run
pub fn count_tokens(text: &str) -> usize {
    TOKEN.find_iter(text).count()
}
