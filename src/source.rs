//! Video and subtitle acquisition through yt-dlp, plus local file lookup.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "flv", "avi", "mov"];
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "vtt"];

static ILLEGAL_TITLE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("title pattern is valid"));

static MATCH_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_\-.]+").expect("separator pattern is valid"));

static WORD_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_\-]+").expect("word pattern is valid"));

/// Replace characters that are invalid in file names
pub fn sanitize_title(title: &str) -> String {
    ILLEGAL_TITLE_CHARS.replace_all(title.trim(), "_").to_string()
}

/// Lowercase and drop separators (and the `.NA` marker some sites add)
fn normalize_for_match(text: &str) -> String {
    let lower = text.to_lowercase().replace(".na.", ".");
    MATCH_SEPARATORS.replace_all(&lower, "").to_string()
}

fn title_words(title: &str) -> Vec<String> {
    WORD_SEPARATORS
        .split(&title.to_lowercase())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn modified(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn list_files(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| has_extension(path, extensions) && non_empty_file(path))
        .collect();
    files.sort();
    files
}

/// Language preference of a subtitle file from its dot-separated name tags
pub fn subtitle_lang_priority(file_name: &str) -> u32 {
    let lower = file_name.to_lowercase();
    let tags: Vec<&str> = lower.split('.').skip(1).collect();
    let has = |candidates: &[&str]| tags.iter().any(|tag| candidates.contains(tag));

    if has(&["ai-zh"]) {
        5
    } else if has(&["zh-cn", "zh-hans", "zh-tw", "zh-hant", "zh", "chinese", "cn"])
        || lower.contains("中文")
    {
        4
    } else if has(&["ai-en"]) {
        3
    } else if has(&["en", "en-us", "en-gb", "english"])
        || tags.iter().any(|tag| tag.starts_with("en-"))
        || lower.contains("英文")
    {
        2
    } else {
        1
    }
}

/// Best subtitle in `dir` for `title`, scored by language first and title match second
pub fn find_local_subtitle_file(dir: &Path, title: &str) -> Option<PathBuf> {
    let title_full = title.to_lowercase();
    let title_simple = normalize_for_match(title);
    let words = title_words(title);

    let mut best: Option<(u32, PathBuf)> = None;

    for path in list_files(dir, SUBTITLE_EXTENSIONS) {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let name_lower = file_name.to_lowercase();
        let stem_simple = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(normalize_for_match)
            .unwrap_or_default();

        let match_score = if name_lower.contains(&title_full)
            || (!title_simple.is_empty() && stem_simple.contains(&title_simple))
        {
            2
        } else {
            let matched = words.iter().filter(|w| name_lower.contains(w.as_str())).count();
            if !words.is_empty() && matched >= (words.len() / 2).max(1) {
                1
            } else {
                0
            }
        };
        if match_score == 0 {
            continue;
        }

        let score = subtitle_lang_priority(file_name) * 10 + match_score;
        let better = match &best {
            None => true,
            Some((best_score, best_path)) => {
                score > *best_score
                    || (score == *best_score && modified(&path) > modified(best_path))
            }
        };
        if better {
            best = Some((score, path));
        }
    }

    best.map(|(_, path)| path)
}

/// Local video in `dir` whose name matches `title`
pub fn find_local_video(dir: &Path, title: &str) -> Option<PathBuf> {
    for ext in VIDEO_EXTENSIONS {
        let exact = dir.join(format!("{}.{}", title, ext));
        if non_empty_file(&exact) {
            return Some(exact);
        }
    }

    let title_lower = title.to_lowercase();
    let title_clean = title_lower.replace(' ', "_");
    let words = title_words(title);

    list_files(dir, VIDEO_EXTENSIONS).into_iter().find(|path| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        name.contains(&title_lower)
            || name.contains(&title_clean)
            || (words.len() >= 2 && words.iter().filter(|w| name.contains(w.as_str())).count() >= 2)
    })
}

/// `.srt`/`.vtt` next to a local video with the same stem
pub fn sibling_subtitle(video_path: &Path) -> Option<PathBuf> {
    SUBTITLE_EXTENSIONS
        .iter()
        .map(|ext| video_path.with_extension(ext))
        .find(|candidate| non_empty_file(candidate))
}

/// Subtitle language requested from yt-dlp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleLang {
    AiZh,
    ZhCn,
    ZhTw,
    Zh,
    AiEn,
    En,
    All,
}

impl SubtitleLang {
    pub fn as_arg(&self) -> Option<&'static str> {
        match self {
            Self::AiZh => Some("ai-zh"),
            Self::ZhCn => Some("zh-cn"),
            Self::ZhTw => Some("zh-tw"),
            Self::Zh => Some("zh"),
            Self::AiEn => Some("ai-en"),
            Self::En => Some("en"),
            Self::All => None,
        }
    }

    /// Pick the preferred language from `yt-dlp --list-subs` output
    pub fn from_listing(listing: &str) -> Self {
        let table: [(&str, Self); 6] = [
            (r"(?i)\bai-zh\b", Self::AiZh),
            (r"(?i)\b(zh-cn|zh_cn|chinese)\b", Self::ZhCn),
            (r"(?i)\b(zh-tw|zh_tw)\b", Self::ZhTw),
            (r"(?i)\bzh\b", Self::Zh),
            (r"(?i)\bai-en\b", Self::AiEn),
            (r"(?i)\b(en|english)\b", Self::En),
        ];

        table
            .iter()
            .find(|(pattern, _)| {
                Regex::new(pattern)
                    .map(|re| re.is_match(listing))
                    .unwrap_or(false)
            })
            .map(|(_, lang)| *lang)
            .unwrap_or(Self::All)
    }
}

/// Files resolved for one remote video
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub video: Option<PathBuf>,
    pub subtitle: Option<PathBuf>,
    pub title: String,
}

/// Video and subtitle downloader backed by yt-dlp
pub struct VideoDownloader {
    output_dir: PathBuf,
    cookies_file: Option<PathBuf>,
}

impl VideoDownloader {
    pub fn new(output_dir: PathBuf, cookies_file: Option<PathBuf>) -> Self {
        Self {
            output_dir,
            cookies_file,
        }
    }

    /// Usable cookies file. Missing files are skipped with a warning.
    pub fn cookies(&self) -> Option<&Path> {
        let cookies = self.cookies_file.as_deref()?;
        if cookies.exists() {
            Some(cookies)
        } else {
            warn!(
                "⚠️  Cookies file {} not found, continuing without cookies",
                cookies.display()
            );
            None
        }
    }

    fn ytdlp(&self) -> Command {
        let mut command = Command::new("yt-dlp");
        if let Some(cookies) = self.cookies() {
            command.arg("--cookies").arg(cookies);
        }
        command
    }

    async fn run(&self, mut command: Command, what: &str) -> Result<String> {
        let output = command
            .output()
            .await
            .with_context(|| format!("failed to run yt-dlp ({})", what))?;
        if !output.status.success() {
            return Err(anyhow!(
                "yt-dlp {} failed: {}",
                what,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub async fn check_installed(&self) -> Result<()> {
        let mut command = Command::new("yt-dlp");
        command.arg("--version");
        let version = self
            .run(command, "--version")
            .await
            .context("yt-dlp is required for URL input")?;
        debug!("yt-dlp version {}", version.trim());
        Ok(())
    }

    /// Sanitized video title, `video` when metadata is unavailable
    pub async fn fetch_title(&self, url: &str) -> String {
        let mut command = self.ytdlp();
        command.args(["--dump-json", "--skip-download", url]);

        let title = match self.run(command, "--dump-json").await {
            Ok(json) => serde_json::from_str::<serde_json::Value>(&json)
                .ok()
                .and_then(|info| info["title"].as_str().map(str::to_string)),
            Err(e) => {
                warn!("Failed to read video info: {}, using default title", e);
                None
            }
        };

        let title = sanitize_title(title.as_deref().unwrap_or("video"));
        info!("📹 Video title: {}", title);
        title
    }

    async fn detect_subtitle_lang(&self, url: &str) -> SubtitleLang {
        let mut command = self.ytdlp();
        command.args(["--list-subs", "--skip-download", url]);

        match self.run(command, "--list-subs").await {
            Ok(listing) => {
                let lang = SubtitleLang::from_listing(&listing);
                info!("💬 Subtitle language: {}", lang.as_arg().unwrap_or("all"));
                lang
            }
            Err(e) => {
                warn!("Failed to list subtitles: {}, trying all languages", e);
                SubtitleLang::All
            }
        }
    }

    async fn download_video(&self, url: &str, title: &str) -> Result<PathBuf> {
        let template = self.output_dir.join("%(title)s.%(ext)s");
        let formats = [
            "bestvideo[ext=mp4]/bestvideo[height>=720]/bestvideo",
            "bestvideo[ext=mp4]+worstaudio[ext=m4a]/bestvideo+worstaudio",
        ];

        let mut last_error = None;
        for format in formats {
            info!("⬇️  Downloading video ({})", format);
            let mut command = self.ytdlp();
            command
                .args(["-f", format, "--no-write-subs", "--no-playlist", "-o"])
                .arg(&template)
                .arg(url);

            match self.run(command, "video download").await {
                Ok(_) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    warn!("Video download with {} failed: {}", format, e);
                    last_error = Some(e);
                }
            }
        }
        if let Some(e) = last_error {
            return Err(e);
        }

        if let Some(path) = find_local_video(&self.output_dir, title) {
            return Ok(path);
        }

        // Fall back to the newest video in the directory
        let newest = list_files(&self.output_dir, VIDEO_EXTENSIONS)
            .into_iter()
            .max_by_key(|path| modified(path))
            .ok_or_else(|| anyhow!("downloaded video for '{}' not found", title))?;
        warn!(
            "⚠️  Could not match the title, using newest video {}",
            newest.display()
        );
        Ok(newest)
    }

    async fn download_subtitles(&self, url: &str, lang: SubtitleLang) {
        let template = self.output_dir.join("%(title)s.%(language)s.%(ext)s");
        let mut command = self.ytdlp();
        command.args(["--write-subs", "--write-auto-subs"]);
        if let Some(lang) = lang.as_arg() {
            command.args(["--sub-langs", lang]);
        }
        command
            .args(["--sub-format", "srt", "--skip-download", "-o"])
            .arg(&template)
            .arg(url);

        if let Err(e) = self.run(command, "subtitle download").await {
            warn!("Subtitle download failed: {}", e);
        }
    }

    /// Resolve title, video and subtitle for `url`, reusing matching local files
    pub async fn download(&self, url: &str, skip_video: bool) -> Result<DownloadResult> {
        info!("🌐 Resolving {}", url);
        self.check_installed().await?;
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let title = self.fetch_title(url).await;

        let video = if skip_video {
            None
        } else if let Some(existing) = find_local_video(&self.output_dir, &title) {
            info!("⏭️  Using local video {}", existing.display());
            Some(existing)
        } else {
            Some(self.download_video(url, &title).await?)
        };

        let subtitle = match find_local_subtitle_file(&self.output_dir, &title) {
            Some(existing) => {
                info!("⏭️  Using local subtitle {}", existing.display());
                Some(existing)
            }
            None => {
                let lang = self.detect_subtitle_lang(url).await;
                self.download_subtitles(url, lang).await;
                find_local_subtitle_file(&self.output_dir, &title)
            }
        };

        Ok(DownloadResult {
            video,
            subtitle,
            title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "1\n00:00:01,000 --> 00:00:02,000\nx\n").unwrap();
        path
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("a/b: c?"), "a_b_ c_");
        assert_eq!(sanitize_title(r#"<x>|"y"\z*"#), "_x___y__z_");
    }

    #[test]
    fn test_subtitle_lang_priority() {
        assert_eq!(subtitle_lang_priority("Lecture.NA.ai-zh.srt"), 5);
        assert_eq!(subtitle_lang_priority("Lecture.zh-CN.srt"), 4);
        assert_eq!(subtitle_lang_priority("Lecture.ai-en.srt"), 3);
        assert_eq!(subtitle_lang_priority("Lecture.en-US.srt"), 2);
        assert_eq!(subtitle_lang_priority("Scene rendering.srt"), 1);
    }

    #[test]
    fn test_subtitle_lang_from_listing() {
        let listing = "Language Formats\nai-en srt\nai-zh srt\n";
        assert_eq!(SubtitleLang::from_listing(listing), SubtitleLang::AiZh);
        assert_eq!(SubtitleLang::from_listing("en vtt, srt"), SubtitleLang::En);
        assert_eq!(SubtitleLang::from_listing("fr vtt"), SubtitleLang::All);
    }

    #[test]
    fn test_find_local_subtitle_prefers_language() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "Real-Time Rendering.en.srt");
        let zh = touch(temp_dir.path(), "Real-Time Rendering.NA.ai-zh.srt");
        touch(temp_dir.path(), "Unrelated Talk.ai-zh.srt");

        let found = find_local_subtitle_file(temp_dir.path(), "Real-Time Rendering").unwrap();
        assert_eq!(found, zh);
        assert!(find_local_subtitle_file(temp_dir.path(), "Physics Engines").is_none());
    }

    #[test]
    fn test_find_local_video_exact_and_fuzzy() {
        let temp_dir = TempDir::new().unwrap();
        let exact = touch(temp_dir.path(), "Shadow Mapping.mp4");
        assert_eq!(find_local_video(temp_dir.path(), "Shadow Mapping"), Some(exact));

        let fuzzy = touch(temp_dir.path(), "gdc_volumetric_clouds_talk.webm");
        assert_eq!(
            find_local_video(temp_dir.path(), "Volumetric Clouds in Games"),
            Some(fuzzy)
        );
    }

    #[test]
    fn test_sibling_subtitle() {
        let temp_dir = TempDir::new().unwrap();
        let video = temp_dir.path().join("talk.mp4");
        assert!(sibling_subtitle(&video).is_none());

        let vtt = touch(temp_dir.path(), "talk.vtt");
        assert_eq!(sibling_subtitle(&video), Some(vtt));
    }

    #[test]
    fn test_missing_cookies_fall_back() {
        let downloader = VideoDownloader::new(
            PathBuf::from("downloads"),
            Some(PathBuf::from("/nonexistent/cookies.txt")),
        );
        assert!(downloader.cookies().is_none());
    }
}
