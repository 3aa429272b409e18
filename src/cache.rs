//! On-disk cache of chunk summaries, consulted before each model call
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Directory under the output directory holding cached summaries
pub const SUMMARY_CACHE_DIR: &str = ".summary_cache";

/// One cached summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSummary {
    /// Cache timestamp
    pub timestamp: u64,
    pub cache_key: String,
    pub model: String,
    pub summary: String,
}

/// Cache statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    pub total_files: usize,
    pub valid_files: usize,
    pub corrupt_files: usize,
    pub total_bytes: u64,
}

/// Summary cache keyed by the md5 of (model, prompt)
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    cache_dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Cache rooted in the standard directory under `output_dir`
    pub fn for_output_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(SUMMARY_CACHE_DIR))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        debug!("Summary cache directory: {}", self.cache_dir.display());
        Ok(())
    }

    pub fn generate_cache_key(model: &str, prompt: &str) -> String {
        let mut context = md5::Context::new();
        context.consume(model.as_bytes());
        context.consume([0u8]);
        context.consume(prompt.as_bytes());
        format!("{:x}", context.compute())
    }

    fn entry_path(&self, cache_key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", cache_key))
    }

    /// Load a cached summary. Unreadable entries count as misses.
    pub async fn load(&self, cache_key: &str) -> Option<CachedSummary> {
        let path = self.entry_path(cache_key);
        if !path.exists() {
            debug!("Cache miss: no entry for key {}", cache_key);
            return None;
        }

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<CachedSummary>(&content) {
                Ok(entry) if !entry.summary.trim().is_empty() => {
                    debug!("Cache hit for key {}", cache_key);
                    Some(entry)
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("Failed to parse cache file {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read cache file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Store a summary. Written to a temporary file first so readers never see partial entries.
    pub async fn save(&self, cache_key: &str, model: &str, summary: &str) -> Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let entry = CachedSummary {
            timestamp,
            cache_key: cache_key.to_string(),
            model: model.to_string(),
            summary: summary.to_string(),
        };
        let json_content = serde_json::to_string_pretty(&entry)?;

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let cache_dir = self.cache_dir.clone();
        let target = self.entry_path(cache_key);

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut staged = tempfile::NamedTempFile::new_in(&cache_dir)?;
            std::io::Write::write_all(&mut staged, json_content.as_bytes())?;
            staged.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;

        debug!("💾 Cached summary under key {}", cache_key);
        Ok(())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        if !self.cache_dir.exists() {
            return Ok(stats);
        }

        let mut entries = tokio::fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                stats.total_files += 1;
                stats.total_bytes += entry.metadata().await.map(|m| m.len()).unwrap_or(0);

                let parsed = tokio::fs::read_to_string(&path)
                    .await
                    .ok()
                    .and_then(|content| serde_json::from_str::<CachedSummary>(&content).ok());
                match parsed {
                    Some(_) => stats.valid_files += 1,
                    None => stats.corrupt_files += 1,
                }
            }
        }

        Ok(stats)
    }

    /// Remove every cached entry
    pub async fn clear(&self) -> Result<usize> {
        if !self.cache_dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && tokio::fs::remove_file(&path).await.is_ok()
            {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("🧹 Cleared {} cached summaries", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_key_depends_on_model_and_prompt() {
        let a = ArtifactCache::generate_cache_key("gemini-2.5-pro", "prompt");
        let b = ArtifactCache::generate_cache_key("gemini-2.5-flash", "prompt");
        let c = ArtifactCache::generate_cache_key("gemini-2.5-pro", "prompt");

        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ArtifactCache::for_output_dir(temp_dir.path());
        let key = ArtifactCache::generate_cache_key("m", "p");

        assert!(cache.load(&key).await.is_none());
        cache.save(&key, "m", "## 笔记").await.unwrap();

        let entry = cache.load(&key).await.unwrap();
        assert_eq!(entry.summary, "## 笔记");
        assert_eq!(entry.model, "m");

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.valid_files, 1);

        assert_eq!(cache.clear().await.unwrap(), 1);
        assert!(cache.load(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ArtifactCache::for_output_dir(temp_dir.path());
        cache.initialize().await.unwrap();
        tokio::fs::write(cache.cache_dir().join("broken.json"), "{not json")
            .await
            .unwrap();

        assert!(cache.load("broken").await.is_none());
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.corrupt_files, 1);
    }
}
