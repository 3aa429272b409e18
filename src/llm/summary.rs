use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{create_llm, ChatMessage, LLMConfig, LLMError, LLM};
use crate::cache::ArtifactCache;
use crate::error::{PipelineError, Result};

const PRODUCER: &str = "summary";

const DEFAULT_PROMPT: &str = r#"
## Background

You are an expert in computer graphics who explains complex technical material in a clear, structured way to readers who already know the basics and want to go deeper into a recorded lecture.
You are reading a long lecture transcript section by section. This is part ${current}$ of ${total}$.
The reader is a game engine and rendering engineer who wants to master the material of this lecture in depth.

## Requirements

1.  **Task:** Turn the content below into **clear, memorable study notes**.
2.  **Format:**
    * Use a **clear hierarchy** of headings, subheadings and bullet points.
    * **Bold** the **core concepts** and **key terms** of each topic.
    * Highlight **formulas and important algorithms** using standard **LaTeX**.
    * Keep the language **accessible** instead of copying obscure wording from the transcript.
    * **No meta-talk:**
        * Never add opening or closing remarks.
        * Never write headings such as "Part ${current}$" or "Part X" in the body.
        * **Start directly with the first technical heading.**
3. 输出中文！
## Content to Summarize
"#;

/// Position of a chunk in the run, used for "part N of M" references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionInfo {
    pub current: usize,
    pub total: usize,
}

/// Instruction template with `{current}` and `{total}` placeholders
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT)
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Load a template file, falling back to the built-in prompt
    pub async fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            warn!("Prompt file {} not found, using default prompt", path.display());
            return Self::default();
        }

        match tokio::fs::read_to_string(path).await {
            Ok(template) if !template.trim().is_empty() => {
                info!("📝 Using prompt template from {}", path.display());
                Self::new(template)
            }
            Ok(_) => {
                warn!("Prompt file {} is empty, using default prompt", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("Failed to read prompt file {}: {}, using default prompt", path.display(), e);
                Self::default()
            }
        }
    }

    /// Instruction text for one chunk: template, blank line, chunk text
    pub fn render(&self, chunk_text: &str, position: PositionInfo) -> String {
        let instructions = self
            .template
            .replace("{current}", &position.current.to_string())
            .replace("{total}", &position.total.to_string());
        format!("{}\n\n{}", instructions, chunk_text)
    }
}

/// Produces the summary text of one chunk
#[async_trait]
pub trait SummaryProducer: Send + Sync {
    async fn produce(&self, chunk_text: &str, position: PositionInfo) -> Result<String>;

    /// Whether `produce` calls an external service
    fn is_external(&self) -> bool {
        true
    }

    /// Best-effort reachability check of the backing service
    async fn is_available(&self) -> bool {
        true
    }
}

/// Test mode producer: the summary is the literal instruction payload
pub struct DryRunSummaryProducer {
    template: PromptTemplate,
}

impl DryRunSummaryProducer {
    pub fn new(template: PromptTemplate) -> Self {
        Self { template }
    }
}

#[async_trait]
impl SummaryProducer for DryRunSummaryProducer {
    async fn produce(&self, chunk_text: &str, position: PositionInfo) -> Result<String> {
        Ok(self.template.render(chunk_text, position))
    }

    fn is_external(&self) -> bool {
        false
    }
}

/// Summaries from a language model, consulting the summary cache first
pub struct LlmSummaryProducer {
    llm: Arc<dyn LLM>,
    template: PromptTemplate,
    cache: Option<ArtifactCache>,
}

impl LlmSummaryProducer {
    pub fn new(llm: Arc<dyn LLM>, template: PromptTemplate, cache: Option<ArtifactCache>) -> Self {
        Self {
            llm,
            template,
            cache,
        }
    }
}

fn classify(err: LLMError) -> PipelineError {
    if err.is_transient() {
        PipelineError::transient(PRODUCER, err.to_string())
    } else {
        PipelineError::fatal(PRODUCER, err.to_string())
    }
}

#[async_trait]
impl SummaryProducer for LlmSummaryProducer {
    async fn produce(&self, chunk_text: &str, position: PositionInfo) -> Result<String> {
        let prompt = self.template.render(chunk_text, position);
        let cache_key = ArtifactCache::generate_cache_key(self.llm.model(), &prompt);

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.load(&cache_key).await {
                info!(
                    "📚 Using cached summary for part {}/{}",
                    position.current, position.total
                );
                return Ok(entry.summary);
            }
        }

        info!(
            "🤖 Summarizing part {}/{} ({} chars)",
            position.current,
            position.total,
            chunk_text.chars().count()
        );

        let response = self
            .llm
            .chat(vec![ChatMessage::user(prompt)])
            .await
            .map_err(classify)?;

        debug!(
            "Summary for part {} completed (tokens: {:?})",
            position.current, response.tokens_used
        );

        let summary = response.content.trim().to_string();
        if summary.is_empty() {
            return Err(PipelineError::fatal(PRODUCER, "model returned an empty summary"));
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(&cache_key, self.llm.model(), &summary).await {
                warn!("Failed to cache summary for part {}: {}", position.current, e);
            }
        }

        Ok(summary)
    }

    async fn is_available(&self) -> bool {
        self.llm.is_available().await
    }
}

/// Pick the producer for a run. No model client is built in test mode.
pub fn build_summary_producer(
    llm_config: &LLMConfig,
    test_mode: bool,
    template: PromptTemplate,
    cache: Option<ArtifactCache>,
) -> Result<Arc<dyn SummaryProducer>> {
    if test_mode {
        info!("🔧 Test mode: prompts are written instead of calling the model");
        return Ok(Arc::new(DryRunSummaryProducer::new(template)));
    }

    if llm_config.provider.requires_api_key()
        && llm_config
            .api_key
            .as_deref()
            .map_or(true, |key| key.trim().is_empty())
    {
        let env = llm_config.provider.api_key_env().unwrap_or("API key");
        return Err(PipelineError::Config(format!(
            "{:?} requires an API key; set {} or llm.api_key",
            llm_config.provider, env
        )));
    }

    let llm = create_llm(llm_config).map_err(|e| PipelineError::Config(e.to_string()))?;
    info!(
        "✅ Summary producer ready ({:?}, model {})",
        llm_config.provider, llm_config.model
    );
    Ok(Arc::new(LlmSummaryProducer::new(Arc::from(llm), template, cache)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMProvider, LLMResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct ScriptedLLM {
        reply: String,
        calls: AtomicUsize,
        available: bool,
    }

    #[async_trait]
    impl LLM for ScriptedLLM {
        async fn chat(&self, messages: Vec<ChatMessage>) -> crate::llm::Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(messages.len(), 1);
            Ok(LLMResponse {
                content: self.reply.clone(),
                tokens_used: Some(10),
            })
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        fn provider_type(&self) -> LLMProvider {
            LLMProvider::LMStudio
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn position(current: usize, total: usize) -> PositionInfo {
        PositionInfo { current, total }
    }

    #[test]
    fn test_render_fills_position_and_appends_text() {
        let template = PromptTemplate::new("part {current} of {total}");
        let prompt = template.render("chunk body", position(3, 7));
        assert_eq!(prompt, "part 3 of 7\n\nchunk body");
    }

    #[test]
    fn test_default_template_mentions_position() {
        let prompt = PromptTemplate::default().render("x", position(2, 5));
        assert!(prompt.contains("part $2$ of $5$"));
        assert!(prompt.ends_with("\n\nx"));
    }

    #[tokio::test]
    async fn test_dry_run_returns_prompt() {
        let producer = DryRunSummaryProducer::new(PromptTemplate::new("P{current}/{total}"));
        let summary = producer.produce("text", position(1, 2)).await.unwrap();
        assert_eq!(summary, "P1/2\n\ntext");
        assert!(!producer.is_external());
    }

    #[tokio::test]
    async fn test_missing_prompt_file_falls_back() {
        let template = PromptTemplate::load(Some(Path::new("/nonexistent/prompt.md"))).await;
        assert!(template.render("", position(1, 1)).contains("Content to Summarize"));
    }

    #[tokio::test]
    async fn test_llm_producer_uses_cache_on_second_call() {
        let temp_dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedLLM {
            reply: "  ## 笔记\n".to_string(),
            calls: AtomicUsize::new(0),
            available: true,
        });
        let producer = LlmSummaryProducer::new(
            llm.clone(),
            PromptTemplate::default(),
            Some(ArtifactCache::for_output_dir(temp_dir.path())),
        );

        let first = producer.produce("body", position(1, 1)).await.unwrap();
        let second = producer.produce("body", position(1, 1)).await.unwrap();

        assert_eq!(first, "## 笔记");
        assert_eq!(second, first);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_response_is_fatal() {
        let llm = Arc::new(ScriptedLLM {
            reply: "   ".to_string(),
            calls: AtomicUsize::new(0),
            available: true,
        });
        let producer = LlmSummaryProducer::new(llm, PromptTemplate::default(), None);

        let err = producer.produce("body", position(1, 1)).await.unwrap_err();
        assert!(matches!(err, PipelineError::ProducerFatal { .. }));
    }

    #[test]
    fn test_missing_key_is_config_error_outside_test_mode() {
        let config = LLMConfig::default();
        let result = build_summary_producer(&config, false, PromptTemplate::default(), None);
        assert!(matches!(result, Err(PipelineError::Config(_))));

        let dry = build_summary_producer(&config, true, PromptTemplate::default(), None).unwrap();
        assert!(!dry.is_external());
    }

    #[tokio::test]
    async fn test_availability_comes_from_the_model_client() {
        let llm = Arc::new(ScriptedLLM {
            reply: "unused".to_string(),
            calls: AtomicUsize::new(0),
            available: false,
        });
        let producer = LlmSummaryProducer::new(llm.clone(), PromptTemplate::default(), None);

        assert!(producer.is_external());
        assert!(!producer.is_available().await);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);

        let dry = DryRunSummaryProducer::new(PromptTemplate::default());
        assert!(dry.is_available().await);
    }
}
