use super::{ChatMessage, LLMConfig, LLMError, LLMProvider, LLMResponse, Result, LLM};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

fn build_client(config: &LLMConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()?)
}

fn require_key(config: &LLMConfig, provider: LLMProvider) -> Result<()> {
    match config.api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => Ok(()),
        _ => Err(LLMError::Configuration(format!(
            "{:?} API key required",
            provider
        ))),
    }
}

/// Map a non-success response to a status error carrying the body
async fn check_status(
    response: reqwest::Response,
    provider: LLMProvider,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(LLMError::Status {
        provider,
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    total_tokens: u32,
}

impl ChatCompletionResponse {
    fn into_response(self, provider: LLMProvider) -> Result<LLMResponse> {
        let tokens_used = self.usage.map(|u| u.total_tokens);
        let content = self
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LLMError::ResponseError(format!("No response from {:?}", provider)))?;

        Ok(LLMResponse {
            content,
            tokens_used,
        })
    }
}

/// LMStudio provider implementation
pub struct LMStudioProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

impl LMStudioProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> &str {
        self.config
            .endpoint
            .as_deref()
            .unwrap_or("http://localhost:1234/v1/chat/completions")
    }
}

#[async_trait]
impl LLM for LMStudioProvider {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse> {
        let endpoint = self.endpoint();
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        debug!("Sending request to LMStudio at {}", endpoint);

        let response = self.client.post(endpoint).json(&request).send().await?;
        let response = check_status(response, LLMProvider::LMStudio).await?;
        let parsed: ChatCompletionResponse = response.json().await?;
        parsed.into_response(LLMProvider::LMStudio)
    }

    async fn is_available(&self) -> bool {
        let health_endpoint = self.endpoint().replace("/v1/chat/completions", "/health");

        match self.client.get(&health_endpoint).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::LMStudio
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Gemini provider implementation
pub struct GeminiProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u32>,
}

impl GeminiProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        require_key(&config, LLMProvider::Gemini)?;
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.endpoint.as_deref().unwrap_or(GEMINI_BASE_URL)
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| LLMError::Configuration("Gemini API key not configured".to_string()))
    }
}

#[async_trait]
impl LLM for GeminiProvider {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse> {
        let api_key = self.api_key()?;

        // Gemini takes a single text part here; role prefixes only for multi-turn input
        let content = if messages.len() == 1 {
            messages
                .into_iter()
                .map(|msg| msg.content)
                .collect::<String>()
        } else {
            messages
                .iter()
                .map(|msg| format!("{}: {}", msg.role, msg.content))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: content }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url(),
            self.config.model,
            api_key
        );

        debug!("Sending request to Gemini API (model {})", self.config.model);

        let response = self.client.post(&url).json(&request).send().await?;
        let response = check_status(response, LLMProvider::Gemini).await?;
        let gemini_response: GeminiResponse = response.json().await?;

        let content = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| LLMError::ResponseError("No response from Gemini".to_string()))?;

        let tokens_used = gemini_response
            .usage_metadata
            .and_then(|u| u.total_token_count);

        Ok(LLMResponse {
            content,
            tokens_used,
        })
    }

    async fn is_available(&self) -> bool {
        let Ok(api_key) = self.api_key() else {
            return false;
        };
        let url = format!("{}/models?key={}", self.base_url(), api_key);

        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::Gemini
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// OpenAI provider implementation
pub struct OpenAIProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        require_key(&config, LLMProvider::OpenAI)?;
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| LLMError::Configuration("OpenAI API key not configured".to_string()))
    }
}

#[async_trait]
impl LLM for OpenAIProvider {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<LLMResponse> {
        let api_key = self.api_key()?;
        let url = self.config.endpoint.as_deref().unwrap_or(OPENAI_CHAT_URL);

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        debug!("Sending request to OpenAI API (model {})", self.config.model);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await?;
        let response = check_status(response, LLMProvider::OpenAI).await?;
        let parsed: ChatCompletionResponse = response.json().await?;
        parsed.into_response(LLMProvider::OpenAI)
    }

    async fn is_available(&self) -> bool {
        let Ok(api_key) = self.api_key() else {
            return false;
        };

        match self
            .client
            .get("https://api.openai.com/v1/models")
            .header("Authorization", format!("Bearer {}", api_key))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::OpenAI
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_response_parsing() {
        let body = r###"{
            "candidates": [{"content": {"parts": [{"text": "## 渲染"}, {"text": "管线"}]}}],
            "usageMetadata": {"totalTokenCount": 42}
        }"###;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        let text: String = parsed.candidates[0]
            .content
            .as_ref()
            .unwrap()
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();
        assert_eq!(text, "## 渲染管线");
        assert_eq!(parsed.usage_metadata.unwrap().total_token_count, Some(42));
    }

    #[test]
    fn test_chat_completion_without_choices_is_error() {
        let parsed: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": [], "usage": null}"#).unwrap();
        assert!(matches!(
            parsed.into_response(LLMProvider::OpenAI),
            Err(LLMError::ResponseError(_))
        ));
    }

    #[test]
    fn test_blank_key_is_rejected() {
        let config = LLMConfig {
            provider: LLMProvider::OpenAI,
            api_key: Some("   ".to_string()),
            ..LLMConfig::default()
        };
        assert!(OpenAIProvider::new(config).is_err());
    }
}
