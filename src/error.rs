use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error types for the summarization pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Subtitle input could not be turned into cues. Fatal, no document is produced.
    #[error("Subtitle parse error: {0}")]
    Parse(String),

    /// Invalid sizing or missing source. Reported before any external call.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limiting or a flaky network from an external producer. Retried.
    #[error("{producer} failed transiently: {message}")]
    ProducerTransient { producer: String, message: String },

    /// Persistent producer failure. The owning chunk is marked failed.
    #[error("{producer} failed: {message}")]
    ProducerFatal { producer: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn transient(producer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProducerTransient {
            producer: producer.into(),
            message: message.into(),
        }
    }

    pub fn fatal(producer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProducerFatal {
            producer: producer.into(),
            message: message.into(),
        }
    }

    /// Whether the retry policy may try the call again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ProducerTransient { .. })
    }

    /// Turn a transient failure into a fatal one once retries are exhausted
    pub fn escalate(self, attempts: usize) -> Self {
        match self {
            Self::ProducerTransient { producer, message } => Self::ProducerFatal {
                producer,
                message: format!("{} (gave up after {} attempts)", message, attempts),
            },
            other => other,
        }
    }

    /// Short human-readable reason, used for document placeholders
    pub fn reason(&self) -> String {
        match self {
            Self::ProducerTransient { message, .. } | Self::ProducerFatal { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}
