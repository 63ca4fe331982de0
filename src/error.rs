use thiserror::Error;

/// Typed errors for the matrix engine and its worker.
///
/// Every variant except `Io`/`Json`/`Config` marks a broken contract between
/// the loader (or caller) and the engine; none of them is retried.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Topic index {topic} out of range (model has {n_topics} topics)")]
    TopicOutOfRange { topic: usize, n_topics: usize },

    #[error("Malformed document-topic matrix: {0}")]
    MalformedMatrix(String),

    #[error("Malformed topic-word payload: {0}")]
    MalformedTopicWords(String),

    #[error("Category '{key}' of variable '{variable}' has a zero total weight")]
    ZeroCategoryTotal { variable: String, key: String },

    #[error("Worker has shut down")]
    WorkerClosed,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Machine-readable error code carried in `error` responses.
    pub fn code(&self) -> &str {
        match self {
            Self::TopicOutOfRange { .. } => "TOPIC_OUT_OF_RANGE",
            Self::MalformedMatrix(_) => "MALFORMED_MATRIX",
            Self::MalformedTopicWords(_) => "MALFORMED_TOPIC_WORDS",
            Self::ZeroCategoryTotal { .. } => "ZERO_CATEGORY_TOTAL",
            Self::WorkerClosed => "WORKER_CLOSED",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = EngineError::TopicOutOfRange { topic: 9, n_topics: 3 };
        assert_eq!(err.code(), "TOPIC_OUT_OF_RANGE");
        assert_eq!(err.to_string(), "Topic index 9 out of range (model has 3 topics)");
    }

    #[test]
    fn to_json_carries_code_and_message() {
        let err = EngineError::ZeroCategoryTotal {
            variable: "year".into(),
            key: "1999".into(),
        };
        let json = err.to_json();
        assert_eq!(json["code"], "ZERO_CATEGORY_TOTAL");
        assert!(json["message"].as_str().unwrap().contains("1999"));
    }
}
