//! Wire types for the query worker.
//!
//! A request is a JSON object tagged by `kind`; every request produces one
//! response `{ "key", "status", "result" }`. The key is derived from the
//! request's kind and parameters (`topic_docs/3/20`, `topic_total/all`, ...)
//! so a caller with several requests in flight can route each response back
//! to whoever asked.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::algo::categories::{CategoryKey, DocumentCategoryIndex};
use crate::algo::sparse::MatrixPayload;
use crate::algo::words::TopicWordsPayload;
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    /// Replace the document-topic matrix. Builds a fresh engine.
    LoadMatrix { dt: MatrixPayload },
    /// Install the per-document keys of one conditioning variable.
    LoadCategories {
        variable: String,
        keys: DocumentCategoryIndex,
    },
    LoadTopicWords { tw: TopicWordsPayload },
    MatrixInfo,
    TotalTokens,
    TopicTotal {
        #[serde(default, with = "scope")]
        topic: Option<usize>,
    },
    TopicConditional {
        variable: String,
        #[serde(default, with = "scope")]
        topic: Option<usize>,
    },
    ConditionalTotal {
        variable: String,
        #[serde(default, with = "scope")]
        key: Option<CategoryKey>,
    },
    TopicDocs { topic: usize, n: usize },
    TopicDocsConditional {
        topic: usize,
        variable: String,
        key: CategoryKey,
        n: usize,
    },
    DocTopics { doc: usize, n: usize },
    TopicWords {
        #[serde(default, with = "scope")]
        topic: Option<usize>,
        n: usize,
    },
    WordTopics { word: String, n: usize },
}

fn scoped<T: Display>(x: &Option<T>) -> String {
    match x {
        Some(x) => x.to_string(),
        None => "all".into(),
    }
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LoadMatrix { .. } => "load_matrix",
            Self::LoadCategories { .. } => "load_categories",
            Self::LoadTopicWords { .. } => "load_topic_words",
            Self::MatrixInfo => "matrix_info",
            Self::TotalTokens => "total_tokens",
            Self::TopicTotal { .. } => "topic_total",
            Self::TopicConditional { .. } => "topic_conditional",
            Self::ConditionalTotal { .. } => "conditional_total",
            Self::TopicDocs { .. } => "topic_docs",
            Self::TopicDocsConditional { .. } => "topic_docs_conditional",
            Self::DocTopics { .. } => "doc_topics",
            Self::TopicWords { .. } => "topic_words",
            Self::WordTopics { .. } => "word_topics",
        }
    }

    /// Routing key: the kind followed by each parameter, `/`-separated.
    pub fn key(&self) -> String {
        let kind = self.kind();
        match self {
            Self::LoadMatrix { .. }
            | Self::LoadTopicWords { .. }
            | Self::MatrixInfo
            | Self::TotalTokens => kind.to_string(),
            Self::LoadCategories { variable, .. } => format!("{kind}/{variable}"),
            Self::TopicTotal { topic } => format!("{kind}/{}", scoped(topic)),
            Self::TopicConditional { variable, topic } => {
                format!("{kind}/{variable}/{}", scoped(topic))
            }
            Self::ConditionalTotal { variable, key } => {
                format!("{kind}/{variable}/{}", scoped(key))
            }
            Self::TopicDocs { topic, n } => format!("{kind}/{topic}/{n}"),
            Self::TopicDocsConditional {
                topic,
                variable,
                key,
                n,
            } => format!("{kind}/{topic}/{variable}/{key}/{n}"),
            Self::DocTopics { doc, n } => format!("{kind}/{doc}/{n}"),
            Self::TopicWords { topic, n } => format!("{kind}/{}/{n}", scoped(topic)),
            Self::WordTopics { word, n } => format!("{kind}/{word}/{n}"),
        }
    }

    /// Parse one wire line. A line that is not a valid request still gets a
    /// response: an `error` keyed by its `kind` when one can be read, else by
    /// `"error"`.
    pub fn from_line(line: &str) -> Result<Self, Response> {
        serde_json::from_str(line).map_err(|e| {
            let key = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|v| v.get("kind")?.as_str().map(str::to_string))
                .unwrap_or_else(|| "error".to_string());
            Response::error(key, &EngineError::Json(e))
        })
    }
}

/// `"all"`, `null` or a missing field select the whole scope (`None`).
mod scope {
    use serde::de::{DeserializeOwned, Error};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn serialize<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(v) => v.serialize(serializer),
            None => serializer.serialize_str("all"),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s == "all" => Ok(None),
            Some(v) => serde_json::from_value(v).map(Some).map_err(D::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    /// The data a request depends on has not been loaded yet; retry later.
    NotReady,
    Error,
}

/// What a not-ready request is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Matrix,
    Categories(String),
    TopicWords,
}

impl Missing {
    fn to_json(&self) -> Value {
        match self {
            Self::Matrix => serde_json::json!({ "missing": "matrix" }),
            Self::Categories(variable) => {
                serde_json::json!({ "missing": "categories", "variable": variable })
            }
            Self::TopicWords => serde_json::json!({ "missing": "topic_words" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub key: String,
    pub status: Status,
    #[serde(default)]
    pub result: Value,
}

impl Response {
    pub fn ok(key: String, result: Value) -> Self {
        Self {
            key,
            status: Status::Ok,
            result,
        }
    }

    pub fn not_ready(key: String, missing: &Missing) -> Self {
        Self {
            key,
            status: Status::NotReady,
            result: missing.to_json(),
        }
    }

    pub fn error(key: String, err: &EngineError) -> Self {
        Self {
            key,
            status: Status::Error,
            result: err.to_json(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}
