//! Shared operation layer for every interface (worker thread, CLI).
//!
//! A [`Session`] owns the loaded dataset and answers one [`Request`] at a
//! time through a single exhaustive `match`. Each `op_*` function is a pure,
//! synchronous wrapper around the `algo` modules that turns typed results
//! into `serde_json::Value`. No dependency on tokio or clap.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::algo::aggregate::AggregationEngine;
use crate::algo::categories::{CategoryKey, DocumentCategoryIndex};
use crate::algo::sparse::{MatrixPayload, SparseColumnMatrix};
use crate::algo::topk::Strategy;
use crate::algo::words::{TopicWords, TopicWordsPayload};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::protocol::{Missing, Request, Response};

/// Successful outcome of an operation: a value, or a note that the data it
/// needs has not been loaded yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ready(Value),
    NotReady(Missing),
}

fn ready(value: impl serde::Serialize) -> Result<Reply, EngineError> {
    Ok(Reply::Ready(serde_json::to_value(value)?))
}

// ── Session ──────────────────────────────────────────────────────────────────

/// Everything loaded for one topic model.
///
/// Loading a matrix always builds a new [`AggregationEngine`], so memoized
/// sums and conditional caches never outlive the data they came from.
/// Category indexes are kept here too and installed into every engine built
/// after them, which lets metadata arrive before or after the matrix.
pub struct Session {
    config: EngineConfig,
    engine: Option<AggregationEngine>,
    categories: HashMap<String, Arc<DocumentCategoryIndex>>,
    words: Option<TopicWords>,
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            engine: None,
            categories: HashMap::new(),
            words: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine(&self) -> Option<&AggregationEngine> {
        self.engine.as_ref()
    }

    /// Answer one request. Never panics on caller input: contract breaches
    /// come back as `error` responses.
    pub fn dispatch(&mut self, request: Request) -> Response {
        let key = request.key();
        tracing::debug!(key = %key, "dispatching request");

        let outcome = match request {
            // -- Loading -------------------------------------------------
            Request::LoadMatrix { dt } => self.op_load_matrix(dt),
            Request::LoadCategories { variable, keys } => self.op_load_categories(variable, keys),
            Request::LoadTopicWords { tw } => self.op_load_topic_words(tw),

            // -- Totals --------------------------------------------------
            Request::MatrixInfo => self.with_engine(|e| op_matrix_info(e, &self.config)),
            Request::TotalTokens => self.with_engine(|e| ready(e.total_tokens())),
            Request::TopicTotal { topic } => self.with_engine(|e| op_topic_total(e, topic)),

            // -- Conditional aggregates ----------------------------------
            Request::TopicConditional { variable, topic } => {
                self.with_engine_mut(|e| op_topic_conditional(e, &variable, topic))
            }
            Request::ConditionalTotal { variable, key } => {
                self.with_engine_mut(|e| op_conditional_total(e, &variable, key.as_ref()))
            }

            // -- Rankings ------------------------------------------------
            Request::TopicDocs { topic, n } => self.with_engine(|e| ready(e.topic_docs(topic, n)?)),
            Request::TopicDocsConditional {
                topic,
                variable,
                key,
                n,
            } => self.with_engine(|e| op_topic_docs_conditional(e, topic, &variable, &key, n)),
            Request::DocTopics { doc, n } => self.with_engine(|e| ready(e.doc_topics(doc, n))),

            // -- Topic words ---------------------------------------------
            Request::TopicWords { topic, n } => self.with_words(|w| op_topic_words(w, topic, n)),
            Request::WordTopics { word, n } => self.with_words(|w| ready(w.word_topics(&word, n))),
        };

        match outcome {
            Ok(Reply::Ready(value)) => Response::ok(key, value),
            Ok(Reply::NotReady(missing)) => {
                tracing::debug!(key = %key, ?missing, "request not ready");
                Response::not_ready(key, &missing)
            }
            Err(e) => {
                tracing::error!(key = %key, code = e.code(), error = %e, "request failed");
                Response::error(key, &e)
            }
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    fn with_engine<F>(&self, f: F) -> Result<Reply, EngineError>
    where
        F: FnOnce(&AggregationEngine) -> Result<Reply, EngineError>,
    {
        match &self.engine {
            Some(e) => f(e),
            None => Ok(Reply::NotReady(Missing::Matrix)),
        }
    }

    fn with_engine_mut<F>(&mut self, f: F) -> Result<Reply, EngineError>
    where
        F: FnOnce(&mut AggregationEngine) -> Result<Reply, EngineError>,
    {
        match &mut self.engine {
            Some(e) => f(e),
            None => Ok(Reply::NotReady(Missing::Matrix)),
        }
    }

    fn with_words<F>(&self, f: F) -> Result<Reply, EngineError>
    where
        F: FnOnce(&TopicWords) -> Result<Reply, EngineError>,
    {
        match &self.words {
            Some(w) => f(w),
            None => Ok(Reply::NotReady(Missing::TopicWords)),
        }
    }

    // ── Loading ───────────────────────────────────────────────────────────

    fn op_load_matrix(&mut self, dt: MatrixPayload) -> Result<Reply, EngineError> {
        let matrix = SparseColumnMatrix::from_payload(dt)?;
        let mut engine = AggregationEngine::new(matrix).with_strategy(Strategy::Auto {
            insertion_ratio: self.config.insertion_ratio,
        });
        for (variable, index) in &self.categories {
            engine.set_categories(variable, Arc::clone(index));
        }

        let m = engine.matrix();
        let proper = m.is_proper(self.config.proper_tolerance);
        tracing::info!(
            n_docs = m.n_docs(),
            n_topics = m.n_topics(),
            nnz = m.nnz(),
            proper,
            "document-topic matrix loaded"
        );
        let reply = json!({
            "success": true,
            "proper": proper,
            "n_docs": m.n_docs(),
            "n_topics": m.n_topics(),
        });
        self.engine = Some(engine);
        Ok(Reply::Ready(reply))
    }

    fn op_load_categories(
        &mut self,
        variable: String,
        keys: DocumentCategoryIndex,
    ) -> Result<Reply, EngineError> {
        let len = keys.len();
        let index = Arc::new(keys);
        if let Some(engine) = &mut self.engine {
            engine.set_categories(&variable, Arc::clone(&index));
        }
        tracing::info!(variable = %variable, docs = len, "category index loaded");
        self.categories.insert(variable, index);
        ready(json!({ "success": true, "len": len }))
    }

    fn op_load_topic_words(&mut self, tw: TopicWordsPayload) -> Result<Reply, EngineError> {
        let words = TopicWords::from_payload(tw)?;
        let n_topics = words.n_topics();
        if let Some(engine) = &self.engine {
            if engine.matrix().n_topics() != n_topics {
                tracing::warn!(
                    words_topics = n_topics,
                    matrix_topics = engine.matrix().n_topics(),
                    "topic-word payload and matrix disagree on topic count"
                );
            }
        }
        tracing::info!(n_topics, "topic words loaded");
        self.words = Some(words);
        ready(json!({ "success": true, "n_topics": n_topics }))
    }
}

// ── Operations ───────────────────────────────────────────────────────────────

pub fn op_matrix_info(engine: &AggregationEngine, config: &EngineConfig) -> Result<Reply, EngineError> {
    let m = engine.matrix();
    ready(json!({
        "n_docs": m.n_docs(),
        "n_topics": m.n_topics(),
        "nnz": m.nnz(),
        "total_tokens": m.total(),
        "proper": m.is_proper(config.proper_tolerance),
    }))
}

pub fn op_topic_total(engine: &AggregationEngine, topic: Option<usize>) -> Result<Reply, EngineError> {
    match topic {
        Some(t) => ready(engine.topic_total(t)?),
        None => ready(engine.topic_totals()),
    }
}

pub fn op_topic_conditional(
    engine: &mut AggregationEngine,
    variable: &str,
    topic: Option<usize>,
) -> Result<Reply, EngineError> {
    let result = match topic {
        Some(t) => engine
            .topic_conditional(t, variable)?
            .map(serde_json::to_value)
            .transpose()?,
        None => engine
            .topic_conditionals(variable)?
            .map(serde_json::to_value)
            .transpose()?,
    };
    Ok(match result {
        Some(value) => Reply::Ready(value),
        None => Reply::NotReady(Missing::Categories(variable.to_string())),
    })
}

pub fn op_conditional_total(
    engine: &mut AggregationEngine,
    variable: &str,
    key: Option<&CategoryKey>,
) -> Result<Reply, EngineError> {
    let result = match key {
        Some(k) => engine.conditional_total(variable, k).map(Value::from),
        None => engine
            .conditional_totals(variable)
            .map(serde_json::to_value)
            .transpose()?,
    };
    Ok(match result {
        Some(value) => Reply::Ready(value),
        None => Reply::NotReady(Missing::Categories(variable.to_string())),
    })
}

pub fn op_topic_docs_conditional(
    engine: &AggregationEngine,
    topic: usize,
    variable: &str,
    key: &CategoryKey,
    n: usize,
) -> Result<Reply, EngineError> {
    match engine.topic_docs_conditional(topic, variable, key, n)? {
        Some(docs) => ready(docs),
        None => Ok(Reply::NotReady(Missing::Categories(variable.to_string()))),
    }
}

pub fn op_topic_words(words: &TopicWords, topic: Option<usize>, n: usize) -> Result<Reply, EngineError> {
    match topic {
        Some(t) => ready(words.topic_words(t, n)?),
        None => ready(words.all_topic_words(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;

    #[test]
    fn queries_before_loading_are_not_ready() {
        let mut session = Session::new(EngineConfig::default());
        let r = session.dispatch(Request::TotalTokens);
        assert_eq!(r.status, Status::NotReady);
        assert_eq!(r.result["missing"], "matrix");

        let r = session.dispatch(Request::WordTopics {
            word: "war".into(),
            n: 3,
        });
        assert_eq!(r.status, Status::NotReady);
        assert_eq!(r.result["missing"], "topic_words");
    }

    #[test]
    fn malformed_matrix_keeps_previous_engine() {
        let mut session = Session::new(EngineConfig::default());
        let good = MatrixPayload {
            row_index: vec![0],
            col_ptr: vec![0, 1],
            values: vec![2.0],
        };
        assert!(session.dispatch(Request::LoadMatrix { dt: good }).is_ok());

        let bad = MatrixPayload {
            row_index: vec![0],
            col_ptr: vec![0, 5],
            values: vec![2.0],
        };
        let r = session.dispatch(Request::LoadMatrix { dt: bad });
        assert_eq!(r.status, Status::Error);
        assert_eq!(r.result["code"], "MALFORMED_MATRIX");

        let r = session.dispatch(Request::TotalTokens);
        assert_eq!(r.result, json!(2.0));
    }
}
