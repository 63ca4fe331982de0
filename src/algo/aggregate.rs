//! Derived aggregates over the document-topic matrix.
//!
//! The engine owns one matrix plus the category indexes registered against
//! it. Everything that conditions on a category variable is computed in a
//! single pass over the relevant stored entries and cached per variable;
//! installing a new index for a variable drops that variable's caches.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::categories::{CategoryKey, DocumentCategoryIndex};
use super::sparse::SparseColumnMatrix;
use super::topk::{top_k, Order, Strategy};
use crate::error::EngineError;

/// Category key → aggregated weight (or proportion).
pub type CategoryWeights = BTreeMap<CategoryKey, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DocTopic {
    pub topic: usize,
    pub weight: f64,
}

/// A document ranked within a topic. `frac` is the topic's share of the
/// document's total weight, which is what the ranking uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TopicDoc {
    pub doc: usize,
    pub weight: f64,
    pub frac: f64,
}

pub struct AggregationEngine {
    matrix: SparseColumnMatrix,
    strategy: Strategy,
    categories: HashMap<String, Arc<DocumentCategoryIndex>>,
    conditional_totals: HashMap<String, CategoryWeights>,
    topic_conditionals: HashMap<String, Vec<Option<CategoryWeights>>>,
}

impl AggregationEngine {
    pub fn new(matrix: SparseColumnMatrix) -> Self {
        Self {
            matrix,
            strategy: Strategy::default(),
            categories: HashMap::new(),
            conditional_totals: HashMap::new(),
            topic_conditionals: HashMap::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.strategy = strategy;
    }

    pub fn matrix(&self) -> &SparseColumnMatrix {
        &self.matrix
    }

    /// Register (or replace) the category index for `variable`.
    pub fn set_categories(&mut self, variable: &str, index: Arc<DocumentCategoryIndex>) {
        if index.len() < self.matrix.n_docs() {
            tracing::error!(
                variable,
                index_len = index.len(),
                n_docs = self.matrix.n_docs(),
                "category index shorter than the matrix; uncovered documents are excluded"
            );
        }
        self.conditional_totals.remove(variable);
        self.topic_conditionals.remove(variable);
        self.categories.insert(variable.to_string(), index);
    }

    pub fn has_variable(&self, variable: &str) -> bool {
        self.categories.contains_key(variable)
    }

    // ── Totals ────────────────────────────────────────────────────────────

    pub fn total_tokens(&self) -> f64 {
        self.matrix.total()
    }

    pub fn topic_total(&self, topic: usize) -> Result<f64, EngineError> {
        self.matrix.column_sum(topic)
    }

    pub fn topic_totals(&self) -> Vec<f64> {
        self.matrix.column_sums()
    }

    // ── Rankings ──────────────────────────────────────────────────────────

    /// Topics present in `doc`, heaviest first (ties by topic index).
    pub fn doc_topics(&self, doc: usize, k: usize) -> Vec<DocTopic> {
        // Column compression gives no cheap row access: one bisection per topic.
        let topics: Vec<DocTopic> = self
            .matrix
            .row(doc)
            .into_iter()
            .enumerate()
            .filter(|&(_, weight)| weight > 0.0)
            .map(|(topic, weight)| DocTopic { topic, weight })
            .collect();
        top_k(topics, k, |d| d.weight, |d| d.topic, Order::Descending, self.strategy)
    }

    /// Documents ranked by the topic's share of their total weight.
    pub fn topic_docs(&self, topic: usize, k: usize) -> Result<Vec<TopicDoc>, EngineError> {
        self.rank_topic_docs(topic, k, |_| true)
    }

    /// As [`topic_docs`](Self::topic_docs), restricted to documents whose
    /// `variable` key equals `key`. `Ok(None)` when `variable` has no index.
    pub fn topic_docs_conditional(
        &self,
        topic: usize,
        variable: &str,
        key: &CategoryKey,
        k: usize,
    ) -> Result<Option<Vec<TopicDoc>>, EngineError> {
        let Some(index) = self.categories.get(variable) else {
            return Ok(None);
        };
        self.rank_topic_docs(topic, k, |doc| index.key(doc) == Some(key))
            .map(Some)
    }

    fn rank_topic_docs<F>(&self, topic: usize, k: usize, keep: F) -> Result<Vec<TopicDoc>, EngineError>
    where
        F: Fn(usize) -> bool,
    {
        let column = self.matrix.column(topic)?;
        let docs: Vec<TopicDoc> = column
            .iter()
            .filter(|&(doc, _)| keep(doc))
            .map(|(doc, weight)| TopicDoc {
                doc,
                weight,
                frac: weight / self.matrix.row_sum(doc),
            })
            .collect();
        Ok(top_k(docs, k, |d| d.frac, |d| d.doc, Order::Descending, self.strategy))
    }

    // ── Conditional aggregates ────────────────────────────────────────────

    /// Total weight per category over all topics. `None` when `variable`
    /// has no index.
    pub fn conditional_totals(&mut self, variable: &str) -> Option<CategoryWeights> {
        self.totals_for(variable).cloned()
    }

    /// Total weight of one category; 0 for a key no document carries.
    pub fn conditional_total(&mut self, variable: &str, key: &CategoryKey) -> Option<f64> {
        self.totals_for(variable)
            .map(|totals| totals.get(key).copied().unwrap_or(0.0))
    }

    fn totals_for(&mut self, variable: &str) -> Option<&CategoryWeights> {
        let index = self.categories.get(variable)?;
        if !self.conditional_totals.contains_key(variable) {
            let mut totals = CategoryWeights::new();
            for (doc, _, x) in self.matrix.entries() {
                if let Some(key) = index.key(doc) {
                    *totals.entry(key.clone()).or_insert(0.0) += x;
                }
            }
            tracing::debug!(variable, categories = totals.len(), "conditional totals cached");
            self.conditional_totals.insert(variable.to_string(), totals);
        }
        self.conditional_totals.get(variable)
    }

    /// Share of each category's total weight that falls in `topic`.
    pub fn topic_conditional(
        &mut self,
        topic: usize,
        variable: &str,
    ) -> Result<Option<CategoryWeights>, EngineError> {
        let n_topics = self.matrix.n_topics();
        let column = self.matrix.column(topic)?;
        let Some(index) = self.categories.get(variable).cloned() else {
            return Ok(None);
        };
        if let Some(Some(cached)) = self
            .topic_conditionals
            .get(variable)
            .and_then(|per_topic| per_topic.get(topic))
        {
            return Ok(Some(cached.clone()));
        }

        let mut sums = CategoryWeights::new();
        for (doc, x) in column.iter() {
            if let Some(key) = index.key(doc) {
                *sums.entry(key.clone()).or_insert(0.0) += x;
            }
        }

        let totals = self.totals_for(variable).cloned().unwrap_or_default();
        let proportions = divide_by_totals(sums, &totals, variable)?;

        let per_topic = self
            .topic_conditionals
            .entry(variable.to_string())
            .or_insert_with(|| vec![None; n_topics]);
        per_topic[topic] = Some(proportions.clone());
        Ok(Some(proportions))
    }

    /// [`topic_conditional`](Self::topic_conditional) for every topic, from a
    /// single pass over all stored entries.
    pub fn topic_conditionals(
        &mut self,
        variable: &str,
    ) -> Result<Option<Vec<CategoryWeights>>, EngineError> {
        let Some(index) = self.categories.get(variable).cloned() else {
            return Ok(None);
        };
        if let Some(per_topic) = self.topic_conditionals.get(variable) {
            if per_topic.iter().all(Option::is_some) {
                return Ok(Some(per_topic.iter().flatten().cloned().collect()));
            }
        }

        let mut sums = vec![CategoryWeights::new(); self.matrix.n_topics()];
        for (doc, topic, x) in self.matrix.entries() {
            if let Some(key) = index.key(doc) {
                *sums[topic].entry(key.clone()).or_insert(0.0) += x;
            }
        }

        let totals = self.totals_for(variable).cloned().unwrap_or_default();
        let proportions = sums
            .into_par_iter()
            .map(|topic_sums| divide_by_totals(topic_sums, &totals, variable))
            .collect::<Result<Vec<_>, _>>()?;

        self.topic_conditionals.insert(
            variable.to_string(),
            proportions.iter().cloned().map(Some).collect(),
        );
        tracing::debug!(variable, topics = proportions.len(), "topic conditionals cached");
        Ok(Some(proportions))
    }
}

fn divide_by_totals(
    sums: CategoryWeights,
    totals: &CategoryWeights,
    variable: &str,
) -> Result<CategoryWeights, EngineError> {
    sums.into_iter()
        .map(|(key, sum)| {
            let total = totals.get(&key).copied().unwrap_or(0.0);
            if total == 0.0 {
                tracing::error!(variable, key = %key, "zero total for a category present in the data");
                return Err(EngineError::ZeroCategoryTotal {
                    variable: variable.to_string(),
                    key: key.to_string(),
                });
            }
            Ok((key, sum / total))
        })
        .collect()
}
