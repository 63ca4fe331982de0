//! Compressed sparse column (CSC) storage for the document-topic matrix.
//!
//! Columns are topics, rows are documents. Column `t` owns the index range
//! `col_ptr[t]..col_ptr[t + 1]` of `row_index` / `values`, and the rows inside
//! that range are strictly increasing. Any (doc, topic) pair not stored is 0.
//!
//! The stored arrays never change after construction. Row sums, column sums
//! and the grand total are derived lazily and kept in once-cells; the only
//! way to drop them is [`SparseColumnMatrix::invalidate_sums`], which needs
//! `&mut self`.

use std::cell::OnceCell;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// The matrix as supplied by the loader (a parsed JSON object).
///
/// The short keys `i` / `p` / `x` written by older model exporters are
/// accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixPayload {
    #[serde(alias = "i")]
    pub row_index: Vec<usize>,
    #[serde(alias = "p")]
    pub col_ptr: Vec<usize>,
    #[serde(alias = "x")]
    pub values: Vec<f64>,
}

/// One topic's stored entries, in ascending document order.
#[derive(Debug, Clone, Copy)]
pub struct Column<'a> {
    pub docs: &'a [usize],
    pub values: &'a [f64],
}

impl<'a> Column<'a> {
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.docs.iter().copied().zip(self.values.iter().copied())
    }
}

#[derive(Debug)]
pub struct SparseColumnMatrix {
    row_index: Vec<usize>,
    col_ptr: Vec<usize>,
    values: Vec<f64>,
    n_docs: usize,
    row_sums: OnceCell<Vec<f64>>,
    col_sums: Vec<OnceCell<f64>>,
    total: OnceCell<f64>,
}

impl SparseColumnMatrix {
    /// Build a matrix from a loader payload, checking the CSC invariants.
    pub fn from_payload(payload: MatrixPayload) -> Result<Self, EngineError> {
        Self::new(payload.row_index, payload.col_ptr, payload.values)
    }

    pub fn new(
        row_index: Vec<usize>,
        col_ptr: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, EngineError> {
        validate(&row_index, &col_ptr, &values)?;

        let n_docs = row_index.iter().max().map_or(0, |&d| d + 1);
        let n_topics = col_ptr.len() - 1;
        Ok(Self {
            row_index,
            col_ptr,
            values,
            n_docs,
            row_sums: OnceCell::new(),
            col_sums: (0..n_topics).map(|_| OnceCell::new()).collect(),
            total: OnceCell::new(),
        })
    }

    pub fn n_topics(&self) -> usize {
        self.col_ptr.len() - 1
    }

    /// One past the largest stored document index. Trailing documents with
    /// no stored weight are not counted.
    pub fn n_docs(&self) -> usize {
        self.n_docs
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    fn check_topic(&self, topic: usize) -> Result<(), EngineError> {
        if topic < self.n_topics() {
            Ok(())
        } else {
            Err(EngineError::TopicOutOfRange {
                topic,
                n_topics: self.n_topics(),
            })
        }
    }

    fn span(&self, topic: usize) -> std::ops::Range<usize> {
        self.col_ptr[topic]..self.col_ptr[topic + 1]
    }

    /// Weight of `doc` in `topic`, or 0 when the pair is not stored.
    pub fn get(&self, doc: usize, topic: usize) -> Result<f64, EngineError> {
        self.check_topic(topic)?;
        Ok(self.lookup(doc, topic))
    }

    /// Bisect-left within the column. `topic` must already be in range.
    fn lookup(&self, doc: usize, topic: usize) -> f64 {
        let span = self.span(topic);
        let rows = &self.row_index[span.clone()];
        let pos = rows.partition_point(|&r| r < doc);
        if rows.get(pos) == Some(&doc) {
            self.values[span.start + pos]
        } else {
            0.0
        }
    }

    /// Dense row for `doc` (length `n_topics`). Costs one bisection per
    /// topic; prefer [`row_sums`](Self::row_sums) when only totals are needed.
    pub fn row(&self, doc: usize) -> Vec<f64> {
        (0..self.n_topics()).map(|t| self.lookup(doc, t)).collect()
    }

    pub fn column(&self, topic: usize) -> Result<Column<'_>, EngineError> {
        self.check_topic(topic)?;
        let span = self.span(topic);
        Ok(Column {
            docs: &self.row_index[span.clone()],
            values: &self.values[span],
        })
    }

    /// Every stored entry as `(doc, topic, value)`, column by column.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.n_topics()).flat_map(move |t| {
            self.span(t)
                .map(move |i| (self.row_index[i], t, self.values[i]))
        })
    }

    /// Per-document totals over all topics, indexed by document.
    ///
    /// Computed in one pass over the stored entries on first use.
    pub fn row_sums(&self) -> &[f64] {
        self.row_sums.get_or_init(|| {
            let mut sums = vec![0.0; self.n_docs];
            for (&doc, &x) in self.row_index.iter().zip(&self.values) {
                sums[doc] += x;
            }
            tracing::debug!(n_docs = self.n_docs, "row sums computed");
            sums
        })
    }

    /// Total weight of one document; 0 beyond the stored extent.
    pub fn row_sum(&self, doc: usize) -> f64 {
        self.row_sums().get(doc).copied().unwrap_or(0.0)
    }

    pub fn column_sum(&self, topic: usize) -> Result<f64, EngineError> {
        self.check_topic(topic)?;
        Ok(*self.col_sums[topic].get_or_init(|| self.values[self.span(topic)].iter().sum()))
    }

    pub fn column_sums(&self) -> Vec<f64> {
        (0..self.n_topics())
            .map(|t| *self.col_sums[t].get_or_init(|| self.values[self.span(t)].iter().sum()))
            .collect()
    }

    /// Sum of every stored value.
    pub fn total(&self) -> f64 {
        *self.total.get_or_init(|| self.values.iter().sum())
    }

    /// Whether every document with stored weight sums to 1 within `tolerance`,
    /// i.e. the matrix holds topic proportions rather than token counts.
    pub fn is_proper(&self, tolerance: f64) -> bool {
        self.row_sums()
            .iter()
            .filter(|&&s| s != 0.0)
            .all(|&s| (s - 1.0).abs() < tolerance)
    }

    /// Drop every memoized sum so the next access recomputes it.
    pub fn invalidate_sums(&mut self) {
        self.row_sums.take();
        self.total.take();
        for cell in &mut self.col_sums {
            cell.take();
        }
    }
}

fn validate(row_index: &[usize], col_ptr: &[usize], values: &[f64]) -> Result<(), EngineError> {
    let malformed = |msg: String| -> Result<(), EngineError> { Err(EngineError::MalformedMatrix(msg)) };

    if col_ptr.is_empty() {
        return malformed("col_ptr is empty (needs n_topics + 1 entries)".into());
    }
    if row_index.len() != values.len() {
        return malformed(format!(
            "row_index has {} entries but values has {}",
            row_index.len(),
            values.len()
        ));
    }
    if col_ptr[0] != 0 {
        return malformed(format!("col_ptr must start at 0, starts at {}", col_ptr[0]));
    }
    let last = col_ptr[col_ptr.len() - 1];
    if last != values.len() {
        return malformed(format!(
            "col_ptr ends at {last} but {} entries are stored",
            values.len()
        ));
    }
    if let Some(t) = col_ptr.windows(2).position(|w| w[1] < w[0]) {
        return malformed(format!("col_ptr decreases at topic {t}"));
    }
    for (t, w) in col_ptr.windows(2).enumerate() {
        if row_index[w[0]..w[1]].windows(2).any(|r| r[1] <= r[0]) {
            return malformed(format!("rows of topic {t} are not strictly increasing"));
        }
    }
    Ok(())
}
