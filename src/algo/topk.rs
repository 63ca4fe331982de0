//! Ranked top-k selection that never drops ties at the cutoff.
//!
//! The result holds at least `k` items (fewer only when the input is
//! shorter) plus every further item whose score equals the k-th score.
//! Items are ordered by score (per [`Order`]) and then by a caller-supplied
//! tie key, ascending, so output is reproducible across calls.

use std::cmp::Ordering;

/// Direction in which scores rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Highest score first.
    #[default]
    Descending,
    /// Lowest score first.
    Ascending,
}

/// Selection algorithm. Both produce identical output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Sort everything, then cut past the trailing ties. O(n log n).
    FullSort,
    /// Keep a worst-first buffer of the current top k and bisect each
    /// candidate into it. O(n log k) comparisons, no full sort.
    BoundedInsertion,
    /// Bounded insertion once `n >= k * insertion_ratio`, full sort otherwise.
    Auto { insertion_ratio: usize },
}

pub const DEFAULT_INSERTION_RATIO: usize = 8;

impl Default for Strategy {
    fn default() -> Self {
        Self::Auto {
            insertion_ratio: DEFAULT_INSERTION_RATIO,
        }
    }
}

impl Strategy {
    fn resolve(self, n: usize, k: usize) -> Self {
        match self {
            Self::Auto { insertion_ratio } => {
                if n >= k.saturating_mul(insertion_ratio.max(1)) {
                    Self::BoundedInsertion
                } else {
                    Self::FullSort
                }
            }
            other => other,
        }
    }
}

struct Ranked<T, K> {
    score: f64,
    key: K,
    item: T,
}

/// Folds `-0.0` into `0.0` so the two rank and tie as equal scores.
fn canonical(score: f64) -> f64 {
    if score == 0.0 {
        0.0
    } else {
        score
    }
}

/// `Less` when score `a` ranks ahead of score `b`.
fn score_cmp(order: Order, a: f64, b: f64) -> Ordering {
    match order {
        Order::Descending => b.total_cmp(&a),
        Order::Ascending => a.total_cmp(&b),
    }
}

fn rank_cmp<T, K: Ord>(order: Order, a: &Ranked<T, K>, b: &Ranked<T, K>) -> Ordering {
    score_cmp(order, a.score, b.score).then_with(|| a.key.cmp(&b.key))
}

/// Select the top `k` items of `items`, keeping ties at the boundary.
///
/// * `score` - the ranking score of an item. Any `f64` is valid; scores are
///   compared with IEEE total ordering.
/// * `tie` - secondary key, ascending, for items with equal scores.
pub fn top_k<T, K, S, F>(
    items: Vec<T>,
    k: usize,
    score: S,
    tie: F,
    order: Order,
    strategy: Strategy,
) -> Vec<T>
where
    K: Ord,
    S: Fn(&T) -> f64,
    F: Fn(&T) -> K,
{
    if k == 0 {
        return vec![];
    }

    let n = items.len();
    let ranked: Vec<Ranked<T, K>> = items
        .into_iter()
        .map(|item| Ranked {
            score: canonical(score(&item)),
            key: tie(&item),
            item,
        })
        .collect();

    let selected = if n <= k {
        sort_ranked(ranked, order)
    } else {
        match strategy.resolve(n, k) {
            Strategy::BoundedInsertion => bounded_insertion(ranked, k, order),
            _ => full_sort(ranked, k, order),
        }
    };

    selected.into_iter().map(|r| r.item).collect()
}

fn sort_ranked<T, K: Ord>(mut ranked: Vec<Ranked<T, K>>, order: Order) -> Vec<Ranked<T, K>> {
    ranked.sort_by(|a, b| rank_cmp(order, a, b));
    ranked
}

fn full_sort<T, K: Ord>(ranked: Vec<Ranked<T, K>>, k: usize, order: Order) -> Vec<Ranked<T, K>> {
    let mut sorted = sort_ranked(ranked, order);
    let boundary = sorted[k - 1].score;
    let cut = k + sorted[k..]
        .iter()
        .take_while(|r| r.score.total_cmp(&boundary) == Ordering::Equal)
        .count();
    sorted.truncate(cut);
    sorted
}

fn bounded_insertion<T, K: Ord>(
    ranked: Vec<Ranked<T, K>>,
    k: usize,
    order: Order,
) -> Vec<Ranked<T, K>> {
    let mut rest = ranked.into_iter();

    // Worst-first: index 0 is the entry that would be evicted next. The
    // buffer always holds the current top k plus anything tied with the
    // k-th score, so the k-th best sits at `len - k`.
    let mut buffer = sort_ranked(rest.by_ref().take(k).collect(), order);
    buffer.reverse();

    for cand in rest {
        let boundary = buffer[buffer.len() - k].score;
        let vs_boundary = score_cmp(order, cand.score, boundary);
        if vs_boundary == Ordering::Greater {
            continue;
        }

        // Insert after every entry ranked worse than the candidate; equal
        // entries stay ahead of it in the final order, as a stable sort would.
        let at = buffer.partition_point(|e| rank_cmp(order, e, &cand) == Ordering::Greater);
        buffer.insert(at, cand);

        if vs_boundary == Ordering::Less {
            let boundary = buffer[buffer.len() - k].score;
            let evict =
                buffer.partition_point(|e| score_cmp(order, e.score, boundary) == Ordering::Greater);
            buffer.drain(..evict);
        }
    }

    buffer.reverse();
    buffer
}

/// Truncate an already-ranked list to `n` items, keeping any items past the
/// cutoff whose score equals the n-th score.
pub fn shorten<T, S>(mut sorted: Vec<T>, n: usize, score: S) -> Vec<T>
where
    S: Fn(&T) -> f64,
{
    if sorted.len() <= n {
        return sorted;
    }
    if n == 0 {
        sorted.clear();
        return sorted;
    }
    let boundary = canonical(score(&sorted[n - 1]));
    let cut = n + sorted[n..]
        .iter()
        .take_while(|x| canonical(score(x)).total_cmp(&boundary) == Ordering::Equal)
        .count();
    sorted.truncate(cut);
    sorted
}
