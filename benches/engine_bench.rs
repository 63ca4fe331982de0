use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dtm_explorer::algo::aggregate::AggregationEngine;
use dtm_explorer::algo::categories::DocumentCategoryIndex;
use dtm_explorer::algo::sparse::SparseColumnMatrix;
use dtm_explorer::algo::topk::{top_k, Order, Strategy};
use std::sync::Arc;

/// Synthetic sparse matrix: each document carries roughly a fifth of the topics.
fn generate_matrix(n_docs: usize, n_topics: usize) -> SparseColumnMatrix {
    let mut row_index = Vec::new();
    let mut values = Vec::new();
    let mut col_ptr = vec![0];
    for t in 0..n_topics {
        for d in 0..n_docs {
            let h = (d * 31 + t * 17) % 97;
            if h < 20 {
                row_index.push(d);
                values.push((h + 1) as f64);
            }
        }
        col_ptr.push(row_index.len());
    }
    SparseColumnMatrix::new(row_index, col_ptr, values).unwrap()
}

fn scores(n: usize) -> Vec<(usize, f64)> {
    (0..n).map(|i| (i, ((i * 7919) % 1000) as f64)).collect()
}

fn bench_row_sums(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_sums");
    for n_docs in [1_000, 10_000, 100_000] {
        let mut matrix = generate_matrix(n_docs, 50);
        group.bench_function(BenchmarkId::from_parameter(n_docs), |b| {
            b.iter(|| {
                matrix.invalidate_sums();
                black_box(matrix.row_sums().len())
            })
        });
    }
    group.finish();
}

fn bench_top_k(c: &mut Criterion) {
    let mut group = c.benchmark_group("top_k");
    for n in [1_000, 100_000] {
        let items = scores(n);
        for (name, strategy) in [
            ("full_sort", Strategy::FullSort),
            ("bounded_insertion", Strategy::BoundedInsertion),
        ] {
            group.bench_with_input(BenchmarkId::new(name, n), &items, |b, items| {
                b.iter(|| {
                    top_k(
                        black_box(items.clone()),
                        20,
                        |&(_, s)| s,
                        |&(i, _)| i,
                        Order::Descending,
                        strategy,
                    )
                })
            });
        }
    }
    group.finish();
}

fn bench_topic_docs(c: &mut Criterion) {
    let engine = AggregationEngine::new(generate_matrix(50_000, 50));
    engine.matrix().row_sums();
    c.bench_function("topic_docs/50000_docs", |b| {
        b.iter(|| engine.topic_docs(black_box(7), 20).unwrap())
    });
}

fn bench_topic_conditionals(c: &mut Criterion) {
    let n_docs = 50_000;
    let years: DocumentCategoryIndex = (0..n_docs).map(|d| (1900 + (d % 100) as i64)).collect();
    let years = Arc::new(years);
    let mut engine = AggregationEngine::new(generate_matrix(n_docs, 50));
    c.bench_function("topic_conditionals/50000_docs", |b| {
        b.iter(|| {
            // Re-registering the index drops the cached aggregates.
            engine.set_categories("year", Arc::clone(&years));
            black_box(engine.topic_conditionals("year").unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_row_sums,
    bench_top_k,
    bench_topic_docs,
    bench_topic_conditionals
);
criterion_main!(benches);
