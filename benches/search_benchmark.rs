use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use rand::Rng;
use searchlet::{Indexer, IndexerConfig, LogicalPlan, Record, Schema, StandardAnalyzer};

const WORDS: [&str; 12] = [
    "amber", "breeze", "cinder", "delta", "ember", "fjord", "glacier", "harbor", "indigo",
    "juniper", "krypton", "lumen",
];

fn build_record(id: u32) -> Record {
    let mut rng = rand::thread_rng();
    let body: String = (0..40)
        .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ");
    let mut record = Record::new(format!("r{id}"));
    record.set_searchable("title", format!("title {}", WORDS[(id as usize) % WORDS.len()]));
    record.set_searchable("body", body);
    record
}

fn seeded_indexer(records: u32) -> Indexer {
    let schema = Schema::new("id").add_searchable("title", 2.0).add_searchable("body", 1.0);
    let config = IndexerConfig { merge_every_n_seconds: 3600, ..Default::default() };
    let indexer = Indexer::create(schema, Arc::new(StandardAnalyzer::default()), config).unwrap();
    for id in 0..records {
        indexer.add_record(&build_record(id)).unwrap();
    }
    indexer.commit().unwrap();
    indexer
}

fn bench_add_record(c: &mut Criterion) {
    let schema = Schema::new("id").add_searchable("title", 2.0).add_searchable("body", 1.0);
    let config = IndexerConfig { merge_every_n_seconds: 3600, ..Default::default() };
    let indexer = Indexer::create(schema, Arc::new(StandardAnalyzer::default()), config).unwrap();
    let mut id = 0u32;
    c.bench_function("add_record", |b| {
        b.iter(|| {
            indexer.add_record(&build_record(id)).unwrap();
            id += 1;
        });
    });
}

fn bench_exact_search(c: &mut Criterion) {
    let indexer = seeded_indexer(5_000);
    let plan = LogicalPlan::from_keywords(&["glacier"], 10, 0);
    c.bench_function("exact_search_top10", |b| {
        b.iter(|| black_box(indexer.search(&plan).unwrap()));
    });
}

fn bench_fuzzy_prefix_search(c: &mut Criterion) {
    let indexer = seeded_indexer(5_000);
    let plan = LogicalPlan::from_keywords(&["glaciar"], 10, 2);
    c.bench_function("fuzzy_prefix_search_top10", |b| {
        b.iter(|| black_box(indexer.search(&plan).unwrap()));
    });
}

fn bench_intersection_search(c: &mut Criterion) {
    let indexer = seeded_indexer(5_000);
    let plan = LogicalPlan::from_keywords(&["amber", "breeze"], 10, 0);
    c.bench_function("two_term_and_top10", |b| {
        b.iter(|| black_box(indexer.search(&plan).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_add_record,
    bench_exact_search,
    bench_fuzzy_prefix_search,
    bench_intersection_search
);
criterion_main!(benches);
