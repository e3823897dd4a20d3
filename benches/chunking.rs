use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use rag_index::models::{DistanceMetric, DocType, Document};
use rag_index::services::TextChunker;

fn long_document() -> Document {
    let paragraph = "Sourdough starter feeds on flour and water. It rises, falls, \
                     and rises again over a warm afternoon.\n\n";
    Document::new("bench", DocType::Post, paragraph.repeat(400))
        .with_metadata("lang", "en")
}

fn bench_chunking(c: &mut Criterion) {
    let chunker = TextChunker::with_defaults();
    let document = long_document();

    c.bench_function("chunk_long_document", |b| {
        b.iter(|| chunker.chunk(black_box(&document)))
    });
}

fn bench_scoring(c: &mut Criterion) {
    let a: Vec<f32> = (0..768).map(|i| (i as f32 * 0.013).sin()).collect();
    let b: Vec<f32> = (0..768).map(|i| (i as f32 * 0.007).cos()).collect();

    let mut group = c.benchmark_group("score");
    for metric in [DistanceMetric::Cosine, DistanceMetric::Euclidean, DistanceMetric::Dot] {
        group.bench_function(metric.to_string(), |bench| {
            bench.iter(|| metric.similarity(metric.raw_score(black_box(&a), black_box(&b))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chunking, bench_scoring);
criterion_main!(benches);
