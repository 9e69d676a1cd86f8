use criterion::{Criterion, criterion_group, criterion_main};
use docs_rag::embeddings::chunking::{ChunkingConfig, TextChunker};
use docs_rag::loader::DocumentMetadata;
use std::hint::black_box;

fn sample_document() -> String {
    let paragraph = "Applications for the autumn intake open on the first of January. \
        Candidates must submit a transcript, a passport copy and two references. \
        Late submissions are reviewed only if places remain after the main round.";

    (0..200)
        .map(|i| format!("Section {}\n\n{}", i, paragraph))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let document = sample_document();
    let metadata = DocumentMetadata {
        source: "handbook.txt".to_string(),
        ..DocumentMetadata::default()
    };
    let chunker = TextChunker::new(ChunkingConfig::default()).expect("default config is valid");

    c.bench_function("chunking", |b| {
        b.iter(|| chunker.split_text(black_box(&document), black_box(metadata.clone())))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
