use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use desk_memory::document::{ChunkerConfig, DocumentChunker};
use std::hint::black_box;

fn generate_text(size: usize) -> String {
    let paragraph = "To reset your password open the self service portal and choose forgot \
                     password. Follow the emailed link within one hour.\n";
    paragraph.repeat(size / paragraph.len() + 1)[..size].to_string()
}

fn chunking(c: &mut Criterion) {
    let chunker = DocumentChunker::new(ChunkerConfig::default()).unwrap();
    let mut group = c.benchmark_group("split_chunks");

    for size in [10_000, 100_000, 1_000_000] {
        let input = generate_text(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("ascii", size), &input, |b, input| {
            b.iter(|| chunker.split_chunks("bench", black_box(input)));
        });
    }

    group.finish();
}

fn chunking_small_window(c: &mut Criterion) {
    let chunker = DocumentChunker::new(ChunkerConfig {
        chunk_size: 120,
        chunk_overlap: 40,
    })
    .unwrap();
    let input = generate_text(100_000);
    c.bench_function("split_chunks_window_120", |b| {
        b.iter(|| chunker.split(black_box(&input)));
    });
}

criterion_group!(benches, chunking, chunking_small_window);
criterion_main!(benches);
