use criterion::{criterion_group, criterion_main, Criterion};
use trove_core::tokenizer::{normalize, NormalizeMode};

fn bench_normalize(c: &mut Criterion) {
    let text = "Section 4(b). The Licensee shall, at its own cost, maintain insurance; \
                see Appendix C — \"Coverage\" — for details.\n"
        .repeat(200);
    c.bench_function("normalize_lowercase", |b| b.iter(|| normalize(&text, NormalizeMode::Lowercase)));
}

criterion_group!(benches, bench_normalize);
criterion_main!(benches);
