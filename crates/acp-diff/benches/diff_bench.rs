use acp_diff::{diff_words, plan_transition, TransformKind};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const OLD: &str = "I spent the last decade building developer tools, mostly for teams \
    that ship quickly and break things occasionally. These days I write about \
    compilers, caching, and the odd bit of typography.";

const NEW: &str = "I wasted the last decade building developer tools nobody asked for, \
    mostly for teams that ship recklessly and break everything constantly. These days \
    I complain about compilers, caching, and anyone who still cares about typography.";

fn bench_diff(c: &mut Criterion) {
    c.bench_function("diff_words/paragraph", |b| {
        b.iter(|| diff_words(black_box(OLD), black_box(NEW)));
    });

    c.bench_function("plan_transition/paragraph", |b| {
        b.iter(|| plan_transition(black_box(OLD), black_box(NEW), TransformKind::Rewrite, None));
    });
}

criterion_group!(benches, bench_diff);
criterion_main!(benches);
