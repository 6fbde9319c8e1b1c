//! Performance benchmarks for pattern compilation and matching

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ferrosync_filter::{matches, FileFilter, MatchOptions, Pattern};

fn candidate_names() -> Vec<String> {
    (0..1000)
        .map(|i| match i % 4 {
            0 => format!("reports/{i}/data_{i}.csv"),
            1 => format!("invoice_{i:05}.pdf"),
            2 => format!("logs/app-{i}.log"),
            _ => format!("IMG_{i:04}.JPG"),
        })
        .collect()
}

fn bench_strategies(c: &mut Criterion) {
    let names = candidate_names();
    let mut group = c.benchmark_group("matcher_strategies");

    for pattern in ["data_1.csv", "*.csv", "invoice*", "**/*.log", "img_????.jpg", "*.{pdf,jpg}"] {
        let compiled = Pattern::new(pattern, MatchOptions::default()).unwrap();
        group.bench_with_input(BenchmarkId::new("compiled", pattern), &compiled, |b, compiled| {
            b.iter(|| {
                names
                    .iter()
                    .filter(|name| compiled.matches(black_box(name)))
                    .count()
            });
        });
    }

    group.finish();
}

fn bench_compile_per_call(c: &mut Criterion) {
    let names = candidate_names();
    let options = MatchOptions::default();

    c.bench_function("matches_compile_per_call", |b| {
        b.iter(|| {
            names
                .iter()
                .take(100)
                .filter(|name| matches(black_box(name), "img_????.jpg", &options))
                .count()
        });
    });
}

fn bench_file_filter(c: &mut Criterion) {
    let names = candidate_names();
    let filter = FileFilter::names_only(&["*.csv", "*.pdf", "!*_tmp.*", "!logs/**"]).unwrap();

    c.bench_function("file_filter_names_only", |b| {
        b.iter(|| {
            names
                .iter()
                .filter(|name| filter.accepts_name(black_box(name), false))
                .count()
        });
    });
}

criterion_group!(
    benches,
    bench_strategies,
    bench_compile_per_call,
    bench_file_filter
);
criterion_main!(benches);
