//! Classification hot-path benchmarks
//!
//! ```bash
//! cargo bench --package cw-core --bench classify
//! ```

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cw_core::classify::{ClassificationRegistry, ClassifyOptions, RequestClassifier, RequestTarget};
use cw_core::psl::PublicSuffixSet;
use cw_core::url::all_hosts_for_url;

const SUFFIXES: &str = "com\nnet\norg\nuk\nco.uk\nio\nde\n";

fn classifier(domains: usize) -> RequestClassifier {
    let registry = ClassificationRegistry::new();
    registry.classify(
        "tracker",
        ClassifyOptions::domains((0..domains).map(|i| format!("tracker{i}.net"))).third_party(true),
    );
    RequestClassifier::new(Arc::new(registry), Arc::new(PublicSuffixSet::parse(SUFFIXES)))
}

fn bench_decompose(c: &mut Criterion) {
    let suffixes = PublicSuffixSet::parse(SUFFIXES);
    let mut group = c.benchmark_group("decompose");

    for url in [
        "https://example.com/",
        "https://a.b.c.example.co.uk/path?q=1",
        "https://pixel.eu-west.cdn.tracker42.net/px.gif",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(url), url, |b, url| {
            b.iter(|| all_hosts_for_url(black_box(url), &suffixes))
        });
    }
    group.finish();
}

fn bench_is_classified_as(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_classified_as");

    for domains in [100, 10_000] {
        let classifier = classifier(domains);
        let hit = RequestTarget::new("https://cdn.tracker7.net/a.js", Some("https://example.com/"));
        let miss = RequestTarget::new("https://cdn.example.org/a.js", Some("https://example.com/"));
        let first_party = RequestTarget::new("https://cdn.tracker7.net/a.js", Some("https://tracker7.net/"));

        group.bench_function(BenchmarkId::new("hit", domains), |b| {
            b.iter(|| classifier.is_classified_as(black_box(hit), "tracker"))
        });
        group.bench_function(BenchmarkId::new("miss", domains), |b| {
            b.iter(|| classifier.is_classified_as(black_box(miss), "tracker"))
        });
        group.bench_function(BenchmarkId::new("first_party", domains), |b| {
            b.iter(|| classifier.is_classified_as(black_box(first_party), "tracker"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decompose, bench_is_classified_as);
criterion_main!(benches);
