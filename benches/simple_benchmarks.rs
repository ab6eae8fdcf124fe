//! Benchmarks for the per-request header and classification paths

use backend_relay::classify::classify;
use backend_relay::director::{BackendDirector, Director};
use backend_relay::error::BackendError;
use backend_relay::headers::compose_via;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use http::header::{HeaderValue, VIA};
use http::Request;
use std::io;
use std::time::Duration;
use url::Url;

fn bench_headers(c: &mut Criterion) {
    let mut group = c.benchmark_group("headers");

    let prior = [
        HeaderValue::from_static("1.1 cdn-edge"),
        HeaderValue::from_static("1.1 cache"),
    ];

    group.bench_function("compose_via_empty", |b| {
        b.iter(|| black_box(compose_via(std::iter::empty(), "1.1")));
    });

    group.bench_function("compose_via_two_prior", |b| {
        b.iter(|| black_box(compose_via(prior.iter(), "1.1")));
    });

    let backend_url = Url::parse("http://backend.example.com:3000/app").unwrap();
    let director = BackendDirector::new(&backend_url).unwrap();
    group.bench_function("direct_request", |b| {
        b.iter(|| {
            let mut req = Request::builder()
                .uri("/search?q=rust")
                .header(VIA, "1.1 cdn-edge")
                .body(())
                .unwrap();
            director.direct(&mut req).unwrap();
            black_box(req);
        });
    });

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
    let header_timeout = BackendError::HeaderTimeout(Duration::from_secs(15));
    let other = io::Error::other("failed to lookup address information");

    group.bench_function("connection_refused", |b| {
        b.iter(|| black_box(classify(&refused)));
    });

    group.bench_function("header_timeout", |b| {
        b.iter(|| black_box(classify(&header_timeout)));
    });

    group.bench_function("fallthrough", |b| {
        b.iter(|| black_box(classify(&other)));
    });

    group.finish();
}

criterion_group!(benches, bench_headers, bench_classify);
criterion_main!(benches);
