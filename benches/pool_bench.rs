//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn bench_rule_matching(c: &mut Criterion) {
    use throughway::resolver::ResolverManager;
    use throughway::rule::RuleEngine;

    let rules = vec![
        "host-suffix:google.com, forward:relay1".to_string(),
        "host-suffix:facebook.com, forward:relay1".to_string(),
        "host-suffix:twitter.com, forward:relay1".to_string(),
        "host-suffix:youtube.com, forward:relay1".to_string(),
        "host-match:example.org, direct".to_string(),
        "ip-cidr:192.168.0.0/16, direct".to_string(),
        "ip-cidr:10.0.0.0/8, direct".to_string(),
        "match-all, forward:relay1".to_string(),
    ];
    let engine = RuleEngine::parse(&rules, &["relay1".to_string()]).unwrap();

    let rt = tokio::runtime::Runtime::new().unwrap();
    let resolver = rt.block_on(async { ResolverManager::new(&[], None).unwrap() });

    let mut group = c.benchmark_group("rule_matching");
    group.throughput(Throughput::Elements(1));

    group.bench_function("host_suffix_match", |b| {
        b.iter(|| rt.block_on(engine.get(black_box("www.google.com:443"), &resolver)))
    });

    group.bench_function("cidr_match", |b| {
        b.iter(|| rt.block_on(engine.get(black_box("192.168.1.5:443"), &resolver)))
    });

    group.bench_function("fallback_match", |b| {
        b.iter(|| rt.block_on(engine.get(black_box("unknown.example.net:80"), &resolver)))
    });

    group.finish();
}

fn bench_resolve_cache(c: &mut Criterion) {
    use std::net::{IpAddr, Ipv4Addr};
    use throughway::resolver::ResolveCache;

    let cache = ResolveCache::new();
    for i in 0..1000u32 {
        let host = format!("example{i}.com");
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, (i / 256) as u8, (i % 256) as u8));
        cache.put(host, ip);
    }

    let mut group = c.benchmark_group("resolve_cache");
    group.throughput(Throughput::Elements(1));

    group.bench_function("cache_hit", |b| b.iter(|| black_box(cache.get("example500.com"))));
    group.bench_function("cache_miss", |b| b.iter(|| black_box(cache.get("nonexistent.com"))));
    group.bench_function("cache_put", |b| {
        b.iter(|| cache.put(black_box("bench-put.example.com".to_string()), IpAddr::V4(Ipv4Addr::LOCALHOST)))
    });

    group.finish();
}

fn bench_meta_framing(c: &mut Criterion) {
    use throughway::meta::{read_meta, write_meta, Meta};

    let rt = tokio::runtime::Runtime::new().unwrap();
    let meta = Meta::tcp("www.example.com:443");

    let mut group = c.benchmark_group("meta_framing");
    group.throughput(Throughput::Elements(1));

    group.bench_function("encode_decode_round_trip", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut buf = Vec::new();
                write_meta(&mut buf, black_box(&meta)).await.unwrap();
                let mut cursor = std::io::Cursor::new(buf);
                black_box(read_meta(&mut cursor).await.unwrap())
            })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_rule_matching, bench_resolve_cache, bench_meta_framing);
criterion_main!(benches);
