//! Performance benchmarks for Shipline.
//!
//! This module contains benchmarks for:
//! - Result cache hits versus misses through the executor
//! - The cacheability classifier
//! - Parsing of porcelain status and deploy output
//!
//! Run with: `cargo bench`

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shipline::core::mock::ScriptedSpawner;
use shipline::core::{is_cacheable, CommandResult, ExecOptions, Executor, ResultCache};
use shipline::git::parse_status;
use shipline::hosting::{channel_id_for_branch, parse_deploy_urls};

// ============================================================================
// Mock Data Fixtures
// ============================================================================

mod fixtures {
    /// Porcelain status output with `lines` entries of mixed kinds.
    pub fn status_output(lines: usize) -> String {
        let prefixes = ["M  ", " M ", "?? ", "A  ", "MM "];
        (0..lines)
            .map(|i| format!("{}src/module_{i}/file_{i}.ts", prefixes[i % prefixes.len()]))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Deploy output as printed by the hosting CLI for `sites` sites.
    pub fn deploy_json(sites: usize) -> String {
        let entries: Vec<String> = (0..sites)
            .map(|i| {
                format!(
                    r#""site-{i}": {{"site": "site-{i}", "url": "https://site-{i}--feature-x-1a2b.web.app", "expireTime": "2026-10-23T10:00:00Z"}}"#
                )
            })
            .collect();
        format!(r#"{{"status": "success", "result": {{{}}}}}"#, entries.join(","))
    }
}

// ============================================================================
// Cache Benchmarks
// ============================================================================

fn scripted_executor(ttl: Duration) -> (Arc<ScriptedSpawner>, Executor) {
    let spawner = Arc::new(ScriptedSpawner::new());
    spawner.on("git status --porcelain", CommandResult::success(fixtures::status_output(20)));
    let executor =
        Executor::with_spawner(spawner.clone()).cache(Arc::new(ResultCache::new(ttl)));
    (spawner, executor)
}

fn bench_cache_hit_vs_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("result_cache");

    group.bench_function("hit", |b| {
        let (_spawner, executor) = scripted_executor(Duration::from_secs(3600));
        executor.execute_blocking("git status --porcelain", &ExecOptions::query());

        b.iter(|| {
            let result =
                executor.execute_blocking(black_box("git status --porcelain"), &ExecOptions::query());
            black_box(result)
        });
    });

    group.bench_function("miss", |b| {
        let (_spawner, executor) = scripted_executor(Duration::from_secs(3600));
        let options = ExecOptions::query().fresh();

        b.iter(|| {
            let result = executor.execute_blocking(black_box("git status --porcelain"), &options);
            black_box(result)
        });
    });

    group.bench_function("real_spawn_true", |b| {
        let executor = Executor::new();
        let options = ExecOptions::query();

        b.iter(|| {
            let result = executor.execute_blocking(black_box("true"), &options);
            black_box(result)
        });
    });

    group.finish();
}

fn bench_is_cacheable(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_cacheable");

    let commands = [
        ("query", "git status --porcelain"),
        ("mutation", "git push -u origin feature/x"),
        ("chained", "git status && git push"),
    ];
    for (name, command) in commands {
        group.bench_with_input(BenchmarkId::from_parameter(name), command, |b, command| {
            b.iter(|| black_box(is_cacheable(black_box(command))));
        });
    }

    group.finish();
}

// ============================================================================
// Parsing Benchmarks
// ============================================================================

fn bench_parse_status(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_status");

    for lines in [10, 100, 1000] {
        let output = fixtures::status_output(lines);
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &output, |b, output| {
            b.iter(|| black_box(parse_status(black_box(output))));
        });
    }

    group.finish();
}

fn bench_deploy_output(c: &mut Criterion) {
    let mut group = c.benchmark_group("deploy_output");

    for sites in [1, 5] {
        let output = fixtures::deploy_json(sites);
        group.bench_with_input(BenchmarkId::new("parse_urls", sites), &output, |b, output| {
            b.iter(|| black_box(parse_deploy_urls(black_box(output))));
        });
    }

    group.bench_function("channel_id", |b| {
        b.iter(|| black_box(channel_id_for_branch("pr-", black_box("feature/JIRA-1234_Login--Form"))));
    });

    group.finish();
}

criterion_group!(cache_benches, bench_cache_hit_vs_miss, bench_is_cacheable,);

criterion_group!(parsing_benches, bench_parse_status, bench_deploy_output,);

criterion_main!(cache_benches, parsing_benches);
