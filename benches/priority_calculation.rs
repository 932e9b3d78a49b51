//! Benchmarks for submission-time task ordering: longest-known-duration-first
//! sort over realistic job sizes, and retry priority assignment.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dist_test::domain::models::{DurationRecord, Task};
use dist_test::services::priority::{priority_for, sort_tasks_by_duration};

fn sample_tasks(n: usize) -> Vec<Task> {
    (0..n)
        .map(|i| Task {
            job_id: "u.1.2".to_string(),
            task_id: format!("hash{i}.{i}"),
            isolate_hash: format!("hash{i}"),
            description: format!("test_{i}"),
            timeout_secs: 30,
            attempt: 0,
            max_retries: 2,
            artifact_archive_globs: vec![],
        })
        .collect()
}

fn bench_sort_tasks_by_duration(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort_tasks_by_duration");
    for size in [10usize, 100, 1_000, 10_000] {
        let durations: std::collections::HashMap<String, DurationRecord> = (0..size)
            .step_by(2)
            .map(|i| (format!("hash{i}"), DurationRecord::new((i % 120) as f64)))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || sample_tasks(size),
                |mut tasks| {
                    sort_tasks_by_duration(&mut tasks, &|hash| durations.get(hash).copied());
                    black_box(tasks)
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_priority_for(c: &mut Criterion) {
    let task = sample_tasks(1).into_iter().next().unwrap();
    c.bench_function("priority_for_fresh_submission", |b| {
        b.iter(|| black_box(priority_for(black_box(&task))));
    });

    let mut retried = task.clone();
    retried.attempt = 4;
    c.bench_function("priority_for_retry", |b| {
        b.iter(|| black_box(priority_for(black_box(&retried))));
    });
}

criterion_group!(benches, bench_sort_tasks_by_duration, bench_priority_for);
criterion_main!(benches);
