use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use chrono::Utc;
use serde_json::json;
use taskhive_scheduler::{JobRequest, JobTable, OwnerId, Priority, RetryPolicy, TierTable};

const PRIORITIES: [Priority; 4] = [
    Priority::Low,
    Priority::Normal,
    Priority::High,
    Priority::Urgent,
];
const TIERS: [&str; 4] = ["free", "plus", "pro", "max"];

/// A table with `pending` queued jobs spread across every tier and priority.
fn populated_table(pending: usize) -> JobTable {
    let mut table = JobTable::new(TierTable::default(), RetryPolicy::default());
    let owner = OwnerId::new();
    let now = Utc::now();
    for i in 0..pending {
        let request = JobRequest::new(
            owner,
            "extract",
            json!({ "doc": i }),
            PRIORITIES[i % PRIORITIES.len()],
            TIERS[(i / PRIORITIES.len()) % TIERS.len()],
        );
        table.insert(request, now).expect("valid request");
    }
    table
}

fn bench_select_candidate(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_candidate");
    for pending in [100usize, 1_000, 10_000] {
        let table = populated_table(pending);
        group.bench_with_input(BenchmarkId::from_parameter(pending), &table, |b, table| {
            b.iter(|| black_box(table.select_candidate()))
        });
    }
    group.finish();
}

/// Claim until every tier is saturated, as a burst of idle workers would.
fn bench_claim_until_saturated(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_until_saturated");
    for pending in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(pending), &pending, |b, &pending| {
            b.iter_batched(
                || populated_table(pending),
                |mut table| {
                    let now = Utc::now();
                    while table.claim_next(now).is_some() {}
                    table
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_select_candidate, bench_claim_until_saturated);
criterion_main!(benches);
