use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use vrl_forge::error_code::extract_error_code;
use vrl_forge::fixer::store::PatternStore;
use vrl_forge::fixer::LocalFixer;
use vrl_forge::scorer::{estimate_performance, PerformanceTier, TierBreakpoints};
use vrl_forge::validator::ConstructPolicy;

fn synthetic_program(lines: usize) -> String {
    (0..lines)
        .map(|i| match i % 4 {
            0 => format!("parts_{i} = split(.message, \" \") ?? []"),
            1 => format!(".field_{i} = downcase(string!(.message)) ?? \"\""),
            2 => format!("if contains(.message, \"user{i}\") ?? false {{ .hit = true }}"),
            _ => format!(".count_{i} = length(.message) ?? 0"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn bench_local_fix(c: &mut Criterion) {
    let fixer = LocalFixer::new(Arc::new(PatternStore::new()));
    let program = synthetic_program(200);
    let error = "error[E651]: unnecessary error coalescing operation";

    c.bench_function("local_fix_coalesce_200_lines", |b| {
        b.iter(|| black_box(fixer.fix_locally(black_box(&program), error)));
    });

    c.bench_function("extract_error_code", |b| {
        b.iter(|| black_box(extract_error_code(black_box(error))));
    });
}

fn bench_policy_and_estimate(c: &mut Criterion) {
    let policy = ConstructPolicy::new(
        &names(&["parse_regex", "match", "parse_regex_all"]),
        &names(&["split", "contains"]),
        &names(&["timestamp", "source.ip"]),
    );
    let program = synthetic_program(200);

    c.bench_function("find_rejected_200_lines", |b| {
        b.iter(|| black_box(policy.find_rejected(black_box(&program))));
    });

    c.bench_function("estimate_performance_200_lines", |b| {
        b.iter(|| black_box(estimate_performance(black_box(&program), &TierBreakpoints::default())));
    });
}

fn bench_tier_classification(c: &mut Criterion) {
    let breakpoints = TierBreakpoints::default();
    let values: Vec<f64> = (0..1_000).map(|i| i as f64 * 17.5).collect();

    c.bench_function("classify_1000_values", |b| {
        b.iter(|| {
            for v in &values {
                black_box(PerformanceTier::classify(black_box(*v), &breakpoints));
            }
        });
    });
}

criterion_group!(
    fixer_core,
    bench_local_fix,
    bench_policy_and_estimate,
    bench_tier_classification
);
criterion_main!(fixer_core);
