//! Criterion benchmarks for the engine hot paths.
//!
//! Benchmarks:
//! 1. Returns cache build over 15 years of daily closes
//! 2. Full window detection (split, merge, narrow) at several window sizes
//! 3. One-year simulation with stops and re-entry
//! 4. Basket combination of several strategies

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use seasonlab_core::calendar::{analysis_years, dates_of_year};
use seasonlab_core::engine::simulate_year;
use seasonlab_core::{
    combine, detect, BasketStrategy, DetectParams, PricePoint, PriceSeries, ReturnsCache,
    StrategyRun, TradeRules,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_series(symbol: &str, first: i32, last: i32, phase: f64) -> PriceSeries {
    let mut close = 100.0;
    let mut points = Vec::new();
    let mut i = 0usize;
    for year in first..=last {
        for date in dates_of_year(year) {
            close *= 1.0 + (i as f64 * 0.07 + phase).sin() * 0.01;
            points.push(PricePoint { date, close });
            i += 1;
        }
    }
    PriceSeries::new(symbol, points).unwrap()
}

fn rules() -> TradeRules {
    TradeRules {
        stop_loss_pct: 5.0,
        reentry_pct: 3.0,
        fees_pct: 0.1,
        tax_pct: 0.1,
    }
}

// ── 1. Cache build ───────────────────────────────────────────────────

fn bench_cache_build(c: &mut Criterion) {
    let series = make_series("BENCH", 2010, 2025, 0.0);
    c.bench_function("returns_cache_build_16y", |b| {
        b.iter(|| ReturnsCache::build(black_box(&series)))
    });
}

// ── 2. Detection ─────────────────────────────────────────────────────

fn bench_detect(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect");
    let series = make_series("BENCH", 2010, 2025, 0.0);
    let cache = ReturnsCache::build(&series);
    let years = analysis_years(2025, 15);
    for size in [7u32, 21, 60] {
        let params = DetectParams::new(size, 50.0).unwrap();
        group.bench_with_input(BenchmarkId::new("window", size), &params, |b, p| {
            b.iter(|| detect(black_box(&cache), &years, p).unwrap())
        });
    }
    group.finish();
}

// ── 3. Simulation ────────────────────────────────────────────────────

fn bench_simulate(c: &mut Criterion) {
    let series = make_series("BENCH", 2010, 2025, 0.0);
    let cache = ReturnsCache::build(&series);
    let years = analysis_years(2025, 15);
    let report = detect(&cache, &years, &DetectParams::new(14, 0.0).unwrap()).unwrap();
    let windows = report.window_list();
    let rules = rules();
    c.bench_function("simulate_year_with_stops", |b| {
        b.iter(|| simulate_year(black_box(&series), &windows, 2020, &rules).unwrap())
    });
}

// ── 4. Basket ────────────────────────────────────────────────────────

fn bench_combine(c: &mut Criterion) {
    let rules = rules();
    let runs: Vec<StrategyRun> = (0..5)
        .map(|i| {
            let symbol = format!("S{i}");
            let series = make_series(&symbol, 2015, 2021, i as f64);
            let cache = ReturnsCache::build(&series);
            let years = analysis_years(2021, 7);
            let windows = detect(&cache, &years, &DetectParams::new(21, 0.0).unwrap())
                .unwrap()
                .window_list();
            StrategyRun {
                strategy: BasketStrategy::new(symbol, 21, 0.0),
                simulation: simulate_year(&series, &windows, 2020, &rules).unwrap(),
                windows,
            }
        })
        .collect();
    c.bench_function("combine_5_strategies", |b| {
        b.iter(|| combine(black_box(&runs), None, 100_000.0).unwrap())
    });
}

criterion_group!(
    benches,
    bench_cache_build,
    bench_detect,
    bench_simulate,
    bench_combine
);
criterion_main!(benches);
