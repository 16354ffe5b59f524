//! Service scenarios over CSV price files written to a temp directory.
//!
//! RALLY rises 1%/day on Apr-10..Apr-30 every year; CALM does the same on
//! Jul-19..Aug-08. Both drift down slightly elsewhere. History runs
//! 2018..=2023, so the analysis years are 2018..=2022.

use std::fs;
use std::path::Path;

use seasonlab_core::calendar::{calendar_doy, dates_of_year};
use seasonlab_core::{BasketStrategy, SimYear, Window, WeightMap};
use seasonlab_runner::export::{export_trades_csv, export_windows_csv};
use seasonlab_runner::{
    BasketQuery, LoadError, Objective, Query, RunnerConfig, SeasonalService, ServiceError,
    SweepGrid, Weighting, DEFAULT_WEIGHT_FLOOR,
};

fn write_seasonal_csv(dir: &Path, symbol: &str, days: (u32, u32)) {
    let mut text = String::from("Date,Open,High,Low,Close,Volume\n");
    let mut close = 100.0f64;
    for year in 2018..=2023 {
        for date in dates_of_year(year) {
            let doy = calendar_doy(date);
            close *= if (days.0..=days.1).contains(&doy) { 1.01 } else { 0.9995 };
            text.push_str(&format!("{date},{close:.6},{close:.6},{close:.6},{close:.6},1000\n"));
        }
    }
    fs::write(dir.join(format!("{symbol}.csv")), text).unwrap();
}

/// Only the final (incomplete) year, so no analysis year has data.
fn write_fresh_listing(dir: &Path, symbol: &str) {
    let mut text = String::from("date,close\n");
    for (i, date) in dates_of_year(2023).into_iter().take(60).enumerate() {
        text.push_str(&format!("{date},{}\n", 50.0 + i as f64));
    }
    fs::write(dir.join(format!("{symbol}.csv")), text).unwrap();
}

fn service() -> (tempfile::TempDir, SeasonalService) {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    fs::create_dir_all(&data).unwrap();
    write_seasonal_csv(&data, "RALLY", (100, 120));
    write_seasonal_csv(&data, "CALM", (200, 220));
    write_fresh_listing(&data, "NEWCO");

    let config = RunnerConfig {
        data_dir: data,
        basket_dir: dir.path().join("baskets"),
        lookback_years: 6,
        ..RunnerConfig::default()
    };
    let service = SeasonalService::from_config(config).unwrap();
    (dir, service)
}

fn query(symbol: &str) -> Query {
    Query {
        window_size: Some(21),
        threshold: Some(50.0),
        ..Query::new(symbol)
    }
}

#[test]
fn windows_found_for_rally() {
    let (_dir, service) = service();
    let resp = service.detect_windows(&query("rally")).unwrap();
    assert_eq!(resp.symbol, "RALLY");
    assert_eq!(resp.years, vec![2018, 2019, 2020, 2021, 2022]);
    assert_eq!(resp.windows.len(), 1);
    assert_eq!(resp.windows[0].window, Window::new(100, 120).unwrap());
    assert_eq!(resp.windows[0].win_rate, 100.0);
    assert_eq!(resp.total_days, 21);
    assert!(!resp.synthetic);
}

#[test]
fn detection_is_memoized() {
    let (_dir, service) = service();
    service.detect_windows(&query("RALLY")).unwrap();
    service.detect_windows(&query("RALLY")).unwrap();
    let stats = service.memo().stats();
    assert_eq!(stats.caches, 1);
    assert_eq!(stats.reports, 1);

    service
        .detect_windows(&Query {
            threshold: Some(80.0),
            ..query("RALLY")
        })
        .unwrap();
    assert_eq!(service.memo().stats().reports, 2);
}

#[test]
fn no_history_gives_empty_response() {
    let (_dir, service) = service();
    let resp = service.detect_windows(&query("NEWCO")).unwrap();
    assert!(resp.windows.is_empty());
    assert_eq!(resp.total_days, 0);

    let bt = service.backtest_window(&query("NEWCO")).unwrap();
    assert!(bt.seasonal_curve.is_empty());
    assert!(bt.warning.unwrap().contains("No data"));
}

#[test]
fn missing_file_is_an_error() {
    let (_dir, service) = service();
    let err = service.detect_windows(&query("GHOST")).unwrap_err();
    assert!(matches!(err, ServiceError::Load(LoadError::NotFound { .. })));
}

#[test]
fn bad_parameters_rejected() {
    let (_dir, service) = service();
    let q = Query {
        window_size: Some(2),
        ..query("RALLY")
    };
    assert!(matches!(service.detect_windows(&q), Err(ServiceError::Engine(_))));
    let q = Query {
        fees_pct: Some(100.0),
        ..query("RALLY")
    };
    assert!(service.backtest_window(&q).is_err());
}

#[test]
fn averaged_backtest_beats_buy_and_hold() {
    let (_dir, service) = service();
    let bt = service.backtest_window(&query("RALLY")).unwrap();
    assert_eq!(bt.year, SimYear::Averaged);
    assert_eq!(bt.dates.len(), 365);
    assert_eq!(bt.seasonal_curve.len(), 365);
    assert_eq!(bt.days_in_market, 21);
    assert!(bt.total_return > bt.bh_return);
    assert!(bt.total_return > 20.0);
    assert!(bt.max_drawdown <= 0.0);
}

#[test]
fn single_year_backtest_uses_real_dates() {
    let (_dir, service) = service();
    let bt = service
        .backtest_window(&Query {
            year: Some(SimYear::Year(2020)),
            ..query("RALLY")
        })
        .unwrap();
    assert_eq!(bt.dates.len(), 366);
    assert_eq!(bt.trades.len(), 1);
    assert!(bt.total_return > 0.0);
}

#[test]
fn yearly_rows_cover_analysis_years() {
    let (_dir, service) = service();
    let yearly = service.backtest_yearly(&query("RALLY")).unwrap();
    let years: Vec<i32> = yearly.rows.iter().map(|r| r.year).collect();
    assert_eq!(years, vec![2018, 2019, 2020, 2021, 2022]);
    assert_eq!(yearly.metrics.positive_years_pct, 100.0);
    assert_eq!(yearly.metrics.years_beating_bh, 5);
}

#[test]
fn trades_export_has_summary_rows() {
    let (_dir, service) = service();
    let table = service.trades(&query("RALLY")).unwrap().unwrap();
    let csv = export_trades_csv(&table).unwrap();
    assert!(csv.lines().any(|l| l.starts_with("TOTAL,")));
    assert!(csv.lines().any(|l| l.starts_with("EDGE,vs B&H")));

    let report = service.detection(&query("RALLY")).unwrap().unwrap();
    let windows = export_windows_csv(&report).unwrap();
    assert!(windows.lines().nth(1).unwrap().starts_with("Apr-10,Apr-30,21,"));
}

#[test]
fn optimizer_ranks_grid() {
    let (_dir, service) = service();
    let grid = SweepGrid {
        window_sizes: vec![14, 21, 30],
        thresholds: vec![50.0, 80.0],
    };
    let results = service
        .optimize(&query("RALLY"), &grid, Objective::Profit)
        .unwrap()
        .unwrap();
    assert_eq!(results.points.len(), 6);
    let best = results.best().unwrap();
    assert!(results.points.iter().all(|p| p.avg_profit <= best.avg_profit));
    assert!(best.avg_profit > 20.0);
}

#[test]
fn basket_combines_visible_strategies() {
    let (_dir, service) = service();
    let mut hidden = BasketStrategy::new("NEWCO", 21, 50.0);
    hidden.visible = false;
    let q = BasketQuery {
        strategies: vec![
            BasketStrategy::new("RALLY", 21, 50.0),
            BasketStrategy::new("CALM", 21, 50.0),
            hidden,
        ],
        capital: Some(10_000.0),
        ..BasketQuery::default()
    };
    let resp = service.combine_basket(&q).unwrap();
    assert_eq!(resp.year, SimYear::Averaged);
    assert_eq!(resp.dates.len(), 365);
    assert_eq!(resp.combined_curve.len(), 365);
    assert_eq!(resp.strategy_curves.len(), 2);
    assert_eq!(resp.contributions.len(), 2);
    assert_eq!(resp.total_days, 42);
    assert_eq!(resp.concurrency.shared_days, 0);
    assert_eq!(resp.concurrency.max_concurrent, 1);
    assert!(resp.final_value > 10_000.0);
    assert!(resp.symbols.iter().all(|s| s != "NEWCO"));
}

#[test]
fn basket_with_explicit_weights() {
    let (_dir, service) = service();
    let rally = BasketStrategy::new("RALLY", 21, 50.0);
    let calm = BasketStrategy::new("CALM", 21, 50.0);
    let weights = WeightMap::from([(rally.key(), 0.75), (calm.key(), 0.25)]);
    let q = BasketQuery {
        strategies: vec![rally, calm],
        weights: Some(weights),
        ..BasketQuery::default()
    };
    let resp = service.combine_basket(&q).unwrap();
    assert_eq!(resp.contributions[0].weight, 0.75);
    assert_eq!(resp.contributions[1].weight, 0.25);

    let bad = BasketQuery {
        weights: Some(WeightMap::from([("RALLY:21@50".to_string(), 2.0)])),
        ..q
    };
    assert!(service.combine_basket(&bad).is_err());
}

#[test]
fn basket_strategy_without_data_stays_in_cash() {
    let (_dir, service) = service();
    let q = BasketQuery {
        strategies: vec![
            BasketStrategy::new("RALLY", 21, 50.0),
            BasketStrategy::new("NEWCO", 21, 50.0),
        ],
        ..BasketQuery::default()
    };
    let resp = service.combine_basket(&q).unwrap();
    assert_eq!(resp.strategy_curves.len(), 2);
    assert!(resp.strategy_curves[1].curve.iter().all(|&v| v == 0.0));
    assert!(resp.warning.unwrap().contains("NEWCO"));
}

#[test]
fn overlap_against_existing_basket() {
    let (_dir, service) = service();
    let existing = vec![BasketStrategy::new("RALLY", 21, 50.0)];

    let disjoint = service
        .basket_overlap(&existing, &BasketStrategy::new("CALM", 21, 50.0))
        .unwrap();
    assert_eq!(disjoint.overlap_days, 0);
    assert_eq!(disjoint.new_days, 21);
    assert_eq!(disjoint.basket_days, 21);

    let same = service
        .basket_overlap(&existing, &BasketStrategy::new("RALLY", 21, 50.0))
        .unwrap();
    assert_eq!(same.overlap_days, 21);
    assert_eq!(same.new_days, 0);
}

#[test]
fn saved_basket_round_trip() {
    let (_dir, service) = service();
    let store = service.store();
    store
        .save(
            "seasonal",
            &[
                BasketStrategy::new("RALLY", 21, 50.0),
                BasketStrategy::new("CALM", 21, 50.0),
            ],
        )
        .unwrap();
    store.set_visible("seasonal", "CALM:21@50", false).unwrap();
    assert_eq!(store.list().unwrap(), vec!["seasonal"]);

    let resp = service
        .combine_saved("seasonal", BasketQuery::default())
        .unwrap();
    assert_eq!(resp.contributions.len(), 1);
    assert_eq!(resp.total_days, 21);

    assert!(matches!(
        service.combine_saved("missing", BasketQuery::default()),
        Err(ServiceError::Store(_))
    ));
}

fn weighted(symbol: &str, weight: f64) -> BasketStrategy {
    BasketStrategy {
        weight,
        ..BasketStrategy::new(symbol, 21, 50.0)
    }
}

fn weights_of(resp: &seasonlab_runner::BasketResponse) -> Vec<f64> {
    resp.contributions.iter().map(|c| c.weight).collect()
}

#[test]
fn saved_weights_drive_saved_basket() {
    let (_dir, service) = service();
    service
        .store()
        .save("weighted", &[weighted("RALLY", 0.9), weighted("CALM", 0.1)])
        .unwrap();

    let resp = service
        .combine_saved("weighted", BasketQuery::default())
        .unwrap();
    assert_eq!(resp.weighting, "stored");
    let w = weights_of(&resp);
    assert!((w[0] - 0.9).abs() < 1e-12 && (w[1] - 0.1).abs() < 1e-12, "{w:?}");

    let equal = BasketQuery {
        weighting: Some(Weighting::Equal),
        ..BasketQuery::default()
    };
    let resp = service.combine_saved("weighted", equal).unwrap();
    assert_eq!(weights_of(&resp), vec![0.5, 0.5]);
}

#[test]
fn unweighted_saved_basket_is_equal() {
    let (_dir, service) = service();
    service
        .store()
        .save("plain", &[weighted("RALLY", 0.0), weighted("CALM", 0.0)])
        .unwrap();
    let resp = service.combine_saved("plain", BasketQuery::default()).unwrap();
    assert_eq!(resp.weighting, "equal");
    assert_eq!(weights_of(&resp), vec![0.5, 0.5]);
}

#[test]
fn weighting_schemes_are_selectable() {
    let (_dir, service) = service();
    let strategies = vec![
        BasketStrategy::new("RALLY", 21, 50.0),
        BasketStrategy::new("NEWCO", 21, 50.0),
    ];

    let by_return = BasketQuery {
        strategies: strategies.clone(),
        weighting: Some(Weighting::Return),
        ..BasketQuery::default()
    };
    let resp = service.combine_basket(&by_return).unwrap();
    assert_eq!(resp.weighting, "return_weighted");
    let w = weights_of(&resp);
    // NEWCO sits in cash and earns nothing, so it keeps only the floor.
    assert!((w[1] - DEFAULT_WEIGHT_FLOOR).abs() < 1e-12);
    assert!((w[0] - (1.0 - DEFAULT_WEIGHT_FLOOR)).abs() < 1e-12);

    let by_cap = BasketQuery {
        strategies: strategies.clone(),
        weighting: Some(Weighting::Cap),
        caps: Some([("RALLY".to_string(), 300.0), ("NEWCO".to_string(), 100.0)].into()),
        ..BasketQuery::default()
    };
    let resp = service.combine_basket(&by_cap).unwrap();
    assert_eq!(resp.weighting, "market_cap");
    assert_eq!(weights_of(&resp), vec![0.75, 0.25]);

    let no_caps = BasketQuery {
        caps: None,
        ..by_cap
    };
    assert!(matches!(
        service.combine_basket(&no_caps),
        Err(ServiceError::Engine(_))
    ));
}

#[test]
fn cash_strategy_does_not_dilute_buy_and_hold() {
    let (_dir, service) = service();
    let alone = BasketQuery {
        strategies: vec![BasketStrategy::new("RALLY", 21, 50.0)],
        ..BasketQuery::default()
    };
    let with_cash = BasketQuery {
        strategies: vec![
            BasketStrategy::new("RALLY", 21, 50.0),
            BasketStrategy::new("NEWCO", 21, 50.0),
        ],
        ..BasketQuery::default()
    };
    let a = service.combine_basket(&alone).unwrap();
    let b = service.combine_basket(&with_cash).unwrap();
    assert_eq!(a.bh_curve, b.bh_curve);
}

#[test]
fn blended_symbols_share_one_series() {
    let (_dir, service) = service();
    let resp = service.detect_windows(&query("RALLY,CALM")).unwrap();
    assert_eq!(resp.symbol, "RALLY,CALM");
    assert!(!resp.windows.is_empty());
}
