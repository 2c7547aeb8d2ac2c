use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use quant_core::{Bar, EngineError};

use crate::engine::SingleSymbolBacktester;
use crate::models::BacktestConfig;
use crate::optimizer::{metrics_of, optimize, ParameterGrid, StrategyFactory};

/// One train/test window of a walk-forward run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardWindow {
    pub window_number: usize,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    pub best_parameters: BTreeMap<String, f64>,
    pub train_score: f64,
    pub test_score: f64,
}

/// Aggregate walk-forward outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub windows: Vec<WalkForwardWindow>,
    pub avg_train_score: f64,
    pub avg_test_score: f64,
    /// avg_test / avg_train, clamped to [0, 2] for reporting. Values below
    /// 0.8 flag overfitting; the ratio is reported, never enforced.
    pub overfitting_ratio: f64,
}

/// Roll an optimize-then-test window over the bars.
///
/// Training uses `[t, t + train_window)`, testing the following
/// `test_window` bars; the window steps by `test_window` so test slices
/// never overlap. Each window's winning parameters are re-evaluated
/// out-of-sample on its test slice.
#[allow(clippy::too_many_arguments)]
pub fn walk_forward(
    factory: &StrategyFactory,
    grid: &ParameterGrid,
    symbol: &str,
    bars: &[Bar],
    metric: &str,
    train_window: usize,
    test_window: usize,
    config: &BacktestConfig,
    parallelism: usize,
    cancel: Option<&CancellationToken>,
) -> Result<WalkForwardReport, EngineError> {
    if train_window == 0 || test_window == 0 {
        return Err(EngineError::InvalidParameter(
            "train and test windows must be positive".into(),
        ));
    }
    if bars.len() < train_window + test_window {
        return Err(EngineError::InsufficientData(format!(
            "walk-forward needs {} bars, have {}",
            train_window + test_window,
            bars.len()
        )));
    }

    let backtester = SingleSymbolBacktester::new(config.clone());
    let mut windows = Vec::new();
    let mut start = 0usize;

    while start + train_window + test_window <= bars.len() {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled("walk-forward".into()));
            }
        }

        let train = &bars[start..start + train_window];
        let test = &bars[start + train_window..start + train_window + test_window];

        let optimized = match optimize(
            factory, grid, symbol, train, metric, config, parallelism, cancel,
        ) {
            Ok(report) => report,
            // A window without enough usable data is fatal for that window only
            Err(EngineError::InsufficientData(message)) => {
                tracing::debug!(symbol, start, "skipping walk-forward window: {message}");
                start += test_window;
                continue;
            }
            Err(err) => return Err(err),
        };

        let strategy = factory(&optimized.best_parameters);
        let test_result = backtester.run(strategy.as_ref(), symbol, test, cancel)?;
        let test_score = metrics_of(&test_result)
            .metric(metric)
            .expect("metric name validated");

        windows.push(WalkForwardWindow {
            window_number: windows.len() + 1,
            train_start: train[0].date,
            train_end: train[train.len() - 1].date,
            test_start: test[0].date,
            test_end: test[test.len() - 1].date,
            best_parameters: optimized.best_parameters,
            train_score: optimized.best_score,
            test_score,
        });

        start += test_window;
    }

    if windows.is_empty() {
        return Err(EngineError::InsufficientData(
            "no usable walk-forward windows".into(),
        ));
    }

    let avg_train_score =
        windows.iter().map(|w| w.train_score).sum::<f64>() / windows.len() as f64;
    let avg_test_score =
        windows.iter().map(|w| w.test_score).sum::<f64>() / windows.len() as f64;
    let overfitting_ratio = if avg_train_score == 0.0 {
        0.0
    } else {
        (avg_test_score / avg_train_score).clamp(0.0, 2.0)
    };

    tracing::debug!(
        symbol,
        windows = windows.len(),
        avg_train_score,
        avg_test_score,
        overfitting_ratio,
        "walk-forward complete"
    );

    Ok(WalkForwardReport {
        windows,
        avg_train_score,
        avg_test_score,
        overfitting_ratio,
    })
}
