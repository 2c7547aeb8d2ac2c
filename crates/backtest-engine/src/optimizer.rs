use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use quant_core::{Bar, EngineError, Strategy};

use crate::engine::SingleSymbolBacktester;
use crate::metrics::{PerformanceMetrics, METRIC_NAMES};
use crate::models::{BacktestConfig, BacktestResult};

/// Builds a strategy instance from one parameter combination.
pub type StrategyFactory = dyn Fn(&BTreeMap<String, f64>) -> Box<dyn Strategy> + Sync;

/// Named parameter axes whose Cartesian product is searched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterGrid {
    axes: Vec<(String, Vec<f64>)>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn axis(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.axes.push((name.into(), values));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty() || self.axes.iter().any(|(_, values)| values.is_empty())
    }

    /// Every combination, in deterministic lexicographic order over the axes
    /// as declared.
    pub fn combinations(&self) -> Vec<BTreeMap<String, f64>> {
        let mut combos: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new()];
        for (name, values) in &self.axes {
            let mut expanded = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for &value in values {
                    let mut next = combo.clone();
                    next.insert(name.clone(), value);
                    expanded.push(next);
                }
            }
            combos = expanded;
        }
        combos
    }
}

/// One evaluated combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationEntry {
    pub parameters: BTreeMap<String, f64>,
    pub score: f64,
}

/// Grid-search outcome, best combination first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub best_parameters: BTreeMap<String, f64>,
    pub best_score: f64,
    pub worst_score: f64,
    pub avg_score: f64,
    pub iterations: usize,
    pub all_results: Vec<OptimizationEntry>,
}

/// Performance metrics of a finished run, with `days` taken from the equity
/// curve's calendar span.
pub fn metrics_of(result: &BacktestResult) -> PerformanceMetrics {
    let days = match (result.equity_curve.first(), result.equity_curve.last()) {
        (Some(first), Some(last)) => ((last.date - first.date).num_days() + 1).max(1) as u32,
        _ => 1,
    };
    PerformanceMetrics::compute(&result.trade_pnls, &result.equity_curve, days)
}

/// Grid-search strategy parameters on one symbol's bars.
///
/// Combinations fan out over a rayon pool sized by `parallelism`
/// (0 = rayon's default) and are joined before the report is built. Results
/// come back sorted best-first by the chosen metric.
pub fn optimize(
    factory: &StrategyFactory,
    grid: &ParameterGrid,
    symbol: &str,
    bars: &[Bar],
    metric: &str,
    config: &BacktestConfig,
    parallelism: usize,
    cancel: Option<&CancellationToken>,
) -> Result<OptimizationReport, EngineError> {
    if !METRIC_NAMES.contains(&metric) {
        return Err(EngineError::InvalidParameter(format!(
            "unknown metric {metric:?}; expected one of {METRIC_NAMES:?}"
        )));
    }
    if grid.is_empty() {
        return Err(EngineError::InvalidParameter("parameter grid is empty".into()));
    }

    let combos = grid.combinations();
    let backtester = SingleSymbolBacktester::new(config.clone());

    let evaluate = |combo: &BTreeMap<String, f64>| -> Result<f64, EngineError> {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled("parameter optimization".into()));
            }
        }
        let strategy = factory(combo);
        let result = backtester.run(strategy.as_ref(), symbol, bars, cancel)?;
        Ok(metrics_of(&result)
            .metric(metric)
            .expect("metric name validated"))
    };

    let scores: Result<Vec<f64>, EngineError> = if parallelism == 1 {
        combos.iter().map(evaluate).collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .build()
            .map_err(|e| EngineError::InvalidParameter(format!("bad parallelism: {e}")))?;
        pool.install(|| combos.par_iter().map(evaluate).collect())
    };
    let scores = scores?;

    // Best first; ties keep grid order so output is deterministic
    let mut order: Vec<usize> = (0..combos.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let all_results: Vec<OptimizationEntry> = order
        .iter()
        .map(|&i| OptimizationEntry {
            parameters: combos[i].clone(),
            score: scores[i],
        })
        .collect();

    let avg_score = scores.iter().sum::<f64>() / scores.len() as f64;
    let best = &all_results[0];
    let worst = &all_results[all_results.len() - 1];

    tracing::debug!(
        symbol,
        metric,
        iterations = combos.len(),
        best_score = best.score,
        "grid search complete"
    );

    Ok(OptimizationReport {
        best_parameters: best.parameters.clone(),
        best_score: best.score,
        worst_score: worst.score,
        avg_score,
        iterations: combos.len(),
        all_results,
    })
}
