use std::io::Write;

use serde::{Deserialize, Serialize};

use backtest_engine::{metrics_of, BacktestConfig, SingleSymbolBacktester, METRIC_NAMES};
use quant_core::{Bar, EngineError, Strategy};

/// One strategy's line in a comparison report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub rank: usize,
    pub strategy_name: String,
    pub total_return_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown_pct: f64,
    pub win_rate_pct: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
}

/// Cross-strategy ranking on one symbol's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyComparison {
    pub symbol: String,
    pub ranked_by: String,
    pub rows: Vec<ComparisonRow>,
}

/// Run every named strategy through the single-symbol backtester and rank
/// the results by `metric` (best first, ranks 1..N).
pub fn compare_strategies(
    strategies: &[(String, Box<dyn Strategy>)],
    symbol: &str,
    bars: &[Bar],
    metric: &str,
    config: &BacktestConfig,
) -> Result<StrategyComparison, EngineError> {
    if strategies.is_empty() {
        return Err(EngineError::InvalidInput("no strategies to compare".into()));
    }
    if !METRIC_NAMES.contains(&metric) {
        return Err(EngineError::InvalidParameter(format!(
            "unknown metric {metric:?}; expected one of {METRIC_NAMES:?}"
        )));
    }

    let backtester = SingleSymbolBacktester::new(config.clone());
    let mut scored = Vec::with_capacity(strategies.len());
    for (index, (name, strategy)) in strategies.iter().enumerate() {
        let result = backtester.run(strategy.as_ref(), symbol, bars, None)?;
        let metrics = metrics_of(&result);
        let score = metrics.metric(metric).expect("metric name validated");
        scored.push((
            index,
            score,
            ComparisonRow {
                rank: 0,
                strategy_name: name.clone(),
                total_return_pct: metrics.total_return_pct,
                sharpe: metrics.sharpe,
                sortino: metrics.sortino,
                max_drawdown_pct: metrics.max_drawdown_pct,
                win_rate_pct: metrics.win_rate_pct,
                profit_factor: metrics.profit_factor,
                total_trades: metrics.total_trades,
            },
        ));
    }

    // Best first; ties keep submission order
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    let rows = scored
        .into_iter()
        .enumerate()
        .map(|(position, (_, _, mut row))| {
            row.rank = position + 1;
            row
        })
        .collect();

    Ok(StrategyComparison {
        symbol: symbol.to_string(),
        ranked_by: metric.to_string(),
        rows,
    })
}

impl StrategyComparison {
    /// CSV with the standard comparison column set.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), EngineError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer
            .write_record([
                "Strategy Name",
                "Total Return",
                "Sharpe Ratio",
                "Sortino Ratio",
                "Max Drawdown",
                "Win Rate",
                "Profit Factor",
                "Total Trades",
            ])
            .map_err(|e| EngineError::InvalidInput(format!("csv write failed: {e}")))?;
        for row in &self.rows {
            csv_writer
                .write_record([
                    row.strategy_name.clone(),
                    format!("{:.2}", row.total_return_pct),
                    format!("{:.2}", row.sharpe),
                    format!("{:.2}", row.sortino),
                    format!("{:.2}", row.max_drawdown_pct),
                    format!("{:.2}", row.win_rate_pct),
                    format!("{:.2}", row.profit_factor),
                    row.total_trades.to_string(),
                ])
                .map_err(|e| EngineError::InvalidInput(format!("csv write failed: {e}")))?;
        }
        csv_writer
            .flush()
            .map_err(|e| EngineError::InvalidInput(format!("csv flush failed: {e}")))?;
        Ok(())
    }
}
