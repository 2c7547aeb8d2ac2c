use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use quant_core::EquityPoint;

/// Annual risk-free rate used by the risk-adjusted ratios.
pub const RISK_FREE_RATE: f64 = 0.02;

const TRADING_DAYS: f64 = 252.0;

/// Performance summary over a backtest's outputs.
///
/// `compute` is a pure function of its inputs: equal inputs always produce
/// equal results. Values are stored at full precision; rounding is applied
/// at render time only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return_pct: f64,
    pub annualized_return_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    /// Negative percentage; 0 on a monotone non-decreasing curve
    pub max_drawdown_pct: f64,
    pub win_rate_pct: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub reward_risk: f64,
    pub volatility_pct: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
}

/// Metric names accepted wherever a metric is selected by name (optimizer,
/// walk-forward, strategy comparison).
pub const METRIC_NAMES: &[&str] = &[
    "total_return",
    "annualized_return",
    "sharpe",
    "sortino",
    "max_drawdown",
    "win_rate",
    "profit_factor",
    "expectancy",
    "volatility",
];

impl PerformanceMetrics {
    /// Look up a metric by its selection name. Drawdown is stored as a
    /// negative percentage, so "higher is better" holds for every metric.
    pub fn metric(&self, name: &str) -> Option<f64> {
        Some(match name {
            "total_return" => self.total_return_pct,
            "annualized_return" => self.annualized_return_pct,
            "sharpe" => self.sharpe,
            "sortino" => self.sortino,
            "max_drawdown" => self.max_drawdown_pct,
            "win_rate" => self.win_rate_pct,
            "profit_factor" => self.profit_factor,
            "expectancy" => self.expectancy,
            "volatility" => self.volatility_pct,
            _ => return None,
        })
    }

    /// `trade_pnls` holds realized P&L per closed trade; `days` is the
    /// calendar length of the run.
    pub fn compute(trade_pnls: &[f64], equity_curve: &[EquityPoint], days: u32) -> Self {
        let initial = equity_curve.first().map(|p| p.net_worth).unwrap_or(0.0);
        let final_value = equity_curve.last().map(|p| p.net_worth).unwrap_or(0.0);
        let returns = daily_returns(equity_curve);

        let winning_trades = trade_pnls.iter().filter(|&&p| p > 0.0).count();
        let losing_trades = trade_pnls.iter().filter(|&&p| p < 0.0).count();

        Self {
            total_return_pct: total_return(initial, final_value),
            annualized_return_pct: annualized_return(initial, final_value, days),
            sharpe: sharpe(&returns, RISK_FREE_RATE),
            sortino: sortino(&returns, RISK_FREE_RATE),
            max_drawdown_pct: max_drawdown(equity_curve),
            win_rate_pct: win_rate(trade_pnls),
            profit_factor: profit_factor(trade_pnls),
            expectancy: expectancy(trade_pnls),
            reward_risk: reward_risk(trade_pnls),
            volatility_pct: volatility(&returns),
            total_trades: trade_pnls.len(),
            winning_trades,
            losing_trades,
        }
    }
}

/// Day-over-day simple returns of the equity curve.
pub fn daily_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .filter(|w| w[0].net_worth > 0.0)
        .map(|w| w[1].net_worth / w[0].net_worth - 1.0)
        .collect()
}

pub fn total_return(initial: f64, final_value: f64) -> f64 {
    if initial <= 0.0 {
        return 0.0;
    }
    (final_value - initial) / initial * 100.0
}

pub fn annualized_return(initial: f64, final_value: f64, days: u32) -> f64 {
    if initial <= 0.0 || final_value <= 0.0 || days == 0 {
        return 0.0;
    }
    ((final_value / initial).powf(365.0 / days as f64) - 1.0) * 100.0
}

/// Sample standard deviation (n − 1 denominator).
fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.std_dev()
}

pub fn sharpe(daily_returns: &[f64], risk_free_rate: f64) -> f64 {
    if daily_returns.is_empty() {
        return 0.0;
    }
    let mean = daily_returns.mean();
    let stdev = sample_stdev(daily_returns);
    if stdev == 0.0 {
        return 0.0;
    }
    (mean - risk_free_rate / TRADING_DAYS) / stdev * TRADING_DAYS.sqrt()
}

/// Like Sharpe, with deviation measured over negative returns only.
pub fn sortino(daily_returns: &[f64], risk_free_rate: f64) -> f64 {
    if daily_returns.is_empty() {
        return 0.0;
    }
    let mean = daily_returns.mean();
    let downside: Vec<f64> = daily_returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_dev = sample_stdev(&downside);
    if downside_dev == 0.0 {
        return 0.0;
    }
    (mean - risk_free_rate / TRADING_DAYS) / downside_dev * TRADING_DAYS.sqrt()
}

/// Worst excursion below the running peak, as a negative percentage.
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0;
    for point in equity_curve {
        if point.net_worth > peak {
            peak = point.net_worth;
        }
        if peak > 0.0 {
            let excursion = (point.net_worth - peak) / peak * 100.0;
            if excursion < worst {
                worst = excursion;
            }
        }
    }
    worst
}

pub fn win_rate(trade_pnls: &[f64]) -> f64 {
    if trade_pnls.is_empty() {
        return 0.0;
    }
    let wins = trade_pnls.iter().filter(|&&p| p > 0.0).count();
    wins as f64 / trade_pnls.len() as f64 * 100.0
}

/// Gross profits over absolute gross losses; 0 (not infinity) with no
/// losing trades.
pub fn profit_factor(trade_pnls: &[f64]) -> f64 {
    let profits: f64 = trade_pnls.iter().filter(|&&p| p > 0.0).sum();
    let losses: f64 = trade_pnls.iter().filter(|&&p| p < 0.0).sum();
    if losses == 0.0 {
        return 0.0;
    }
    profits / losses.abs()
}

pub fn expectancy(trade_pnls: &[f64]) -> f64 {
    if trade_pnls.is_empty() {
        return 0.0;
    }
    let wins: Vec<f64> = trade_pnls.iter().copied().filter(|&p| p > 0.0).collect();
    let losses: Vec<f64> = trade_pnls.iter().copied().filter(|&p| p < 0.0).collect();
    let win_rate = wins.len() as f64 / trade_pnls.len() as f64;
    let loss_rate = losses.len() as f64 / trade_pnls.len() as f64;
    let avg_win = if wins.is_empty() {
        0.0
    } else {
        wins.iter().sum::<f64>() / wins.len() as f64
    };
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        losses.iter().sum::<f64>() / losses.len() as f64
    };
    win_rate * avg_win - loss_rate * avg_loss.abs()
}

pub fn reward_risk(trade_pnls: &[f64]) -> f64 {
    let wins: Vec<f64> = trade_pnls.iter().copied().filter(|&p| p > 0.0).collect();
    let losses: Vec<f64> = trade_pnls.iter().copied().filter(|&p| p < 0.0).collect();
    if wins.is_empty() || losses.is_empty() {
        return 0.0;
    }
    let avg_win = wins.iter().sum::<f64>() / wins.len() as f64;
    let avg_loss = losses.iter().sum::<f64>() / losses.len() as f64;
    avg_win / avg_loss.abs()
}

/// Annualized standard deviation of daily returns, as a percentage.
pub fn volatility(daily_returns: &[f64]) -> f64 {
    sample_stdev(daily_returns) * TRADING_DAYS.sqrt() * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &net_worth)| EquityPoint {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i as u64),
                net_worth,
            })
            .collect()
    }

    #[test]
    fn total_and_annualized_returns() {
        assert_relative_eq!(total_return(10_000.0, 11_000.0), 10.0);
        // Doubling over exactly one year doubles annualized
        assert_relative_eq!(annualized_return(10_000.0, 20_000.0, 365), 100.0, epsilon = 1e-9);
        // Doubling over two years is sqrt(2) - 1 annualized
        assert_relative_eq!(
            annualized_return(10_000.0, 20_000.0, 730),
            (2.0f64.powf(0.5) - 1.0) * 100.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn max_drawdown_zero_on_monotone_curve() {
        assert_relative_eq!(max_drawdown(&curve(&[100.0, 110.0, 120.0, 130.0])), 0.0);
    }

    #[test]
    fn max_drawdown_finds_worst_trough() {
        // Peak 120, trough 90: (90-120)/120 = -25%
        let dd = max_drawdown(&curve(&[100.0, 120.0, 90.0, 110.0, 115.0]));
        assert_relative_eq!(dd, -25.0, epsilon = 1e-9);
    }

    #[test]
    fn sharpe_of_constant_returns_is_zero() {
        // Zero variance => 0, not NaN or infinity
        assert_relative_eq!(sharpe(&[0.01, 0.01, 0.01], 0.02), 0.0);
        assert_relative_eq!(sharpe(&[], 0.02), 0.0);
    }

    #[test]
    fn sharpe_uses_sample_variance() {
        let returns = [0.01, -0.005, 0.02, 0.0, 0.007];
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let expected = (mean - 0.02 / 252.0) / variance.sqrt() * 252.0f64.sqrt();
        assert_relative_eq!(sharpe(&returns, 0.02), expected, epsilon = 1e-12);
    }

    #[test]
    fn sortino_ignores_upside_noise() {
        // Wild upside, mild downside: sortino should exceed sharpe
        let returns = [0.05, -0.002, 0.08, -0.001, 0.06, -0.002, 0.07];
        assert!(sortino(&returns, 0.02) > sharpe(&returns, 0.02));
        // No negative returns => 0 by convention
        assert_relative_eq!(sortino(&[0.01, 0.02], 0.02), 0.0);
    }

    #[test]
    fn win_rate_empty_is_zero_not_nan() {
        assert_relative_eq!(win_rate(&[]), 0.0);
        assert_relative_eq!(win_rate(&[10.0, -5.0, 20.0, -1.0]), 50.0);
    }

    #[test]
    fn profit_factor_with_no_losers_is_zero() {
        assert_relative_eq!(profit_factor(&[10.0, 20.0]), 0.0);
        assert_relative_eq!(profit_factor(&[30.0, -10.0]), 3.0);
        assert_relative_eq!(profit_factor(&[]), 0.0);
    }

    #[test]
    fn expectancy_and_reward_risk() {
        // 2 wins avg 15, 2 losses avg 5
        let pnls = [10.0, 20.0, -4.0, -6.0];
        assert_relative_eq!(expectancy(&pnls), 0.5 * 15.0 - 0.5 * 5.0, epsilon = 1e-9);
        assert_relative_eq!(reward_risk(&pnls), 3.0, epsilon = 1e-9);
        assert_relative_eq!(reward_risk(&[5.0, 10.0]), 0.0);
    }

    #[test]
    fn compute_is_idempotent() {
        let pnls = [120.0, -60.0, 45.0];
        let equity = curve(&[10_000.0, 10_100.0, 9_950.0, 10_105.0]);
        let a = PerformanceMetrics::compute(&pnls, &equity, 90);
        let b = PerformanceMetrics::compute(&pnls, &equity, 90);
        assert_eq!(a, b);
    }
}
