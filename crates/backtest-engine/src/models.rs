use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use quant_core::{EquityPoint, TradeRecord, TradingConfig};

use crate::metrics::PerformanceMetrics;

/// Configuration for a single-symbol backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage_rate: f64,
    /// Fraction of available cash committed per entry (1.0 = all-in)
    #[serde(default = "default_entry_fraction")]
    pub entry_fraction: f64,
    /// Fixed stop-loss as a fraction below entry (e.g. 0.05 = 5%)
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    /// Take-profit as a fraction above entry
    #[serde(default)]
    pub take_profit_pct: Option<f64>,
    /// Trailing stop as a fraction below the highest close since entry;
    /// replaces the fixed stop when set
    #[serde(default)]
    pub trailing_stop_pct: Option<f64>,
}

fn default_entry_fraction() -> f64 {
    1.0
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            commission_rate: 0.001,
            slippage_rate: 0.0005,
            entry_fraction: 1.0,
            stop_loss_pct: None,
            take_profit_pct: None,
            trailing_stop_pct: None,
        }
    }
}

impl BacktestConfig {
    pub fn trading(&self) -> TradingConfig {
        TradingConfig {
            commission_rate: self.commission_rate,
            slippage_rate: self.slippage_rate,
        }
    }
}

/// Signal bookkeeping for a backtest run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalStats {
    /// Every non-null signal the strategies produced, HOLD included
    pub generated: u64,
    /// Signals that turned into committed trades
    pub executed: u64,
    /// Signals rejected by funding or risk checks
    pub rejected: u64,
    /// Rejection reason code → count
    pub rejection_reasons: BTreeMap<String, u64>,
}

impl SignalStats {
    pub fn record_rejection(&mut self, reason: String) {
        self.rejected += 1;
        *self.rejection_reasons.entry(reason).or_insert(0) += 1;
    }
}

/// Strategy performance measured against holding the symbol outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkComparison {
    pub buy_hold_return_pct: f64,
    /// Strategy return minus buy-and-hold return
    pub alpha_pct: f64,
    pub buy_hold_curve: Vec<EquityPoint>,
}

/// Output of a single-symbol backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub strategy_name: String,
    pub initial_capital: f64,
    /// Final net worth with any open position marked at the last close
    pub final_value: f64,
    pub return_pct: f64,
    pub total_commission: f64,
    /// Negative percentage; 0 on a monotone curve
    pub max_drawdown_pct: f64,
    pub trades: Vec<TradeRecord>,
    /// Realized P&L per closing trade, in close order
    pub trade_pnls: Vec<f64>,
    pub equity_curve: Vec<EquityPoint>,
    pub signals: SignalStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkComparison>,
}

/// Period bounds of a portfolio backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub trading_days: usize,
}

/// Configuration for the multi-symbol, portfolio-level backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioBacktestConfig {
    pub initial_capital: f64,
    /// Per-position target (and validator ceiling) as a fraction of net worth
    pub max_position_size: f64,
    pub max_positions: Option<usize>,
    pub max_sector_allocation: f64,
    pub max_leverage: f64,
    pub correlation_threshold: f64,
    /// Positions drifting beyond this fraction from target trigger rebalance
    pub rebalance_threshold: f64,
    pub commission_rate: f64,
    pub slippage_rate: f64,
}

impl Default for PortfolioBacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            max_position_size: 0.15,
            max_positions: None,
            max_sector_allocation: 0.30,
            max_leverage: 1.0,
            correlation_threshold: 0.70,
            rebalance_threshold: 0.05,
            commission_rate: 0.001,
            slippage_rate: 0.0005,
        }
    }
}

impl PortfolioBacktestConfig {
    pub fn trading(&self) -> TradingConfig {
        TradingConfig {
            commission_rate: self.commission_rate,
            slippage_rate: self.slippage_rate,
        }
    }
}

/// One leg of a rebalance event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceDelta {
    pub symbol: String,
    /// "BUY" or "SELL"
    pub action: String,
    pub shares: f64,
    pub executed: bool,
}

/// A rebalance triggered by the calendar or by weight drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceEvent {
    pub date: NaiveDate,
    pub trigger: String,
    pub deltas: Vec<RebalanceDelta>,
}

/// Sector weights at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorExposureSnapshot {
    pub date: NaiveDate,
    /// Sector → fraction of net worth
    pub exposures: BTreeMap<String, f64>,
}

/// Output of a multi-symbol backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioBacktestResult {
    pub period: BacktestPeriod,
    pub initial_capital: f64,
    pub final_value: f64,
    pub metrics: PerformanceMetrics,
    pub trades: Vec<TradeRecord>,
    pub signals_stats: SignalStats,
    pub portfolio_values: Vec<EquityPoint>,
    pub returns: Vec<f64>,
    pub rebalances: Vec<RebalanceEvent>,
    pub sector_exposures: Vec<SectorExposureSnapshot>,
}

/// Margin-call event from the short-selling engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginCallEvent {
    pub date: NaiveDate,
    pub symbol: String,
    pub net_margin: f64,
    pub maintenance_required: f64,
    pub action_required: String,
}

/// Output of a long/short single-symbol backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortBacktestResult {
    #[serde(flatten)]
    pub base: BacktestResult,
    pub margin_calls: Vec<MarginCallEvent>,
    pub forced_liquidations: u32,
    pub total_short_interest_paid: f64,
}
