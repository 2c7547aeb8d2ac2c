use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use portfolio_engine::Portfolio;
use quant_core::{Bar, EngineError, EquityPoint, SignalAction, Strategy};

use crate::metrics;
use crate::models::{BacktestConfig, BacktestResult, BenchmarkComparison, SignalStats};

/// Replays one symbol's bars against a strategy.
///
/// Look-ahead free by construction: at bar `i` the strategy sees exactly
/// `bars[0..=i]`. Fills land at that bar's close adjusted by slippage, buys
/// up and sells down; commission is charged on the fill value. Short selling
/// is rejected here (see the short-selling engine for long/short replays).
///
/// Optional protective exits (fixed stop, take-profit, trailing stop) are
/// checked against each bar's range before the strategy is consulted, with
/// gap-through fills at the open when the bar opens past the level.
pub struct SingleSymbolBacktester {
    config: BacktestConfig,
}

impl SingleSymbolBacktester {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn run(
        &self,
        strategy: &dyn Strategy,
        symbol: &str,
        bars: &[Bar],
        cancel: Option<&CancellationToken>,
    ) -> Result<BacktestResult, EngineError> {
        if symbol.is_empty() {
            return Err(EngineError::InvalidInput("symbol must not be empty".into()));
        }
        if bars.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "{symbol}: no bars to backtest"
            )));
        }
        if !(self.config.initial_capital > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "initial capital must be positive, got {}",
                self.config.initial_capital
            )));
        }

        let trading = self.config.trading();
        let mut portfolio = Portfolio::new(
            format!("backtest-{symbol}"),
            "backtester",
            self.config.initial_capital,
            bars[0].date,
        )?;
        let mut stats = SignalStats::default();
        let mut trade_pnls = Vec::new();
        let mut equity_curve = Vec::with_capacity(bars.len());
        let mut marks = BTreeMap::new();
        // Highest close since entry, for the trailing stop
        let mut high_water: Option<f64> = None;

        for i in 0..bars.len() {
            // Cancellation only takes effect between bar iterations
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(EngineError::Cancelled(format!(
                        "backtest of {symbol} at bar {i}"
                    )));
                }
            }

            let bar = &bars[i];

            // Protective exits run against the bar's range before the
            // strategy is consulted
            if let Some(exit) = self.protective_exit(&portfolio, symbol, bar, high_water) {
                let (exit_price, reason) = exit;
                let realized_before = portfolio.realized_pnl;
                portfolio.sell(
                    symbol,
                    None,
                    exit_price,
                    bar.date,
                    &trading,
                    Some(strategy.name().to_string()),
                    Some(reason.to_string()),
                )?;
                trade_pnls.push(portfolio.realized_pnl - realized_before);
                high_water = None;
            }

            let window = &bars[..=i];
            let signal = strategy.analyze(symbol, window, bar.close);
            stats.generated += 1;

            match signal.action {
                SignalAction::Buy => {
                    let was_open = portfolio.longs.contains_key(symbol);
                    let shares = self.affordable_shares(portfolio.cash, bar.close);
                    if shares >= 1.0 {
                        match portfolio.buy(
                            symbol,
                            shares,
                            bar.close,
                            bar.date,
                            &trading,
                            Some(strategy.name().to_string()),
                            Some(signal.reasoning.clone()),
                        ) {
                            Ok(_) => {
                                stats.executed += 1;
                                if !was_open {
                                    self.arm_protective_levels(&mut portfolio, symbol, bar.close);
                                    high_water = Some(bar.close);
                                }
                            }
                            Err(err) if err.is_rejection() => {
                                stats.record_rejection(
                                    err.rejection_reason().unwrap_or_default(),
                                );
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
                SignalAction::Sell => {
                    if portfolio.longs.contains_key(symbol) {
                        let realized_before = portfolio.realized_pnl;
                        portfolio.sell(
                            symbol,
                            None,
                            bar.close,
                            bar.date,
                            &trading,
                            Some(strategy.name().to_string()),
                            Some(signal.reasoning.clone()),
                        )?;
                        trade_pnls.push(portfolio.realized_pnl - realized_before);
                        stats.executed += 1;
                        high_water = None;
                    } else {
                        // No position to reduce and shorting is out of scope here
                        stats.record_rejection("short_not_supported".to_string());
                    }
                }
                SignalAction::Hold => {}
            }

            if portfolio.longs.contains_key(symbol) {
                high_water = Some(high_water.map_or(bar.close, |h| h.max(bar.close)));
            }

            marks.insert(symbol.to_string(), bar.close);
            equity_curve.push(EquityPoint {
                date: bar.date,
                net_worth: portfolio.net_worth(&marks),
            });
        }

        let final_value = equity_curve
            .last()
            .map(|p| p.net_worth)
            .unwrap_or(self.config.initial_capital);
        let total_commission: f64 = portfolio.trade_log.iter().map(|t| t.commission).sum();
        let return_pct = metrics::total_return(self.config.initial_capital, final_value);
        let benchmark = self.buy_hold_benchmark(bars, return_pct);

        tracing::debug!(
            symbol,
            strategy = strategy.name(),
            trades = portfolio.trade_log.len(),
            final_value,
            "single-symbol backtest complete"
        );

        Ok(BacktestResult {
            symbol: symbol.to_string(),
            strategy_name: strategy.name().to_string(),
            initial_capital: self.config.initial_capital,
            final_value,
            return_pct,
            total_commission,
            max_drawdown_pct: metrics::max_drawdown(&equity_curve),
            trades: portfolio.trade_log,
            trade_pnls,
            equity_curve,
            signals: stats,
            benchmark,
        })
    }

    /// Whole shares affordable from `cash` at the slippage-adjusted fill,
    /// commission included.
    fn affordable_shares(&self, cash: f64, price: f64) -> f64 {
        let fill = price * (1.0 + self.config.slippage_rate);
        let budget = cash * self.config.entry_fraction;
        (budget / (fill * (1.0 + self.config.commission_rate))).floor()
    }

    /// Protective-exit trigger for the open long, if any: `(fill, reason)`.
    ///
    /// The trailing stop ratchets off the highest close since entry and
    /// replaces the fixed stop. A bar opening past the level fills at the
    /// open (gap-through), not at the level.
    fn protective_exit(
        &self,
        portfolio: &Portfolio,
        symbol: &str,
        bar: &Bar,
        high_water: Option<f64>,
    ) -> Option<(f64, &'static str)> {
        let position = portfolio.longs.get(symbol)?;

        let (stop, stop_reason) = match (self.config.trailing_stop_pct, high_water) {
            (Some(trailing), Some(high)) => (Some(high * (1.0 - trailing)), "trailing_stop"),
            _ => (position.stop_loss, "stop_loss"),
        };

        if let Some(stop) = stop {
            if bar.low <= stop {
                return Some((stop.min(bar.open), stop_reason));
            }
        }
        if let Some(take_profit) = position.take_profit {
            if bar.high >= take_profit {
                return Some((take_profit.max(bar.open), "take_profit"));
            }
        }
        None
    }

    /// Arm the configured stop/take-profit levels on a fresh entry.
    fn arm_protective_levels(&self, portfolio: &mut Portfolio, symbol: &str, entry_price: f64) {
        if let Some(position) = portfolio.longs.get_mut(symbol) {
            position.stop_loss = self.config.stop_loss_pct.map(|pct| entry_price * (1.0 - pct));
            position.take_profit = self
                .config
                .take_profit_pct
                .map(|pct| entry_price * (1.0 + pct));
        }
    }

    /// Buy-and-hold comparison over the same bars.
    fn buy_hold_benchmark(&self, bars: &[Bar], return_pct: f64) -> Option<BenchmarkComparison> {
        let first_close = bars.first().map(|b| b.close).filter(|c| *c > 0.0)?;
        let shares = self.config.initial_capital / first_close;
        let buy_hold_curve: Vec<EquityPoint> = bars
            .iter()
            .map(|b| EquityPoint {
                date: b.date,
                net_worth: shares * b.close,
            })
            .collect();
        let final_value = buy_hold_curve.last()?.net_worth;
        let buy_hold_return_pct = metrics::total_return(self.config.initial_capital, final_value);
        Some(BenchmarkComparison {
            buy_hold_return_pct,
            alpha_pct: return_pct - buy_hold_return_pct,
            buy_hold_curve,
        })
    }
}
