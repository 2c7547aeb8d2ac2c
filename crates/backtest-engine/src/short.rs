use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use portfolio_engine::Portfolio;
use quant_core::{Bar, EngineError, EquityPoint, ShortConfig, SignalAction, Strategy};

use crate::metrics;
use crate::models::{
    BacktestConfig, BacktestResult, MarginCallEvent, ShortBacktestResult, SignalStats,
};

/// Long/short replay of one symbol.
///
/// Extends the single-symbol engine: a SELL with no long opens a short
/// (posting margin from cash), a BUY with an open short covers it. Borrow
/// cost accrues daily on the short notional and is realized on cover. Each
/// bar the maintenance margin is checked against the latest mark; a breach
/// emits a margin call, and a breach still standing at the next bar forces
/// liquidation at that bar's close with a penalty surcharge.
pub struct ShortSellingBacktester {
    config: BacktestConfig,
    short: ShortConfig,
}

impl ShortSellingBacktester {
    pub fn new(config: BacktestConfig, short: ShortConfig) -> Self {
        Self { config, short }
    }

    pub fn run(
        &self,
        strategy: &dyn Strategy,
        symbol: &str,
        bars: &[Bar],
        cancel: Option<&CancellationToken>,
    ) -> Result<ShortBacktestResult, EngineError> {
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
            format!("short-backtest-{symbol}"),
            "backtester",
            self.config.initial_capital,
            bars[0].date,
        )?;
        let mut stats = SignalStats::default();
        let mut trade_pnls = Vec::new();
        let mut equity_curve = Vec::with_capacity(bars.len());
        let mut margin_calls: Vec<MarginCallEvent> = Vec::new();
        let mut forced_liquidations = 0u32;
        let mut total_short_interest_paid = 0.0;
        let mut call_pending = false;
        let mut marks = BTreeMap::new();

        for i in 0..bars.len() {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(EngineError::Cancelled(format!(
                        "short backtest of {symbol} at bar {i}"
                    )));
                }
            }

            let bar = &bars[i];

            // One day of borrow cost per bar held
            if i > 0 && !portfolio.shorts.is_empty() {
                portfolio.accrue_short_interest(self.short.short_interest_rate);
            }

            // A margin call unresolved by this bar forces liquidation at
            // this bar's close
            if call_pending {
                if self.margin_breach(&portfolio, symbol, bar.close).is_some() {
                    let interest = portfolio
                        .shorts
                        .get(symbol)
                        .map(|p| p.accrued_interest)
                        .unwrap_or(0.0);
                    let realized_before = portfolio.realized_pnl;
                    portfolio.force_liquidate_short(
                        symbol,
                        bar.close,
                        bar.date,
                        &trading,
                        &self.short,
                        Some("margin call unresolved".to_string()),
                    )?;
                    trade_pnls.push(portfolio.realized_pnl - realized_before);
                    total_short_interest_paid += interest;
                    forced_liquidations += 1;
                }
                call_pending = false;
            }

            let window = &bars[..=i];
            let signal = strategy.analyze(symbol, window, bar.close);
            stats.generated += 1;

            match signal.action {
                SignalAction::Buy => {
                    if portfolio.shorts.contains_key(symbol) {
                        let interest = portfolio.shorts[symbol].accrued_interest;
                        let realized_before = portfolio.realized_pnl;
                        portfolio.cover_short(
                            symbol,
                            None,
                            bar.close,
                            bar.date,
                            &trading,
                            Some(strategy.name().to_string()),
                            Some(signal.reasoning.clone()),
                        )?;
                        trade_pnls.push(portfolio.realized_pnl - realized_before);
                        total_short_interest_paid += interest;
                        stats.executed += 1;
                        call_pending = false;
                    } else {
                        let shares = self.affordable_long_shares(portfolio.cash, bar.close);
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
                                Ok(_) => stats.executed += 1,
                                Err(err) if err.is_rejection() => stats.record_rejection(
                                    err.rejection_reason().unwrap_or_default(),
                                ),
                                Err(err) => return Err(err),
                            }
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
                    } else {
                        let shares = self.affordable_short_shares(portfolio.cash, bar.close);
                        if shares >= 1.0 {
                            match portfolio.enter_short(
                                symbol,
                                shares,
                                bar.close,
                                bar.date,
                                &trading,
                                &self.short,
                                Some(strategy.name().to_string()),
                                Some(signal.reasoning.clone()),
                            ) {
                                Ok(_) => stats.executed += 1,
                                Err(err) if err.is_rejection() => stats.record_rejection(
                                    err.rejection_reason().unwrap_or_default(),
                                ),
                                Err(err) => return Err(err),
                            }
                        }
                    }
                }
                SignalAction::Hold => {}
            }

            // Maintenance check with this bar's mark
            if let Some((net_margin, maintenance)) =
                self.margin_breach(&portfolio, symbol, bar.close)
            {
                if !call_pending {
                    tracing::warn!(
                        symbol,
                        net_margin,
                        maintenance,
                        date = %bar.date,
                        "margin call"
                    );
                    margin_calls.push(MarginCallEvent {
                        date: bar.date,
                        symbol: symbol.to_string(),
                        net_margin,
                        maintenance_required: maintenance,
                        action_required: "add_margin_or_liquidate".to_string(),
                    });
                    call_pending = true;
                }
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

        Ok(ShortBacktestResult {
            base: BacktestResult {
                symbol: symbol.to_string(),
                strategy_name: strategy.name().to_string(),
                initial_capital: self.config.initial_capital,
                final_value,
                return_pct: metrics::total_return(self.config.initial_capital, final_value),
                total_commission,
                max_drawdown_pct: metrics::max_drawdown(&equity_curve),
                trades: portfolio.trade_log,
                trade_pnls,
                equity_curve,
                signals: stats,
                benchmark: None,
            },
            margin_calls,
            forced_liquidations,
            total_short_interest_paid,
        })
    }

    /// `(net_margin, maintenance)` when the open short is below maintenance,
    /// None otherwise. Accrued-but-unpaid interest is excluded from the
    /// check; it is realized on cover only.
    fn margin_breach(
        &self,
        portfolio: &Portfolio,
        symbol: &str,
        mark: f64,
    ) -> Option<(f64, f64)> {
        let position = portfolio.shorts.get(symbol)?;
        let unrealized_loss = ((mark - position.avg_short_price) * position.shares).max(0.0);
        let net_margin = position.margin_posted - unrealized_loss;
        let maintenance = position.shares
            * mark
            * (self.short.margin_requirement - self.short.maintenance_margin_buffer);
        (net_margin < maintenance).then_some((net_margin, maintenance))
    }

    fn affordable_long_shares(&self, cash: f64, price: f64) -> f64 {
        let fill = price * (1.0 + self.config.slippage_rate);
        (cash * self.config.entry_fraction / (fill * (1.0 + self.config.commission_rate))).floor()
    }

    /// Shares whose margin posting plus entry commission fit in the budget.
    fn affordable_short_shares(&self, cash: f64, price: f64) -> f64 {
        let fill = price * (1.0 - self.config.slippage_rate);
        let per_share = price * self.short.margin_requirement
            + fill * self.config.commission_rate;
        (cash * self.config.entry_fraction / per_share).floor()
    }
}
