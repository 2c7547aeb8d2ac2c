use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use tokio_util::sync::CancellationToken;

use portfolio_engine::{CorrelationMatrix, Portfolio, ProposedTrade, RiskValidator, TradeSide};
use position_sizer::fixed_percent;
use quant_core::{
    Bar, EngineError, EquityPoint, PortfolioConfig, SectorMap, ShortConfig, SignalAction,
    Strategy,
};

use crate::metrics::PerformanceMetrics;
use crate::models::{
    BacktestPeriod, PortfolioBacktestConfig, PortfolioBacktestResult, RebalanceDelta,
    RebalanceEvent, SectorExposureSnapshot, SignalStats,
};

struct Registration {
    symbol: String,
    strategy: Box<dyn Strategy>,
    sector: Option<String>,
}

/// Day-synchronized replay across many symbols with one registered strategy
/// per symbol, portfolio-wide risk enforcement, and rebalancing.
///
/// The outer loop walks the union of bar dates inside the requested range.
/// Within a date, symbols are processed in registration order, so two runs
/// over the same inputs produce identical trade logs.
pub struct MultiSymbolBacktester {
    config: PortfolioBacktestConfig,
    registrations: Vec<Registration>,
}

impl MultiSymbolBacktester {
    pub fn new(config: PortfolioBacktestConfig) -> Self {
        Self {
            config,
            registrations: Vec::new(),
        }
    }

    /// Register a strategy for one symbol, with optional sector metadata.
    pub fn register(
        &mut self,
        symbol: impl Into<String>,
        strategy: Box<dyn Strategy>,
        sector: Option<String>,
    ) -> Result<(), EngineError> {
        let symbol = symbol.into();
        if symbol.is_empty() {
            return Err(EngineError::InvalidInput("symbol must not be empty".into()));
        }
        if self.registrations.iter().any(|r| r.symbol == symbol) {
            return Err(EngineError::InvalidInput(format!(
                "{symbol}: strategy already registered"
            )));
        }
        self.registrations.push(Registration {
            symbol,
            strategy,
            sector,
        });
        Ok(())
    }

    pub fn run(
        &self,
        market: &BTreeMap<String, Vec<Bar>>,
        start: NaiveDate,
        end: NaiveDate,
        cancel: Option<&CancellationToken>,
    ) -> Result<PortfolioBacktestResult, EngineError> {
        if market.is_empty() {
            return Err(EngineError::InvalidInput("no market data provided".into()));
        }
        if self.registrations.is_empty() {
            return Err(EngineError::InvalidInput("no strategies registered".into()));
        }

        // Union of bar dates across registered symbols, clipped to the range
        let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
        for registration in &self.registrations {
            if let Some(bars) = market.get(&registration.symbol) {
                dates.extend(
                    bars.iter()
                        .map(|b| b.date)
                        .filter(|d| *d >= start && *d <= end),
                );
            }
        }
        if dates.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "no bar dates fall inside {start}..{end}"
            )));
        }
        let dates: Vec<NaiveDate> = dates.into_iter().collect();

        // Per-symbol date → index lookup for prefix slicing
        let mut date_index: BTreeMap<&str, BTreeMap<NaiveDate, usize>> = BTreeMap::new();
        for registration in &self.registrations {
            if let Some(bars) = market.get(&registration.symbol) {
                date_index.insert(
                    registration.symbol.as_str(),
                    bars.iter().enumerate().map(|(i, b)| (b.date, i)).collect(),
                );
            }
        }

        let validator = RiskValidator::new(
            PortfolioConfig {
                initial_capital: self.config.initial_capital,
                max_position_size: self.config.max_position_size,
                max_sector_allocation: self.config.max_sector_allocation,
                correlation_threshold: self.config.correlation_threshold,
                max_leverage: self.config.max_leverage,
                max_positions: self.config.max_positions,
            },
            self.config.trading(),
            ShortConfig::default(),
        );
        let sectors: SectorMap = self
            .registrations
            .iter()
            .filter_map(|r| r.sector.clone().map(|s| (r.symbol.clone(), s)))
            .collect();
        let has_sectors = !sectors.is_empty();
        let trading = self.config.trading();

        let mut portfolio = Portfolio::new(
            "multi-backtest",
            "backtester",
            self.config.initial_capital,
            dates[0],
        )?;
        let mut stats = SignalStats::default();
        let mut trade_pnls: Vec<f64> = Vec::new();
        let mut portfolio_values: Vec<EquityPoint> = Vec::new();
        let mut returns: Vec<f64> = Vec::new();
        let mut rebalances: Vec<RebalanceEvent> = Vec::new();
        let mut sector_exposures: Vec<SectorExposureSnapshot> = Vec::new();
        let mut marks: BTreeMap<String, f64> = BTreeMap::new();
        let mut correlation_cache: Option<(NaiveDate, CorrelationMatrix)> = None;

        for (day_number, &date) in dates.iter().enumerate() {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(EngineError::Cancelled(format!("portfolio backtest at {date}")));
                }
            }

            // Refresh marks with today's closes before any decision
            for registration in &self.registrations {
                if let (Some(bars), Some(index)) = (
                    market.get(&registration.symbol),
                    date_index
                        .get(registration.symbol.as_str())
                        .and_then(|m| m.get(&date)),
                ) {
                    marks.insert(registration.symbol.clone(), bars[*index].close);
                }
            }

            for registration in &self.registrations {
                let symbol = registration.symbol.as_str();
                let Some(bars) = market.get(symbol) else {
                    continue;
                };
                let Some(&bar_index) = date_index.get(symbol).and_then(|m| m.get(&date)) else {
                    continue;
                };
                // Strategy sees history strictly before today
                let historical = &bars[..bar_index];
                if historical.is_empty() {
                    continue;
                }
                let price = bars[bar_index].close;

                let signal = registration.strategy.analyze(symbol, historical, price);
                stats.generated += 1;

                match signal.action {
                    SignalAction::Buy => {
                        let correlations = self.correlations_for(
                            &mut correlation_cache,
                            date,
                            market,
                            &date_index,
                        );
                        self.try_buy(
                            &mut portfolio,
                            &validator,
                            &marks,
                            symbol,
                            price,
                            date,
                            has_sectors.then_some(&sectors),
                            correlations,
                            Some(registration.strategy.name().to_string()),
                            Some(signal.reasoning.clone()),
                            &mut stats,
                        )?;
                    }
                    SignalAction::Sell => {
                        if portfolio.longs.contains_key(symbol) {
                            let realized_before = portfolio.realized_pnl;
                            portfolio.sell(
                                symbol,
                                None,
                                price,
                                date,
                                &trading,
                                Some(registration.strategy.name().to_string()),
                                Some(signal.reasoning.clone()),
                            )?;
                            trade_pnls.push(portfolio.realized_pnl - realized_before);
                            stats.executed += 1;
                        }
                    }
                    SignalAction::Hold => {}
                }
            }

            // End-of-day mark and daily return
            let net_worth = portfolio.net_worth(&marks);
            if let Some(previous) = portfolio_values.last() {
                if previous.net_worth > 0.0 {
                    returns.push(net_worth / previous.net_worth - 1.0);
                }
            }
            portfolio_values.push(EquityPoint {
                date,
                net_worth,
            });

            if has_sectors {
                sector_exposures.push(self.sector_snapshot(&portfolio, &marks, &sectors, date));
            }

            // Rebalance at week boundaries, or sooner if weights drift
            let week_ends = match dates.get(day_number + 1) {
                Some(next) => next.iso_week() != date.iso_week(),
                None => true,
            };
            let drifted = self.max_weight_drift(&portfolio, &marks, net_worth)
                > self.config.rebalance_threshold;
            if (week_ends || drifted) && !portfolio.longs.is_empty() {
                if let Some(event) = self.rebalance(
                    &mut portfolio,
                    &validator,
                    &marks,
                    date,
                    if week_ends { "weekly" } else { "drift" },
                    has_sectors.then_some(&sectors),
                    &mut trade_pnls,
                )? {
                    rebalances.push(event);
                }
            }
        }

        let final_value = portfolio_values
            .last()
            .map(|p| p.net_worth)
            .unwrap_or(self.config.initial_capital);
        let period_start = dates[0];
        let period_end = dates[dates.len() - 1];
        let calendar_days = (period_end - period_start).num_days().max(1) as u32;

        Ok(PortfolioBacktestResult {
            period: BacktestPeriod {
                start: period_start,
                end: period_end,
                trading_days: dates.len(),
            },
            initial_capital: self.config.initial_capital,
            final_value,
            metrics: PerformanceMetrics::compute(&trade_pnls, &portfolio_values, calendar_days),
            trades: portfolio.trade_log,
            signals_stats: stats,
            portfolio_values,
            returns,
            rebalances,
            sector_exposures,
        })
    }

    /// Size a BUY with the default fixed-percent policy, validate it, and
    /// commit it. Rejections are folded into the stats, never raised.
    #[allow(clippy::too_many_arguments)]
    fn try_buy(
        &self,
        portfolio: &mut Portfolio,
        validator: &RiskValidator,
        marks: &BTreeMap<String, f64>,
        symbol: &str,
        price: f64,
        date: NaiveDate,
        sectors: Option<&SectorMap>,
        correlations: Option<&CorrelationMatrix>,
        strategy_name: Option<String>,
        reasoning: Option<String>,
        stats: &mut SignalStats,
    ) -> Result<(), EngineError> {
        let net_worth = portfolio.net_worth(marks);
        let target = match fixed_percent(self.config.max_position_size, price, net_worth) {
            Ok(size) => size.shares as f64,
            Err(_) => return Ok(()),
        };
        let held = portfolio.longs.get(symbol).map(|p| p.shares).unwrap_or(0.0);
        let delta = target - held;
        if delta < 1.0 {
            return Ok(());
        }

        let proposed = ProposedTrade {
            symbol: symbol.to_string(),
            shares: delta,
            price,
            side: TradeSide::Long,
        };
        match validator.validate(portfolio, marks, &proposed, sectors, correlations) {
            Ok(()) => {}
            Err(err) if err.is_rejection() => {
                tracing::debug!(symbol, %date, reason = %err, "entry rejected");
                stats.record_rejection(err.rejection_reason().unwrap_or_default());
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        match portfolio.buy(
            symbol,
            delta,
            price,
            date,
            &self.config.trading(),
            strategy_name,
            reasoning,
        ) {
            Ok(_) => {
                stats.executed += 1;
                Ok(())
            }
            Err(err) if err.is_rejection() => {
                stats.record_rejection(err.rejection_reason().unwrap_or_default());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Largest |weight − target| across open positions.
    fn max_weight_drift(
        &self,
        portfolio: &Portfolio,
        marks: &BTreeMap<String, f64>,
        net_worth: f64,
    ) -> f64 {
        if net_worth <= 0.0 {
            return 0.0;
        }
        portfolio
            .longs
            .values()
            .map(|p| {
                let mark = marks.get(&p.symbol).copied().unwrap_or(p.avg_cost);
                let weight = p.shares * mark / net_worth;
                (weight - self.config.max_position_size).abs()
            })
            .fold(0.0, f64::max)
    }

    /// Bring drifted positions back toward the target weight. Deltas execute
    /// through the same validated commit path as entries.
    #[allow(clippy::too_many_arguments)]
    fn rebalance(
        &self,
        portfolio: &mut Portfolio,
        validator: &RiskValidator,
        marks: &BTreeMap<String, f64>,
        date: NaiveDate,
        trigger: &str,
        sectors: Option<&SectorMap>,
        trade_pnls: &mut Vec<f64>,
    ) -> Result<Option<RebalanceEvent>, EngineError> {
        let net_worth = portfolio.net_worth(marks);
        if net_worth <= 0.0 {
            return Ok(None);
        }
        let target_value = net_worth * self.config.max_position_size;
        let trading = self.config.trading();

        let snapshot: Vec<(String, f64, f64)> = portfolio
            .longs
            .values()
            .map(|p| {
                let mark = marks.get(&p.symbol).copied().unwrap_or(p.avg_cost);
                (p.symbol.clone(), p.shares, mark)
            })
            .collect();

        let mut deltas = Vec::new();
        for (symbol, shares, mark) in snapshot {
            let value = shares * mark;
            let deviation = (value - target_value).abs() / net_worth;
            if deviation <= self.config.rebalance_threshold {
                continue;
            }

            if value > target_value {
                let excess_shares = ((value - target_value) / mark).floor();
                if excess_shares < 1.0 {
                    continue;
                }
                let realized_before = portfolio.realized_pnl;
                portfolio.sell(
                    &symbol,
                    Some(excess_shares),
                    mark,
                    date,
                    &trading,
                    None,
                    Some(format!("rebalance ({trigger})")),
                )?;
                trade_pnls.push(portfolio.realized_pnl - realized_before);
                deltas.push(RebalanceDelta {
                    symbol,
                    action: "SELL".to_string(),
                    shares: excess_shares,
                    executed: true,
                });
            } else {
                let missing_shares = ((target_value - value) / mark).floor();
                if missing_shares < 1.0 {
                    continue;
                }
                let proposed = ProposedTrade {
                    symbol: symbol.clone(),
                    shares: missing_shares,
                    price: mark,
                    side: TradeSide::Long,
                };
                let approved = validator
                    .validate(portfolio, marks, &proposed, sectors, None)
                    .is_ok();
                let executed = approved
                    && portfolio
                        .buy(
                            &symbol,
                            missing_shares,
                            mark,
                            date,
                            &trading,
                            None,
                            Some(format!("rebalance ({trigger})")),
                        )
                        .is_ok();
                deltas.push(RebalanceDelta {
                    symbol,
                    action: "BUY".to_string(),
                    shares: missing_shares,
                    executed,
                });
            }
        }

        if deltas.is_empty() {
            return Ok(None);
        }
        tracing::debug!(%date, trigger, legs = deltas.len(), "rebalance event");
        Ok(Some(RebalanceEvent {
            date,
            trigger: trigger.to_string(),
            deltas,
        }))
    }

    fn sector_snapshot(
        &self,
        portfolio: &Portfolio,
        marks: &BTreeMap<String, f64>,
        sectors: &SectorMap,
        date: NaiveDate,
    ) -> SectorExposureSnapshot {
        let net_worth = portfolio.net_worth(marks);
        let mut exposures: BTreeMap<String, f64> = BTreeMap::new();
        if net_worth > 0.0 {
            for position in portfolio.longs.values() {
                let mark = marks.get(&position.symbol).copied().unwrap_or(position.avg_cost);
                let sector = sectors
                    .get(&position.symbol)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string());
                *exposures.entry(sector).or_insert(0.0) += position.shares * mark / net_worth;
            }
        }
        SectorExposureSnapshot { date, exposures }
    }

    /// Correlation matrix over closes strictly before `date`, rebuilt at most
    /// once per date.
    fn correlations_for<'a>(
        &self,
        cache: &'a mut Option<(NaiveDate, CorrelationMatrix)>,
        date: NaiveDate,
        market: &BTreeMap<String, Vec<Bar>>,
        date_index: &BTreeMap<&str, BTreeMap<NaiveDate, usize>>,
    ) -> Option<&'a CorrelationMatrix> {
        let stale = match cache {
            Some((built, _)) => *built != date,
            None => true,
        };
        if stale {
            let mut closes: BTreeMap<String, Vec<f64>> = BTreeMap::new();
            for registration in &self.registrations {
                let symbol = registration.symbol.as_str();
                let Some(bars) = market.get(symbol) else {
                    continue;
                };
                // Prefix strictly before today; fall back to the full series
                // position when the symbol has no bar today
                let cutoff = date_index
                    .get(symbol)
                    .map(|index| {
                        index
                            .range(..date)
                            .next_back()
                            .map(|(_, &i)| i + 1)
                            .unwrap_or(0)
                    })
                    .unwrap_or(0);
                if cutoff >= 3 {
                    closes.insert(
                        symbol.to_string(),
                        bars[..cutoff].iter().map(|b| b.close).collect(),
                    );
                }
            }
            *cache = Some((date, CorrelationMatrix::from_closes(&closes)));
        }
        cache.as_ref().map(|(_, matrix)| matrix)
    }
}
