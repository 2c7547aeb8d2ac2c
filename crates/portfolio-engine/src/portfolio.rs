use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use quant_core::{
    EngineError, LongPosition, ShortConfig, ShortPosition, TradeAction, TradeRecord, TradingConfig,
};

/// Mutable portfolio state: cash, longs, shorts, posted margin, realized
/// P&L, and the append-only trade journal.
///
/// Every mutation goes through one of the commit entrypoints below, which
/// update balances, positions, and the journal together. Position maps are
/// BTreeMaps so iteration order (and therefore every derived output) is
/// deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    pub user_id: String,
    pub base_currency: String,
    pub cash: f64,
    pub margin_balance: f64,
    pub longs: BTreeMap<String, LongPosition>,
    pub shorts: BTreeMap<String, ShortPosition>,
    pub realized_pnl: f64,
    pub trade_log: Vec<TradeRecord>,
    pub opened_at: NaiveDate,
}

/// Read-only snapshot with marks applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub cash: f64,
    pub margin_balance: f64,
    pub long_value: f64,
    pub short_value: f64,
    pub net_worth: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub open_longs: usize,
    pub open_shorts: usize,
    pub total_trades: usize,
}

impl Portfolio {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        initial_cash: f64,
        opened_at: NaiveDate,
    ) -> Result<Self, EngineError> {
        if !(initial_cash > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "initial cash must be positive, got {initial_cash}"
            )));
        }
        Ok(Self {
            id: id.into(),
            user_id: user_id.into(),
            base_currency: "USD".to_string(),
            cash: initial_cash,
            margin_balance: 0.0,
            longs: BTreeMap::new(),
            shorts: BTreeMap::new(),
            realized_pnl: 0.0,
            trade_log: Vec::new(),
            opened_at,
        })
    }

    /// Total market value of long positions at the given marks.
    pub fn long_value(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.longs
            .values()
            .map(|p| p.shares * prices.get(&p.symbol).copied().unwrap_or(p.avg_cost))
            .sum()
    }

    /// Total market value of short positions at the given marks.
    pub fn short_value(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.shorts
            .values()
            .map(|p| p.shares * prices.get(&p.symbol).copied().unwrap_or(p.avg_short_price))
            .sum()
    }

    /// Net worth identity: cash + longs − shorts + posted margin.
    pub fn net_worth(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.cash + self.long_value(prices) - self.short_value(prices) + self.margin_balance
    }

    /// Unrealized P&L across longs and shorts at the given marks.
    pub fn unrealized_pnl(&self, prices: &BTreeMap<String, f64>) -> f64 {
        let longs: f64 = self
            .longs
            .values()
            .map(|p| {
                let mark = prices.get(&p.symbol).copied().unwrap_or(p.avg_cost);
                (mark - p.avg_cost) * p.shares
            })
            .sum();
        let shorts: f64 = self
            .shorts
            .values()
            .map(|p| {
                let mark = prices.get(&p.symbol).copied().unwrap_or(p.avg_short_price);
                (p.avg_short_price - mark) * p.shares
            })
            .sum();
        longs + shorts
    }

    pub fn summary(&self, prices: &BTreeMap<String, f64>) -> PortfolioSummary {
        PortfolioSummary {
            cash: self.cash,
            margin_balance: self.margin_balance,
            long_value: self.long_value(prices),
            short_value: self.short_value(prices),
            net_worth: self.net_worth(prices),
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl(prices),
            open_longs: self.longs.len(),
            open_shorts: self.shorts.len(),
            total_trades: self.trade_log.len(),
        }
    }

    /// Buy (open or add to) a long position. The fill is `price` adjusted up
    /// by slippage; commission is charged on the fill value.
    pub fn buy(
        &mut self,
        symbol: &str,
        shares: f64,
        price: f64,
        date: NaiveDate,
        trading: &TradingConfig,
        strategy_name: Option<String>,
        reasoning: Option<String>,
    ) -> Result<&TradeRecord, EngineError> {
        Self::check_order(symbol, shares, price)?;

        let fill = price * (1.0 + trading.slippage_rate);
        let commission = fill * shares * trading.commission_rate;
        let cost = fill * shares + commission;
        if cost > self.cash {
            return Err(EngineError::InsufficientFunds(format!(
                "{symbol}: need {cost:.2}, have {:.2}",
                self.cash
            )));
        }

        self.cash -= cost;
        let position = self
            .longs
            .entry(symbol.to_string())
            .or_insert_with(|| LongPosition {
                symbol: symbol.to_string(),
                shares: 0.0,
                avg_cost: 0.0,
                opened_at: date,
                stop_loss: None,
                take_profit: None,
            });
        // Cost basis includes the entry commission, so realized P&L on exit
        // nets out both legs' costs
        let total_cost = position.avg_cost * position.shares + fill * shares + commission;
        position.shares += shares;
        position.avg_cost = total_cost / position.shares;

        self.journal(TradeRecord {
            portfolio_id: self.id.clone(),
            symbol: symbol.to_string(),
            action: TradeAction::Buy,
            shares,
            fill_price: fill,
            commission,
            slippage_applied: fill - price,
            date,
            strategy_name,
            reasoning,
        })
    }

    /// Sell part or all of a long. `shares = None` closes the position.
    pub fn sell(
        &mut self,
        symbol: &str,
        shares: Option<f64>,
        price: f64,
        date: NaiveDate,
        trading: &TradingConfig,
        strategy_name: Option<String>,
        reasoning: Option<String>,
    ) -> Result<&TradeRecord, EngineError> {
        let held = self
            .longs
            .get(symbol)
            .map(|p| p.shares)
            .ok_or_else(|| EngineError::InsufficientShares(format!("{symbol}: no long position")))?;
        let shares = shares.unwrap_or(held);
        Self::check_order(symbol, shares, price)?;
        if shares > held {
            return Err(EngineError::InsufficientShares(format!(
                "{symbol}: selling {shares} but only {held} held"
            )));
        }

        let fill = price * (1.0 - trading.slippage_rate);
        let commission = fill * shares * trading.commission_rate;
        let proceeds = fill * shares - commission;

        let avg_cost = self.longs.get(symbol).map(|p| p.avg_cost).unwrap_or(0.0);
        self.cash += proceeds;
        self.realized_pnl += (fill - avg_cost) * shares - commission;

        let position = self.longs.get_mut(symbol).expect("position checked above");
        position.shares -= shares;
        if position.shares <= 0.0 {
            self.longs.remove(symbol);
        }

        self.journal(TradeRecord {
            portfolio_id: self.id.clone(),
            symbol: symbol.to_string(),
            action: TradeAction::Sell,
            shares,
            fill_price: fill,
            commission,
            slippage_applied: price - fill,
            date,
            strategy_name,
            reasoning,
        })
    }

    /// Open or add to a short. Posts `shares · price · margin_requirement`
    /// from cash into the margin balance; the short fill is `price` adjusted
    /// down by slippage.
    pub fn enter_short(
        &mut self,
        symbol: &str,
        shares: f64,
        price: f64,
        date: NaiveDate,
        trading: &TradingConfig,
        short: &ShortConfig,
        strategy_name: Option<String>,
        reasoning: Option<String>,
    ) -> Result<&TradeRecord, EngineError> {
        Self::check_order(symbol, shares, price)?;

        let margin = shares * price * short.margin_requirement;
        let fill = price * (1.0 - trading.slippage_rate);
        let commission = fill * shares * trading.commission_rate;
        if margin + commission > self.cash {
            return Err(EngineError::InsufficientMargin(format!(
                "{symbol}: need {:.2} margin plus {commission:.2} commission, have {:.2}",
                margin, self.cash
            )));
        }

        self.cash -= margin + commission;
        self.margin_balance += margin;

        let position = self
            .shorts
            .entry(symbol.to_string())
            .or_insert_with(|| ShortPosition {
                symbol: symbol.to_string(),
                shares: 0.0,
                avg_short_price: 0.0,
                opened_at: date,
                margin_posted: 0.0,
                accrued_interest: 0.0,
            });
        let total_notional = position.avg_short_price * position.shares + fill * shares;
        position.shares += shares;
        position.avg_short_price = total_notional / position.shares;
        position.margin_posted += margin;

        self.journal(TradeRecord {
            portfolio_id: self.id.clone(),
            symbol: symbol.to_string(),
            action: TradeAction::Short,
            shares,
            fill_price: fill,
            commission,
            slippage_applied: price - fill,
            date,
            strategy_name,
            reasoning,
        })
    }

    /// Cover part or all of a short (`shares = None` covers all). Releases
    /// the proportional posted margin back to cash and realizes
    /// `(avg_short − fill) · shares − commission − accrued interest`.
    pub fn cover_short(
        &mut self,
        symbol: &str,
        shares: Option<f64>,
        price: f64,
        date: NaiveDate,
        trading: &TradingConfig,
        strategy_name: Option<String>,
        reasoning: Option<String>,
    ) -> Result<&TradeRecord, EngineError> {
        self.cover_internal(
            symbol,
            shares,
            price,
            price * (1.0 + trading.slippage_rate),
            date,
            trading,
            TradeAction::Cover,
            strategy_name,
            reasoning,
        )
    }

    /// Forced liquidation: covers the whole short at `price` with the penalty
    /// surcharge applied on top of slippage. Always journals.
    pub fn force_liquidate_short(
        &mut self,
        symbol: &str,
        price: f64,
        date: NaiveDate,
        trading: &TradingConfig,
        short: &ShortConfig,
        reasoning: Option<String>,
    ) -> Result<&TradeRecord, EngineError> {
        self.cover_internal(
            symbol,
            None,
            price,
            price * (1.0 + trading.slippage_rate + short.liquidation_penalty),
            date,
            trading,
            TradeAction::ForcedLiquidation,
            None,
            reasoning,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn cover_internal(
        &mut self,
        symbol: &str,
        shares: Option<f64>,
        price: f64,
        fill: f64,
        date: NaiveDate,
        trading: &TradingConfig,
        action: TradeAction,
        strategy_name: Option<String>,
        reasoning: Option<String>,
    ) -> Result<&TradeRecord, EngineError> {
        let position = self.shorts.get(symbol).cloned().ok_or_else(|| {
            EngineError::InsufficientShares(format!("{symbol}: no short position"))
        })?;
        let shares = shares.unwrap_or(position.shares);
        Self::check_order(symbol, shares, price)?;
        if shares > position.shares {
            return Err(EngineError::InsufficientShares(format!(
                "{symbol}: covering {shares} but only {} short",
                position.shares
            )));
        }

        let fraction = shares / position.shares;
        let released_margin = position.margin_posted * fraction;
        let interest = position.accrued_interest * fraction;
        let commission = fill * shares * trading.commission_rate;
        let pnl = (position.avg_short_price - fill) * shares - commission - interest;

        let new_cash = self.cash + released_margin + pnl;
        if new_cash < 0.0 {
            return Err(EngineError::InvariantViolation(format!(
                "{symbol}: cover would drive cash to {new_cash:.2}; margin maintenance failed"
            )));
        }

        self.cash = new_cash;
        self.margin_balance -= released_margin;
        self.realized_pnl += pnl;

        let entry = self.shorts.get_mut(symbol).expect("position checked above");
        entry.shares -= shares;
        entry.margin_posted -= released_margin;
        entry.accrued_interest -= interest;
        if entry.shares <= 0.0 {
            self.shorts.remove(symbol);
        }

        if action == TradeAction::ForcedLiquidation {
            tracing::warn!(symbol, shares, fill, "forced liquidation executed");
        }

        self.journal(TradeRecord {
            portfolio_id: self.id.clone(),
            symbol: symbol.to_string(),
            action,
            shares,
            fill_price: fill,
            commission,
            slippage_applied: fill - price,
            date,
            strategy_name,
            reasoning,
        })
    }

    /// Accrue one day of borrow cost on every open short:
    /// `rate / 365 · shares · avg_short_price`. The cost is realized on
    /// cover, not here.
    pub fn accrue_short_interest(&mut self, annual_rate: f64) {
        for position in self.shorts.values_mut() {
            position.accrued_interest += annual_rate / 365.0 * position.notional();
        }
    }

    /// Append to the journal, enforcing the monotone-timestamp invariant.
    fn journal(&mut self, record: TradeRecord) -> Result<&TradeRecord, EngineError> {
        if let Some(last) = self.trade_log.last() {
            if record.date < last.date {
                return Err(EngineError::InvariantViolation(format!(
                    "trade log regression: {} after {}",
                    record.date, last.date
                )));
            }
        }
        debug_assert!(self.cash >= 0.0, "cash went negative");
        debug_assert!(self.margin_balance >= -1e-9, "margin balance went negative");
        self.trade_log.push(record);
        Ok(self.trade_log.last().expect("just pushed"))
    }

    fn check_order(symbol: &str, shares: f64, price: f64) -> Result<(), EngineError> {
        if symbol.is_empty() {
            return Err(EngineError::InvalidInput("symbol must not be empty".into()));
        }
        if !(shares > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "{symbol}: share count must be positive, got {shares}"
            )));
        }
        if !(price > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "{symbol}: price must be positive, got {price}"
            )));
        }
        Ok(())
    }
}

/// Shared handle serializing all mutation on one portfolio.
///
/// Writers take the lock for the duration of a commit; readers clone a
/// consistent snapshot under the same lock.
#[derive(Clone)]
pub struct PortfolioHandle {
    inner: Arc<Mutex<Portfolio>>,
}

impl PortfolioHandle {
    pub fn new(portfolio: Portfolio) -> Self {
        Self {
            inner: Arc::new(Mutex::new(portfolio)),
        }
    }

    pub async fn snapshot(&self) -> Portfolio {
        self.inner.lock().await.clone()
    }

    pub async fn summary(&self, prices: &BTreeMap<String, f64>) -> PortfolioSummary {
        self.inner.lock().await.summary(prices)
    }

    pub async fn net_worth(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.inner.lock().await.net_worth(prices)
    }

    /// Run a closure against the exclusively-locked portfolio. All writers
    /// on this handle serialize here.
    pub async fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut Portfolio) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut guard = self.inner.lock().await;
        mutate(&mut guard)
    }
}
