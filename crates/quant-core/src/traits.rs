use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::{Bar, Fundamentals, Quote, StrategySignal};

/// A trading strategy that can be replayed bar-by-bar.
///
/// `analyze` is called once per bar with the historical window ending at the
/// decision point; implementations must not look past the window.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn describe(&self) -> String {
        self.name().to_string()
    }

    /// Produce a signal for `symbol` given the bars visible so far and the
    /// price the fill would reference.
    fn analyze(&self, symbol: &str, window: &[Bar], current_price: f64) -> StrategySignal;

    /// Apply tunable parameters (used by the optimizer). Unknown keys are
    /// ignored.
    fn set_params(&mut self, params: &HashMap<String, f64>);

    fn get_params(&self) -> HashMap<String, f64>;
}

/// Error reported by a market-data provider attempt.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Worth retrying on another provider
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Provider-side throttle; the facade rotates and retries within budget
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    /// Short-circuits the fallback chain (e.g. unknown symbol)
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProviderError::Permanent(_))
    }
}

/// Contract implemented once per market-data provider.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Daily bars for `[start, end]` inclusive, ascending by date.
    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError>;

    async fn fetch_fundamentals(&self, symbol: &str) -> Result<Fundamentals, ProviderError>;

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ProviderError>;
}
