pub mod rate_limit;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use quant_core::{
    Bar, DataConfig, EngineError, Fundamentals, MarketDataProvider, ProviderError, Quote,
};
pub use rate_limit::TokenBucket;

/// Daily bars trade until 21:00 UTC; cached history is valid until the next
/// close after the moment it was fetched.
const UTC_TRADING_CLOSE_HOUR: u32 = 21;

struct CachedQuote {
    quote: Quote,
    expires: Instant,
}

struct CachedFundamentals {
    fundamentals: Fundamentals,
    expires: Instant,
}

struct CachedBars {
    bars: Arc<Vec<Bar>>,
    expires: DateTime<Utc>,
}

/// Uniform read path over an ordered chain of market-data providers.
///
/// Providers are attempted in declared priority order. Transient and
/// rate-limit errors rotate to the next provider (with a bounded number of
/// rounds); permanent errors short-circuit the chain. Every attempt passes
/// the provider's token bucket first.
pub struct MarketDataFacade {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    buckets: HashMap<String, Arc<TokenBucket>>,
    config: DataConfig,
    quote_cache: DashMap<String, CachedQuote>,
    fundamentals_cache: DashMap<String, CachedFundamentals>,
    bars_cache: DashMap<(String, NaiveDate, NaiveDate), CachedBars>,
}

/// How many passes over the provider list are made before giving up on
/// transient failures.
const MAX_ROUNDS: usize = 2;

impl MarketDataFacade {
    pub fn new(providers: Vec<Arc<dyn MarketDataProvider>>, config: DataConfig) -> Self {
        let buckets = providers
            .iter()
            .map(|p| {
                let rate = config.rate_limits.get(p.name()).copied().unwrap_or(5.0);
                (
                    p.name().to_string(),
                    Arc::new(TokenBucket::new(rate, rate.max(1.0))),
                )
            })
            .collect();
        Self {
            providers,
            buckets,
            config,
            quote_cache: DashMap::new(),
            fundamentals_cache: DashMap::new(),
            bars_cache: DashMap::new(),
        }
    }

    /// Daily bars for `[start, end]`, both endpoints inclusive. The result is
    /// strictly ascending by date with no duplicate dates.
    pub async fn get_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<Bar>>, EngineError> {
        if symbol.is_empty() {
            return Err(EngineError::InvalidInput("symbol must not be empty".into()));
        }
        if start > end {
            return Err(EngineError::InvalidInput(format!(
                "start {start} is after end {end}"
            )));
        }

        let key = (symbol.to_string(), start, end);
        if let Some(entry) = self.bars_cache.get(&key) {
            if Utc::now() < entry.expires {
                return Ok(Arc::clone(&entry.bars));
            }
        }

        let bars = self
            .try_providers(cancel, |provider| {
                let symbol = symbol.to_string();
                async move { provider.fetch_daily_bars(&symbol, start, end).await }
            })
            .await?;

        let bars = Arc::new(Self::normalize_bars(bars, start, end));
        self.bars_cache.insert(
            key,
            CachedBars {
                bars: Arc::clone(&bars),
                expires: next_utc_trading_close(Utc::now()),
            },
        );
        Ok(bars)
    }

    /// Latest fundamentals snapshot; cached with the quote TTL.
    pub async fn get_fundamentals(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<Fundamentals, EngineError> {
        if symbol.is_empty() {
            return Err(EngineError::InvalidInput("symbol must not be empty".into()));
        }
        if let Some(entry) = self.fundamentals_cache.get(symbol) {
            if Instant::now() < entry.expires {
                return Ok(entry.fundamentals.clone());
            }
        }

        let fundamentals = self
            .try_providers(cancel, |provider| {
                let symbol = symbol.to_string();
                async move { provider.fetch_fundamentals(&symbol).await }
            })
            .await?;

        self.fundamentals_cache.insert(
            symbol.to_string(),
            CachedFundamentals {
                fundamentals: fundamentals.clone(),
                expires: Instant::now() + Duration::from_secs(self.config.cache_ttl_secs),
            },
        );
        Ok(fundamentals)
    }

    /// Latest bar plus observation timestamp; cached for `cache_ttl_secs`.
    pub async fn get_quote(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<Quote, EngineError> {
        if symbol.is_empty() {
            return Err(EngineError::InvalidInput("symbol must not be empty".into()));
        }
        if let Some(entry) = self.quote_cache.get(symbol) {
            if Instant::now() < entry.expires {
                return Ok(entry.quote.clone());
            }
        }

        let quote = self
            .try_providers(cancel, |provider| {
                let symbol = symbol.to_string();
                async move { provider.fetch_quote(&symbol).await }
            })
            .await?;

        self.quote_cache.insert(
            symbol.to_string(),
            CachedQuote {
                quote: quote.clone(),
                expires: Instant::now() + Duration::from_secs(self.config.cache_ttl_secs),
            },
        );
        Ok(quote)
    }

    /// Quotes for many symbols. Symbols whose whole provider chain fails are
    /// omitted from the map (each failure is logged).
    pub async fn bulk_quotes(
        &self,
        symbols: &[String],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Quote>, EngineError> {
        let mut quotes = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled("bulk quote fetch".into()));
            }
            match self.get_quote(symbol, cancel).await {
                Ok(quote) => {
                    quotes.insert(symbol.clone(), quote);
                }
                Err(EngineError::Cancelled(message)) => {
                    return Err(EngineError::Cancelled(message));
                }
                Err(err) => {
                    tracing::warn!(symbol = %symbol, error = %err, "bulk quote fetch failed");
                }
            }
        }
        Ok(quotes)
    }

    /// Run `call` against each provider in priority order until one succeeds.
    async fn try_providers<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, EngineError>
    where
        F: Fn(Arc<dyn MarketDataProvider>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        if self.providers.is_empty() {
            return Err(EngineError::DataUnavailable("no providers configured".into()));
        }

        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let max_wait = Duration::from_secs(self.config.max_rate_limit_wait_secs);
        let mut last_error = String::new();

        for round in 0..MAX_ROUNDS {
            for provider in &self.providers {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled("data fetch".into()));
                }

                if let Some(bucket) = self.buckets.get(provider.name()) {
                    match bucket.acquire(max_wait).await {
                        Ok(()) => {}
                        Err(err) => {
                            tracing::warn!(provider = provider.name(), "{err}");
                            last_error = err.to_string();
                            continue;
                        }
                    }
                }

                let attempt = tokio::select! {
                    result = tokio::time::timeout(timeout, call(Arc::clone(provider))) => result,
                    _ = cancel.cancelled() => {
                        return Err(EngineError::Cancelled("data fetch".into()));
                    }
                };

                match attempt {
                    Ok(Ok(value)) => return Ok(value),
                    Ok(Err(err)) if err.is_permanent() => {
                        tracing::warn!(provider = provider.name(), "{err}");
                        return Err(EngineError::DataUnavailable(err.to_string()));
                    }
                    Ok(Err(err)) => {
                        tracing::debug!(
                            provider = provider.name(),
                            round,
                            "provider attempt failed: {err}"
                        );
                        last_error = err.to_string();
                    }
                    Err(_) => {
                        tracing::debug!(
                            provider = provider.name(),
                            round,
                            "provider attempt timed out after {:.0}s",
                            timeout.as_secs_f64()
                        );
                        last_error = format!("{} timed out", provider.name());
                    }
                }
            }
        }

        Err(EngineError::DataUnavailable(format!(
            "all providers failed; last error: {last_error}"
        )))
    }

    /// Sort, deduplicate, and clip provider bars to the requested range.
    fn normalize_bars(mut bars: Vec<Bar>, start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
        bars.retain(|b| b.date >= start && b.date <= end);
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        bars
    }
}

/// The next 21:00 UTC strictly after `now`.
fn next_utc_trading_close(now: DateTime<Utc>) -> DateTime<Utc> {
    let today_close = now
        .date_naive()
        .and_hms_opt(UTC_TRADING_CLOSE_HOUR, 0, 0)
        .unwrap()
        .and_utc();
    if now.hour() < UTC_TRADING_CLOSE_HOUR {
        today_close
    } else {
        today_close + chrono::Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn sample_bar(d: u32, close: f64) -> Bar {
        Bar {
            date: day(d),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000_000.0,
        }
    }

    enum Behavior {
        Serve,
        Transient,
        Permanent,
    }

    struct MockProvider {
        name: String,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(name: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_daily_bars(
            &self,
            _symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<Bar>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                // Served out of order with a duplicate; the facade normalizes
                Behavior::Serve => Ok(vec![
                    sample_bar(3, 102.0),
                    sample_bar(1, 100.0),
                    sample_bar(2, 101.0),
                    sample_bar(2, 101.0),
                ]),
                Behavior::Transient => Err(ProviderError::Transient("503".into())),
                Behavior::Permanent => Err(ProviderError::Permanent("unknown symbol".into())),
            }
        }

        async fn fetch_fundamentals(&self, symbol: &str) -> Result<Fundamentals, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Serve => Ok(Fundamentals {
                    symbol: symbol.to_string(),
                    pe_ratio: Some(18.0),
                    ..Fundamentals::default()
                }),
                Behavior::Transient => Err(ProviderError::Transient("503".into())),
                Behavior::Permanent => Err(ProviderError::Permanent("unknown symbol".into())),
            }
        }

        async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Serve => Ok(Quote {
                    symbol: symbol.to_string(),
                    bar: sample_bar(3, 102.0),
                    as_of: Utc::now(),
                }),
                Behavior::Transient => Err(ProviderError::Transient("503".into())),
                Behavior::Permanent => Err(ProviderError::Permanent("unknown symbol".into())),
            }
        }
    }

    fn facade(providers: Vec<Arc<MockProvider>>) -> MarketDataFacade {
        let providers: Vec<Arc<dyn MarketDataProvider>> = providers
            .into_iter()
            .map(|p| p as Arc<dyn MarketDataProvider>)
            .collect();
        MarketDataFacade::new(providers, DataConfig::default())
    }

    #[tokio::test]
    async fn transient_failure_falls_back_to_secondary() {
        let primary = MockProvider::new("primary", Behavior::Transient);
        let secondary = MockProvider::new("secondary", Behavior::Serve);
        let facade = facade(vec![Arc::clone(&primary), Arc::clone(&secondary)]);

        let bars = facade
            .get_bars("AAPL", day(1), day(3), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(primary.call_count(), 1);
        assert_eq!(secondary.call_count(), 1);
        // normalized: ascending, deduplicated
        assert_eq!(bars.len(), 3);
        assert!(bars.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[tokio::test]
    async fn permanent_failure_short_circuits() {
        let primary = MockProvider::new("primary", Behavior::Permanent);
        let secondary = MockProvider::new("secondary", Behavior::Serve);
        let facade = facade(vec![Arc::clone(&primary), Arc::clone(&secondary)]);

        let err = facade
            .get_bars("ZZZZ", day(1), day(3), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "data_unavailable");
        assert_eq!(secondary.call_count(), 0);
    }

    #[tokio::test]
    async fn all_transient_failures_report_data_unavailable() {
        let primary = MockProvider::new("primary", Behavior::Transient);
        let secondary = MockProvider::new("secondary", Behavior::Transient);
        let facade = facade(vec![Arc::clone(&primary), Arc::clone(&secondary)]);

        let err = facade
            .get_quote("AAPL", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "data_unavailable");
        // both providers retried across rounds
        assert_eq!(primary.call_count(), 2);
        assert_eq!(secondary.call_count(), 2);
    }

    #[tokio::test]
    async fn quote_cache_serves_second_call() {
        let provider = MockProvider::new("primary", Behavior::Serve);
        let facade = facade(vec![Arc::clone(&provider)]);
        let cancel = CancellationToken::new();

        facade.get_quote("AAPL", &cancel).await.unwrap();
        facade.get_quote("AAPL", &cancel).await.unwrap();
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn invalid_inputs_fail_before_any_io() {
        let provider = MockProvider::new("primary", Behavior::Serve);
        let facade = facade(vec![Arc::clone(&provider)]);
        let cancel = CancellationToken::new();

        let err = facade.get_bars("", day(1), day(2), &cancel).await.unwrap_err();
        assert_eq!(err.code(), "invalid_input");

        let err = facade.get_bars("AAPL", day(3), day(1), &cancel).await.unwrap_err();
        assert_eq!(err.code(), "invalid_input");

        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_is_observed_between_attempts() {
        let provider = MockProvider::new("primary", Behavior::Serve);
        let facade = facade(vec![Arc::clone(&provider)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = facade.get_quote("AAPL", &cancel).await.unwrap_err();
        assert_eq!(err.code(), "cancelled");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn bulk_quotes_skips_failing_symbols() {
        let provider = MockProvider::new("primary", Behavior::Serve);
        let facade = facade(vec![Arc::clone(&provider)]);

        let quotes = facade
            .bulk_quotes(
                &["AAPL".to_string(), "MSFT".to_string()],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(quotes.len(), 2);
    }

    #[test]
    fn trading_close_rolls_to_next_day_after_close() {
        let before = "2024-05-01T15:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let after = "2024-05-01T22:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            next_utc_trading_close(before),
            "2024-05-01T21:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            next_utc_trading_close(after),
            "2024-05-02T21:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }
}
