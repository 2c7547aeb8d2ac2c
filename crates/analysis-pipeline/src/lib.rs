pub mod regime;
pub mod screener;

use std::sync::Arc;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use indicator_cache::{Fingerprint, IndicatorCache};
use market_data::MarketDataFacade;
use quant_core::{AnalystConsensus, Bar, EngineConfig, EngineError, Recommendation};
use scoring_engine::{AnalysisBundle, IndicatorBundle, ScoringEngine};
use technical_indicators::{
    adx, atr, bollinger_bands, detect_patterns, ema, macd, obv, rsi, sma, support_resistance,
    AdxSeries, BollingerSeries, IndicatorKind, IndicatorVector, MacdSeries,
};

pub use regime::{detect_market_regime, MarketRegime};
pub use screener::{Screener, ScreenerFilters, ScreenerReport, StockSuggestion};

/// Bars required for a full analysis pass.
const LOOKBACK_CALENDAR_DAYS: i64 = 420;

/// Side inputs the pipeline cannot derive from market data alone.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub analyst: Option<AnalystConsensus>,
    pub industry_pe: Option<f64>,
    pub benchmark_closes: Option<Vec<f64>>,
    pub sector_sentiment: Option<f64>,
    pub market_cap: Option<f64>,
}

/// End-to-end read path: market data in, recommendation out.
///
/// Pulls bars and fundamentals through the facade, serves the standard
/// indicator set out of the shared cache (computing on miss), detects
/// candlestick patterns, and hands the assembled bundle to the scoring
/// engine.
pub struct AnalysisPipeline {
    facade: Arc<MarketDataFacade>,
    cache: Arc<IndicatorCache>,
    scoring: ScoringEngine,
}

impl AnalysisPipeline {
    pub fn new(
        facade: Arc<MarketDataFacade>,
        cache: Arc<IndicatorCache>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            facade,
            cache,
            scoring: ScoringEngine::new(config.scoring.clone()),
        }
    }

    /// Analyze one symbol as of its latest quote.
    pub async fn analyze_symbol(
        &self,
        symbol: &str,
        context: &AnalysisContext,
        cancel: &CancellationToken,
    ) -> Result<Recommendation, EngineError> {
        let quote = self.facade.get_quote(symbol, cancel).await?;
        let as_of = quote.bar.date;
        let start = as_of - chrono::Duration::days(LOOKBACK_CALENDAR_DAYS);

        let bars = self.facade.get_bars(symbol, start, as_of, cancel).await?;

        // Fundamentals degrade to neutral scoring when unavailable
        let fundamentals = match self.facade.get_fundamentals(symbol, cancel).await {
            Ok(fundamentals) => Some(fundamentals),
            Err(EngineError::Cancelled(message)) => {
                return Err(EngineError::Cancelled(message));
            }
            Err(err) => {
                tracing::debug!(symbol, "fundamentals unavailable: {err}");
                None
            }
        };

        let indicators = self.cached_indicators(symbol, &bars, as_of).await?;
        let patterns = detect_patterns(&bars);

        let bundle = AnalysisBundle {
            symbol: symbol.to_string(),
            bars: bars.as_ref().clone(),
            fundamentals,
            analyst: context.analyst.clone(),
            industry_pe: context.industry_pe,
            benchmark_closes: context.benchmark_closes.clone(),
            sector_sentiment: context.sector_sentiment,
            market_cap: context.market_cap,
            patterns,
        };

        self.scoring.analyze_with_indicators(&bundle, &indicators)
    }

    /// Assemble the standard indicator set through the cache, one fingerprint
    /// per component vector. Repeat analyses of the same (symbol, as-of) pair
    /// are pure cache hits.
    async fn cached_indicators(
        &self,
        symbol: &str,
        bars: &[Bar],
        as_of: NaiveDate,
    ) -> Result<IndicatorBundle, EngineError> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let sma_20 = self
            .cached_close_vector(symbol, IndicatorKind::Sma, &[20], as_of, &closes, sma, 20)
            .await?;
        let sma_50 = self
            .cached_close_vector(symbol, IndicatorKind::Sma, &[50], as_of, &closes, sma, 50)
            .await?;
        let sma_200 = self
            .cached_close_vector(symbol, IndicatorKind::Sma, &[200], as_of, &closes, sma, 200)
            .await?;
        let ema_12 = self
            .cached_close_vector(symbol, IndicatorKind::Ema, &[12], as_of, &closes, ema, 12)
            .await?;
        let ema_26 = self
            .cached_close_vector(symbol, IndicatorKind::Ema, &[26], as_of, &closes, ema, 26)
            .await?;
        let rsi_14 = self
            .cached_close_vector(symbol, IndicatorKind::Rsi, &[14], as_of, &closes, rsi, 14)
            .await?;

        let macd_line = {
            let fingerprint = Fingerprint::new(symbol, IndicatorKind::MacdLine, &[12, 26, 9], as_of);
            let closes = closes.clone();
            self.cache
                .get_or_compute(fingerprint, move || Ok(macd(&closes, 12, 26, 9).macd_line))
                .await?
        };
        let macd_signal = {
            let fingerprint =
                Fingerprint::new(symbol, IndicatorKind::MacdSignal, &[12, 26, 9], as_of);
            let closes = closes.clone();
            self.cache
                .get_or_compute(fingerprint, move || Ok(macd(&closes, 12, 26, 9).signal_line))
                .await?
        };
        let macd_histogram = {
            let fingerprint =
                Fingerprint::new(symbol, IndicatorKind::MacdHistogram, &[12, 26, 9], as_of);
            let closes = closes.clone();
            self.cache
                .get_or_compute(fingerprint, move || Ok(macd(&closes, 12, 26, 9).histogram))
                .await?
        };

        let bollinger_upper = {
            let fingerprint =
                Fingerprint::new(symbol, IndicatorKind::BollingerUpper, &[20, 2], as_of);
            let closes = closes.clone();
            self.cache
                .get_or_compute(fingerprint, move || Ok(bollinger_bands(&closes, 20, 2.0).upper))
                .await?
        };
        let bollinger_middle = {
            let fingerprint =
                Fingerprint::new(symbol, IndicatorKind::BollingerMiddle, &[20, 2], as_of);
            let closes = closes.clone();
            self.cache
                .get_or_compute(fingerprint, move || {
                    Ok(bollinger_bands(&closes, 20, 2.0).middle)
                })
                .await?
        };
        let bollinger_lower = {
            let fingerprint =
                Fingerprint::new(symbol, IndicatorKind::BollingerLower, &[20, 2], as_of);
            let closes = closes.clone();
            self.cache
                .get_or_compute(fingerprint, move || Ok(bollinger_bands(&closes, 20, 2.0).lower))
                .await?
        };

        let atr_14 = {
            let fingerprint = Fingerprint::new(symbol, IndicatorKind::Atr, &[14], as_of);
            let bars = bars.to_vec();
            self.cache
                .get_or_compute(fingerprint, move || Ok(atr(&bars, 14)))
                .await?
        };
        let atr_20 = {
            let fingerprint = Fingerprint::new(symbol, IndicatorKind::Atr, &[20], as_of);
            let bars = bars.to_vec();
            self.cache
                .get_or_compute(fingerprint, move || Ok(atr(&bars, 20)))
                .await?
        };
        let obv_series = {
            let fingerprint = Fingerprint::new(symbol, IndicatorKind::Obv, &[], as_of);
            let bars = bars.to_vec();
            self.cache
                .get_or_compute(fingerprint, move || Ok(obv(&bars)))
                .await?
        };
        let adx_line = {
            let fingerprint = Fingerprint::new(symbol, IndicatorKind::Adx, &[14], as_of);
            let bars = bars.to_vec();
            self.cache
                .get_or_compute(fingerprint, move || Ok(adx(&bars, 14).adx))
                .await?
        };

        // Composite series are reassembled from the cached component vectors;
        // the directional lines are cheap enough to recompute here.
        let adx_full = adx(bars, 14);

        Ok(IndicatorBundle {
            sma_20: (*sma_20).clone(),
            sma_50: (*sma_50).clone(),
            sma_200: (*sma_200).clone(),
            ema_12: (*ema_12).clone(),
            ema_26: (*ema_26).clone(),
            rsi_14: (*rsi_14).clone(),
            macd: MacdSeries {
                macd_line: (*macd_line).clone(),
                signal_line: (*macd_signal).clone(),
                histogram: (*macd_histogram).clone(),
            },
            bollinger: BollingerSeries {
                upper: (*bollinger_upper).clone(),
                middle: (*bollinger_middle).clone(),
                lower: (*bollinger_lower).clone(),
            },
            atr_14: (*atr_14).clone(),
            atr_20: (*atr_20).clone(),
            obv: (*obv_series).clone(),
            adx_14: AdxSeries {
                adx: (*adx_line).clone(),
                plus_di: adx_full.plus_di,
                minus_di: adx_full.minus_di,
            },
            support_resistance: support_resistance(bars, 60),
        })
    }

    /// One close-derived vector through the cache.
    #[allow(clippy::too_many_arguments)]
    async fn cached_close_vector(
        &self,
        symbol: &str,
        kind: IndicatorKind,
        params: &[u32],
        as_of: NaiveDate,
        closes: &[f64],
        compute: fn(&[f64], usize) -> IndicatorVector,
        period: usize,
    ) -> Result<Arc<IndicatorVector>, EngineError> {
        let fingerprint = Fingerprint::new(symbol, kind, params, as_of);
        let closes = closes.to_vec();
        self.cache
            .get_or_compute(fingerprint, move || Ok(compute(&closes, period)))
            .await
    }

    /// (hits, misses) from the shared indicator cache.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }
}
