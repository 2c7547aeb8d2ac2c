use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use quant_core::{EngineError, RecommendationAction, RiskLevel};

use crate::{AnalysisContext, AnalysisPipeline};

/// Cutoffs applied to screened candidates.
#[derive(Debug, Clone)]
pub struct ScreenerFilters {
    /// Minimum composite score (0-100)
    pub min_score: f64,
    /// Minimum confidence (0-100)
    pub min_confidence: f64,
    pub limit: usize,
}

impl Default for ScreenerFilters {
    fn default() -> Self {
        Self {
            min_score: 50.0,
            min_confidence: 40.0,
            limit: 10,
        }
    }
}

/// One ranked candidate from a screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSuggestion {
    pub symbol: String,
    pub action: RecommendationAction,
    pub score: f64,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    /// Leading reasoning lines from the recommendation
    pub key_reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerReport {
    pub suggestions: Vec<StockSuggestion>,
    pub total_analyzed: usize,
    pub total_passed: usize,
}

/// Ranks a symbol universe by running each through the analysis pipeline.
///
/// Symbols whose analysis fails (insufficient history, no data) are skipped
/// and logged; the screen itself only fails on cancellation or when the
/// universe is empty.
pub struct Screener {
    pipeline: Arc<AnalysisPipeline>,
}

impl Screener {
    pub fn new(pipeline: Arc<AnalysisPipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn screen(
        &self,
        symbols: &[String],
        context: &AnalysisContext,
        filters: &ScreenerFilters,
        cancel: &CancellationToken,
    ) -> Result<ScreenerReport, EngineError> {
        if symbols.is_empty() {
            return Err(EngineError::InvalidInput("no symbols to screen".into()));
        }

        let mut candidates = Vec::new();
        for symbol in symbols {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled("screen".into()));
            }
            match self.pipeline.analyze_symbol(symbol, context, cancel).await {
                Ok(recommendation) => candidates.push(recommendation),
                Err(EngineError::Cancelled(message)) => {
                    return Err(EngineError::Cancelled(message));
                }
                Err(err) => {
                    tracing::debug!(symbol = %symbol, "screen skipped symbol: {err}");
                }
            }
        }
        let total_analyzed = symbols.len();

        let mut passed: Vec<StockSuggestion> = candidates
            .into_iter()
            .filter(|r| r.score >= filters.min_score && r.confidence >= filters.min_confidence)
            .map(|r| StockSuggestion {
                symbol: r.symbol,
                action: r.action,
                score: r.score,
                confidence: r.confidence,
                risk_level: r.risk_level,
                key_reasons: r.reasoning.into_iter().take(3).collect(),
            })
            .collect();

        // Best score first; ties break on the symbol so output is stable
        passed.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        let total_passed = passed.len();
        passed.truncate(filters.limit);

        tracing::info!(
            total_analyzed,
            total_passed,
            returned = passed.len(),
            "screen complete"
        );

        Ok(ScreenerReport {
            suggestions: passed,
            total_analyzed,
            total_passed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use indicator_cache::IndicatorCache;
    use market_data::MarketDataFacade;
    use quant_core::{
        Bar, DataConfig, EngineConfig, Fundamentals, MarketDataProvider, ProviderError, Quote,
    };
    use std::collections::HashMap;

    struct UniverseProvider {
        series: HashMap<String, Vec<Bar>>,
    }

    fn trending_bars(count: usize, daily_growth: f64) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..count)
            .map(|i| {
                let close = 100.0 * (1.0 + daily_growth).powi(i as i32);
                Bar {
                    date: start + chrono::Days::new(i as u64),
                    open: close * 0.999,
                    high: close * 1.006,
                    low: close * 0.994,
                    close,
                    volume: 2_000_000.0,
                }
            })
            .collect()
    }

    #[async_trait]
    impl MarketDataProvider for UniverseProvider {
        fn name(&self) -> &str {
            "universe"
        }

        async fn fetch_daily_bars(
            &self,
            symbol: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<Bar>, ProviderError> {
            let bars = self
                .series
                .get(symbol)
                .ok_or_else(|| ProviderError::Permanent(format!("unknown symbol {symbol}")))?;
            Ok(bars
                .iter()
                .filter(|b| b.date >= start && b.date <= end)
                .cloned()
                .collect())
        }

        async fn fetch_fundamentals(&self, symbol: &str) -> Result<Fundamentals, ProviderError> {
            Ok(Fundamentals {
                symbol: symbol.to_string(),
                ..Fundamentals::default()
            })
        }

        async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
            let bars = self
                .series
                .get(symbol)
                .ok_or_else(|| ProviderError::Permanent(format!("unknown symbol {symbol}")))?;
            Ok(Quote {
                symbol: symbol.to_string(),
                bar: bars.last().cloned().unwrap(),
                as_of: Utc::now(),
            })
        }
    }

    fn screener_with(series: HashMap<String, Vec<Bar>>) -> Screener {
        let provider = Arc::new(UniverseProvider { series });
        let facade = Arc::new(MarketDataFacade::new(vec![provider], DataConfig::default()));
        let cache = Arc::new(IndicatorCache::new(1024));
        let pipeline = Arc::new(AnalysisPipeline::new(facade, cache, &EngineConfig::default()));
        Screener::new(pipeline)
    }

    #[tokio::test]
    async fn ranks_trending_names_above_decliners() {
        let mut series = HashMap::new();
        series.insert("UPUP".to_string(), trending_bars(300, 0.004));
        series.insert("DOWN".to_string(), trending_bars(300, -0.003));
        series.insert("FLAT".to_string(), trending_bars(300, 0.0));
        let screener = screener_with(series);

        let symbols: Vec<String> = ["UPUP", "DOWN", "FLAT"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let filters = ScreenerFilters {
            min_score: 0.0,
            min_confidence: 0.0,
            limit: 10,
        };
        let report = screener
            .screen(
                &symbols,
                &AnalysisContext::default(),
                &filters,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.total_analyzed, 3);
        assert_eq!(report.total_passed, 3);
        assert_eq!(report.suggestions[0].symbol, "UPUP");
        assert_eq!(report.suggestions[2].symbol, "DOWN");
        assert!(report.suggestions[0].score > report.suggestions[2].score);
    }

    #[tokio::test]
    async fn filters_and_limit_apply() {
        let mut series = HashMap::new();
        for (i, symbol) in ["AAA", "BBB", "CCC", "DDD"].iter().enumerate() {
            series.insert(symbol.to_string(), trending_bars(300, 0.001 * (i as f64 + 1.0)));
        }
        let screener = screener_with(series);

        let symbols: Vec<String> = ["AAA", "BBB", "CCC", "DDD"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let filters = ScreenerFilters {
            min_score: 0.0,
            min_confidence: 0.0,
            limit: 2,
        };
        let report = screener
            .screen(
                &symbols,
                &AnalysisContext::default(),
                &filters,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.total_passed, 4);
        assert_eq!(report.suggestions.len(), 2);
    }

    #[tokio::test]
    async fn unknown_symbols_are_skipped_not_fatal() {
        let mut series = HashMap::new();
        series.insert("GOOD".to_string(), trending_bars(300, 0.002));
        let screener = screener_with(series);

        let symbols: Vec<String> = ["GOOD", "GONE"].iter().map(|s| s.to_string()).collect();
        let filters = ScreenerFilters {
            min_score: 0.0,
            min_confidence: 0.0,
            limit: 10,
        };
        let report = screener
            .screen(
                &symbols,
                &AnalysisContext::default(),
                &filters,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.total_analyzed, 2);
        assert_eq!(report.suggestions.len(), 1);
        assert_eq!(report.suggestions[0].symbol, "GOOD");
    }

    #[tokio::test]
    async fn empty_universe_is_invalid_input() {
        let screener = screener_with(HashMap::new());
        let err = screener
            .screen(
                &[],
                &AnalysisContext::default(),
                &ScreenerFilters::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }
}
