use quant_core::Bar;
use serde::{Deserialize, Serialize};

/// Broad market volatility regime, judged from a benchmark series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    HighVolatility,
    Normal,
    LowVolatility,
    Unknown,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::HighVolatility => "high_volatility",
            MarketRegime::Normal => "normal",
            MarketRegime::LowVolatility => "low_volatility",
            MarketRegime::Unknown => "unknown",
        }
    }
}

/// Classify the regime by comparing recent (10-day) volatility against the
/// full-period volatility of the benchmark bars.
pub fn detect_market_regime(benchmark_bars: &[Bar]) -> MarketRegime {
    if benchmark_bars.len() < 20 {
        return MarketRegime::Unknown;
    }

    let returns: Vec<f64> = benchmark_bars
        .windows(2)
        .filter(|w| w[0].close > 0.0)
        .map(|w| (w[1].close - w[0].close) / w[0].close)
        .collect();
    if returns.len() < 20 {
        return MarketRegime::Unknown;
    }

    let full_vol = population_stdev(&returns);
    let recent_vol = population_stdev(&returns[returns.len() - 10..]);
    if full_vol == 0.0 {
        return MarketRegime::Normal;
    }

    let ratio = recent_vol / full_vol;
    if ratio > 1.5 {
        MarketRegime::HighVolatility
    } else if ratio < 0.6 {
        MarketRegime::LowVolatility
    } else {
        MarketRegime::Normal
    }
}

fn population_stdev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap() + chrono::Days::new(i as u64),
                open: close,
                high: close * 1.002,
                low: close * 0.998,
                close,
                volume: 1_000_000.0,
            })
            .collect()
    }

    #[test]
    fn calm_tail_after_wild_period_reads_low_volatility() {
        let mut closes: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 100.0 } else { 108.0 })
            .collect();
        closes.extend(std::iter::repeat(104.0).take(12));
        assert_eq!(
            detect_market_regime(&bars_from_closes(&closes)),
            MarketRegime::LowVolatility
        );
    }

    #[test]
    fn wild_tail_after_calm_period_reads_high_volatility() {
        let mut closes = vec![100.0; 40];
        closes.extend((0..12).map(|i| if i % 2 == 0 { 100.0 } else { 112.0 }));
        assert_eq!(
            detect_market_regime(&bars_from_closes(&closes)),
            MarketRegime::HighVolatility
        );
    }

    #[test]
    fn steady_series_is_normal_and_short_series_unknown() {
        let steady: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.8).sin())
            .collect();
        assert_eq!(
            detect_market_regime(&bars_from_closes(&steady)),
            MarketRegime::Normal
        );
        assert_eq!(
            detect_market_regime(&bars_from_closes(&[100.0, 101.0])),
            MarketRegime::Unknown
        );
    }
}
