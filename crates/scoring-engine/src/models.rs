use quant_core::{AnalystConsensus, Bar, Fundamentals};
use serde::{Deserialize, Serialize};
use technical_indicators::{
    adx, atr, bollinger_bands, ema, macd, obv, rsi, sma, support_resistance, AdxSeries,
    BollingerSeries, IndicatorVector, MacdSeries, PatternDetection, SupportResistance,
};

/// Everything the scoring engine needs for one symbol.
#[derive(Debug, Clone, Default)]
pub struct AnalysisBundle {
    pub symbol: String,
    pub bars: Vec<Bar>,
    pub fundamentals: Option<Fundamentals>,
    pub analyst: Option<AnalystConsensus>,
    /// Industry-average P/E used for relative valuation and mean reversion
    pub industry_pe: Option<f64>,
    /// Benchmark close series aligned to the tail of `bars`
    pub benchmark_closes: Option<Vec<f64>>,
    /// Sector sentiment on the 0-100 scale
    pub sector_sentiment: Option<f64>,
    pub market_cap: Option<f64>,
    pub patterns: Vec<PatternDetection>,
}

/// One sub-score plus the reasoning strings that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubScore {
    /// Clipped to [0, 100]
    pub score: f64,
    pub reasoning: Vec<String>,
}

impl SubScore {
    pub fn new(raw: f64, reasoning: Vec<String>) -> Self {
        Self {
            score: raw.clamp(0.0, 100.0),
            reasoning,
        }
    }

    /// The neutral midpoint used when inputs are wholly absent.
    pub fn neutral() -> Self {
        Self {
            score: 50.0,
            reasoning: Vec::new(),
        }
    }
}

/// All five axes, pre-composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubScores {
    pub fundamental: SubScore,
    pub technical: SubScore,
    pub momentum: SubScore,
    pub sentiment: SubScore,
    /// Classification-only; never weighted into the composite
    pub risk_score: f64,
}

/// The standard indicator set scoring consumes, computed once per bundle.
#[derive(Debug, Clone)]
pub struct IndicatorBundle {
    pub sma_20: IndicatorVector,
    pub sma_50: IndicatorVector,
    pub sma_200: IndicatorVector,
    pub ema_12: IndicatorVector,
    pub ema_26: IndicatorVector,
    pub rsi_14: IndicatorVector,
    pub macd: MacdSeries,
    pub bollinger: BollingerSeries,
    pub atr_14: IndicatorVector,
    pub atr_20: IndicatorVector,
    pub obv: IndicatorVector,
    pub adx_14: AdxSeries,
    pub support_resistance: SupportResistance,
}

impl IndicatorBundle {
    pub fn compute(bars: &[Bar]) -> Self {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        Self {
            sma_20: sma(&closes, 20),
            sma_50: sma(&closes, 50),
            sma_200: sma(&closes, 200),
            ema_12: ema(&closes, 12),
            ema_26: ema(&closes, 26),
            rsi_14: rsi(&closes, 14),
            macd: macd(&closes, 12, 26, 9),
            bollinger: bollinger_bands(&closes, 20, 2.0),
            atr_14: atr(bars, 14),
            atr_20: atr(bars, 20),
            obv: obv(bars),
            adx_14: adx(bars, 14),
            support_resistance: support_resistance(bars, 60),
        }
    }
}
