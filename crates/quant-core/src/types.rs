use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Daily OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest bar plus the moment it was observed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bar: Bar,
    pub as_of: DateTime<Utc>,
}

/// Per-symbol fundamentals snapshot.
///
/// Every metric is optional: a missing field degrades scoring to its neutral
/// midpoint instead of invalidating the analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fundamentals {
    pub symbol: String,
    pub as_of: Option<NaiveDate>,
    pub pe_ratio: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
    pub quick_ratio: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub earnings_growth: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub payout_ratio: Option<f64>,
    pub interest_coverage: Option<f64>,
}

/// Analyst consensus rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalystRating {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl AnalystRating {
    /// Numeric score on the 0-100 sentiment scale
    pub fn to_score(&self) -> f64 {
        match self {
            AnalystRating::StrongBuy => 90.0,
            AnalystRating::Buy => 70.0,
            AnalystRating::Hold => 50.0,
            AnalystRating::Sell => 30.0,
            AnalystRating::StrongSell => 10.0,
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            AnalystRating::StrongBuy => "Strong Buy",
            AnalystRating::Buy => "Buy",
            AnalystRating::Hold => "Hold",
            AnalystRating::Sell => "Sell",
            AnalystRating::StrongSell => "Strong Sell",
        }
    }
}

/// Aggregated analyst inputs consumed by the sentiment sub-score
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalystConsensus {
    pub rating: Option<AnalystRating>,
    pub price_target: Option<f64>,
    pub contributors: Option<i32>,
}

/// Action attached to a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationAction {
    Buy,
    Hold,
    Sell,
}

impl RecommendationAction {
    /// Classify a composite score against the configured thresholds.
    pub fn from_score(score: f64, buy_threshold: f64, sell_threshold: f64) -> Self {
        if score >= buy_threshold {
            RecommendationAction::Buy
        } else if score <= sell_threshold {
            RecommendationAction::Sell
        } else {
            RecommendationAction::Hold
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationAction::Buy => "BUY",
            RecommendationAction::Hold => "HOLD",
            RecommendationAction::Sell => "SELL",
        }
    }
}

/// Risk classification tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::VeryHigh => "VERY_HIGH",
        }
    }
}

/// Final output of the scoring engine for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub action: RecommendationAction,
    /// Composite score in [0, 100]
    pub score: f64,
    /// Confidence in [0, 100]
    pub confidence: f64,
    pub target_price: f64,
    pub expected_return_pct: f64,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    /// Ordered list of the metrics that pushed the score up or down
    pub reasoning: Vec<String>,
}

/// Direction of a strategy signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Hold => "HOLD",
        }
    }
}

/// Signal emitted by a strategy for one bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySignal {
    pub action: SignalAction,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub reasoning: String,
    /// Opaque per-strategy fields
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl StrategySignal {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Hold,
            confidence: 0.0,
            reasoning: reason.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn new(action: SignalAction, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            action,
            confidence,
            reasoning: reasoning.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Open long position. Shares are whole by construction (sizers floor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongPosition {
    pub symbol: String,
    pub shares: f64,
    pub avg_cost: f64,
    pub opened_at: NaiveDate,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// Open short position. Shares are tracked as positive magnitudes; the
/// container keeps shorts separate from longs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortPosition {
    pub symbol: String,
    pub shares: f64,
    pub avg_short_price: f64,
    pub opened_at: NaiveDate,
    pub margin_posted: f64,
    /// Borrow cost accumulated daily, realized on cover
    pub accrued_interest: f64,
}

impl ShortPosition {
    /// Current notional value of the short at its entry price
    pub fn notional(&self) -> f64 {
        self.shares * self.avg_short_price
    }
}

/// Journaled trade action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    Sell,
    Short,
    Cover,
    ForcedLiquidation,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::Short => "SHORT",
            TradeAction::Cover => "COVER",
            TradeAction::ForcedLiquidation => "FORCED_LIQUIDATION",
        }
    }
}

/// One journal entry in a portfolio's trade log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub portfolio_id: String,
    pub symbol: String,
    pub action: TradeAction,
    pub shares: f64,
    pub fill_price: f64,
    pub commission: f64,
    pub slippage_applied: f64,
    pub date: NaiveDate,
    pub strategy_name: Option<String>,
    pub reasoning: Option<String>,
}

/// A point on an equity curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub net_worth: f64,
}

/// Symbol → sector lookup used by concentration checks
pub type SectorMap = BTreeMap<String, String>;
