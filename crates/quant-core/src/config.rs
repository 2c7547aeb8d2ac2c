use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration, passed explicitly at component construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub short: ShortConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

/// Data-access facade settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Provider names in priority order (primary first)
    #[serde(default)]
    pub providers: Vec<String>,
    /// Provider name → sustained tokens per second
    #[serde(default)]
    pub rate_limits: HashMap<String, f64>,
    /// Real-time quote TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Per-provider request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound on time spent waiting for rate-limit tokens, in seconds
    #[serde(default = "default_rate_limit_wait_secs")]
    pub max_rate_limit_wait_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_rate_limit_wait_secs() -> u64 {
    30
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            rate_limits: HashMap::new(),
            cache_ttl_secs: default_cache_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_rate_limit_wait_secs: default_rate_limit_wait_secs(),
        }
    }
}

/// Portfolio-level risk limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    /// Max position value as a fraction of net worth
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    /// Max sector value as a fraction of net worth
    #[serde(default = "default_max_sector_allocation")]
    pub max_sector_allocation: f64,
    /// Max pairwise correlation with any existing holding
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
    /// (Σ|long| + Σ|short|) / net worth cap
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    /// None = unbounded
    #[serde(default)]
    pub max_positions: Option<usize>,
}

fn default_initial_capital() -> f64 {
    100_000.0
}
fn default_max_position_size() -> f64 {
    0.15
}
fn default_max_sector_allocation() -> f64 {
    0.30
}
fn default_correlation_threshold() -> f64 {
    0.70
}
fn default_max_leverage() -> f64 {
    1.0
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            max_position_size: default_max_position_size(),
            max_sector_allocation: default_max_sector_allocation(),
            correlation_threshold: default_correlation_threshold(),
            max_leverage: default_max_leverage(),
            max_positions: None,
        }
    }
}

/// Fill-cost model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_commission_rate")]
    pub commission_rate: f64,
    #[serde(default = "default_slippage_rate")]
    pub slippage_rate: f64,
}

fn default_commission_rate() -> f64 {
    0.001
}
fn default_slippage_rate() -> f64 {
    0.0005
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            commission_rate: default_commission_rate(),
            slippage_rate: default_slippage_rate(),
        }
    }
}

/// Short-selling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortConfig {
    /// Collateral posted as a multiple of position value
    #[serde(default = "default_margin_requirement")]
    pub margin_requirement: f64,
    /// Annual borrow rate charged on short notional
    #[serde(default = "default_short_interest_rate")]
    pub short_interest_rate: f64,
    /// Maintenance threshold = position value · (margin_requirement − buffer)
    #[serde(default = "default_maintenance_margin_buffer")]
    pub maintenance_margin_buffer: f64,
    /// Extra slippage applied to a forced-liquidation cover
    #[serde(default = "default_liquidation_penalty")]
    pub liquidation_penalty: f64,
}

fn default_margin_requirement() -> f64 {
    1.5
}
fn default_short_interest_rate() -> f64 {
    0.03
}
fn default_maintenance_margin_buffer() -> f64 {
    0.25
}
fn default_liquidation_penalty() -> f64 {
    0.01
}

impl Default for ShortConfig {
    fn default() -> Self {
        Self {
            margin_requirement: default_margin_requirement(),
            short_interest_rate: default_short_interest_rate(),
            maintenance_margin_buffer: default_maintenance_margin_buffer(),
            liquidation_penalty: default_liquidation_penalty(),
        }
    }
}

/// Sub-score weights and recommendation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default = "default_buy_threshold")]
    pub buy_threshold: f64,
    #[serde(default = "default_sell_threshold")]
    pub sell_threshold: f64,
}

fn default_buy_threshold() -> f64 {
    70.0
}
fn default_sell_threshold() -> f64 {
    40.0
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            buy_threshold: default_buy_threshold(),
            sell_threshold: default_sell_threshold(),
        }
    }
}

/// Composite weights. Risk is classification-only and carries no weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_weight_fundamental")]
    pub fundamental: f64,
    #[serde(default = "default_weight_technical")]
    pub technical: f64,
    #[serde(default = "default_weight_momentum")]
    pub momentum: f64,
    #[serde(default = "default_weight_sentiment")]
    pub sentiment: f64,
}

fn default_weight_fundamental() -> f64 {
    0.40
}
fn default_weight_technical() -> f64 {
    0.30
}
fn default_weight_momentum() -> f64 {
    0.20
}
fn default_weight_sentiment() -> f64 {
    0.10
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            fundamental: default_weight_fundamental(),
            technical: default_weight_technical(),
            momentum: default_weight_momentum(),
            sentiment: default_weight_sentiment(),
        }
    }
}

/// Optimizer fan-out and walk-forward windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Degree of parallelism for grid search (0 = rayon default)
    #[serde(default)]
    pub parallelism: usize,
    #[serde(default)]
    pub walk_forward: WalkForwardConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            walk_forward: WalkForwardConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    #[serde(default = "default_train_window")]
    pub train_window: usize,
    #[serde(default = "default_test_window")]
    pub test_window: usize,
}

fn default_train_window() -> usize {
    252
}
fn default_test_window() -> usize {
    63
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_window: default_train_window(),
            test_window: default_test_window(),
        }
    }
}
