pub mod engine;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod portfolio_backtest;
pub mod short;
pub mod strategies;
pub mod walk_forward;


pub use engine::SingleSymbolBacktester;
pub use metrics::{PerformanceMetrics, METRIC_NAMES};
pub use models::*;
pub use optimizer::{metrics_of, optimize, OptimizationReport, ParameterGrid};
pub use portfolio_backtest::MultiSymbolBacktester;
pub use short::ShortSellingBacktester;
pub use walk_forward::{walk_forward, WalkForwardReport};
