pub mod accuracy;
pub mod comparator;
pub mod performance;

pub use accuracy::{AccuracyBucket, AccuracyReport, SignalAccuracyTracker, SignalRecord};
pub use comparator::{compare_strategies, ComparisonRow, StrategyComparison};
pub use performance::{PerformanceTracker, StrategyStats};
