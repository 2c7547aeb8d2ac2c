use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use quant_core::EngineError;

/// Rolling per-strategy trade statistics.
///
/// Feeds the Kelly position sizer: win probability, average win, and average
/// loss are exactly the inputs its formula needs, and `sample_size` lets the
/// caller refuse to size off thin history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub gross_profit: f64,
    pub gross_loss: f64,
}

impl StrategyStats {
    fn record(&mut self, pnl: f64) {
        self.trades += 1;
        if pnl > 0.0 {
            self.wins += 1;
            self.gross_profit += pnl;
        } else if pnl < 0.0 {
            self.losses += 1;
            self.gross_loss += pnl.abs();
        }
    }

    /// 0.0 to 1.0; 0 with no history
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.trades as f64
    }

    pub fn avg_win(&self) -> f64 {
        if self.wins == 0 {
            return 0.0;
        }
        self.gross_profit / self.wins as f64
    }

    /// Positive magnitude
    pub fn avg_loss(&self) -> f64 {
        if self.losses == 0 {
            return 0.0;
        }
        self.gross_loss / self.losses as f64
    }

    /// 0 (not infinity) when there are no losing trades
    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss == 0.0 {
            return 0.0;
        }
        self.gross_profit / self.gross_loss
    }

    pub fn expectancy(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        let loss_rate = self.losses as f64 / self.trades as f64;
        self.win_rate() * self.avg_win() - loss_rate * self.avg_loss()
    }
}

/// Accumulates realized trade outcomes per strategy name.
#[derive(Debug, Clone, Default)]
pub struct PerformanceTracker {
    stats: BTreeMap<String, StrategyStats>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one closed trade's realized P&L under `strategy`.
    pub fn record_trade(&mut self, strategy: &str, pnl: f64) -> Result<(), EngineError> {
        if strategy.is_empty() {
            return Err(EngineError::InvalidInput(
                "strategy name must not be empty".into(),
            ));
        }
        if !pnl.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "{strategy}: P&L must be finite, got {pnl}"
            )));
        }
        self.stats.entry(strategy.to_string()).or_default().record(pnl);
        Ok(())
    }

    pub fn stats(&self, strategy: &str) -> Option<&StrategyStats> {
        self.stats.get(strategy)
    }

    /// All tracked strategies, ranked by expectancy (best first).
    pub fn ranked(&self) -> Vec<(&str, &StrategyStats)> {
        let mut entries: Vec<(&str, &StrategyStats)> = self
            .stats
            .iter()
            .map(|(name, stats)| (name.as_str(), stats))
            .collect();
        entries.sort_by(|a, b| {
            b.1.expectancy()
                .partial_cmp(&a.1.expectancy())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        entries
    }

    /// Kelly inputs `(win_probability, avg_win, avg_loss)` when the sample
    /// is large enough and two-sided; None otherwise.
    pub fn kelly_inputs(&self, strategy: &str, min_trades: usize) -> Option<(f64, f64, f64)> {
        let stats = self.stats.get(strategy)?;
        if stats.trades < min_trades || stats.wins == 0 || stats.losses == 0 {
            return None;
        }
        Some((stats.win_rate(), stats.avg_win(), stats.avg_loss()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn accumulates_per_strategy() {
        let mut tracker = PerformanceTracker::new();
        for pnl in [100.0, -50.0, 200.0, -50.0] {
            tracker.record_trade("momentum", pnl).unwrap();
        }
        tracker.record_trade("reversal", 30.0).unwrap();

        let momentum = tracker.stats("momentum").unwrap();
        assert_eq!(momentum.trades, 4);
        assert_relative_eq!(momentum.win_rate(), 0.5);
        assert_relative_eq!(momentum.avg_win(), 150.0);
        assert_relative_eq!(momentum.avg_loss(), 50.0);
        assert_relative_eq!(momentum.profit_factor(), 3.0);
        assert_relative_eq!(momentum.expectancy(), 0.5 * 150.0 - 0.5 * 50.0);

        assert!(tracker.stats("unknown").is_none());
    }

    #[test]
    fn kelly_inputs_require_a_two_sided_sample() {
        let mut tracker = PerformanceTracker::new();
        for _ in 0..12 {
            tracker.record_trade("lucky", 10.0).unwrap();
        }
        // All wins: the payoff ratio is undefined
        assert!(tracker.kelly_inputs("lucky", 10).is_none());

        tracker.record_trade("lucky", -5.0).unwrap();
        let (p, avg_win, avg_loss) = tracker.kelly_inputs("lucky", 10).unwrap();
        assert_relative_eq!(p, 12.0 / 13.0, epsilon = 1e-9);
        assert_relative_eq!(avg_win, 10.0);
        assert_relative_eq!(avg_loss, 5.0);

        // Below the sample floor
        assert!(tracker.kelly_inputs("lucky", 50).is_none());
    }

    #[test]
    fn ranking_puts_best_expectancy_first() {
        let mut tracker = PerformanceTracker::new();
        tracker.record_trade("steady", 20.0).unwrap();
        tracker.record_trade("steady", 25.0).unwrap();
        tracker.record_trade("choppy", 100.0).unwrap();
        tracker.record_trade("choppy", -120.0).unwrap();

        let ranked = tracker.ranked();
        assert_eq!(ranked[0].0, "steady");
        assert_eq!(ranked[1].0, "choppy");
        assert!(ranked[1].1.expectancy() < 0.0);
    }

    #[test]
    fn rejects_bad_input() {
        let mut tracker = PerformanceTracker::new();
        assert!(tracker.record_trade("", 10.0).is_err());
        assert!(tracker.record_trade("m", f64::NAN).is_err());
        // Zero P&L counts as a trade but neither a win nor a loss
        tracker.record_trade("m", 0.0).unwrap();
        let stats = tracker.stats("m").unwrap();
        assert_eq!(stats.trades, 1);
        assert_eq!(stats.wins + stats.losses, 0);
    }
}
