use quant_core::Bar;

use crate::models::SubScore;

/// Annualization factor for daily volatility.
const TRADING_DAYS: f64 = 252.0;

/// Simple return between two closes `offset_from` and `offset_to` bars back
/// (0 = latest bar).
fn window_return(closes: &[f64], offset_from: usize, offset_to: usize) -> Option<f64> {
    let n = closes.len();
    if offset_from >= n || offset_to >= offset_from {
        return None;
    }
    let from = closes[n - 1 - offset_from];
    let to = closes[n - 1 - offset_to];
    if from > 0.0 {
        Some(to / from - 1.0)
    } else {
        None
    }
}

/// Annualized standard deviation of the last `window` daily log returns.
pub fn recent_volatility(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window + 1 {
        return None;
    }
    let tail = &closes[closes.len() - window - 1..];
    let log_returns: Vec<f64> = tail
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    if log_returns.len() < 2 {
        return None;
    }
    let n = log_returns.len() as f64;
    let mean = log_returns.iter().sum::<f64>() / n;
    let variance = log_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt() * TRADING_DAYS.sqrt())
}

/// Score price momentum across short/medium/long horizons, recent volatility,
/// relative strength against the benchmark, and reversal setups.
pub fn score_momentum(bars: &[Bar], benchmark_closes: Option<&[f64]>) -> SubScore {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    if closes.len() < 11 {
        return SubScore::neutral();
    }

    let mut score = 50.0;
    let mut reasoning = Vec::new();

    // Horizon buckets: 1-10d, 11-50d, 51-252d
    let short = window_return(&closes, 10, 0);
    let medium = window_return(&closes, 50, 10);
    let long = window_return(&closes, 252.min(closes.len() - 1), 50);

    if let Some(r) = short {
        if r > 0.03 {
            score += 6.0;
            reasoning.push(format!("+ 10-day return {:.1}%", r * 100.0));
        } else if r < -0.03 {
            score -= 6.0;
            reasoning.push(format!("- 10-day return {:.1}%", r * 100.0));
        }
    }
    if let Some(r) = medium {
        if r > 0.10 {
            score += 7.0;
            reasoning.push(format!("+ Medium-term return {:.1}%", r * 100.0));
        } else if r < -0.10 {
            score -= 7.0;
            reasoning.push(format!("- Medium-term return {:.1}%", r * 100.0));
        }
    }
    if let Some(r) = long {
        if r > 0.20 {
            score += 7.0;
            reasoning.push(format!("+ Long-term return {:.1}%", r * 100.0));
        } else if r < -0.20 {
            score -= 7.0;
            reasoning.push(format!("- Long-term return {:.1}%", r * 100.0));
        }
    }

    // 30-day volatility of log returns
    if let Some(vol) = recent_volatility(&closes, 30) {
        if vol > 0.50 {
            score -= 6.0;
            reasoning.push(format!("- Elevated 30-day volatility {:.0}%", vol * 100.0));
        } else if vol < 0.20 {
            score += 4.0;
            reasoning.push(format!("+ Calm 30-day volatility {:.0}%", vol * 100.0));
        }
    }

    // Relative strength vs the benchmark over the shared window
    if let Some(bench) = benchmark_closes {
        let window = 60.min(closes.len() - 1).min(bench.len().saturating_sub(1));
        if window >= 10 {
            let own = window_return(&closes, window, 0);
            let n = bench.len();
            let market = if bench[n - 1 - window] > 0.0 {
                Some(bench[n - 1] / bench[n - 1 - window] - 1.0)
            } else {
                None
            };
            if let (Some(own), Some(market)) = (own, market) {
                let spread = own - market;
                if spread > 0.05 {
                    score += 6.0;
                    reasoning.push(format!(
                        "+ Outperforming benchmark by {:.1}%",
                        spread * 100.0
                    ));
                } else if spread < -0.05 {
                    score -= 6.0;
                    reasoning.push(format!(
                        "- Lagging benchmark by {:.1}%",
                        spread.abs() * 100.0
                    ));
                }
            }
        }
    }

    // Reversal: a beaten-down name turning up (or a leader rolling over)
    if let (Some(short), Some(long)) = (short, long) {
        if long < -0.15 && short > 0.05 {
            score += 4.0;
            reasoning.push("+ Potential reversal: turning up after a long decline".to_string());
        } else if long > 0.15 && short < -0.05 {
            score -= 4.0;
            reasoning.push("- Potential reversal: rolling over after a long advance".to_string());
        }
    }

    SubScore::new(score, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                date: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + chrono::Days::new(i as u64),
                open: close,
                high: close * 1.005,
                low: close * 0.995,
                close,
                volume: 2_000_000.0,
            })
            .collect()
    }

    #[test]
    fn persistent_rally_scores_above_neutral() {
        let closes: Vec<f64> = (0..260).map(|i| 100.0 * 1.005f64.powi(i)).collect();
        let bars = bars_from_closes(&closes);
        let result = score_momentum(&bars, None);
        assert!(result.score > 60.0, "score was {}", result.score);
    }

    #[test]
    fn persistent_slide_scores_below_neutral() {
        let closes: Vec<f64> = (0..260).map(|i| 100.0 * 0.995f64.powi(i)).collect();
        let bars = bars_from_closes(&closes);
        let result = score_momentum(&bars, None);
        assert!(result.score < 40.0, "score was {}", result.score);
    }

    #[test]
    fn volatility_of_constant_series_is_zero() {
        let closes = vec![100.0; 40];
        assert_relative_eq!(recent_volatility(&closes, 30).unwrap(), 0.0);
    }

    #[test]
    fn relative_strength_rewards_outperformance() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 * 1.003f64.powi(i)).collect();
        let flat_bench: Vec<f64> = vec![400.0; 100];
        let bars = bars_from_closes(&closes);

        let with_bench = score_momentum(&bars, Some(&flat_bench));
        let without = score_momentum(&bars, None);
        assert!(with_bench.score > without.score);
        assert!(with_bench
            .reasoning
            .iter()
            .any(|r| r.contains("Outperforming benchmark")));
    }

    #[test]
    fn short_history_is_neutral() {
        let bars = bars_from_closes(&[100.0, 101.0, 102.0]);
        let result = score_momentum(&bars, None);
        assert_eq!(result.score, 50.0);
    }
}
