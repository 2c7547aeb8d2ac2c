use quant_core::{AnalystConsensus, Bar};

use crate::models::SubScore;

/// Score soft signals: analyst consensus, market-cap tier, volume pattern,
/// and sector sentiment.
pub fn score_sentiment(
    bars: &[Bar],
    analyst: Option<&AnalystConsensus>,
    market_cap: Option<f64>,
    sector_sentiment: Option<f64>,
) -> SubScore {
    let mut score = 50.0;
    let mut reasoning = Vec::new();

    // Analyst consensus, discretized onto the 0-100 scale
    if let Some(rating) = analyst.and_then(|a| a.rating) {
        let contribution = (rating.to_score() - 50.0) * 0.4;
        score += contribution;
        if contribution > 0.0 {
            reasoning.push(format!("+ Analyst consensus: {}", rating.to_label()));
        } else if contribution < 0.0 {
            reasoning.push(format!("- Analyst consensus: {}", rating.to_label()));
        }
    }

    // Market-cap tier: size is a stability signal
    if let Some(cap) = market_cap {
        if cap >= 200e9 {
            score += 4.0;
            reasoning.push("+ Mega-cap stability".to_string());
        } else if cap >= 10e9 {
            score += 2.0;
            reasoning.push("+ Large-cap stability".to_string());
        } else if cap < 300e6 {
            score -= 4.0;
            reasoning.push("- Micro-cap (thin institutional coverage)".to_string());
        } else if cap < 2e9 {
            score -= 2.0;
            reasoning.push("- Small-cap volatility risk".to_string());
        }
    }

    // Volume pattern: unusual activity in the direction of the move
    if bars.len() >= 35 {
        let n = bars.len();
        let recent_vol: f64 = bars[n - 5..].iter().map(|b| b.volume).sum::<f64>() / 5.0;
        let base_vol: f64 = bars[n - 35..n - 5].iter().map(|b| b.volume).sum::<f64>() / 30.0;
        if base_vol > 0.0 && recent_vol > base_vol * 1.5 {
            let price_rising = bars[n - 1].close > bars[n - 6].close;
            if price_rising {
                score += 5.0;
                reasoning.push("+ Volume surge on advancing price".to_string());
            } else {
                score -= 5.0;
                reasoning.push("- Volume surge on declining price".to_string());
            }
        }
    }

    // Sector sentiment on the shared 0-100 scale
    if let Some(sector) = sector_sentiment {
        let contribution = (sector.clamp(0.0, 100.0) - 50.0) * 0.2;
        score += contribution;
        if contribution >= 2.0 {
            reasoning.push(format!("+ Favorable sector sentiment ({sector:.0})"));
        } else if contribution <= -2.0 {
            reasoning.push(format!("- Weak sector sentiment ({sector:.0})"));
        }
    }

    SubScore::new(score, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use quant_core::AnalystRating;

    fn bars_with_volume(volumes: &[f64]) -> Vec<Bar> {
        volumes
            .iter()
            .enumerate()
            .map(|(i, &volume)| Bar {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i as u64),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64 * 0.1,
                volume,
            })
            .collect()
    }

    #[test]
    fn no_inputs_is_neutral() {
        let result = score_sentiment(&[], None, None, None);
        assert_eq!(result.score, 50.0);
    }

    #[test]
    fn strong_buy_consensus_lifts_score() {
        let analyst = AnalystConsensus {
            rating: Some(AnalystRating::StrongBuy),
            price_target: Some(200.0),
            contributors: Some(24),
        };
        let result = score_sentiment(&[], Some(&analyst), None, None);
        assert_eq!(result.score, 66.0);

        let analyst = AnalystConsensus {
            rating: Some(AnalystRating::StrongSell),
            ..AnalystConsensus::default()
        };
        let result = score_sentiment(&[], Some(&analyst), None, None);
        assert_eq!(result.score, 34.0);
    }

    #[test]
    fn volume_surge_follows_price_direction() {
        let mut volumes = vec![1_000_000.0; 30];
        volumes.extend([3_000_000.0; 5]);
        let bars = bars_with_volume(&volumes);
        let result = score_sentiment(&bars, None, None, None);
        assert!(result
            .reasoning
            .iter()
            .any(|r| r.contains("Volume surge on advancing price")));
        assert!(result.score > 50.0);
    }

    #[test]
    fn sector_sentiment_is_scaled_and_clamped() {
        let hot = score_sentiment(&[], None, None, Some(100.0));
        assert_eq!(hot.score, 60.0);
        let cold = score_sentiment(&[], None, None, Some(0.0));
        assert_eq!(cold.score, 40.0);
    }

    #[test]
    fn cap_tiers_adjust_score() {
        let mega = score_sentiment(&[], None, Some(500e9), None);
        assert_eq!(mega.score, 54.0);
        let micro = score_sentiment(&[], None, Some(100e6), None);
        assert_eq!(micro.score, 46.0);
    }
}
