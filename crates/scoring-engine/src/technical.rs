use quant_core::Bar;
use technical_indicators::{detect_trend, PatternDetection, Reliability, Trend};

use crate::models::{IndicatorBundle, SubScore};

/// Score price action off the standard indicator set.
pub fn score_technicals(
    bars: &[Bar],
    indicators: &IndicatorBundle,
    patterns: &[PatternDetection],
) -> SubScore {
    let mut score = 50.0;
    let mut reasoning = Vec::new();
    let price = match bars.last() {
        Some(bar) => bar.close,
        None => return SubScore::neutral(),
    };

    // Moving-average alignment
    match (
        indicators.sma_20.last(),
        indicators.sma_50.last(),
        indicators.sma_200.last(),
    ) {
        (Some(s20), Some(s50), Some(s200)) => {
            if price > s20 && s20 > s50 && s50 > s200 {
                score += 10.0;
                reasoning.push("+ Bullish MA alignment (price > 20 > 50 > 200)".to_string());
            } else if price < s20 && s20 < s50 && s50 < s200 {
                score -= 10.0;
                reasoning.push("- Bearish MA alignment (price < 20 < 50 < 200)".to_string());
            } else if price > s20 && price > s50 {
                score += 5.0;
                reasoning.push("+ Price above 20- and 50-day MAs".to_string());
            } else if price < s20 && price < s50 {
                score -= 5.0;
                reasoning.push("- Price below 20- and 50-day MAs".to_string());
            }
        }
        (Some(s20), Some(s50), None) => {
            if price > s20 && price > s50 {
                score += 5.0;
                reasoning.push("+ Price above 20- and 50-day MAs".to_string());
            } else if price < s20 && price < s50 {
                score -= 5.0;
                reasoning.push("- Price below 20- and 50-day MAs".to_string());
            }
        }
        _ => {}
    }

    // Golden / death cross on the latest bar
    if let (Some(s50), Some(s200), Some(p50), Some(p200)) = (
        indicators.sma_50.last(),
        indicators.sma_200.last(),
        indicators.sma_50.prev(),
        indicators.sma_200.prev(),
    ) {
        if s50 > s200 && p50 <= p200 {
            score += 8.0;
            reasoning.push("+ Golden cross (50-day crossed above 200-day)".to_string());
        } else if s50 < s200 && p50 >= p200 {
            score -= 8.0;
            reasoning.push("- Death cross (50-day crossed below 200-day)".to_string());
        }
    }

    // RSI zone
    if let Some(rsi) = indicators.rsi_14.last() {
        if rsi > 70.0 {
            score -= 6.0;
            reasoning.push(format!("- RSI {rsi:.0} overbought"));
        } else if rsi < 30.0 {
            score += 6.0;
            reasoning.push(format!("+ RSI {rsi:.0} oversold"));
        }
    }

    // MACD: a fresh signal cross outweighs plain histogram sign
    if let (Some(hist), Some(prev_hist)) = (
        indicators.macd.histogram.last(),
        indicators.macd.histogram.prev(),
    ) {
        if hist > 0.0 && prev_hist <= 0.0 {
            score += 7.0;
            reasoning.push("+ MACD bullish cross".to_string());
        } else if hist < 0.0 && prev_hist >= 0.0 {
            score -= 7.0;
            reasoning.push("- MACD bearish cross".to_string());
        } else if hist > 0.0 {
            score += 3.0;
            reasoning.push("+ MACD histogram positive".to_string());
        } else if hist < 0.0 {
            score -= 3.0;
            reasoning.push("- MACD histogram negative".to_string());
        }
    }

    // Bollinger position
    if let (Some(upper), Some(lower)) = (
        indicators.bollinger.upper.last(),
        indicators.bollinger.lower.last(),
    ) {
        if price < lower {
            score += 5.0;
            reasoning.push("+ Price below lower Bollinger band".to_string());
        } else if price > upper {
            score -= 5.0;
            reasoning.push("- Price above upper Bollinger band".to_string());
        }
    }

    // Trend direction
    let trend = detect_trend(bars, 20);
    match trend {
        Trend::Uptrend => {
            score += 5.0;
            reasoning.push("+ 20-day uptrend".to_string());
        }
        Trend::Downtrend => {
            score -= 5.0;
            reasoning.push("- 20-day downtrend".to_string());
        }
        Trend::Sideways => {}
    }

    // Volume trend: expanding volume confirms the direction of the move
    if bars.len() >= 20 {
        let n = bars.len();
        let recent: f64 = bars[n - 10..].iter().map(|b| b.volume).sum::<f64>() / 10.0;
        let prior: f64 = bars[n - 20..n - 10].iter().map(|b| b.volume).sum::<f64>() / 10.0;
        if prior > 0.0 && recent > prior * 1.25 {
            match trend {
                Trend::Uptrend => {
                    score += 3.0;
                    reasoning.push("+ Rising volume confirms uptrend".to_string());
                }
                Trend::Downtrend => {
                    score -= 3.0;
                    reasoning.push("- Rising volume confirms downtrend".to_string());
                }
                Trend::Sideways => {}
            }
        }
    }

    // OBV confirmation vs 10 bars ago
    if indicators.obv.len() >= 11 {
        let n = indicators.obv.len();
        let obv_now = indicators.obv.values[n - 1];
        let obv_then = indicators.obv.values[n - 11];
        let price_then = bars[n - 11].close;
        if obv_now > obv_then && price > price_then {
            score += 2.0;
            reasoning.push("+ OBV confirms price advance".to_string());
        } else if obv_now < obv_then && price > price_then {
            score -= 2.0;
            reasoning.push("- OBV diverging from price advance".to_string());
        }
    }

    // Proximity to support/resistance
    if let Some(support) = indicators.support_resistance.support {
        if price > support && (price - support) / price < 0.02 {
            score += 3.0;
            reasoning.push(format!("+ Holding just above support {support:.2}"));
        }
    }
    if let Some(resistance) = indicators.support_resistance.resistance {
        if resistance > price && (resistance - price) / price < 0.02 {
            score -= 3.0;
            reasoning.push(format!("- Pressing into resistance {resistance:.2}"));
        }
    }

    // Candlestick patterns, weighted by reliability tier
    for detection in patterns {
        let weight = match detection.reliability {
            Reliability::High => 5.0,
            Reliability::Medium => 3.0,
            Reliability::Low => 1.0,
        };
        if detection.value > 0 {
            score += weight;
            reasoning.push(format!("+ Bullish {} pattern", detection.kind.as_str()));
        } else if detection.value < 0 {
            score -= weight;
            reasoning.push(format!("- Bearish {} pattern", detection.kind.as_str()));
        }
    }

    SubScore::new(score, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use quant_core::Bar;
    use technical_indicators::PatternKind;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                date: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + chrono::Days::new(i as u64),
                open: close * 0.998,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1_000_000.0,
            })
            .collect()
    }

    #[test]
    fn sustained_advance_scores_bullish() {
        let closes: Vec<f64> = (0..260).map(|i| 50.0 + i as f64 * 0.5).collect();
        let bars = bars_from_closes(&closes);
        let indicators = IndicatorBundle::compute(&bars);
        let result = score_technicals(&bars, &indicators, &[]);
        assert!(result.score > 55.0, "score was {}", result.score);
        assert!(result
            .reasoning
            .iter()
            .any(|r| r.contains("Bullish MA alignment")));
    }

    #[test]
    fn sustained_decline_scores_bearish() {
        let closes: Vec<f64> = (0..260).map(|i| 200.0 - i as f64 * 0.5).collect();
        let bars = bars_from_closes(&closes);
        let indicators = IndicatorBundle::compute(&bars);
        let result = score_technicals(&bars, &indicators, &[]);
        assert!(result.score < 45.0, "score was {}", result.score);
    }

    #[test]
    fn patterns_shift_the_score_by_reliability() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i % 7) as f64).collect();
        let bars = bars_from_closes(&closes);
        let indicators = IndicatorBundle::compute(&bars);

        let base = score_technicals(&bars, &indicators, &[]);
        let with_pattern = score_technicals(
            &bars,
            &indicators,
            &[PatternDetection {
                kind: PatternKind::ThreeWhiteSoldiers,
                value: 100,
                reliability: Reliability::High,
            }],
        );
        assert!(with_pattern.score > base.score);
    }
}
