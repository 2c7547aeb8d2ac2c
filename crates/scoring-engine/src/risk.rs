use quant_core::{Bar, Fundamentals, RiskLevel};
use serde::{Deserialize, Serialize};

use crate::models::IndicatorBundle;
use crate::momentum::recent_volatility;

/// Outcome of the risk classification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0-100; classification-only, never enters the composite
    pub score: f64,
    pub level: RiskLevel,
    pub factors: Vec<String>,
}

/// Risk classification for one symbol: volatility tier, leverage,
/// technical extremes, and liquidity.
pub fn classify_risk(
    bars: &[Bar],
    indicators: &IndicatorBundle,
    fundamentals: Option<&Fundamentals>,
) -> RiskAssessment {
    let mut risk: f64 = 0.0;
    let mut factors = Vec::new();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    // Volatility tier from the 30-day sigma
    if let Some(vol) = recent_volatility(&closes, 30) {
        if vol > 0.60 {
            risk += 30.0;
            factors.push(format!("Very high volatility ({:.0}% annualized)", vol * 100.0));
        } else if vol > 0.40 {
            risk += 20.0;
            factors.push(format!("High volatility ({:.0}% annualized)", vol * 100.0));
        } else if vol > 0.25 {
            risk += 10.0;
            factors.push(format!("Moderate volatility ({:.0}% annualized)", vol * 100.0));
        }
    }

    // Fundamental risk from leverage
    if let Some(de) = fundamentals.and_then(|f| f.debt_to_equity) {
        if de > 2.0 {
            risk += 20.0;
            factors.push(format!("Heavy leverage (D/E {de:.2})"));
        } else if de > 1.0 {
            risk += 10.0;
            factors.push(format!("Elevated leverage (D/E {de:.2})"));
        }
    }
    if let Some(coverage) = fundamentals.and_then(|f| f.interest_coverage) {
        if coverage < 2.0 {
            risk += 10.0;
            factors.push(format!("Weak interest coverage ({coverage:.1}x)"));
        }
    }

    // Technical risk from stretched indicators
    if let Some(rsi) = indicators.rsi_14.last() {
        if !(20.0..=80.0).contains(&rsi) {
            risk += 10.0;
            factors.push(format!("RSI at extreme ({rsi:.0})"));
        }
    }
    if let (Some(price), Some(s200)) = (closes.last(), indicators.sma_200.last()) {
        if *price < s200 * 0.80 {
            risk += 10.0;
            factors.push("Price more than 20% below the 200-day MA".to_string());
        }
    }

    // Liquidity risk from 20-day average dollar volume
    if bars.len() >= 20 {
        let n = bars.len();
        let dollar_volume: f64 = bars[n - 20..]
            .iter()
            .map(|b| b.close * b.volume)
            .sum::<f64>()
            / 20.0;
        if dollar_volume < 1e6 {
            risk += 25.0;
            factors.push("Very thin liquidity (under $1M daily)".to_string());
        } else if dollar_volume < 10e6 {
            risk += 10.0;
            factors.push("Limited liquidity (under $10M daily)".to_string());
        }
    }

    let level = if risk < 25.0 {
        RiskLevel::Low
    } else if risk < 50.0 {
        RiskLevel::Medium
    } else if risk < 75.0 {
        RiskLevel::High
    } else {
        RiskLevel::VeryHigh
    };

    RiskAssessment {
        score: risk.clamp(0.0, 100.0),
        level,
        factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars(closes: &[f64], volume: f64) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                date: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap() + chrono::Days::new(i as u64),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume,
            })
            .collect()
    }

    #[test]
    fn quiet_liquid_name_is_low_risk() {
        let closes: Vec<f64> = (0..260).map(|i| 100.0 + (i % 3) as f64 * 0.1).collect();
        let bars = bars(&closes, 5_000_000.0);
        let indicators = IndicatorBundle::compute(&bars);
        let assessment = classify_risk(&bars, &indicators, None);
        assert_eq!(assessment.level, RiskLevel::Low);
        assert!(
            assessment.factors.is_empty(),
            "unexpected factors: {:?}",
            assessment.factors
        );
    }

    #[test]
    fn volatile_leveraged_illiquid_name_is_very_high_risk() {
        // Violent oscillation: ±10% every bar
        let closes: Vec<f64> = (0..260)
            .map(|i| if i % 2 == 0 { 10.0 } else { 11.0 })
            .collect();
        let bars = bars(&closes, 20_000.0);
        let indicators = IndicatorBundle::compute(&bars);
        let fundamentals = Fundamentals {
            symbol: "RISK".into(),
            debt_to_equity: Some(3.0),
            interest_coverage: Some(1.0),
            ..Fundamentals::default()
        };
        let assessment = classify_risk(&bars, &indicators, Some(&fundamentals));
        assert_eq!(assessment.level, RiskLevel::VeryHigh);
        assert!(assessment.factors.len() >= 3);
        assert!(assessment.score >= 75.0);
    }
}
