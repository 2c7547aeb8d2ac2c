use quant_core::{EngineError, Recommendation, RecommendationAction, ScoringConfig};

use crate::fundamental::score_fundamentals;
use crate::models::{AnalysisBundle, IndicatorBundle, SubScores};
use crate::momentum::score_momentum;
use crate::risk::classify_risk;
use crate::sentiment::score_sentiment;
use crate::technical::score_technicals;

/// Minimum history for a full scoring pass.
const MIN_BARS: usize = 60;

/// Hard bound on the projected move implied by the target price.
const MAX_EXPECTED_RETURN_PCT: f64 = 100.0;

/// Deterministic scoring pipeline: one bundle in, one recommendation out.
///
/// Given identical inputs the output is bitwise identical across runs; there
/// is no randomness and no wall-clock dependence anywhere in the pipeline.
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Compute the four weighted sub-scores plus the classification-only
    /// risk score.
    pub fn sub_scores(&self, bundle: &AnalysisBundle, indicators: &IndicatorBundle) -> SubScores {
        let fundamental = score_fundamentals(bundle.fundamentals.as_ref(), bundle.industry_pe);
        let technical = score_technicals(&bundle.bars, indicators, &bundle.patterns);
        let momentum = score_momentum(&bundle.bars, bundle.benchmark_closes.as_deref());
        let sentiment = score_sentiment(
            &bundle.bars,
            bundle.analyst.as_ref(),
            bundle.market_cap,
            bundle.sector_sentiment,
        );
        let risk = classify_risk(&bundle.bars, indicators, bundle.fundamentals.as_ref());

        SubScores {
            fundamental,
            technical,
            momentum,
            sentiment,
            risk_score: risk.score,
        }
    }

    pub fn analyze(&self, bundle: &AnalysisBundle) -> Result<Recommendation, EngineError> {
        if bundle.bars.len() < MIN_BARS {
            return Err(EngineError::InsufficientData(format!(
                "{}: need at least {MIN_BARS} bars, have {}",
                bundle.symbol,
                bundle.bars.len()
            )));
        }
        let indicators = IndicatorBundle::compute(&bundle.bars);
        self.analyze_with_indicators(bundle, &indicators)
    }

    /// Like `analyze`, but with the indicator set supplied by the caller
    /// (typically served from the indicator cache).
    pub fn analyze_with_indicators(
        &self,
        bundle: &AnalysisBundle,
        indicators: &IndicatorBundle,
    ) -> Result<Recommendation, EngineError> {
        if bundle.bars.len() < MIN_BARS {
            return Err(EngineError::InsufficientData(format!(
                "{}: need at least {MIN_BARS} bars, have {}",
                bundle.symbol,
                bundle.bars.len()
            )));
        }

        let risk = classify_risk(&bundle.bars, indicators, bundle.fundamentals.as_ref());
        let scores = SubScores {
            fundamental: score_fundamentals(bundle.fundamentals.as_ref(), bundle.industry_pe),
            technical: score_technicals(&bundle.bars, indicators, &bundle.patterns),
            momentum: score_momentum(&bundle.bars, bundle.benchmark_closes.as_deref()),
            sentiment: score_sentiment(
                &bundle.bars,
                bundle.analyst.as_ref(),
                bundle.market_cap,
                bundle.sector_sentiment,
            ),
            risk_score: risk.score,
        };
        let weights = &self.config.weights;

        let composite = (weights.fundamental * scores.fundamental.score
            + weights.technical * scores.technical.score
            + weights.momentum * scores.momentum.score
            + weights.sentiment * scores.sentiment.score)
            .clamp(0.0, 100.0);

        let action = RecommendationAction::from_score(
            composite,
            self.config.buy_threshold,
            self.config.sell_threshold,
        );

        let price = bundle.bars[bundle.bars.len() - 1].close;
        let (target_price, expected_return_pct) = self.project_target(bundle, price);
        let confidence = self.confidence(&scores, bundle, composite);

        // Reasoning in a fixed axis order keeps the output deterministic and
        // reviewable: fundamentals, technicals, momentum, sentiment.
        let mut reasoning = Vec::new();
        reasoning.extend(scores.fundamental.reasoning.iter().cloned());
        reasoning.extend(scores.technical.reasoning.iter().cloned());
        reasoning.extend(scores.momentum.reasoning.iter().cloned());
        reasoning.extend(scores.sentiment.reasoning.iter().cloned());

        tracing::debug!(
            symbol = %bundle.symbol,
            composite,
            action = action.as_str(),
            "scored symbol"
        );

        Ok(Recommendation {
            symbol: bundle.symbol.clone(),
            action,
            score: composite,
            confidence,
            target_price,
            expected_return_pct,
            risk_level: risk.level,
            risk_factors: risk.factors,
            reasoning,
        })
    }

    /// Target price: weighted blend of the analyst target, mean reversion
    /// toward the industry multiple, and momentum continuation. The implied
    /// return is capped so the target stays within ±100% of price.
    fn project_target(&self, bundle: &AnalysisBundle, price: f64) -> (f64, f64) {
        let mut weighted = 0.0;
        let mut weight_sum = 0.0;

        if let Some(analyst_target) = bundle.analyst.as_ref().and_then(|a| a.price_target) {
            if analyst_target > 0.0 {
                weighted += 0.4 * analyst_target;
                weight_sum += 0.4;
            }
        }

        if let (Some(pe), Some(industry_pe)) = (
            bundle.fundamentals.as_ref().and_then(|f| f.pe_ratio),
            bundle.industry_pe,
        ) {
            if pe > 0.0 && industry_pe > 0.0 {
                // Projected re-rating toward the industry multiple, damped
                let ratio = (industry_pe / pe).clamp(0.5, 1.5);
                weighted += 0.3 * price * (1.0 + (ratio - 1.0) * 0.5);
                weight_sum += 0.3;
            }
        }

        let closes: Vec<f64> = bundle.bars.iter().map(|b| b.close).collect();
        let n = closes.len();
        if n > 50 && closes[n - 51] > 0.0 {
            let medium_return = closes[n - 1] / closes[n - 51] - 1.0;
            let continuation = (1.0 + medium_return * 0.5).clamp(0.5, 1.5);
            weighted += 0.3 * price * continuation;
            weight_sum += 0.3;
        }

        let target = if weight_sum > 0.0 {
            weighted / weight_sum
        } else {
            price
        };

        let expected_return_pct = ((target / price - 1.0) * 100.0)
            .clamp(-MAX_EXPECTED_RETURN_PCT, MAX_EXPECTED_RETURN_PCT);
        let capped_target = price * (1.0 + expected_return_pct / 100.0);
        (capped_target, expected_return_pct)
    }

    /// Confidence from sub-score agreement, input completeness, and how far
    /// the composite sits from the 50 midline.
    fn confidence(&self, scores: &SubScores, bundle: &AnalysisBundle, composite: f64) -> f64 {
        let axis_scores = [
            scores.fundamental.score,
            scores.technical.score,
            scores.momentum.score,
            scores.sentiment.score,
        ];
        let max = axis_scores.iter().cloned().fold(f64::MIN, f64::max);
        let min = axis_scores.iter().cloned().fold(f64::MAX, f64::min);
        let dispersion = max - min;

        let inputs_present = [
            bundle.fundamentals.is_some(),
            bundle.analyst.is_some(),
            bundle.benchmark_closes.is_some(),
            bundle.market_cap.is_some(),
            bundle.sector_sentiment.is_some(),
        ];
        let completeness =
            inputs_present.iter().filter(|&&p| p).count() as f64 / inputs_present.len() as f64;

        let agreement = (100.0 - dispersion) * 0.6;
        let conviction = (composite - 50.0).abs() * 2.0 * 0.2;
        let coverage = completeness * 100.0 * 0.2;
        (agreement + conviction + coverage).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use quant_core::{AnalystConsensus, AnalystRating, Bar, Fundamentals};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                date: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + chrono::Days::new(i as u64),
                open: close * 0.999,
                high: close * 1.008,
                low: close * 0.992,
                close,
                volume: 3_000_000.0,
            })
            .collect()
    }

    fn strong_bundle() -> AnalysisBundle {
        let closes: Vec<f64> = (0..260).map(|i| 80.0 * 1.004f64.powi(i)).collect();
        AnalysisBundle {
            symbol: "WINN".into(),
            bars: bars_from_closes(&closes),
            fundamentals: Some(Fundamentals {
                symbol: "WINN".into(),
                pe_ratio: Some(11.0),
                pb_ratio: Some(1.2),
                roe: Some(24.0),
                roa: Some(12.0),
                gross_margin: Some(62.0),
                operating_margin: Some(28.0),
                net_margin: Some(22.0),
                debt_to_equity: Some(0.3),
                current_ratio: Some(2.4),
                quick_ratio: Some(1.6),
                revenue_growth: Some(19.0),
                earnings_growth: Some(22.0),
                free_cash_flow: Some(4.0e9),
                interest_coverage: Some(30.0),
                ..Fundamentals::default()
            }),
            analyst: Some(AnalystConsensus {
                rating: Some(AnalystRating::StrongBuy),
                price_target: Some(400.0),
                contributors: Some(18),
            }),
            industry_pe: Some(22.0),
            market_cap: Some(300e9),
            sector_sentiment: Some(75.0),
            ..AnalysisBundle::default()
        }
    }

    fn weak_bundle() -> AnalysisBundle {
        let closes: Vec<f64> = (0..260).map(|i| 150.0 * 0.995f64.powi(i)).collect();
        AnalysisBundle {
            symbol: "LOSS".into(),
            bars: bars_from_closes(&closes),
            fundamentals: Some(Fundamentals {
                symbol: "LOSS".into(),
                pe_ratio: Some(55.0),
                roe: Some(1.0),
                net_margin: Some(1.5),
                debt_to_equity: Some(3.2),
                current_ratio: Some(0.6),
                revenue_growth: Some(-12.0),
                earnings_growth: Some(-30.0),
                free_cash_flow: Some(-2.0e8),
                interest_coverage: Some(1.1),
                ..Fundamentals::default()
            }),
            analyst: Some(AnalystConsensus {
                rating: Some(AnalystRating::Sell),
                price_target: Some(20.0),
                contributors: Some(6),
            }),
            industry_pe: Some(20.0),
            market_cap: Some(800e6),
            sector_sentiment: Some(30.0),
            ..AnalysisBundle::default()
        }
    }

    #[test]
    fn insufficient_history_is_rejected() {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let bundle = AnalysisBundle {
            symbol: "NEW".into(),
            bars: bars_from_closes(&vec![100.0; 59]),
            ..AnalysisBundle::default()
        };
        let err = engine.analyze(&bundle).unwrap_err();
        assert_eq!(err.code(), "insufficient_data");
    }

    #[test]
    fn missing_fundamentals_never_error() {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let bundle = AnalysisBundle {
            symbol: "BARE".into(),
            bars: bars_from_closes(&(0..120).map(|i| 100.0 + i as f64 * 0.1).collect::<Vec<_>>()),
            ..AnalysisBundle::default()
        };
        let recommendation = engine.analyze(&bundle).unwrap();
        assert!(recommendation.score >= 0.0 && recommendation.score <= 100.0);
    }

    #[test]
    fn strong_bundle_gets_a_buy() {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let recommendation = engine.analyze(&strong_bundle()).unwrap();
        assert_eq!(recommendation.action, RecommendationAction::Buy);
        assert!(recommendation.score >= 70.0, "score {}", recommendation.score);
        assert!(recommendation.expected_return_pct <= 100.0);
        assert!(!recommendation.reasoning.is_empty());
    }

    #[test]
    fn weak_bundle_gets_a_sell() {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let recommendation = engine.analyze(&weak_bundle()).unwrap();
        assert_eq!(recommendation.action, RecommendationAction::Sell);
        assert!(recommendation.score <= 40.0, "score {}", recommendation.score);
    }

    #[test]
    fn scoring_is_deterministic() {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let bundle = strong_bundle();
        let a = engine.analyze(&bundle).unwrap();
        let b = engine.analyze(&bundle).unwrap();
        assert_eq!(a.score.to_bits(), b.score.to_bits());
        assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
        assert_eq!(a.target_price.to_bits(), b.target_price.to_bits());
        assert_eq!(a.reasoning, b.reasoning);
    }

    #[test]
    fn expected_return_is_capped_at_plus_minus_100() {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let mut bundle = strong_bundle();
        // Absurd analyst target far beyond the cap
        bundle.analyst = Some(AnalystConsensus {
            rating: Some(AnalystRating::StrongBuy),
            price_target: Some(1.0e6),
            contributors: Some(2),
        });
        let recommendation = engine.analyze(&bundle).unwrap();
        assert!(recommendation.expected_return_pct <= 100.0);
        let price = bundle.bars.last().unwrap().close;
        assert!(recommendation.target_price <= price * 2.0 + 1e-9);
    }

    #[test]
    fn target_price_defaults_to_momentum_leg_without_analyst_or_pe() {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let closes: Vec<f64> = (0..120).map(|i| 100.0 * 1.002f64.powi(i)).collect();
        let bundle = AnalysisBundle {
            symbol: "MOMO".into(),
            bars: bars_from_closes(&closes),
            ..AnalysisBundle::default()
        };
        let recommendation = engine.analyze(&bundle).unwrap();
        let price = closes[closes.len() - 1];
        assert!(recommendation.target_price > price);
    }
}
