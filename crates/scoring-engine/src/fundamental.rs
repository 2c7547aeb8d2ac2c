use quant_core::Fundamentals;

use crate::models::SubScore;

/// Fallback industry P/E when no industry average is supplied.
const DEFAULT_INDUSTRY_PE: f64 = 20.0;

/// Score valuation, profitability, balance-sheet strength, and growth.
///
/// Starts from the neutral midpoint of 50; every present metric adds a
/// bounded contribution. Absent metrics contribute nothing, so a symbol with
/// no fundamentals at all scores exactly neutral.
pub fn score_fundamentals(
    fundamentals: Option<&Fundamentals>,
    industry_pe: Option<f64>,
) -> SubScore {
    let Some(f) = fundamentals else {
        return SubScore::neutral();
    };

    let mut score = 50.0;
    let mut reasoning = Vec::new();
    let industry_pe = industry_pe.unwrap_or(DEFAULT_INDUSTRY_PE);

    if let Some(pe) = f.pe_ratio {
        if pe > 0.0 && pe < industry_pe * 0.7 {
            score += 8.0;
            reasoning.push(format!("+ P/E {pe:.1} well below industry average {industry_pe:.1}"));
        } else if pe > industry_pe * 1.5 {
            score -= 8.0;
            reasoning.push(format!("- P/E {pe:.1} well above industry average {industry_pe:.1}"));
        } else if pe <= 0.0 {
            score -= 6.0;
            reasoning.push("- Negative earnings (P/E not meaningful)".to_string());
        }
    }

    if let Some(pb) = f.pb_ratio {
        if pb > 0.0 && pb < 1.5 {
            score += 4.0;
            reasoning.push(format!("+ P/B {pb:.2} suggests undervaluation"));
        } else if pb > 5.0 {
            score -= 4.0;
            reasoning.push(format!("- P/B {pb:.2} is rich"));
        }
    }

    if let Some(roe) = f.roe {
        if roe > 15.0 {
            score += 6.0;
            reasoning.push(format!("+ Strong ROE {roe:.1}%"));
        } else if roe < 5.0 {
            score -= 4.0;
            reasoning.push(format!("- Weak ROE {roe:.1}%"));
        }
    }

    if let Some(roa) = f.roa {
        if roa > 8.0 {
            score += 4.0;
            reasoning.push(format!("+ Strong ROA {roa:.1}%"));
        } else if roa < 2.0 {
            score -= 2.0;
            reasoning.push(format!("- Weak ROA {roa:.1}%"));
        }
    }

    if let Some(gm) = f.gross_margin {
        if gm > 50.0 {
            score += 3.0;
            reasoning.push(format!("+ High gross margin {gm:.1}%"));
        } else if gm < 20.0 {
            score -= 3.0;
            reasoning.push(format!("- Thin gross margin {gm:.1}%"));
        }
    }

    if let Some(om) = f.operating_margin {
        if om > 20.0 {
            score += 3.0;
            reasoning.push(format!("+ High operating margin {om:.1}%"));
        } else if om < 5.0 {
            score -= 3.0;
            reasoning.push(format!("- Thin operating margin {om:.1}%"));
        }
    }

    if let Some(nm) = f.net_margin {
        if nm > 20.0 {
            score += 5.0;
            reasoning.push(format!("+ High net margin {nm:.1}%"));
        } else if nm < 5.0 {
            score -= 4.0;
            reasoning.push(format!("- Thin net margin {nm:.1}%"));
        }
    }

    if let Some(de) = f.debt_to_equity {
        if de > 2.0 {
            score -= 10.0;
            reasoning.push(format!("- Heavy debt load (D/E {de:.2})"));
        } else if de > 1.0 {
            score -= 5.0;
            reasoning.push(format!("- Elevated debt (D/E {de:.2})"));
        } else if de < 0.5 {
            score += 5.0;
            reasoning.push(format!("+ Conservative balance sheet (D/E {de:.2})"));
        }
    }

    if let Some(cr) = f.current_ratio {
        if cr > 2.0 {
            score += 3.0;
            reasoning.push(format!("+ Strong current ratio {cr:.2}"));
        } else if cr < 1.0 {
            score -= 4.0;
            reasoning.push(format!("- Current ratio {cr:.2} below 1"));
        }
    }

    if let Some(qr) = f.quick_ratio {
        if qr > 1.0 {
            score += 2.0;
            reasoning.push(format!("+ Quick ratio {qr:.2} covers liabilities"));
        } else if qr < 0.5 {
            score -= 3.0;
            reasoning.push(format!("- Quick ratio {qr:.2} is stretched"));
        }
    }

    if let Some(growth) = f.revenue_growth {
        if growth > 15.0 {
            score += 6.0;
            reasoning.push(format!("+ Revenue growing {growth:.1}% YoY"));
        } else if growth < 0.0 {
            score -= 5.0;
            reasoning.push(format!("- Revenue shrinking {growth:.1}% YoY"));
        }
    }

    if let Some(growth) = f.earnings_growth {
        if growth > 15.0 {
            score += 6.0;
            reasoning.push(format!("+ Earnings growing {growth:.1}% YoY"));
        } else if growth < 0.0 {
            score -= 5.0;
            reasoning.push(format!("- Earnings shrinking {growth:.1}% YoY"));
        }
    }

    if let Some(fcf) = f.free_cash_flow {
        if fcf > 0.0 {
            score += 3.0;
            reasoning.push("+ Positive free cash flow".to_string());
        } else {
            score -= 3.0;
            reasoning.push("- Negative free cash flow".to_string());
        }
    }

    if let (Some(dy), Some(payout)) = (f.dividend_yield, f.payout_ratio) {
        if dy > 0.0 && payout < 0.8 {
            score += 2.0;
            reasoning.push(format!("+ Sustainable dividend ({:.1}% yield)", dy * 100.0));
        } else if payout > 1.0 {
            score -= 3.0;
            reasoning.push("- Payout ratio above 100%".to_string());
        }
    }

    if let Some(coverage) = f.interest_coverage {
        if coverage > 10.0 {
            score += 3.0;
            reasoning.push(format!("+ Interest coverage {coverage:.1}x"));
        } else if coverage < 2.0 {
            score -= 5.0;
            reasoning.push(format!("- Interest coverage only {coverage:.1}x"));
        }
    }

    SubScore::new(score, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fundamentals_score_neutral() {
        let result = score_fundamentals(None, None);
        assert_eq!(result.score, 50.0);
        assert!(result.reasoning.is_empty());
    }

    #[test]
    fn empty_snapshot_scores_neutral() {
        let f = Fundamentals {
            symbol: "AAPL".into(),
            ..Fundamentals::default()
        };
        let result = score_fundamentals(Some(&f), None);
        assert_eq!(result.score, 50.0);
    }

    #[test]
    fn quality_compounder_scores_high() {
        let f = Fundamentals {
            symbol: "MSFT".into(),
            pe_ratio: Some(12.0),
            pb_ratio: Some(1.2),
            roe: Some(22.0),
            roa: Some(11.0),
            gross_margin: Some(65.0),
            operating_margin: Some(30.0),
            net_margin: Some(25.0),
            debt_to_equity: Some(0.3),
            current_ratio: Some(2.5),
            quick_ratio: Some(1.8),
            revenue_growth: Some(18.0),
            earnings_growth: Some(20.0),
            free_cash_flow: Some(1.0e10),
            interest_coverage: Some(25.0),
            ..Fundamentals::default()
        };
        let result = score_fundamentals(Some(&f), Some(20.0));
        assert!(result.score > 80.0, "score was {}", result.score);
        assert!(result.reasoning.iter().all(|r| r.starts_with('+')));
    }

    #[test]
    fn leveraged_decliner_scores_low_with_debt_penalty() {
        let f = Fundamentals {
            symbol: "XYZ".into(),
            pe_ratio: Some(45.0),
            roe: Some(2.0),
            net_margin: Some(1.0),
            debt_to_equity: Some(3.5),
            current_ratio: Some(0.7),
            revenue_growth: Some(-8.0),
            earnings_growth: Some(-20.0),
            free_cash_flow: Some(-5.0e8),
            interest_coverage: Some(1.2),
            ..Fundamentals::default()
        };
        let result = score_fundamentals(Some(&f), Some(20.0));
        assert!(result.score < 25.0, "score was {}", result.score);
        assert!(result
            .reasoning
            .iter()
            .any(|r| r.contains("Heavy debt load")));
    }

    #[test]
    fn score_is_always_clipped() {
        let f = Fundamentals {
            symbol: "DEEP".into(),
            pe_ratio: Some(-5.0),
            debt_to_equity: Some(10.0),
            current_ratio: Some(0.2),
            quick_ratio: Some(0.1),
            revenue_growth: Some(-50.0),
            earnings_growth: Some(-80.0),
            free_cash_flow: Some(-1.0e9),
            net_margin: Some(-30.0),
            roe: Some(-40.0),
            roa: Some(-10.0),
            gross_margin: Some(5.0),
            operating_margin: Some(-10.0),
            interest_coverage: Some(0.5),
            payout_ratio: Some(1.5),
            dividend_yield: Some(0.02),
            ..Fundamentals::default()
        };
        let result = score_fundamentals(Some(&f), Some(20.0));
        assert!(result.score >= 0.0);
    }
}
