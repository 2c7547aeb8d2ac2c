use quant_core::EngineError;
use serde::{Deserialize, Serialize};

/// No single position may exceed this fraction of portfolio value, whatever
/// the policy's own math says.
pub const MAX_POSITION_FRACTION: f64 = 0.25;

/// Result of a sizing decision. Shares are always whole (floored).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSize {
    pub shares: i64,
    /// Dollar value of the sized position
    pub value: f64,
    /// Fraction of portfolio value
    pub percent: f64,
    pub method: String,
    /// Method-specific intermediate values for inspection
    pub diagnostics: serde_json::Value,
}

impl PositionSize {
    fn from_shares(shares: i64, price: f64, portfolio_value: f64, method: &'static str) -> Self {
        let shares = shares.max(0);
        let value = shares as f64 * price;
        Self {
            shares,
            value,
            percent: if portfolio_value > 0.0 {
                value / portfolio_value
            } else {
                0.0
            },
            method: method.to_string(),
            diagnostics: serde_json::Value::Null,
        }
    }

    fn with_diagnostics(mut self, diagnostics: serde_json::Value) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// ATR-based sizing carries the stop level its math implies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilitySize {
    #[serde(flatten)]
    pub size: PositionSize,
    pub stop_loss_price: f64,
}

/// Risk-parity output: one sized leg per asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParityLeg {
    pub symbol: String,
    pub weight: f64,
    pub size: PositionSize,
}

fn check_positive(name: &str, value: f64) -> Result<(), EngineError> {
    if !(value > 0.0) || !value.is_finite() {
        return Err(EngineError::InvalidParameter(format!(
            "{name} must be positive and finite, got {value}"
        )));
    }
    Ok(())
}

/// Clamp a candidate share count so the position stays within the global cap.
fn apply_position_cap(shares: i64, price: f64, portfolio_value: f64) -> i64 {
    let max_value = portfolio_value * MAX_POSITION_FRACTION;
    let cap = (max_value / price).floor() as i64;
    shares.min(cap).max(0)
}

/// Fixed dollar amount: `floor(amount / price)` shares, capped at portfolio
/// value.
pub fn fixed_dollar(
    amount: f64,
    price: f64,
    portfolio_value: f64,
) -> Result<PositionSize, EngineError> {
    check_positive("amount", amount)?;
    check_positive("price", price)?;
    check_positive("portfolio_value", portfolio_value)?;

    let budget = amount.min(portfolio_value);
    let shares = apply_position_cap((budget / price).floor() as i64, price, portfolio_value);
    Ok(
        PositionSize::from_shares(shares, price, portfolio_value, "fixed_dollar")
            .with_diagnostics(serde_json::json!({ "requested_amount": amount, "budget": budget })),
    )
}

/// Fixed fraction of portfolio value; `percent` must be in (0, 1].
pub fn fixed_percent(
    percent: f64,
    price: f64,
    portfolio_value: f64,
) -> Result<PositionSize, EngineError> {
    check_positive("price", price)?;
    check_positive("portfolio_value", portfolio_value)?;
    if !(percent > 0.0 && percent <= 1.0) {
        return Err(EngineError::InvalidParameter(format!(
            "percent must be in (0, 1], got {percent}"
        )));
    }

    let shares = apply_position_cap(
        (portfolio_value * percent / price).floor() as i64,
        price,
        portfolio_value,
    );
    Ok(
        PositionSize::from_shares(shares, price, portfolio_value, "fixed_percent")
            .with_diagnostics(serde_json::json!({ "requested_percent": percent })),
    )
}

/// Kelly criterion: `f* = (p·b − q) / b` with `b = avg_win / avg_loss`,
/// scaled by `kelly_fraction` and clipped to [0, 0.25]. A non-positive edge
/// sizes to zero shares.
pub fn kelly(
    win_probability: f64,
    avg_win: f64,
    avg_loss: f64,
    kelly_fraction: f64,
    price: f64,
    portfolio_value: f64,
) -> Result<PositionSize, EngineError> {
    check_positive("price", price)?;
    check_positive("portfolio_value", portfolio_value)?;
    check_positive("avg_win", avg_win)?;
    check_positive("avg_loss", avg_loss)?;
    if !(win_probability > 0.0 && win_probability < 1.0) {
        return Err(EngineError::InvalidParameter(format!(
            "win_probability must be in (0, 1), got {win_probability}"
        )));
    }
    if !(kelly_fraction > 0.0 && kelly_fraction <= 1.0) {
        return Err(EngineError::InvalidParameter(format!(
            "kelly_fraction must be in (0, 1], got {kelly_fraction}"
        )));
    }

    let b = avg_win / avg_loss;
    let q = 1.0 - win_probability;
    let raw_kelly = (win_probability * b - q) / b;
    let fraction = (raw_kelly * kelly_fraction).clamp(0.0, MAX_POSITION_FRACTION);

    let shares = if raw_kelly <= 0.0 {
        0
    } else {
        apply_position_cap(
            (portfolio_value * fraction / price).floor() as i64,
            price,
            portfolio_value,
        )
    };
    Ok(PositionSize::from_shares(shares, price, portfolio_value, "kelly")
        .with_diagnostics(serde_json::json!({
            "raw_kelly": raw_kelly,
            "payoff_ratio": b,
            "applied_fraction": fraction,
        })))
}

/// Volatility-based sizing: risk a fixed slice of the portfolio against an
/// ATR-multiple stop. `risk_percent` must be in (0, 0.10].
pub fn volatility_based(
    atr: f64,
    atr_multiplier: f64,
    risk_percent: f64,
    price: f64,
    portfolio_value: f64,
) -> Result<VolatilitySize, EngineError> {
    check_positive("atr", atr)?;
    check_positive("atr_multiplier", atr_multiplier)?;
    check_positive("price", price)?;
    check_positive("portfolio_value", portfolio_value)?;
    if !(risk_percent > 0.0 && risk_percent <= 0.10) {
        return Err(EngineError::InvalidParameter(format!(
            "risk_percent must be in (0, 0.10], got {risk_percent}"
        )));
    }

    let stop_distance = atr * atr_multiplier;
    let risk_capital = portfolio_value * risk_percent;
    let shares = apply_position_cap(
        (risk_capital / stop_distance).floor() as i64,
        price,
        portfolio_value,
    );

    let size = PositionSize::from_shares(shares, price, portfolio_value, "volatility_atr")
        .with_diagnostics(serde_json::json!({
            "stop_distance": stop_distance,
            "risk_capital": risk_capital,
        }));
    Ok(VolatilitySize {
        size,
        stop_loss_price: price - stop_distance,
    })
}

/// Risk parity across assets: weight each leg by inverse volatility,
/// normalized to sum to 1, then floor each leg to whole shares.
///
/// `assets` entries are `(symbol, volatility, price)`.
pub fn risk_parity(
    assets: &[(String, f64, f64)],
    portfolio_value: f64,
) -> Result<Vec<RiskParityLeg>, EngineError> {
    check_positive("portfolio_value", portfolio_value)?;
    if assets.is_empty() {
        return Err(EngineError::InvalidParameter(
            "risk parity needs at least one asset".into(),
        ));
    }
    for (symbol, volatility, price) in assets {
        check_positive(&format!("{symbol} volatility"), *volatility)?;
        check_positive(&format!("{symbol} price"), *price)?;
    }

    let inverse_sum: f64 = assets.iter().map(|(_, vol, _)| 1.0 / vol).sum();
    Ok(assets
        .iter()
        .map(|(symbol, volatility, price)| {
            let weight = (1.0 / volatility) / inverse_sum;
            // The normalized weights ARE the allocation; the single-position
            // cap does not apply to a whole-portfolio policy.
            let shares = (portfolio_value * weight / price).floor() as i64;
            RiskParityLeg {
                symbol: symbol.clone(),
                weight,
                size: PositionSize::from_shares(shares, *price, portfolio_value, "risk_parity")
                    .with_diagnostics(serde_json::json!({ "target_weight": weight })),
            }
        })
        .collect())
}

/// Margin-aware sizing: buying power is the lesser of cash scaled by the
/// margin requirement and the leverage-capped portfolio value.
pub fn margin_aware(
    available_cash: f64,
    margin_requirement: f64,
    max_leverage: f64,
    price: f64,
    portfolio_value: f64,
) -> Result<PositionSize, EngineError> {
    check_positive("available_cash", available_cash)?;
    check_positive("margin_requirement", margin_requirement)?;
    check_positive("max_leverage", max_leverage)?;
    check_positive("price", price)?;
    check_positive("portfolio_value", portfolio_value)?;

    let max_value = (available_cash / margin_requirement).min(portfolio_value * max_leverage);
    let shares = apply_position_cap((max_value / price).floor() as i64, price, portfolio_value);
    Ok(
        PositionSize::from_shares(shares, price, portfolio_value, "margin_aware")
            .with_diagnostics(serde_json::json!({ "buying_power": max_value })),
    )
}
