use thiserror::Error;

/// Error taxonomy shared by every core component.
///
/// Each variant carries a human-readable message; `code()` returns the stable
/// machine-readable code surfaced to callers and logs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Insufficient shares: {0}")]
    InsufficientShares(String),

    #[error("Insufficient margin: {0}")]
    InsufficientMargin(String),

    #[error("Risk rejected ({reason}): {message}")]
    RiskRejected { reason: String, message: String },

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl EngineError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::InvalidParameter(_) => "invalid_parameter",
            EngineError::InsufficientData(_) => "insufficient_data",
            EngineError::InsufficientFunds(_) => "insufficient_funds",
            EngineError::InsufficientShares(_) => "insufficient_shares",
            EngineError::InsufficientMargin(_) => "insufficient_margin",
            EngineError::RiskRejected { .. } => "risk_rejected",
            EngineError::DataUnavailable(_) => "data_unavailable",
            EngineError::RateLimited(_) => "rate_limited",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::InvariantViolation(_) => "invariant_violation",
        }
    }

    /// Rejection-kind errors are captured as data in backtest outputs and
    /// never thrown out of a running backtest.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientFunds(_)
                | EngineError::InsufficientShares(_)
                | EngineError::InsufficientMargin(_)
                | EngineError::RiskRejected { .. }
        )
    }

    /// The reason key counted under `signals_stats.rejection_reasons`.
    pub fn rejection_reason(&self) -> Option<String> {
        match self {
            EngineError::InsufficientFunds(_) => Some("insufficient_funds".to_string()),
            EngineError::InsufficientShares(_) => Some("insufficient_shares".to_string()),
            EngineError::InsufficientMargin(_) => Some("insufficient_margin".to_string()),
            EngineError::RiskRejected { reason, .. } => Some(reason.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::InvalidInput("x".into()).code(), "invalid_input");
        assert_eq!(
            EngineError::RiskRejected {
                reason: "max_positions".into(),
                message: "too many".into()
            }
            .code(),
            "risk_rejected"
        );
        assert_eq!(EngineError::Cancelled("user".into()).code(), "cancelled");
    }

    #[test]
    fn rejections_carry_reason_keys() {
        let err = EngineError::RiskRejected {
            reason: "sector_concentration".into(),
            message: "tech over 30%".into(),
        };
        assert!(err.is_rejection());
        assert_eq!(err.rejection_reason().as_deref(), Some("sector_concentration"));

        let err = EngineError::InsufficientFunds("need 100".into());
        assert_eq!(err.rejection_reason().as_deref(), Some("insufficient_funds"));

        assert!(!EngineError::DataUnavailable("all failed".into()).is_rejection());
    }
}
