use std::collections::BTreeMap;

use quant_core::{EngineError, PortfolioConfig, SectorMap, ShortConfig, TradingConfig};

use crate::correlation::CorrelationMatrix;
use crate::portfolio::Portfolio;

/// Direction of a candidate trade under validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Long,
    Short,
}

/// A candidate trade presented to the validator before commit.
#[derive(Debug, Clone)]
pub struct ProposedTrade {
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    pub side: TradeSide,
}

impl ProposedTrade {
    pub fn value(&self) -> f64 {
        self.shares * self.price
    }
}

/// Pre-trade checks over a portfolio snapshot.
///
/// The validator never mutates the portfolio: callers pass a snapshot by
/// reference and the sector map / correlation matrix they have on hand.
/// Checks that lack their required inputs pass vacuously.
pub struct RiskValidator {
    portfolio: PortfolioConfig,
    trading: TradingConfig,
    short: ShortConfig,
}

impl RiskValidator {
    pub fn new(portfolio: PortfolioConfig, trading: TradingConfig, short: ShortConfig) -> Self {
        Self {
            portfolio,
            trading,
            short,
        }
    }

    /// Validate an entry (or add-on). Returns `Ok(())` or the first failing
    /// check as a rejection-kind error whose reason feeds
    /// `signals_stats.rejection_reasons`.
    pub fn validate(
        &self,
        snapshot: &Portfolio,
        prices: &BTreeMap<String, f64>,
        trade: &ProposedTrade,
        sectors: Option<&SectorMap>,
        correlations: Option<&CorrelationMatrix>,
    ) -> Result<(), EngineError> {
        self.check_funding(snapshot, trade)?;

        let net_worth = snapshot.net_worth(prices);
        if net_worth <= 0.0 {
            return Err(EngineError::RiskRejected {
                reason: "max_leverage".to_string(),
                message: "portfolio net worth is not positive".to_string(),
            });
        }

        self.check_position_size(snapshot, prices, trade, net_worth)?;
        self.check_sector(snapshot, prices, trade, net_worth, sectors)?;
        self.check_correlation(snapshot, trade, correlations)?;
        self.check_leverage(snapshot, prices, trade, net_worth)?;
        self.check_max_positions(snapshot, trade)?;
        Ok(())
    }

    /// Mandatory cash / margin sufficiency.
    fn check_funding(&self, snapshot: &Portfolio, trade: &ProposedTrade) -> Result<(), EngineError> {
        match trade.side {
            TradeSide::Long => {
                let fill = trade.price * (1.0 + self.trading.slippage_rate);
                let cost = fill * trade.shares * (1.0 + self.trading.commission_rate);
                if cost > snapshot.cash {
                    return Err(EngineError::InsufficientFunds(format!(
                        "{}: need {cost:.2}, have {:.2}",
                        trade.symbol, snapshot.cash
                    )));
                }
            }
            TradeSide::Short => {
                let margin = trade.value() * self.short.margin_requirement;
                if margin > snapshot.cash {
                    return Err(EngineError::InsufficientMargin(format!(
                        "{}: need {margin:.2} margin, have {:.2}",
                        trade.symbol, snapshot.cash
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_position_size(
        &self,
        snapshot: &Portfolio,
        prices: &BTreeMap<String, f64>,
        trade: &ProposedTrade,
        net_worth: f64,
    ) -> Result<(), EngineError> {
        let existing = match trade.side {
            TradeSide::Long => snapshot
                .longs
                .get(&trade.symbol)
                .map(|p| p.shares * prices.get(&trade.symbol).copied().unwrap_or(p.avg_cost))
                .unwrap_or(0.0),
            TradeSide::Short => snapshot
                .shorts
                .get(&trade.symbol)
                .map(|p| {
                    p.shares * prices.get(&trade.symbol).copied().unwrap_or(p.avg_short_price)
                })
                .unwrap_or(0.0),
        };
        let fraction = (existing + trade.value()) / net_worth;
        if fraction > self.portfolio.max_position_size {
            return Err(EngineError::RiskRejected {
                reason: "max_position_size".to_string(),
                message: format!(
                    "{}: position would be {:.1}% of net worth (limit {:.1}%)",
                    trade.symbol,
                    fraction * 100.0,
                    self.portfolio.max_position_size * 100.0
                ),
            });
        }
        Ok(())
    }

    fn check_sector(
        &self,
        snapshot: &Portfolio,
        prices: &BTreeMap<String, f64>,
        trade: &ProposedTrade,
        net_worth: f64,
        sectors: Option<&SectorMap>,
    ) -> Result<(), EngineError> {
        let Some(sectors) = sectors else {
            return Ok(());
        };
        let Some(trade_sector) = sectors.get(&trade.symbol) else {
            return Ok(());
        };

        let sector_value: f64 = snapshot
            .longs
            .values()
            .filter(|p| sectors.get(&p.symbol) == Some(trade_sector))
            .map(|p| p.shares * prices.get(&p.symbol).copied().unwrap_or(p.avg_cost))
            .sum();
        let fraction = (sector_value + trade.value()) / net_worth;
        if fraction > self.portfolio.max_sector_allocation {
            return Err(EngineError::RiskRejected {
                reason: "sector_concentration".to_string(),
                message: format!(
                    "{}: {trade_sector} would be {:.1}% of net worth (limit {:.1}%)",
                    trade.symbol,
                    fraction * 100.0,
                    self.portfolio.max_sector_allocation * 100.0
                ),
            });
        }
        Ok(())
    }

    /// Pairwise correlation cap, applied to new entries only.
    fn check_correlation(
        &self,
        snapshot: &Portfolio,
        trade: &ProposedTrade,
        correlations: Option<&CorrelationMatrix>,
    ) -> Result<(), EngineError> {
        let Some(matrix) = correlations else {
            return Ok(());
        };
        if snapshot.longs.contains_key(&trade.symbol) {
            // Adding to an existing holding is grandfathered
            return Ok(());
        }

        for held in snapshot.longs.keys() {
            if let Some(rho) = matrix.get(&trade.symbol, held) {
                if rho.abs() > self.portfolio.correlation_threshold {
                    return Err(EngineError::RiskRejected {
                        reason: "correlation".to_string(),
                        message: format!(
                            "{}: correlation {rho:.2} with {held} exceeds {:.2}",
                            trade.symbol, self.portfolio.correlation_threshold
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Gross exposure cap: (Σ|long| + Σ|short|) / net worth.
    fn check_leverage(
        &self,
        snapshot: &Portfolio,
        prices: &BTreeMap<String, f64>,
        trade: &ProposedTrade,
        net_worth: f64,
    ) -> Result<(), EngineError> {
        let gross =
            snapshot.long_value(prices) + snapshot.short_value(prices) + trade.value();
        let leverage = gross / net_worth;
        if leverage > self.portfolio.max_leverage {
            return Err(EngineError::RiskRejected {
                reason: "max_leverage".to_string(),
                message: format!(
                    "{}: gross leverage would be {leverage:.2}x (limit {:.2}x)",
                    trade.symbol, self.portfolio.max_leverage
                ),
            });
        }
        Ok(())
    }

    fn check_max_positions(
        &self,
        snapshot: &Portfolio,
        trade: &ProposedTrade,
    ) -> Result<(), EngineError> {
        let Some(limit) = self.portfolio.max_positions else {
            return Ok(());
        };
        let already_held = match trade.side {
            TradeSide::Long => snapshot.longs.contains_key(&trade.symbol),
            TradeSide::Short => snapshot.shorts.contains_key(&trade.symbol),
        };
        if already_held {
            return Ok(());
        }
        let open = snapshot.longs.len() + snapshot.shorts.len();
        if open >= limit {
            return Err(EngineError::RiskRejected {
                reason: "max_positions".to_string(),
                message: format!(
                    "{}: {open} positions open (limit {limit})",
                    trade.symbol
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, d).unwrap()
    }

    fn no_cost_trading() -> TradingConfig {
        TradingConfig {
            commission_rate: 0.0,
            slippage_rate: 0.0,
        }
    }

    fn validator(config: PortfolioConfig) -> RiskValidator {
        RiskValidator::new(config, no_cost_trading(), ShortConfig::default())
    }

    fn long(symbol: &str, shares: f64, price: f64) -> ProposedTrade {
        ProposedTrade {
            symbol: symbol.to_string(),
            shares,
            price,
            side: TradeSide::Long,
        }
    }

    fn prices(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(s, p)| (s.to_string(), *p)).collect()
    }

    fn portfolio_with(cash: f64, holdings: &[(&str, f64, f64)]) -> Portfolio {
        let mut portfolio = Portfolio::new("p1", "u1", cash, day(1)).unwrap();
        let trading = no_cost_trading();
        for (symbol, shares, price) in holdings {
            portfolio
                .buy(symbol, *shares, *price, day(2), &trading, None, None)
                .unwrap();
        }
        portfolio
    }

    #[test]
    fn approves_a_modest_entry() {
        let portfolio = portfolio_with(100_000.0, &[]);
        let result = validator(PortfolioConfig::default()).validate(
            &portfolio,
            &prices(&[]),
            &long("AAPL", 50.0, 150.0),
            None,
            None,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_on_cash() {
        let portfolio = portfolio_with(1_000.0, &[]);
        let err = validator(PortfolioConfig::default())
            .validate(&portfolio, &prices(&[]), &long("AAPL", 100.0, 150.0), None, None)
            .unwrap_err();
        assert_eq!(err.rejection_reason().as_deref(), Some("insufficient_funds"));
    }

    #[test]
    fn rejects_on_position_size() {
        let portfolio = portfolio_with(100_000.0, &[]);
        // 20k position on 100k net worth breaches the 15% default
        let err = validator(PortfolioConfig::default())
            .validate(&portfolio, &prices(&[]), &long("AAPL", 200.0, 100.0), None, None)
            .unwrap_err();
        assert_eq!(err.rejection_reason().as_deref(), Some("max_position_size"));
    }

    #[test]
    fn rejects_on_sector_concentration() {
        let portfolio = portfolio_with(
            100_000.0,
            &[("AAPL", 100.0, 140.0), ("MSFT", 40.0, 300.0)],
        );
        let mut sectors = SectorMap::new();
        for symbol in ["AAPL", "MSFT", "NVDA"] {
            sectors.insert(symbol.to_string(), "Technology".to_string());
        }
        let marks = prices(&[("AAPL", 140.0), ("MSFT", 300.0), ("NVDA", 500.0)]);

        // Tech already at 26%; another 10k pushes past the 30% cap
        let err = validator(PortfolioConfig::default())
            .validate(&portfolio, &marks, &long("NVDA", 20.0, 500.0), Some(&sectors), None)
            .unwrap_err();
        assert_eq!(
            err.rejection_reason().as_deref(),
            Some("sector_concentration")
        );

        // Without a sector map the check passes vacuously (size check still binds)
        let result = validator(PortfolioConfig::default()).validate(
            &portfolio,
            &marks,
            &long("NVDA", 20.0, 500.0),
            None,
            None,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_on_correlation_for_new_entries_only() {
        let portfolio = portfolio_with(100_000.0, &[("AAPL", 50.0, 150.0)]);
        let series: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin() * 8.0).collect();
        let closes: BTreeMap<String, Vec<f64>> = [
            ("AAPL".to_string(), series.clone()),
            ("MSFT".to_string(), series),
        ]
        .into();
        let matrix = CorrelationMatrix::from_closes(&closes);
        let marks = prices(&[("AAPL", 150.0)]);

        let err = validator(PortfolioConfig::default())
            .validate(&portfolio, &marks, &long("MSFT", 10.0, 100.0), None, Some(&matrix))
            .unwrap_err();
        assert_eq!(err.rejection_reason().as_deref(), Some("correlation"));

        // Adding to the existing AAPL holding is grandfathered
        let result = validator(PortfolioConfig::default()).validate(
            &portfolio,
            &marks,
            &long("AAPL", 10.0, 150.0),
            None,
            Some(&matrix),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_on_max_positions() {
        let portfolio = portfolio_with(
            100_000.0,
            &[("AAPL", 50.0, 150.0), ("MSFT", 20.0, 300.0)],
        );
        let config = PortfolioConfig {
            max_positions: Some(2),
            ..PortfolioConfig::default()
        };
        let err = validator(config.clone())
            .validate(&portfolio, &prices(&[]), &long("NVDA", 5.0, 500.0), None, None)
            .unwrap_err();
        assert_eq!(err.rejection_reason().as_deref(), Some("max_positions"));

        // Adding to an already-open position does not count against the cap
        let result = validator(config).validate(
            &portfolio,
            &prices(&[]),
            &long("AAPL", 5.0, 150.0),
            None,
            None,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_on_leverage() {
        let portfolio = portfolio_with(100_000.0, &[("AAPL", 90.0, 150.0)]);
        let config = PortfolioConfig {
            max_position_size: 1.0,
            max_leverage: 0.20,
            ..PortfolioConfig::default()
        };
        let err = validator(config)
            .validate(&portfolio, &prices(&[("AAPL", 150.0)]), &long("MSFT", 40.0, 200.0), None, None)
            .unwrap_err();
        assert_eq!(err.rejection_reason().as_deref(), Some("max_leverage"));
    }
}
