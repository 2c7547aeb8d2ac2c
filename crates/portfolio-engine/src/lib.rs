pub mod correlation;
pub mod portfolio;
pub mod risk;
pub mod trades;

pub use correlation::CorrelationMatrix;
pub use portfolio::{Portfolio, PortfolioHandle, PortfolioSummary};
pub use risk::{ProposedTrade, RiskValidator, TradeSide};
pub use trades::{export_trades_csv, write_trades_csv};
