use std::io::Write;
use std::path::Path;

use quant_core::{EngineError, TradeRecord};

/// Write the trade journal as CSV: one row per trade with the standard
/// export column set.
pub fn export_trades_csv<W: Write>(trades: &[TradeRecord], writer: W) -> Result<(), EngineError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record([
            "date",
            "portfolio_id",
            "symbol",
            "action",
            "shares",
            "fill_price",
            "commission",
            "strategy_name",
            "reasoning",
        ])
        .map_err(|e| EngineError::InvalidInput(format!("csv write failed: {e}")))?;

    for trade in trades {
        csv_writer
            .write_record([
                trade.date.to_string(),
                trade.portfolio_id.clone(),
                trade.symbol.clone(),
                trade.action.as_str().to_string(),
                format!("{}", trade.shares),
                format!("{:.4}", trade.fill_price),
                format!("{:.4}", trade.commission),
                trade.strategy_name.clone().unwrap_or_default(),
                trade.reasoning.clone().unwrap_or_default(),
            ])
            .map_err(|e| EngineError::InvalidInput(format!("csv write failed: {e}")))?;
    }

    csv_writer
        .flush()
        .map_err(|e| EngineError::InvalidInput(format!("csv flush failed: {e}")))?;
    Ok(())
}

/// Convenience wrapper writing straight to a file path.
pub fn write_trades_csv(trades: &[TradeRecord], path: &Path) -> Result<(), EngineError> {
    let file = std::fs::File::create(path)
        .map_err(|e| EngineError::InvalidInput(format!("cannot create {}: {e}", path.display())))?;
    export_trades_csv(trades, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use quant_core::TradeAction;

    fn sample_trades() -> Vec<TradeRecord> {
        vec![
            TradeRecord {
                portfolio_id: "p1".into(),
                symbol: "AAPL".into(),
                action: TradeAction::Buy,
                shares: 100.0,
                fill_price: 150.075,
                commission: 15.0075,
                slippage_applied: 0.075,
                date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
                strategy_name: Some("sma_cross".into()),
                reasoning: Some("golden cross".into()),
            },
            TradeRecord {
                portfolio_id: "p1".into(),
                symbol: "AAPL".into(),
                action: TradeAction::Sell,
                shares: 100.0,
                fill_price: 159.92,
                commission: 15.992,
                slippage_applied: 0.08,
                date: NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
                strategy_name: Some("sma_cross".into()),
                reasoning: None,
            },
        ]
    }

    #[test]
    fn csv_round_trips_through_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");
        write_trades_csv(&sample_trades(), &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "date,portfolio_id,symbol,action,shares,fill_price,commission,strategy_name,reasoning"
        );
        let first = lines.next().unwrap();
        assert!(first.starts_with("2025-01-02,p1,AAPL,BUY,100,150.0750"));
        let second = lines.next().unwrap();
        assert!(second.contains("SELL"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn empty_journal_writes_header_only() {
        let mut buffer = Vec::new();
        export_trades_csv(&[], &mut buffer).unwrap();
        let contents = String::from_utf8(buffer).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
