//! Run a momentum strategy over a synthetic price series and print the
//! resulting performance summary.
//!
//! ```sh
//! cargo run -p backtest-engine --example run_backtest
//! ```

use chrono::NaiveDate;

use backtest_engine::strategies::MomentumThresholdStrategy;
use backtest_engine::{BacktestConfig, PerformanceMetrics, SingleSymbolBacktester};
use quant_core::Bar;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,backtest_engine=debug".into()),
        )
        .init();

    // A drifting sine wave: enough texture for crossovers without real data
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let bars: Vec<Bar> = (0..504)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.11).sin() * 9.0 + i as f64 * 0.04;
            Bar {
                date: start + chrono::Days::new(i),
                open: close * 0.998,
                high: close * 1.006,
                low: close * 0.994,
                close,
                volume: 1_500_000.0,
            }
        })
        .collect();

    let strategy = MomentumThresholdStrategy::new(10, 0.02);
    let backtester = SingleSymbolBacktester::new(BacktestConfig::default());
    let result = backtester
        .run(&strategy, "DEMO", &bars, None)
        .expect("backtest should run");

    let days = (bars[bars.len() - 1].date - bars[0].date).num_days() as u32 + 1;
    let metrics = PerformanceMetrics::compute(&result.trade_pnls, &result.equity_curve, days);

    println!("strategy:          {}", result.strategy_name);
    println!("trades:            {}", result.trades.len());
    println!("final value:       {:.2}", result.final_value);
    println!("total return:      {:.2}%", metrics.total_return_pct);
    println!("annualized:        {:.2}%", metrics.annualized_return_pct);
    println!("sharpe:            {:.2}", metrics.sharpe);
    println!("sortino:           {:.2}", metrics.sortino);
    println!("max drawdown:      {:.2}%", metrics.max_drawdown_pct);
    println!("win rate:          {:.1}%", metrics.win_rate_pct);
    println!("profit factor:     {:.2}", metrics.profit_factor);
    println!("commission paid:   {:.2}", result.total_commission);
    println!(
        "signals:           {} generated / {} executed / {} rejected",
        result.signals.generated, result.signals.executed, result.signals.rejected
    );
}
