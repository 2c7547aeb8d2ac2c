use std::collections::HashMap;

use quant_core::{Bar, SignalAction, Strategy, StrategySignal};
use technical_indicators::{bollinger_bands, rsi, sma};

/// Classic SMA crossover: buy when the fast average crosses above the slow
/// one, sell on the opposite cross.
pub struct SmaCrossStrategy {
    fast: usize,
    slow: usize,
}

impl SmaCrossStrategy {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }
}

impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn describe(&self) -> String {
        format!("SMA crossover ({}/{})", self.fast, self.slow)
    }

    fn analyze(&self, _symbol: &str, window: &[Bar], _current_price: f64) -> StrategySignal {
        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
        let fast = sma(&closes, self.fast);
        let slow = sma(&closes, self.slow);

        let (Some(f), Some(s), Some(pf), Some(ps)) = (fast.last(), slow.last(), fast.prev(), slow.prev())
        else {
            return StrategySignal::hold("warming up");
        };

        if f > s && pf <= ps {
            StrategySignal::new(
                SignalAction::Buy,
                0.7,
                format!("{}-day SMA crossed above {}-day", self.fast, self.slow),
            )
        } else if f < s && pf >= ps {
            StrategySignal::new(
                SignalAction::Sell,
                0.7,
                format!("{}-day SMA crossed below {}-day", self.fast, self.slow),
            )
        } else {
            StrategySignal::hold("no cross")
        }
    }

    fn set_params(&mut self, params: &HashMap<String, f64>) {
        if let Some(&fast) = params.get("fast_period") {
            if fast >= 1.0 {
                self.fast = fast as usize;
            }
        }
        if let Some(&slow) = params.get("slow_period") {
            if slow >= 2.0 {
                self.slow = slow as usize;
            }
        }
    }

    fn get_params(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("fast_period".to_string(), self.fast as f64),
            ("slow_period".to_string(), self.slow as f64),
        ])
    }
}

/// Momentum threshold: buy when the trailing return beats the threshold,
/// sell when it drops below the negative threshold.
pub struct MomentumThresholdStrategy {
    period: usize,
    threshold: f64,
}

impl MomentumThresholdStrategy {
    pub fn new(period: usize, threshold: f64) -> Self {
        Self { period, threshold }
    }
}

impl Strategy for MomentumThresholdStrategy {
    fn name(&self) -> &str {
        "momentum_threshold"
    }

    fn describe(&self) -> String {
        format!(
            "Momentum over {} bars, threshold {:.1}%",
            self.period,
            self.threshold * 100.0
        )
    }

    fn analyze(&self, _symbol: &str, window: &[Bar], _current_price: f64) -> StrategySignal {
        if window.len() <= self.period {
            return StrategySignal::hold("warming up");
        }
        let n = window.len();
        let reference = window[n - 1 - self.period].close;
        if reference <= 0.0 {
            return StrategySignal::hold("bad reference price");
        }
        let trailing = window[n - 1].close / reference - 1.0;

        if trailing > self.threshold {
            let confidence = (0.5 + trailing.abs() * 2.0).min(0.95);
            StrategySignal::new(
                SignalAction::Buy,
                confidence,
                format!("{:.1}% over {} bars", trailing * 100.0, self.period),
            )
        } else if trailing < -self.threshold {
            let confidence = (0.5 + trailing.abs() * 2.0).min(0.95);
            StrategySignal::new(
                SignalAction::Sell,
                confidence,
                format!("{:.1}% over {} bars", trailing * 100.0, self.period),
            )
        } else {
            StrategySignal::hold("inside threshold band")
        }
    }

    fn set_params(&mut self, params: &HashMap<String, f64>) {
        if let Some(&period) = params.get("period") {
            if period >= 1.0 {
                self.period = period as usize;
            }
        }
        if let Some(&threshold) = params.get("threshold") {
            if threshold > 0.0 {
                self.threshold = threshold;
            }
        }
    }

    fn get_params(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("period".to_string(), self.period as f64),
            ("threshold".to_string(), self.threshold),
        ])
    }
}

/// RSI mean reversion: buy oversold, sell overbought.
pub struct RsiReversionStrategy {
    period: usize,
    oversold: f64,
    overbought: f64,
}

impl RsiReversionStrategy {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Self {
        Self {
            period,
            oversold,
            overbought,
        }
    }
}

impl Strategy for RsiReversionStrategy {
    fn name(&self) -> &str {
        "rsi_reversion"
    }

    fn describe(&self) -> String {
        format!(
            "RSI({}) reversion, buy under {:.0}, sell over {:.0}",
            self.period, self.oversold, self.overbought
        )
    }

    fn analyze(&self, _symbol: &str, window: &[Bar], _current_price: f64) -> StrategySignal {
        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
        let Some(value) = rsi(&closes, self.period).last() else {
            return StrategySignal::hold("warming up");
        };

        if value < self.oversold {
            // Deeper oversold reads as higher conviction
            let confidence = (0.5 + (self.oversold - value) / 100.0).min(0.9);
            StrategySignal::new(SignalAction::Buy, confidence, format!("RSI {value:.0} oversold"))
        } else if value > self.overbought {
            let confidence = (0.5 + (value - self.overbought) / 100.0).min(0.9);
            StrategySignal::new(
                SignalAction::Sell,
                confidence,
                format!("RSI {value:.0} overbought"),
            )
        } else {
            StrategySignal::hold("RSI in neutral zone")
        }
    }

    fn set_params(&mut self, params: &HashMap<String, f64>) {
        if let Some(&period) = params.get("period") {
            if period >= 2.0 {
                self.period = period as usize;
            }
        }
        if let Some(&oversold) = params.get("oversold") {
            if (0.0..50.0).contains(&oversold) {
                self.oversold = oversold;
            }
        }
        if let Some(&overbought) = params.get("overbought") {
            if (50.0..100.0).contains(&overbought) {
                self.overbought = overbought;
            }
        }
    }

    fn get_params(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("period".to_string(), self.period as f64),
            ("oversold".to_string(), self.oversold),
            ("overbought".to_string(), self.overbought),
        ])
    }
}

/// Bollinger band reversion: buy a close below the lower band, sell a close
/// above the upper band.
pub struct BollingerReversionStrategy {
    period: usize,
    width: f64,
}

impl BollingerReversionStrategy {
    pub fn new(period: usize, width: f64) -> Self {
        Self { period, width }
    }
}

impl Strategy for BollingerReversionStrategy {
    fn name(&self) -> &str {
        "bollinger_reversion"
    }

    fn describe(&self) -> String {
        format!("Bollinger({}, {:.1}σ) reversion", self.period, self.width)
    }

    fn analyze(&self, _symbol: &str, window: &[Bar], current_price: f64) -> StrategySignal {
        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
        let bands = bollinger_bands(&closes, self.period, self.width);
        let (Some(upper), Some(lower)) = (bands.upper.last(), bands.lower.last()) else {
            return StrategySignal::hold("warming up");
        };

        if current_price < lower {
            StrategySignal::new(
                SignalAction::Buy,
                0.6,
                format!("close {current_price:.2} below lower band {lower:.2}"),
            )
        } else if current_price > upper {
            StrategySignal::new(
                SignalAction::Sell,
                0.6,
                format!("close {current_price:.2} above upper band {upper:.2}"),
            )
        } else {
            StrategySignal::hold("inside bands")
        }
    }

    fn set_params(&mut self, params: &HashMap<String, f64>) {
        if let Some(&period) = params.get("period") {
            if period >= 2.0 {
                self.period = period as usize;
            }
        }
        if let Some(&width) = params.get("width") {
            if width > 0.0 {
                self.width = width;
            }
        }
    }

    fn get_params(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("period".to_string(), self.period as f64),
            ("width".to_string(), self.width),
        ])
    }
}
