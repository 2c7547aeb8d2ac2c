use quant_core::Bar;
use serde::{Deserialize, Serialize};

/// An indicator series parallel to its input bars.
///
/// `values.len()` always equals the input length. Entries before `valid_from`
/// belong to the period-dependent unstable prefix: they hold NaN and must be
/// skipped by consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorVector {
    pub values: Vec<f64>,
    pub valid_from: usize,
}

impl IndicatorVector {
    pub fn empty(len: usize) -> Self {
        Self {
            values: vec![f64::NAN; len],
            valid_from: len,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `i`, or None inside the unstable prefix.
    pub fn get(&self, i: usize) -> Option<f64> {
        if i >= self.valid_from && i < self.values.len() {
            Some(self.values[i])
        } else {
            None
        }
    }

    /// Latest valid value, if any bar has one.
    pub fn last(&self) -> Option<f64> {
        if self.values.len() > self.valid_from {
            self.values.last().copied()
        } else {
            None
        }
    }

    /// Valid value immediately before the last, if present.
    pub fn prev(&self) -> Option<f64> {
        let n = self.values.len();
        if n >= 2 && n - 2 >= self.valid_from {
            Some(self.values[n - 2])
        } else {
            None
        }
    }
}

/// Identifier of a cacheable indicator computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    MacdLine,
    MacdSignal,
    MacdHistogram,
    BollingerUpper,
    BollingerMiddle,
    BollingerLower,
    Atr,
    Obv,
    Adx,
}

impl IndicatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Sma => "sma",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::MacdLine => "macd_line",
            IndicatorKind::MacdSignal => "macd_signal",
            IndicatorKind::MacdHistogram => "macd_histogram",
            IndicatorKind::BollingerUpper => "bollinger_upper",
            IndicatorKind::BollingerMiddle => "bollinger_middle",
            IndicatorKind::BollingerLower => "bollinger_lower",
            IndicatorKind::Atr => "atr",
            IndicatorKind::Obv => "obv",
            IndicatorKind::Adx => "adx",
        }
    }
}

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> IndicatorVector {
    if period == 0 || data.len() < period {
        return IndicatorVector::empty(data.len());
    }

    let mut values = vec![f64::NAN; data.len()];
    let mut window_sum: f64 = data[..period].iter().sum();
    values[period - 1] = window_sum / period as f64;
    for i in period..data.len() {
        window_sum += data[i] - data[i - period];
        values[i] = window_sum / period as f64;
    }

    IndicatorVector {
        values,
        valid_from: period - 1,
    }
}

/// Exponential Moving Average, seeded with the SMA of the first `period`
/// elements.
pub fn ema(data: &[f64], period: usize) -> IndicatorVector {
    if period == 0 || data.len() < period {
        return IndicatorVector::empty(data.len());
    }

    let mut values = vec![f64::NAN; data.len()];
    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    values[period - 1] = seed;
    for i in period..data.len() {
        values[i] = (data[i] - values[i - 1]) * multiplier + values[i - 1];
    }

    IndicatorVector {
        values,
        valid_from: period - 1,
    }
}

/// Relative Strength Index (Wilder smoothing)
pub fn rsi(data: &[f64], period: usize) -> IndicatorVector {
    if period == 0 || data.len() < period + 1 {
        return IndicatorVector::empty(data.len());
    }

    let mut values = vec![f64::NAN; data.len()];
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += change.abs();
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    values[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in period + 1..data.len() {
        let change = data[i] - data[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, change.abs())
        };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        values[i] = rsi_from_averages(avg_gain, avg_loss);
    }

    IndicatorVector {
        values,
        valid_from: period,
    }
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// MACD line, signal line, and histogram, all parallel to the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacdSeries {
    pub macd_line: IndicatorVector,
    pub signal_line: IndicatorVector,
    pub histogram: IndicatorVector,
}

pub fn macd(data: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let n = data.len();
    if fast == 0 || slow == 0 || signal == 0 || slow <= fast || n < slow + signal {
        return MacdSeries {
            macd_line: IndicatorVector::empty(n),
            signal_line: IndicatorVector::empty(n),
            histogram: IndicatorVector::empty(n),
        };
    }

    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);

    let mut macd_values = vec![f64::NAN; n];
    for i in slow - 1..n {
        macd_values[i] = ema_fast.values[i] - ema_slow.values[i];
    }
    let macd_line = IndicatorVector {
        values: macd_values,
        valid_from: slow - 1,
    };

    // Signal line: EMA of the MACD line over its valid range
    let macd_valid: Vec<f64> = macd_line.values[slow - 1..].to_vec();
    let signal_partial = ema(&macd_valid, signal);

    let mut signal_values = vec![f64::NAN; n];
    let mut hist_values = vec![f64::NAN; n];
    let signal_start = slow - 1 + signal_partial.valid_from;
    for i in signal_partial.valid_from..macd_valid.len() {
        let idx = slow - 1 + i;
        signal_values[idx] = signal_partial.values[i];
        hist_values[idx] = macd_line.values[idx] - signal_partial.values[i];
    }

    MacdSeries {
        macd_line,
        signal_line: IndicatorVector {
            values: signal_values,
            valid_from: signal_start,
        },
        histogram: IndicatorVector {
            values: hist_values,
            valid_from: signal_start,
        },
    }
}

/// Bollinger Bands (SMA midline ± std-dev multiple)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BollingerSeries {
    pub upper: IndicatorVector,
    pub middle: IndicatorVector,
    pub lower: IndicatorVector,
}

pub fn bollinger_bands(data: &[f64], period: usize, width: f64) -> BollingerSeries {
    let n = data.len();
    if period == 0 || n < period {
        return BollingerSeries {
            upper: IndicatorVector::empty(n),
            middle: IndicatorVector::empty(n),
            lower: IndicatorVector::empty(n),
        };
    }

    let middle = sma(data, period);
    let mut upper = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];

    for i in period - 1..n {
        let slice = &data[i + 1 - period..=i];
        let mean = middle.values[i];
        let variance = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = variance.sqrt();
        upper[i] = mean + width * std;
        lower[i] = mean - width * std;
    }

    BollingerSeries {
        upper: IndicatorVector {
            values: upper,
            valid_from: period - 1,
        },
        middle,
        lower: IndicatorVector {
            values: lower,
            valid_from: period - 1,
        },
    }
}

/// Average True Range (Wilder smoothing)
pub fn atr(bars: &[Bar], period: usize) -> IndicatorVector {
    let n = bars.len();
    if period == 0 || n < period + 1 {
        return IndicatorVector::empty(n);
    }

    let mut true_ranges = Vec::with_capacity(n - 1);
    for i in 1..n {
        let high_low = bars[i].high - bars[i].low;
        let high_close = (bars[i].high - bars[i - 1].close).abs();
        let low_close = (bars[i].low - bars[i - 1].close).abs();
        true_ranges.push(high_low.max(high_close).max(low_close));
    }

    let mut values = vec![f64::NAN; n];
    let mut current = true_ranges[..period].iter().sum::<f64>() / period as f64;
    values[period] = current;
    for i in period + 1..n {
        current = (current * (period - 1) as f64 + true_ranges[i - 1]) / period as f64;
        values[i] = current;
    }

    IndicatorVector {
        values,
        valid_from: period,
    }
}

/// On-Balance Volume. Valid from the first bar.
pub fn obv(bars: &[Bar]) -> IndicatorVector {
    if bars.is_empty() {
        return IndicatorVector::empty(0);
    }

    let mut values = Vec::with_capacity(bars.len());
    values.push(bars[0].volume);
    for i in 1..bars.len() {
        let prev = values[i - 1];
        let next = if bars[i].close > bars[i - 1].close {
            prev + bars[i].volume
        } else if bars[i].close < bars[i - 1].close {
            prev - bars[i].volume
        } else {
            prev
        };
        values.push(next);
    }

    IndicatorVector {
        values,
        valid_from: 0,
    }
}

/// Average Directional Index plus the directional lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdxSeries {
    pub adx: IndicatorVector,
    pub plus_di: IndicatorVector,
    pub minus_di: IndicatorVector,
}

pub fn adx(bars: &[Bar], period: usize) -> AdxSeries {
    let n = bars.len();
    if period == 0 || n < period * 2 + 1 {
        return AdxSeries {
            adx: IndicatorVector::empty(n),
            plus_di: IndicatorVector::empty(n),
            minus_di: IndicatorVector::empty(n),
        };
    }

    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    let mut true_range = Vec::with_capacity(n - 1);
    for i in 1..n {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;
        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
        let hl = bars[i].high - bars[i].low;
        let hc = (bars[i].high - bars[i - 1].close).abs();
        let lc = (bars[i].low - bars[i - 1].close).abs();
        true_range.push(hl.max(hc).max(lc));
    }

    let mut smoothed_plus = plus_dm[..period].iter().sum::<f64>();
    let mut smoothed_minus = minus_dm[..period].iter().sum::<f64>();
    let mut smoothed_tr = true_range[..period].iter().sum::<f64>();

    let mut plus_di = vec![f64::NAN; n];
    let mut minus_di = vec![f64::NAN; n];
    let mut dx = Vec::new();

    for i in period..plus_dm.len() {
        smoothed_plus = smoothed_plus - smoothed_plus / period as f64 + plus_dm[i];
        smoothed_minus = smoothed_minus - smoothed_minus / period as f64 + minus_dm[i];
        smoothed_tr = smoothed_tr - smoothed_tr / period as f64 + true_range[i];

        let pdi = if smoothed_tr > 0.0 {
            100.0 * smoothed_plus / smoothed_tr
        } else {
            0.0
        };
        let mdi = if smoothed_tr > 0.0 {
            100.0 * smoothed_minus / smoothed_tr
        } else {
            0.0
        };
        plus_di[i + 1] = pdi;
        minus_di[i + 1] = mdi;

        let di_sum = pdi + mdi;
        dx.push(if di_sum > 0.0 {
            100.0 * (pdi - mdi).abs() / di_sum
        } else {
            0.0
        });
    }

    let mut adx_values = vec![f64::NAN; n];
    let adx_start = period * 2;
    if dx.len() >= period {
        let mut current = dx[..period].iter().sum::<f64>() / period as f64;
        adx_values[adx_start] = current;
        for (j, d) in dx[period..].iter().enumerate() {
            current = (current * (period - 1) as f64 + d) / period as f64;
            adx_values[adx_start + 1 + j] = current;
        }
    }

    AdxSeries {
        adx: IndicatorVector {
            values: adx_values,
            valid_from: adx_start,
        },
        plus_di: IndicatorVector {
            values: plus_di,
            valid_from: period + 1,
        },
        minus_di: IndicatorVector {
            values: minus_di,
            valid_from: period + 1,
        },
    }
}

/// Nearest support/resistance from swing points with 2-bar confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupportResistance {
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

pub fn support_resistance(bars: &[Bar], lookback: usize) -> SupportResistance {
    if bars.len() < lookback + 2 || lookback < 5 {
        return SupportResistance {
            support: None,
            resistance: None,
        };
    }

    let recent = &bars[bars.len() - lookback..];
    let mut swing_highs = Vec::new();
    let mut swing_lows = Vec::new();
    for i in 2..recent.len() - 2 {
        if recent[i].high > recent[i - 1].high
            && recent[i].high > recent[i - 2].high
            && recent[i].high > recent[i + 1].high
            && recent[i].high > recent[i + 2].high
        {
            swing_highs.push(recent[i].high);
        }
        if recent[i].low < recent[i - 1].low
            && recent[i].low < recent[i - 2].low
            && recent[i].low < recent[i + 1].low
            && recent[i].low < recent[i + 2].low
        {
            swing_lows.push(recent[i].low);
        }
    }

    let current = bars[bars.len() - 1].close;
    let resistance = swing_highs
        .iter()
        .filter(|&&h| h > current)
        .copied()
        .reduce(f64::min);
    let support = swing_lows
        .iter()
        .filter(|&&l| l < current)
        .copied()
        .reduce(f64::max);

    SupportResistance {
        support,
        resistance,
    }
}

/// Trend direction from regression of highs and lows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Uptrend,
    Downtrend,
    Sideways,
}

pub fn detect_trend(bars: &[Bar], lookback: usize) -> Trend {
    if bars.len() < lookback || lookback < 3 {
        return Trend::Sideways;
    }

    let recent = &bars[bars.len() - lookback..];
    let n = recent.len() as f64;
    let x_sum: f64 = (0..recent.len()).map(|i| i as f64).sum();
    let x_sq_sum: f64 = (0..recent.len()).map(|i| (i as f64).powi(2)).sum();
    let denom = n * x_sq_sum - x_sum.powi(2);
    if denom == 0.0 {
        return Trend::Sideways;
    }

    let slope_of = |values: Vec<f64>| {
        let y_sum: f64 = values.iter().sum();
        let xy_sum: f64 = values.iter().enumerate().map(|(i, &y)| i as f64 * y).sum();
        (n * xy_sum - x_sum * y_sum) / denom
    };

    let slope_high = slope_of(recent.iter().map(|b| b.high).collect());
    let slope_low = slope_of(recent.iter().map(|b| b.low).collect());
    let avg_slope = (slope_high + slope_low) / 2.0;
    let avg_range = recent.iter().map(|b| b.high - b.low).sum::<f64>() / n;

    if avg_slope > avg_range * 0.1 {
        Trend::Uptrend
    } else if avg_slope < -avg_range * 0.1 {
        Trend::Downtrend
    } else {
        Trend::Sideways
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn day(i: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i)
    }

    fn bar_from_close(i: u64, close: f64) -> Bar {
        Bar {
            date: day(i),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000_000.0,
        }
    }

    #[test]
    fn sma_marks_unstable_prefix() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&data, 3);
        assert_eq!(result.len(), 5);
        assert_eq!(result.valid_from, 2);
        assert!(result.get(1).is_none());
        assert_relative_eq!(result.get(2).unwrap(), 2.0);
        assert_relative_eq!(result.get(4).unwrap(), 4.0);
        assert_relative_eq!(result.last().unwrap(), 4.0);
    }

    #[test]
    fn sma_insufficient_input_has_no_valid_entries() {
        let result = sma(&[1.0, 2.0], 5);
        assert_eq!(result.len(), 2);
        assert!(result.last().is_none());
    }

    #[test]
    fn ema_tracks_recent_prices_faster_than_sma() {
        let mut data = vec![100.0; 20];
        data.extend(std::iter::repeat(110.0).take(5));
        let e = ema(&data, 10);
        let s = sma(&data, 10);
        // SMA of the last 10 closes is 105; the EMA has already pulled above it
        assert!(e.last().unwrap() > s.last().unwrap());
    }

    #[test]
    fn rsi_saturates_on_straight_advance() {
        let data: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let result = rsi(&data, 14);
        assert_eq!(result.valid_from, 14);
        assert_relative_eq!(result.last().unwrap(), 100.0);
    }

    #[test]
    fn rsi_balanced_chop_near_midline() {
        let data: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let value = rsi(&data, 14).last().unwrap();
        assert!(value > 30.0 && value < 70.0, "rsi was {value}");
    }

    #[test]
    fn macd_histogram_is_line_minus_signal() {
        let data: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.4).sin() * 5.0).collect();
        let result = macd(&data, 12, 26, 9);
        let i = result.histogram.valid_from;
        assert_relative_eq!(
            result.histogram.values[i],
            result.macd_line.values[i] - result.signal_line.values[i],
            epsilon = 1e-9
        );
        assert_eq!(result.macd_line.len(), data.len());
    }

    #[test]
    fn bollinger_bands_bracket_midline() {
        let data: Vec<f64> = (0..40).map(|i| 100.0 + (i % 5) as f64).collect();
        let bands = bollinger_bands(&data, 20, 2.0);
        let i = bands.upper.valid_from;
        assert!(bands.upper.values[i] > bands.middle.values[i]);
        assert!(bands.lower.values[i] < bands.middle.values[i]);
    }

    #[test]
    fn atr_constant_range_converges_to_range() {
        let bars: Vec<Bar> = (0..40).map(|i| bar_from_close(i, 100.0)).collect();
        let result = atr(&bars, 14);
        // every bar has high-low = 2.0 and no gaps
        assert_relative_eq!(result.last().unwrap(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn obv_accumulates_with_direction() {
        let closes = [100.0, 101.0, 100.5, 102.0];
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| bar_from_close(i as u64, c))
            .collect();
        let result = obv(&bars);
        assert_eq!(result.valid_from, 0);
        // +v, -v, +v from the starting volume
        assert_relative_eq!(result.values[3], 2_000_000.0);
    }

    #[test]
    fn adx_strong_trend_reads_high() {
        let bars: Vec<Bar> = (0..80).map(|i| bar_from_close(i, 100.0 + i as f64)).collect();
        let result = adx(&bars, 14);
        assert!(result.adx.last().unwrap() > 25.0);
        assert_eq!(result.adx.len(), bars.len());
    }

    #[test]
    fn trend_detection_on_synthetic_series() {
        let up: Vec<Bar> = (0..30).map(|i| bar_from_close(i, 100.0 + i as f64 * 2.0)).collect();
        assert_eq!(detect_trend(&up, 20), Trend::Uptrend);

        let down: Vec<Bar> = (0..30).map(|i| bar_from_close(i, 200.0 - i as f64 * 2.0)).collect();
        assert_eq!(detect_trend(&down, 20), Trend::Downtrend);

        let flat: Vec<Bar> = (0..30).map(|i| bar_from_close(i, 100.0)).collect();
        assert_eq!(detect_trend(&flat, 20), Trend::Sideways);
    }
}
