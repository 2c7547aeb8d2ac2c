use std::collections::BTreeMap;
use std::io::Write;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use quant_core::{EngineError, SignalAction};

/// One tracked signal with its realized outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub date: NaiveDate,
    pub symbol: String,
    pub action: SignalAction,
    pub signal_price: f64,
    /// Price observed `lookahead_days` after the signal
    pub realized_price: f64,
    pub lookahead_days: u32,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub strategy: String,
    pub sector: Option<String>,
    pub index: Option<String>,
}

impl SignalRecord {
    /// A BUY is correct when the price went up, a SELL when it went down.
    pub fn is_correct(&self) -> bool {
        match self.action {
            SignalAction::Buy => self.realized_price > self.signal_price,
            SignalAction::Sell => self.realized_price < self.signal_price,
            SignalAction::Hold => false,
        }
    }
}

/// Hit-rate for one grouping key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyBucket {
    pub total: usize,
    pub correct: usize,
}

impl AccuracyBucket {
    fn add(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
    }

    pub fn accuracy_pct(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64 * 100.0
    }
}

/// Post-hoc accuracy aggregation across every requested dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub overall: AccuracyBucket,
    pub by_strategy: BTreeMap<String, AccuracyBucket>,
    pub by_symbol: BTreeMap<String, AccuracyBucket>,
    pub by_sector: BTreeMap<String, AccuracyBucket>,
    pub by_index: BTreeMap<String, AccuracyBucket>,
    /// Lookahead days → bucket
    pub by_timeframe: BTreeMap<u32, AccuracyBucket>,
    pub high_confidence: AccuracyBucket,
    pub low_confidence: AccuracyBucket,
    /// Point-biserial correlation between confidence and correctness;
    /// 0 when either side has no variance
    pub confidence_correlation: f64,
}

/// Accumulates signal-vs-realized-price outcomes by strategy, symbol,
/// sector, index, and lookahead timeframe.
///
/// HOLD signals are never tracked.
pub struct SignalAccuracyTracker {
    records: Vec<SignalRecord>,
    confidence_threshold: f64,
}

impl Default for SignalAccuracyTracker {
    fn default() -> Self {
        Self::new(0.70)
    }
}

impl SignalAccuracyTracker {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            records: Vec::new(),
            confidence_threshold,
        }
    }

    /// Track one signal outcome. HOLD signals are ignored and return false;
    /// invalid prices or confidence are rejected.
    pub fn record(&mut self, record: SignalRecord) -> Result<bool, EngineError> {
        if record.action == SignalAction::Hold {
            return Ok(false);
        }
        if !(record.signal_price > 0.0) || !(record.realized_price > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "{}: prices must be positive",
                record.symbol
            )));
        }
        if !(0.0..=1.0).contains(&record.confidence) {
            return Err(EngineError::InvalidInput(format!(
                "{}: confidence must be in [0, 1], got {}",
                record.symbol, record.confidence
            )));
        }
        self.records.push(record);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn report(&self) -> AccuracyReport {
        let mut report = AccuracyReport {
            overall: AccuracyBucket::default(),
            by_strategy: BTreeMap::new(),
            by_symbol: BTreeMap::new(),
            by_sector: BTreeMap::new(),
            by_index: BTreeMap::new(),
            by_timeframe: BTreeMap::new(),
            high_confidence: AccuracyBucket::default(),
            low_confidence: AccuracyBucket::default(),
            confidence_correlation: 0.0,
        };

        for record in &self.records {
            let correct = record.is_correct();
            report.overall.add(correct);
            report
                .by_strategy
                .entry(record.strategy.clone())
                .or_default()
                .add(correct);
            report
                .by_symbol
                .entry(record.symbol.clone())
                .or_default()
                .add(correct);
            if let Some(sector) = &record.sector {
                report.by_sector.entry(sector.clone()).or_default().add(correct);
            }
            if let Some(index) = &record.index {
                report.by_index.entry(index.clone()).or_default().add(correct);
            }
            report
                .by_timeframe
                .entry(record.lookahead_days)
                .or_default()
                .add(correct);
            if record.confidence >= self.confidence_threshold {
                report.high_confidence.add(correct);
            } else {
                report.low_confidence.add(correct);
            }
        }

        report.confidence_correlation = self.confidence_correlation();
        report
    }

    /// Pearson correlation between confidence and the 0/1 correctness
    /// outcome (the point-biserial coefficient).
    fn confidence_correlation(&self) -> f64 {
        let n = self.records.len();
        if n < 2 {
            return 0.0;
        }
        let confidences: Vec<f64> = self.records.iter().map(|r| r.confidence).collect();
        let outcomes: Vec<f64> = self
            .records
            .iter()
            .map(|r| if r.is_correct() { 1.0 } else { 0.0 })
            .collect();

        let mean_c = confidences.iter().sum::<f64>() / n as f64;
        let mean_o = outcomes.iter().sum::<f64>() / n as f64;

        let mut covariance = 0.0;
        let mut var_c = 0.0;
        let mut var_o = 0.0;
        for i in 0..n {
            let dc = confidences[i] - mean_c;
            let do_ = outcomes[i] - mean_o;
            covariance += dc * do_;
            var_c += dc * dc;
            var_o += do_ * do_;
        }
        if var_c == 0.0 || var_o == 0.0 {
            return 0.0;
        }
        (covariance / (var_c.sqrt() * var_o.sqrt())).clamp(-1.0, 1.0)
    }

    /// CSV dump of every tracked record with its correctness verdict.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), EngineError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer
            .write_record([
                "date",
                "symbol",
                "signal",
                "signal_price",
                "realized_price",
                "lookahead_days",
                "confidence",
                "strategy",
                "sector",
                "index",
                "correct",
            ])
            .map_err(|e| EngineError::InvalidInput(format!("csv write failed: {e}")))?;
        for record in &self.records {
            csv_writer
                .write_record([
                    record.date.to_string(),
                    record.symbol.clone(),
                    record.action.as_str().to_string(),
                    format!("{:.4}", record.signal_price),
                    format!("{:.4}", record.realized_price),
                    record.lookahead_days.to_string(),
                    format!("{:.2}", record.confidence),
                    record.strategy.clone(),
                    record.sector.clone().unwrap_or_default(),
                    record.index.clone().unwrap_or_default(),
                    record.is_correct().to_string(),
                ])
                .map_err(|e| EngineError::InvalidInput(format!("csv write failed: {e}")))?;
        }
        csv_writer
            .flush()
            .map_err(|e| EngineError::InvalidInput(format!("csv flush failed: {e}")))?;
        Ok(())
    }
}
