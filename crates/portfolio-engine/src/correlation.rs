use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Pairwise return correlations for a set of symbols.
///
/// Symmetric with a unit diagonal; every entry lies in [-1, 1]. Built lazily
/// from daily log returns when a sector/correlation check needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    symbols: Vec<String>,
    values: Vec<f64>,
}

impl CorrelationMatrix {
    /// Build from per-symbol close series. Each pair is correlated over the
    /// overlapping tail of their log-return series; pairs with fewer than
    /// three shared observations correlate at 0.
    pub fn from_closes(closes: &BTreeMap<String, Vec<f64>>) -> Self {
        let symbols: Vec<String> = closes.keys().cloned().collect();
        let returns: Vec<Vec<f64>> = symbols
            .iter()
            .map(|s| log_returns(&closes[s]))
            .collect();

        let n = symbols.len();
        let mut values = vec![0.0; n * n];
        for i in 0..n {
            values[i * n + i] = 1.0;
            for j in i + 1..n {
                let rho = pearson_tail(&returns[i], &returns[j]);
                values[i * n + j] = rho;
                values[j * n + i] = rho;
            }
        }

        Self { symbols, values }
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.symbols.iter().position(|s| s == a)?;
        let j = self.symbols.iter().position(|s| s == b)?;
        Some(self.values[i * self.symbols.len() + j])
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}

fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// Pearson correlation over the overlapping tails of two series.
fn pearson_tail(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 3 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut covariance = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        covariance += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    (covariance / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn closes_map(pairs: &[(&str, Vec<f64>)]) -> BTreeMap<String, Vec<f64>> {
        pairs
            .iter()
            .map(|(s, v)| (s.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn identical_series_correlate_at_one() {
        let series: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let matrix = CorrelationMatrix::from_closes(&closes_map(&[
            ("A", series.clone()),
            ("B", series),
        ]));
        assert_relative_eq!(matrix.get("A", "B").unwrap(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(matrix.get("A", "A").unwrap(), 1.0);
    }

    #[test]
    fn mirrored_series_correlate_at_minus_one() {
        let up: Vec<f64> = (0..50).map(|i| (0.05 * (i as f64 * 0.7).sin()).exp()).collect();
        // Reciprocal series: log returns are exact negatives
        let down: Vec<f64> = up.iter().map(|v| 1.0 / v).collect();
        let matrix =
            CorrelationMatrix::from_closes(&closes_map(&[("UP", up), ("DOWN", down)]));
        assert_relative_eq!(matrix.get("UP", "DOWN").unwrap(), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn matrix_is_symmetric_and_bounded() {
        let matrix = CorrelationMatrix::from_closes(&closes_map(&[
            ("A", (0..40).map(|i| 100.0 + i as f64).collect()),
            ("B", (0..40).map(|i| 100.0 + (i % 7) as f64).collect()),
            ("C", (0..40).map(|i| 200.0 - (i % 5) as f64).collect()),
        ]));
        for a in matrix.symbols().to_vec() {
            for b in matrix.symbols().to_vec() {
                let forward = matrix.get(&a, &b).unwrap();
                let backward = matrix.get(&b, &a).unwrap();
                assert_relative_eq!(forward, backward);
                assert!((-1.0..=1.0).contains(&forward));
            }
        }
    }

    #[test]
    fn too_short_series_correlate_at_zero() {
        let matrix = CorrelationMatrix::from_closes(&closes_map(&[
            ("A", vec![100.0, 101.0]),
            ("B", vec![50.0, 51.0]),
        ]));
        assert_relative_eq!(matrix.get("A", "B").unwrap(), 0.0);
    }

    #[test]
    fn unknown_symbol_returns_none() {
        let matrix = CorrelationMatrix::from_closes(&BTreeMap::new());
        assert!(matrix.get("A", "B").is_none());
    }
}
