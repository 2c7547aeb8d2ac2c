use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use dashmap::DashMap;
use lru::LruCache;
use tokio::sync::OnceCell;

use quant_core::EngineError;
use technical_indicators::{IndicatorKind, IndicatorVector};

/// Cache key: one indicator computation over one symbol's history as of a
/// given date.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub symbol: String,
    pub indicator: IndicatorKind,
    pub params: Vec<u32>,
    pub as_of: NaiveDate,
}

impl Fingerprint {
    pub fn new(
        symbol: impl Into<String>,
        indicator: IndicatorKind,
        params: &[u32],
        as_of: NaiveDate,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            indicator,
            params: params.to_vec(),
            as_of,
        }
    }
}

type Computation = Arc<OnceCell<Result<Arc<IndicatorVector>, EngineError>>>;

/// Process-wide memo of indicator vectors.
///
/// Bounded LRU with single-flight discipline: for any fingerprint, at most one
/// computation runs at a time. Concurrent callers for the same fingerprint
/// await the leader and observe its result, including its error.
pub struct IndicatorCache {
    entries: Mutex<LruCache<Fingerprint, Arc<IndicatorVector>>>,
    in_flight: DashMap<Fingerprint, Computation>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl IndicatorCache {
    /// `capacity` is the maximum number of cached vectors; least recently
    /// used entries are evicted first.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetch the vector for `fingerprint`, computing it with `compute` on a
    /// miss. Insufficient input data must surface from `compute` as
    /// `EngineError::InsufficientData`; it is never cached, so a later call
    /// with more history recomputes.
    pub async fn get_or_compute<F>(
        &self,
        fingerprint: Fingerprint,
        compute: F,
    ) -> Result<Arc<IndicatorVector>, EngineError>
    where
        F: FnOnce() -> Result<IndicatorVector, EngineError>,
    {
        if let Some(found) = self.entries.lock().unwrap().get(&fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(found));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let cell = self
            .in_flight
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_init(|| async {
                tracing::debug!(
                    symbol = %fingerprint.symbol,
                    indicator = fingerprint.indicator.as_str(),
                    "computing indicator vector"
                );
                compute().map(Arc::new)
            })
            .await
            .clone();

        // Promote successes into the LRU; drop the in-flight slot either way
        // so errors can be retried by later callers.
        if let Ok(ref vector) = result {
            self.entries
                .lock()
                .unwrap()
                .put(fingerprint.clone(), Arc::clone(vector));
        }
        self.in_flight.remove(&fingerprint);

        result
    }

    /// Drop every cached vector (in-flight computations are unaffected).
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) counters since construction.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fp(symbol: &str, period: u32) -> Fingerprint {
        Fingerprint::new(
            symbol,
            IndicatorKind::Sma,
            &[period],
            NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
        )
    }

    fn vector(len: usize) -> IndicatorVector {
        IndicatorVector {
            values: vec![1.0; len],
            valid_from: 0,
        }
    }

    #[tokio::test]
    async fn second_lookup_is_a_hit() {
        let cache = IndicatorCache::new(8);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let got = cache
                .get_or_compute(fp("AAPL", 20), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vector(10))
                })
                .await
                .unwrap();
            assert_eq!(got.len(), 10);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (hits, misses) = cache.stats();
        assert_eq!((hits, misses), (1, 1));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let cache = Arc::new(IndicatorCache::new(8));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(fp("MSFT", 50), move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        Ok(vector(50))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn insufficient_data_is_not_cached() {
        let cache = IndicatorCache::new(8);

        let err = cache
            .get_or_compute(fp("TSLA", 200), || {
                Err(EngineError::InsufficientData("need 200 bars, have 50".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "insufficient_data");
        assert_eq!(cache.len(), 0);

        // A retry with enough history computes fresh
        let got = cache
            .get_or_compute(fp("TSLA", 200), || Ok(vector(200)))
            .await
            .unwrap();
        assert_eq!(got.len(), 200);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn lru_evicts_oldest_fingerprint() {
        let cache = IndicatorCache::new(2);
        for (i, symbol) in ["A", "B", "C"].iter().enumerate() {
            cache
                .get_or_compute(fp(symbol, 20), || Ok(vector(i + 1)))
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 2);

        // "A" was evicted: recompute happens
        let recomputed = AtomicUsize::new(0);
        cache
            .get_or_compute(fp("A", 20), || {
                recomputed.fetch_add(1, Ordering::SeqCst);
                Ok(vector(1))
            })
            .await
            .unwrap();
        assert_eq!(recomputed.load(Ordering::SeqCst), 1);
    }
}
