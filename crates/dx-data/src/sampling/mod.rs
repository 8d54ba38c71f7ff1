//! Sample sizing and reservoir sampling for schema inference

use dx_core::{Record, TabularStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::AdapterConfig;
use crate::windower::RowWindower;
use crate::AdapterError;

/// How the inference sample is materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePlan {
    /// Small source with a known size: read every row
    Full { rows: usize },
    /// Large or unknown-size source: fixed-size reservoir over a bounded scan
    Reservoir { capacity: usize },
}

impl SamplePlan {
    pub fn sample_size(&self) -> usize {
        match self {
            SamplePlan::Full { rows } => *rows,
            SamplePlan::Reservoir { capacity } => *capacity,
        }
    }
}

/// Fixed-capacity uniform sample over a stream (Algorithm R)
pub struct Reservoir<T> {
    capacity: usize,
    seen: usize,
    items: Vec<T>,
    rng: StdRng,
}

impl<T> Reservoir<T> {
    /// Create a reservoir; a seed makes the selection reproducible
    pub fn new(capacity: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            capacity,
            seen: 0,
            items: Vec::with_capacity(capacity.min(4_096)),
            rng,
        }
    }

    /// Offer the next stream element
    pub fn offer(&mut self, item: T) {
        self.seen += 1;
        if self.items.len() < self.capacity {
            self.items.push(item);
            return;
        }
        let slot = self.rng.gen_range(0..self.seen);
        if slot < self.capacity {
            self.items[slot] = item;
        }
    }

    /// Number of elements offered so far
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items
    }
}

/// Decides how much of a resource to read for inference
#[derive(Debug, Clone)]
pub struct SamplingStrategy {
    sample_size: usize,
    materialization_ceiling: usize,
    max_sample_scan: usize,
    seed: Option<u64>,
}

impl SamplingStrategy {
    pub fn new(sample_size: usize, materialization_ceiling: usize) -> Self {
        Self {
            sample_size,
            materialization_ceiling,
            max_sample_scan: sample_size,
            seed: None,
        }
    }

    pub fn from_config(config: &AdapterConfig) -> Self {
        Self {
            sample_size: config.sample_size,
            materialization_ceiling: config.materialization_ceiling,
            max_sample_scan: config.max_sample_scan,
            seed: config.reservoir_seed,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_scan(mut self, rows: usize) -> Self {
        self.max_sample_scan = rows;
        self
    }

    /// Rows to materialize for inference given an estimated row count
    pub fn decide_sample_size(&self, estimated_row_count: Option<usize>) -> usize {
        self.plan(estimated_row_count).sample_size()
    }

    pub fn plan(&self, estimated_row_count: Option<usize>) -> SamplePlan {
        match estimated_row_count {
            Some(rows) if rows <= self.materialization_ceiling => SamplePlan::Full { rows },
            _ => SamplePlan::Reservoir {
                capacity: self.sample_size,
            },
        }
    }

    /// Materialize the sample with bounded sequential reads
    pub async fn collect(
        &self,
        windower: &RowWindower,
        store: &dyn TabularStore,
        plan: SamplePlan,
    ) -> Result<Vec<Record>, AdapterError> {
        match plan {
            SamplePlan::Full { rows } => {
                let mut sample = Vec::with_capacity(rows);
                while sample.len() < rows {
                    let want = (rows - sample.len()).min(windower.batch_limit());
                    let batch = windower.read_batch(store, sample.len(), want).await?;
                    let got = batch.len();
                    sample.extend(batch);
                    if got < want {
                        break;
                    }
                }
                debug!("Read all {} rows of '{}' for inference", sample.len(), store.name());
                Ok(sample)
            }
            SamplePlan::Reservoir { capacity } => {
                let scan_limit = capacity.max(self.max_sample_scan);
                let mut reservoir = Reservoir::new(capacity, self.seed);

                while reservoir.seen() < scan_limit {
                    let want = (scan_limit - reservoir.seen()).min(windower.batch_limit());
                    let batch = windower.read_batch(store, reservoir.seen(), want).await?;
                    let got = batch.len();
                    for record in batch {
                        reservoir.offer(record);
                    }
                    if got < want {
                        break;
                    }
                }

                info!(
                    "Sampled {} of {} scanned rows from '{}'",
                    reservoir.seen().min(capacity),
                    reservoir.seen(),
                    store.name()
                );
                Ok(reservoir.into_inner())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MemoryStore;
    use dx_core::{record, Value};

    #[test]
    fn test_sample_size_decision() {
        let strategy = SamplingStrategy::new(500, 50_000);
        assert_eq!(strategy.decide_sample_size(Some(1_200)), 1_200);
        assert_eq!(strategy.decide_sample_size(Some(50_000)), 50_000);
        assert_eq!(strategy.decide_sample_size(Some(2_000_000)), 500);
        assert_eq!(strategy.decide_sample_size(None), 500);
        assert_eq!(strategy.plan(None), SamplePlan::Reservoir { capacity: 500 });
    }

    #[test]
    fn test_reservoir_keeps_capacity() {
        let mut reservoir = Reservoir::new(10, Some(7));
        for i in 0..1_000 {
            reservoir.offer(i);
        }
        assert_eq!(reservoir.seen(), 1_000);
        let items = reservoir.into_inner();
        assert_eq!(items.len(), 10);
        // with 1000 offers some replacement has happened
        assert!(items.iter().any(|&i| i >= 10));
    }

    #[test]
    fn test_seeded_reservoir_is_reproducible() {
        let run = || {
            let mut reservoir = Reservoir::new(5, Some(42));
            (0..200).for_each(|i| reservoir.offer(i));
            reservoir.into_inner()
        };
        assert_eq!(run(), run());
    }

    fn rows(n: usize) -> Vec<Record> {
        (0..n).map(|i| record([("v", Value::from(i as f64))])).collect()
    }

    #[tokio::test]
    async fn test_full_plan_reads_everything_in_batches() {
        let store = MemoryStore::new("small", rows(25));
        let windower = RowWindower::new(10);
        let strategy = SamplingStrategy::new(5, 100);

        let plan = strategy.plan(Some(25));
        let sample = strategy.collect(&windower, &store, plan).await.unwrap();
        assert_eq!(sample.len(), 25);
        assert!(store.stats().max_limit() <= 10);
    }

    #[tokio::test]
    async fn test_reservoir_scan_is_bounded() {
        let store = MemoryStore::new("big", rows(5_000)).with_unknown_count();
        let windower = RowWindower::new(100);
        let strategy = SamplingStrategy::new(50, 1_000).with_max_scan(300).with_seed(1);

        let sample = strategy
            .collect(&windower, &store, SamplePlan::Reservoir { capacity: 50 })
            .await
            .unwrap();
        assert_eq!(sample.len(), 50);
        assert_eq!(store.stats().rows_served(), 300);
    }

    #[tokio::test]
    async fn test_reservoir_on_short_source() {
        let store = MemoryStore::new("tiny", rows(3)).with_unknown_count();
        let windower = RowWindower::new(100);
        let strategy = SamplingStrategy::new(50, 1_000);

        let sample = strategy
            .collect(&windower, &store, SamplePlan::Reservoir { capacity: 50 })
            .await
            .unwrap();
        assert_eq!(sample.len(), 3);
    }
}
