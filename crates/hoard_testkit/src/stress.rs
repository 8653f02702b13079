//! Stress drivers.
//!
//! These run concurrent workloads and report how many operations
//! succeeded. A driver that returns at all has shown liveness.

use crate::fixtures::Player;
use hoard_core::PersistentTable;
use hoard_storage::{Batch, Storage, TableId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Distinct keys per table.
    pub keys: u64,
    /// Value size in bytes.
    pub value_size: usize,
    /// Seed for the per-thread random generators.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 500,
            threads: 4,
            keys: 64,
            value_size: 32,
            seed: 0x5EED,
        }
    }
}

/// Runs concurrent `batch_put` calls, each over a random subset of
/// `tables` listed in random order.
pub fn stress_overlapping_batches(
    storage: Arc<dyn Storage>,
    tables: &[TableId],
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let storage = Arc::clone(&storage);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let tables = tables.to_vec();
            let config = config.clone();

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                for _ in 0..config.operations {
                    let count = rng.gen_range(1..=tables.len());
                    let mut chosen: Vec<TableId> =
                        tables.choose_multiple(&mut rng, count).copied().collect();
                    chosen.shuffle(&mut rng);

                    let mut batch = Batch::new();
                    for table in chosen {
                        let key = rng.gen_range(0..config.keys).to_be_bytes().to_vec();
                        let value = vec![rng.gen::<u8>() | 1; config.value_size];
                        batch.entry(table).or_default().push((key, value));
                    }

                    match storage.batch_put(&batch) {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Mixes reads, writes, edits, shrinks and flushes on one player table.
pub fn stress_cache_traffic(
    table: Arc<PersistentTable<u64, Player>>,
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let table = Arc::clone(&table);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let config = config.clone();

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                for _ in 0..config.operations {
                    let key = rng.gen_range(0..config.keys);
                    let ok = match rng.gen_range(0..10) {
                        0..=3 => table.get(&key).is_ok(),
                        4..=5 => {
                            table.write(key, Player::sample(key));
                            true
                        }
                        6..=7 => match table.edit(&key) {
                            Ok(Some(mut edit)) => {
                                edit.get_mut().gold += 1;
                                table.commit(key, edit);
                                true
                            }
                            Ok(None) => true,
                            Err(_) => false,
                        },
                        8 => {
                            table.shrink();
                            true
                        }
                        _ => table.flush().is_ok(),
                    };

                    if ok {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
