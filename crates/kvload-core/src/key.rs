//! Collision-resistant keys for stateful iterations.
//!
//! A key is `{prefix}-{worker}-{iteration}-{unix_ms}`. Worker ids are unique
//! across the run and the iteration counter is monotonic per worker, so two
//! keys can only collide if the same worker reused an iteration number, which
//! the executor never does. The timestamp keeps keys from separate runs apart.

use chrono::Utc;

/// Identity of one worker slot, unique across every scenario of a run.
pub type WorkerId = u64;

/// Generates a key for `worker`'s `iteration` using the current wall clock.
#[must_use]
pub fn generate(prefix: &str, worker: WorkerId, iteration: u64) -> String {
    generate_at(prefix, worker, iteration, Utc::now().timestamp_millis())
}

/// Same as [`generate`] with an explicit timestamp in unix milliseconds.
#[must_use]
pub fn generate_at(prefix: &str, worker: WorkerId, iteration: u64, unix_ms: i64) -> String {
    format!("{prefix}-{worker}-{iteration}-{unix_ms}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            generate_at("testkey", 7, 42, 1_700_000_000_123),
            "testkey-7-42-1700000000123"
        );
    }

    #[test]
    fn test_workers_differ_within_same_millisecond() {
        let a = generate_at("testkey", 1, 0, 1000);
        let b = generate_at("testkey", 2, 0, 1000);
        assert_ne!(a, b);
    }

    #[test]
    fn test_iterations_differ_when_clock_stalls() {
        let a = generate_at("testkey", 3, 10, 1000);
        let b = generate_at("testkey", 3, 11, 1000);
        assert_ne!(a, b);
    }

    #[test]
    fn test_concurrent_generation_is_unique() {
        let keys = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8u64)
            .map(|worker| {
                let keys = Arc::clone(&keys);
                std::thread::spawn(move || {
                    let local: Vec<String> =
                        (0..500u64).map(|i| generate("k", worker, i)).collect();
                    keys.lock().extend(local);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let keys = keys.lock();
        let unique: HashSet<&String> = keys.iter().collect();
        assert_eq!(unique.len(), 8 * 500);
    }

    proptest! {
        #[test]
        fn prop_distinct_worker_iteration_pairs_give_distinct_keys(
            pairs in proptest::collection::hash_set((0u64..64, 0u64..10_000), 1..200),
            unix_ms in 0i64..i64::MAX,
        ) {
            let keys: HashSet<String> = pairs
                .iter()
                .map(|(worker, iteration)| generate_at("testkey", *worker, *iteration, unix_ms))
                .collect();
            prop_assert_eq!(keys.len(), pairs.len());
        }
    }
}
