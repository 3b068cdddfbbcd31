//! Concurrent access tests for the cache engine.

use bytes::Bytes;
use std::sync::Arc;
use std::thread;
use strata_cache::{CacheConfig, CacheEngine};
use strata_core::Tier;

fn engine() -> Arc<CacheEngine> {
    let config = CacheConfig::default()
        .with_capacities(4_000, 2_000, 1_000)
        .with_shards(8);
    Arc::new(CacheEngine::new(config).unwrap())
}

#[test]
fn concurrent_puts_and_gets_respect_capacity() {
    let cache = engine();
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..200u32 {
                    let key = format!("k{}", (i * 7 + t) % 64);
                    let len = 50 + ((i as usize * 13) % 250);
                    let value = Bytes::from(vec![(i % 251) as u8; len]);
                    let _ = cache.put(&key, value, (i % 4) + 1, f64::from(i % 17));
                    cache.get(&format!("k{}", (i * 3 + t) % 64));
                    if i % 50 == 0 {
                        cache.invalidate_prefix("k1");
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.stats();
    for tier in Tier::LOOKUP_ORDER {
        let usage = stats.tier(tier);
        assert!(
            usage.bytes <= usage.capacity,
            "{tier} holds {} of {} bytes",
            usage.bytes,
            usage.capacity
        );
    }
    assert_eq!(stats.entry_count(), cache.len());
}

#[test]
fn each_key_resident_in_at_most_one_tier() {
    let cache = engine();
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..300u32 {
                    let key = format!("shared{}", i % 10);
                    let _ = cache.put(&key, Bytes::from(vec![t as u8; 400]), 1, f64::from(i % 5));
                    cache.get(&key);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Entry count per tier sums to the number of distinct resident keys.
    let resident = (0..10)
        .filter(|i| cache.contains(&format!("shared{i}")))
        .count();
    assert_eq!(cache.stats().entry_count(), resident);
}
