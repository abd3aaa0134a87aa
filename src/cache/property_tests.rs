//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check tier behavior over generated keys and values.

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::time::Duration;

use crate::cache::{cache_key, CacheTier, MemoryTier, PersistentTier};

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 100;
const TEST_DEFAULT_TTL: Duration = Duration::from_secs(300);

// == Strategies ==
/// Generates cache keys shaped like derived operation keys
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[A-Z][a-zA-Z]{2,20}(:[a-z0-9]{1,8})?".prop_map(|s| s)
}

/// Generates JSON values of bounded depth
fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,32}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: Value },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), json_value_strategy())
            .prop_map(|(key, value)| CacheOp::Set { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        valid_key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Storing a value and reading it back returns an equal value.
    #[test]
    fn prop_memory_roundtrip(key in valid_key_strategy(), value in json_value_strategy()) {
        let tier = MemoryTier::new(TEST_MAX_ENTRIES, TEST_DEFAULT_TTL);

        tier.set(&key, value.clone(), None).unwrap();

        prop_assert_eq!(tier.get(&key), Some(value));
    }

    // Hits and misses reported by the tier match what the caller observed.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let tier = MemoryTier::new(TEST_MAX_ENTRIES, TEST_DEFAULT_TTL);
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    tier.set(&key, value, None).unwrap();
                }
                CacheOp::Get { key } => match tier.get(&key) {
                    Some(_) => expected_hits += 1,
                    None => expected_misses += 1,
                },
                CacheOp::Delete { key } => {
                    tier.delete(&key);
                }
            }
        }

        let stats = tier.stats().unwrap();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.total_entries, tier.size(), "Total entries mismatch");
    }

    // The number of entries never exceeds the configured capacity.
    #[test]
    fn prop_capacity_enforcement(
        entries in prop::collection::vec((valid_key_strategy(), json_value_strategy()), 1..200)
    ) {
        let max_entries = 50;
        let tier = MemoryTier::new(max_entries, TEST_DEFAULT_TTL);

        for (key, value) in entries {
            tier.set(&key, value, None).unwrap();
            prop_assert!(
                tier.size() <= max_entries,
                "Cache size {} exceeds max {}",
                tier.size(),
                max_entries
            );
        }
    }

    // A full tier evicts the first-created key, even if it was read since.
    #[test]
    fn prop_creation_order_eviction(
        initial_keys in prop::collection::vec(valid_key_strategy(), 3..10),
        new_key in valid_key_strategy(),
    ) {
        let mut seen = HashSet::new();
        let unique_keys: Vec<String> = initial_keys
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect();
        prop_assume!(unique_keys.len() >= 2);
        prop_assume!(!unique_keys.contains(&new_key));

        let tier = MemoryTier::new(unique_keys.len(), TEST_DEFAULT_TTL);
        for key in &unique_keys {
            tier.set(key, json!(key), None).unwrap();
        }
        for key in &unique_keys {
            tier.get(key).unwrap();
        }

        tier.set(&new_key, json!("new"), None).unwrap();

        prop_assert!(!tier.has(&unique_keys[0]), "Oldest key should be evicted");
        prop_assert!(tier.has(&new_key));
        for key in unique_keys.iter().skip(1) {
            prop_assert!(tier.has(key), "Key '{}' should still exist", key);
        }
    }

    // Member order in the variables never changes the derived key.
    #[test]
    fn prop_cache_key_ignores_member_order(
        members in prop::collection::btree_map("[a-z]{1,6}", json_value_strategy(), 1..6)
    ) {
        let forward: Map<String, Value> = members.clone().into_iter().collect();
        let mut reversed_text = String::from("{");
        for (i, (key, value)) in members.iter().rev().enumerate() {
            if i > 0 {
                reversed_text.push(',');
            }
            reversed_text.push_str(&format!("{}:{}", Value::from(key.clone()), value));
        }
        reversed_text.push('}');
        let reversed: Value = serde_json::from_str(&reversed_text).unwrap();

        prop_assert_eq!(
            cache_key("GetTransactions", &Value::Object(forward)),
            cache_key("GetTransactions", &reversed)
        );
    }
}

// Disk-backed cases are slower; fewer of them
proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    // Values survive sealing, the index file, and a reopen.
    #[test]
    fn prop_persistent_roundtrip(key in valid_key_strategy(), value in json_value_strategy()) {
        let dir = tempfile::TempDir::new().unwrap();
        let debounce = Duration::from_millis(10);

        let tier = PersistentTier::open(dir.path(), TEST_DEFAULT_TTL, debounce).unwrap();
        tier.set(&key, value.clone(), None).unwrap();
        prop_assert_eq!(tier.get(&key), Some(value.clone()));
        tier.close().unwrap();
        drop(tier);

        let reopened = PersistentTier::open(dir.path(), TEST_DEFAULT_TTL, debounce).unwrap();
        prop_assert_eq!(reopened.get(&key), Some(value));
    }
}
