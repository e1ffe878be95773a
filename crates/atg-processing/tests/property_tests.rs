//! Property-based tests for pseudonymization and value serialization
//!
//! 1. Abstracted IDs are deterministic per (seed, id) and carry the type prefix
//! 2. Different seeds never collide on the same ID
//! 3. Serialized strings never exceed the configured limit
//! 4. Lists keep their length through serialization

use atg_processing::abstraction::{redact_subscription_ids, type_prefix, HASH_LENGTH};
use atg_processing::seed::validate_seed;
use atg_processing::serialize::{serialize_value, TRUNCATION_MARKER};
use atg_processing::IdAbstractor;
use atg_storage::GraphValue;
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Strategies
// ============================================================================

fn seed_strategy() -> impl Strategy<Value = String> {
    "[0-9a-f]{64}"
}

fn guid_strategy() -> impl Strategy<Value = String> {
    "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}"
}

fn provider_strategy() -> impl Strategy<Value = (&'static str, &'static str)> {
    prop_oneof![
        Just(("Microsoft.Compute", "virtualMachines")),
        Just(("Microsoft.Storage", "storageAccounts")),
        Just(("Microsoft.Network", "networkInterfaces")),
        Just(("Microsoft.KeyVault", "vaults")),
    ]
}

fn resource_id_strategy() -> impl Strategy<Value = String> {
    (guid_strategy(), "[a-z][a-z0-9-]{2,20}", provider_strategy(), "[a-z][a-z0-9]{2,15}").prop_map(
        |(sub, rg, (namespace, kind), name)| {
            format!("/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{kind}/{name}")
        },
    )
}

/// Small nested JSON objects with unicode text
fn object_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,8}", "\\PC{0,40}", 1..20).prop_map(|entries| {
        let map: serde_json::Map<String, Value> = entries
            .into_iter()
            .map(|(k, v)| (k, json!({ "text": v })))
            .collect();
        Value::Object(map)
    })
}

// ============================================================================
// Abstraction
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_abstraction_deterministic(seed in seed_strategy(), id in resource_id_strategy()) {
        let a = IdAbstractor::new("tenant", &seed).unwrap();
        let b = IdAbstractor::new("tenant", &seed).unwrap();
        prop_assert_eq!(a.abstract_resource_id(&id), b.abstract_resource_id(&id));
    }

    #[test]
    fn prop_abstracted_id_shape(seed in seed_strategy(), id in resource_id_strategy()) {
        let token = IdAbstractor::new("tenant", &seed).unwrap().abstract_resource_id(&id);
        let prefix = format!("{}-", type_prefix(&id));
        prop_assert!(token.starts_with(&prefix));
        let hash = &token[prefix.len()..];
        prop_assert_eq!(hash.len(), HASH_LENGTH);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        prop_assert!(!token.contains(&id));
    }

    #[test]
    fn prop_different_seeds_give_different_tokens(
        seed_a in seed_strategy(),
        seed_b in seed_strategy(),
        id in resource_id_strategy(),
    ) {
        prop_assume!(seed_a != seed_b);
        let a = IdAbstractor::new("tenant", &seed_a).unwrap();
        let b = IdAbstractor::new("tenant", &seed_b).unwrap();
        prop_assert_ne!(a.abstract_resource_id(&id), b.abstract_resource_id(&id));
    }

    #[test]
    fn prop_generated_seeds_validate(seed in seed_strategy()) {
        prop_assert!(validate_seed(&seed));
    }

    #[test]
    fn prop_redaction_removes_subscription(id in resource_id_strategy()) {
        let redacted = redact_subscription_ids(&id);
        prop_assert!(redacted.starts_with("/subscriptions/SUBSCRIPTION_REDACTED/"));
        let sub = id.split('/').nth(2).unwrap();
        prop_assert!(!redacted.contains(sub));
    }
}

// ============================================================================
// Serialization
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_truncation_respects_limit(value in object_strategy(), max in 20usize..400) {
        match serialize_value(&value, max) {
            GraphValue::String(s) => {
                prop_assert!(s.len() <= max, "len {} > {}", s.len(), max);
                let full = serde_json::to_string(&value).unwrap();
                if full.len() > max {
                    prop_assert!(s.ends_with(TRUNCATION_MARKER));
                } else {
                    prop_assert_eq!(s, full);
                }
            }
            other => prop_assert!(false, "expected string, got {:?}", other),
        }
    }

    #[test]
    fn prop_list_length_preserved(items in prop::collection::vec(any::<i64>(), 0..50)) {
        let value = json!(items);
        match serialize_value(&value, 5000) {
            GraphValue::List(out) => {
                prop_assert_eq!(out.len(), items.len());
                for (got, want) in out.iter().zip(&items) {
                    prop_assert_eq!(got, &GraphValue::Int(*want));
                }
            }
            other => prop_assert!(false, "expected list, got {:?}", other),
        }
    }
}
