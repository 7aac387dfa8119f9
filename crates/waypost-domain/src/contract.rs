use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::reading::MetricMap;

/// Scalar type a contracted metric key must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Number,
    Boolean,
    String,
}

impl MetricType {
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            MetricType::Number => value.is_number(),
            MetricType::Boolean => value.is_boolean(),
            MetricType::String => value.is_string(),
        }
    }
}

/// Versioned metric-key catalog every submission is classified against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricContract {
    pub version: u32,
    pub keys: BTreeMap<String, MetricType>,
}

impl MetricContract {
    /// Content hash of the catalog, advertised on the public contract
    /// endpoint for drift comparison by any client.
    pub fn content_hash(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}

/// How to treat a key the contract does not know.
///
/// Unknown keys are additive by default: both modes pass the value through
/// and only differ in audit visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKeyPolicy {
    Allow,
    Flag,
}

/// How to treat a known key whose value has the wrong type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeMismatchPolicy {
    /// Drop just that key, keep the rest of the point.
    Reject,
    /// Park the offending key/value pair in the quarantine store.
    Quarantine,
}

/// Configured drift handling for the ingest pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftPolicy {
    pub unknown_keys: UnknownKeyPolicy,
    pub type_mismatches: TypeMismatchPolicy,
}

impl Default for DriftPolicy {
    fn default() -> Self {
        DriftPolicy {
            unknown_keys: UnknownKeyPolicy::Allow,
            type_mismatches: TypeMismatchPolicy::Quarantine,
        }
    }
}

/// Result of classifying one point's metrics against the contract.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationOutcome {
    /// Metrics that go to the primary table, unknown-but-harmless included.
    pub accepted: MetricMap,
    pub unknown_keys: Vec<String>,
    /// Known keys whose values had the wrong type, with the offending value.
    pub mismatched: Vec<(String, serde_json::Value)>,
}

/// Classifies submitted metrics against a versioned contract.
///
/// Drift is never an error here: every outcome is a pass-through decision
/// plus audit facts for the ledger and the drift side records.
#[derive(Debug, Clone)]
pub struct ContractValidator {
    policy: DriftPolicy,
}

impl ContractValidator {
    pub fn new(policy: DriftPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DriftPolicy {
        self.policy
    }

    pub fn validate(&self, metrics: &MetricMap, contract: &MetricContract) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        for (key, value) in metrics {
            match contract.keys.get(key) {
                None => {
                    // Additive by default: unknown keys pass through under
                    // both allow and flag, the modes differ only in how
                    // loudly the drift is recorded.
                    outcome.unknown_keys.push(key.clone());
                    outcome.accepted.insert(key.clone(), value.clone());
                }
                Some(expected) if expected.matches(value) => {
                    outcome.accepted.insert(key.clone(), value.clone());
                }
                Some(_) => {
                    outcome.mismatched.push((key.clone(), value.clone()));
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract() -> MetricContract {
        let mut keys = BTreeMap::new();
        keys.insert("temp_c".to_string(), MetricType::Number);
        keys.insert("door_open".to_string(), MetricType::Boolean);
        keys.insert("firmware".to_string(), MetricType::String);
        MetricContract { version: 3, keys }
    }

    fn metrics(pairs: &[(&str, serde_json::Value)]) -> MetricMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_known_well_typed_keys_accepted() {
        let validator = ContractValidator::new(DriftPolicy::default());
        let outcome = validator.validate(
            &metrics(&[("temp_c", json!(21.5)), ("door_open", json!(false))]),
            &contract(),
        );
        assert_eq!(outcome.accepted.len(), 2);
        assert!(outcome.unknown_keys.is_empty());
        assert!(outcome.mismatched.is_empty());
    }

    #[test]
    fn test_unknown_key_is_additive() {
        let validator = ContractValidator::new(DriftPolicy::default());
        let outcome = validator.validate(
            &metrics(&[("temp_c", json!(21.5)), ("hum_pct", json!(40.0))]),
            &contract(),
        );
        // The unknown key still lands in accepted and is recorded as drift.
        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.unknown_keys, vec!["hum_pct".to_string()]);
    }

    #[test]
    fn test_type_mismatch_drops_only_that_key() {
        let validator = ContractValidator::new(DriftPolicy::default());
        let outcome = validator.validate(
            &metrics(&[("temp_c", json!("hot")), ("door_open", json!(true))]),
            &contract(),
        );
        assert_eq!(outcome.accepted.len(), 1);
        assert!(outcome.accepted.contains_key("door_open"));
        assert_eq!(outcome.mismatched.len(), 1);
        assert_eq!(outcome.mismatched[0].0, "temp_c");
    }

    #[test]
    fn test_contract_hash_tracks_catalog() {
        let a = contract();
        let mut b = a.clone();
        b.keys.insert("vbat_mv".to_string(), MetricType::Number);
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
