//! Virtual capacity accounting.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A mapping from capacity label to a non-negative integer accounting unit.
///
/// Capacity vectors have no kernel-level enforcement; they are an advisory
/// accounting model the scheduler and ledger use to avoid overcommitting a
/// node. `BTreeMap` keeps iteration order deterministic, which matters for
/// the scheduler's tie-break rules and for stable snapshots returned to API
/// callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityVector(BTreeMap<String, i64>);

impl CapacityVector {
    /// An empty capacity vector.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build a capacity vector from an iterator of `(label, amount)` pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Amount available for `label`, or `0` if the label is absent.
    pub fn get(&self, label: &str) -> i64 {
        self.0.get(label).copied().unwrap_or(0)
    }

    /// Set the amount for `label`.
    pub fn set(&mut self, label: impl Into<String>, amount: i64) {
        self.0.insert(label.into(), amount);
    }

    /// Whether `label` is declared in this vector at all (distinct from
    /// being present with value zero).
    pub fn contains_label(&self, label: &str) -> bool {
        self.0.contains_key(label)
    }

    /// Iterate over `(label, amount)` pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// True if every declared amount is strictly positive.
    ///
    /// Used at `NodeHello` handshake time: declared node capacities must all
    /// be positive or the session is rejected.
    pub fn all_positive(&self) -> bool {
        self.0.values().all(|v| *v > 0)
    }

    /// Add `delta[label]` to `self[label]` for every label in `delta`,
    /// clamping at zero. Used by the ledger when releasing a reservation;
    /// the clamp is a defense against double-release, not an expected path.
    pub fn saturating_add(&mut self, delta: &CapacityVector) {
        for (label, amount) in delta.iter() {
            let entry = self.0.entry(label.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    /// Subtract `delta[label]` from `self[label]` for every label in
    /// `delta`, clamping at zero.
    pub fn saturating_sub(&mut self, delta: &CapacityVector) {
        for (label, amount) in delta.iter() {
            let entry = self.0.entry(label.to_string()).or_insert(0);
            *entry = (*entry - amount).max(0);
        }
    }

    /// Every entry is within `[0, total[label]]`. This is invariant I2 from
    /// the spec restated as a predicate so tests and the runtime assertion
    /// in the ledger can share one definition.
    pub fn within_bounds(&self, total: &CapacityVector) -> bool {
        self.0.iter().all(|(label, amount)| {
            *amount >= 0 && *amount <= total.get(label)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_missing_label_is_zero() {
        let v = CapacityVector::new();
        assert_eq!(v.get("gpu"), 0);
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let mut v = CapacityVector::from_pairs([("cpu", 2)]);
        v.saturating_sub(&CapacityVector::from_pairs([("cpu", 5)]));
        assert_eq!(v.get("cpu"), 0);
    }

    #[test]
    fn add_then_sub_round_trips() {
        let mut v = CapacityVector::from_pairs([("cpu", 10)]);
        let delta = CapacityVector::from_pairs([("cpu", 3)]);
        v.saturating_sub(&delta);
        assert_eq!(v.get("cpu"), 7);
        v.saturating_add(&delta);
        assert_eq!(v.get("cpu"), 10);
    }

    #[test]
    fn all_positive_rejects_zero_and_negative() {
        assert!(CapacityVector::from_pairs([("a", 1), ("b", 2)]).all_positive());
        assert!(!CapacityVector::from_pairs([("a", 1), ("b", 0)]).all_positive());
        assert!(!CapacityVector::from_pairs([("a", -1)]).all_positive());
    }

    #[test]
    fn within_bounds_checks_every_label() {
        let total = CapacityVector::from_pairs([("cpu", 10), ("mem", 100)]);
        assert!(CapacityVector::from_pairs([("cpu", 5), ("mem", 50)]).within_bounds(&total));
        assert!(!CapacityVector::from_pairs([("cpu", 11)]).within_bounds(&total));
        assert!(!CapacityVector::from_pairs([("cpu", -1)]).within_bounds(&total));
    }
}
