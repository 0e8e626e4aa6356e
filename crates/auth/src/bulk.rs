use std::collections::BTreeMap;

use uniauth_core::{DomainError, DomainResult};

/// Per-item outcome of a bulk operation. Items are independent: one failure
/// never rolls back the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkReport<K: Ord> {
    outcomes: BTreeMap<K, DomainResult<()>>,
}

impl<K: Ord> Default for BulkReport<K> {
    fn default() -> Self {
        Self { outcomes: BTreeMap::new() }
    }
}

impl<K: Ord + Copy> BulkReport<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T>(&mut self, key: K, outcome: DomainResult<T>) {
        self.outcomes.insert(key, outcome.map(|_| ()));
    }

    pub fn outcome(&self, key: K) -> Option<&DomainResult<()>> {
        self.outcomes.get(&key)
    }

    pub fn succeeded(&self) -> Vec<K> {
        self.outcomes
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn failed(&self) -> Vec<(K, &DomainError)> {
        self.outcomes
            .iter()
            .filter_map(|(k, r)| r.as_ref().err().map(|e| (*k, e)))
            .collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.outcomes.values().all(Result::is_ok)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
