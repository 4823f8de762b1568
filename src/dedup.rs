use crate::config::{DedupPolicy, IdentityField};
use crate::identity::composite_key;
use crate::models::ScoredResponse;
use std::collections::HashSet;

/// Extracts a comparable key from a record; `None` when the identity is
/// unknown
pub type KeyFn<'a, T> = Box<dyn Fn(&T) -> Option<String> + 'a>;

/// Composite identity key over the given fields
pub fn identity_key<'a>(fields: &'a [IdentityField]) -> KeyFn<'a, ScoredResponse> {
    Box::new(move |record: &ScoredResponse| {
        let parts: Vec<Option<String>> = fields.iter().map(|f| record.identity(*f)).collect();
        composite_key(parts.iter().map(|p| p.as_deref()))
    })
}

#[derive(Debug)]
pub struct DedupOutcome<T> {
    pub kept: Vec<T>,
    pub dropped: usize,
}

/// Drop repeated submissions. Each key is applied in turn to the survivors
/// of the previous one; the policy decides which occurrence survives.
/// Survivors keep their input order. Records whose key is unknown are never
/// duplicates of each other.
pub fn dedup<T>(records: Vec<T>, keys: &[KeyFn<'_, T>], policy: DedupPolicy) -> DedupOutcome<T> {
    let before = records.len();
    let kept = keys
        .iter()
        .fold(records, |survivors, key| dedup_by(survivors, key, policy));
    DedupOutcome {
        dropped: before - kept.len(),
        kept,
    }
}

fn dedup_by<T>(records: Vec<T>, key: &KeyFn<'_, T>, policy: DedupPolicy) -> Vec<T> {
    let n = records.len();
    let visit: Box<dyn Iterator<Item = usize>> = match policy {
        DedupPolicy::KeepLast => Box::new((0..n).rev()),
        DedupPolicy::KeepFirst => Box::new(0..n),
    };

    let mut seen = HashSet::new();
    let mut keep = vec![false; n];
    for i in visit {
        keep[i] = match key(&records[i]) {
            Some(k) => seen.insert(k),
            None => true,
        };
    }

    records
        .into_iter()
        .zip(keep)
        .filter_map(|(record, keep)| keep.then_some(record))
        .collect()
}
