//! Pre/post record linkage.
//!
//! Pre and post exports are collected independently and no single identifier
//! is reliably filled in, so pairs are found by trying several keys in
//! priority order. Every candidate pair from every key is considered in a
//! fixed order:
//!
//! 1. keys in configured priority order,
//! 2. within a key, pre rows in input order,
//! 3. within a pre row, post rows in input order.
//!
//! The first candidate that touches two still-unpaired rows wins. A later
//! candidate for the same pair corroborates it; any other candidate that
//! touches an already-paired row is an ambiguity, which is reported but does
//! not change the result. This first-wins rule is an arbitrary tie-break and
//! is kept only because it is deterministic. The practical consequence is
//! that the most specific identifier (student ID) should be listed first.

use crate::dedup::KeyFn;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

pub struct KeyPair<'a, T> {
    pub name: String,
    pub pre: KeyFn<'a, T>,
    pub post: KeyFn<'a, T>,
}

impl<'a, T> KeyPair<'a, T> {
    pub fn new(name: impl Into<String>, pre: KeyFn<'a, T>, post: KeyFn<'a, T>) -> Self {
        Self {
            name: name.into(),
            pre,
            post,
        }
    }
}

/// A matched pair, or an unmatched pre or post record
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRow<T> {
    pub pre: Option<T>,
    pub post: Option<T>,
    /// Keys that produced or corroborated the pair, in priority order
    pub matched_on: Vec<String>,
}

impl<T> MatchedRow<T> {
    pub fn is_pair(&self) -> bool {
        self.pre.is_some() && self.post.is_some()
    }

    /// Post-side value when present, else the pre-side one
    pub fn reconcile<V>(&self, field: impl Fn(&T) -> Option<V>) -> Option<V> {
        self.post
            .as_ref()
            .and_then(&field)
            .or_else(|| self.pre.as_ref().and_then(&field))
    }
}

/// A candidate pair rejected because one side was already paired elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ambiguity {
    pub key: String,
    pub pre_row: String,
    pub post_row: String,
    /// Post row the pre row is already paired with
    pub pre_partner: Option<String>,
    /// Pre row the post row is already paired with
    pub post_partner: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchReport {
    pub pairs_by_key: BTreeMap<String, usize>,
    pub corroborations: usize,
    pub ambiguities: Vec<Ambiguity>,
    pub unmatched_pre: usize,
    pub unmatched_post: usize,
}

impl MatchReport {
    pub fn total_pairs(&self) -> usize {
        self.pairs_by_key.values().sum()
    }

    /// Fold another run's counts into this one
    pub fn absorb(&mut self, other: MatchReport) {
        for (key, n) in other.pairs_by_key {
            *self.pairs_by_key.entry(key).or_insert(0) += n;
        }
        self.corroborations += other.corroborations;
        self.ambiguities.extend(other.ambiguities);
        self.unmatched_pre += other.unmatched_pre;
        self.unmatched_post += other.unmatched_post;
    }
}

#[derive(Debug)]
pub struct MatchOutcome<T> {
    pub rows: Vec<MatchedRow<T>>,
    pub report: MatchReport,
}

type LabelFn<'a, T> = Box<dyn Fn(&T) -> String + 'a>;

pub struct MultiKeyMatcher<'a, T> {
    keys: Vec<KeyPair<'a, T>>,
    label: Option<LabelFn<'a, T>>,
}

struct Pair {
    pre: usize,
    post: usize,
    keys: Vec<String>,
}

impl<'a, T> MultiKeyMatcher<'a, T> {
    /// `keys` are in priority order, highest first
    pub fn new(keys: Vec<KeyPair<'a, T>>) -> Self {
        Self { keys, label: None }
    }

    /// How rows are named in ambiguity reports; positional by default
    pub fn with_row_label(mut self, label: impl Fn(&T) -> String + 'a) -> Self {
        self.label = Some(Box::new(label));
        self
    }

    fn label_of(&self, record: &T, side: &str, index: usize) -> String {
        match &self.label {
            Some(label) => label(record),
            None => format!("{}#{}", side, index),
        }
    }

    pub fn run(&self, pre: Vec<T>, post: Vec<T>) -> MatchOutcome<T> {
        let mut report = MatchReport::default();
        let mut pairs: Vec<Pair> = Vec::new();
        let mut pre_pair: Vec<Option<usize>> = vec![None; pre.len()];
        let mut post_pair: Vec<Option<usize>> = vec![None; post.len()];

        for key in &self.keys {
            let mut index: HashMap<String, Vec<usize>> = HashMap::new();
            for (j, record) in post.iter().enumerate() {
                if let Some(value) = (key.post)(record) {
                    index.entry(value).or_default().push(j);
                }
            }

            let mut accepted = 0;
            for (i, record) in pre.iter().enumerate() {
                let Some(candidates) = (key.pre)(record).and_then(|v| index.get(&v)) else {
                    continue;
                };
                for &j in candidates {
                    match (pre_pair[i], post_pair[j]) {
                        (None, None) => {
                            pre_pair[i] = Some(pairs.len());
                            post_pair[j] = Some(pairs.len());
                            pairs.push(Pair {
                                pre: i,
                                post: j,
                                keys: vec![key.name.clone()],
                            });
                            accepted += 1;
                        }
                        (Some(a), Some(b)) if a == b => {
                            pairs[a].keys.push(key.name.clone());
                            report.corroborations += 1;
                        }
                        (a, b) => {
                            let ambiguity = Ambiguity {
                                key: key.name.clone(),
                                pre_row: self.label_of(record, "pre", i),
                                post_row: self.label_of(&post[j], "post", j),
                                pre_partner: a.map(|a| {
                                    let p = pairs[a].post;
                                    self.label_of(&post[p], "post", p)
                                }),
                                post_partner: b.map(|b| {
                                    let p = pairs[b].pre;
                                    self.label_of(&pre[p], "pre", p)
                                }),
                            };
                            debug!("Ambiguous candidate: {:?}", ambiguity);
                            report.ambiguities.push(ambiguity);
                        }
                    }
                }
            }
            report.pairs_by_key.insert(key.name.clone(), accepted);
        }

        report.unmatched_pre = pre_pair.iter().filter(|p| p.is_none()).count();
        report.unmatched_post = post_pair.iter().filter(|p| p.is_none()).count();

        let mut pre: Vec<Option<T>> = pre.into_iter().map(Some).collect();
        let mut post: Vec<Option<T>> = post.into_iter().map(Some).collect();
        let mut rows =
            Vec::with_capacity(pairs.len() + report.unmatched_pre + report.unmatched_post);

        for pair in pairs {
            rows.push(MatchedRow {
                pre: pre[pair.pre].take(),
                post: post[pair.post].take(),
                matched_on: pair.keys,
            });
        }
        // whatever was not taken above is unmatched
        rows.extend(pre.into_iter().flatten().map(|record| MatchedRow {
            pre: Some(record),
            post: None,
            matched_on: Vec::new(),
        }));
        rows.extend(post.into_iter().flatten().map(|record| MatchedRow {
            pre: None,
            post: Some(record),
            matched_on: Vec::new(),
        }));

        MatchOutcome { rows, report }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq)]
    struct Rec {
        row: String,
        name: Option<String>,
        id: Option<String>,
        score: i32,
    }

    fn rec(row: &str, name: Option<&str>, id: Option<&str>, score: i32) -> Rec {
        Rec {
            row: row.to_string(),
            name: name.map(str::to_string),
            id: id.map(str::to_string),
            score,
        }
    }

    fn by_id() -> KeyPair<'static, Rec> {
        KeyPair::new(
            "id",
            Box::new(|r: &Rec| r.id.clone()),
            Box::new(|r: &Rec| r.id.clone()),
        )
    }

    fn by_name() -> KeyPair<'static, Rec> {
        KeyPair::new(
            "name",
            Box::new(|r: &Rec| r.name.clone()),
            Box::new(|r: &Rec| r.name.clone()),
        )
    }

    fn matcher(keys: Vec<KeyPair<'static, Rec>>) -> MultiKeyMatcher<'static, Rec> {
        MultiKeyMatcher::new(keys).with_row_label(|r: &Rec| r.row.clone())
    }

    fn assert_complete(rows: &[MatchedRow<Rec>], pre: &[Rec], post: &[Rec]) {
        let pre_rows: Vec<&str> = rows
            .iter()
            .filter_map(|r| r.pre.as_ref())
            .map(|r| r.row.as_str())
            .collect();
        let post_rows: Vec<&str> = rows
            .iter()
            .filter_map(|r| r.post.as_ref())
            .map(|r| r.row.as_str())
            .collect();
        let unique_pre: HashSet<&str> = pre_rows.iter().copied().collect();
        let unique_post: HashSet<&str> = post_rows.iter().copied().collect();
        assert_eq!(unique_pre.len(), pre_rows.len(), "pre row duplicated");
        assert_eq!(unique_post.len(), post_rows.len(), "post row duplicated");
        assert_eq!(pre_rows.len(), pre.len(), "pre row dropped");
        assert_eq!(post_rows.len(), post.len(), "post row dropped");
        assert!(rows.iter().all(|r| r.pre.is_some() || r.post.is_some()));
    }

    #[test]
    fn same_student_on_two_keys_yields_one_row() {
        let pre = vec![rec("P1", Some("janesmith"), Some("a1"), 10)];
        let post = vec![rec("Q1", Some("janesmith"), Some("a1"), 5)];
        let out = matcher(vec![by_id(), by_name()]).run(pre, post);

        assert_eq!(out.rows.len(), 1);
        let row = &out.rows[0];
        assert!(row.is_pair());
        assert_eq!(row.pre.as_ref().unwrap().score, 10);
        assert_eq!(row.post.as_ref().unwrap().score, 5);
        assert_eq!(row.reconcile(|r| r.id.clone()), Some("a1".to_string()));
        assert_eq!(row.matched_on, vec!["id".to_string(), "name".to_string()]);
        assert_eq!(out.report.corroborations, 1);
        assert!(out.report.ambiguities.is_empty());
    }

    #[test]
    fn pre_only_record_is_kept_without_post() {
        let pre = vec![rec("P1", None, Some("b2"), 4)];
        let post = vec![rec("Q1", None, Some("c3"), 6)];
        let out = matcher(vec![by_id(), by_name()]).run(pre.clone(), post.clone());

        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0].pre.as_ref().unwrap().row, "P1");
        assert!(out.rows[0].post.is_none());
        assert_eq!(out.rows[1].post.as_ref().unwrap().row, "Q1");
        assert_eq!(out.report.unmatched_pre, 1);
        assert_eq!(out.report.unmatched_post, 1);
        assert_complete(&out.rows, &pre, &post);
    }

    #[test]
    fn record_without_identity_is_unmatched_not_dropped() {
        let pre = vec![rec("P1", None, None, 1), rec("P2", None, None, 2)];
        let post = vec![rec("Q1", None, None, 3)];
        let out = matcher(vec![by_id(), by_name()]).run(pre.clone(), post.clone());
        assert_eq!(out.rows.len(), 3);
        assert!(out.rows.iter().all(|r| !r.is_pair()));
        assert_complete(&out.rows, &pre, &post);
    }

    #[test]
    fn id_key_disambiguates_shared_names() {
        // Post rows are listed in the opposite order so a name-first pass
        // would cross the pairs.
        let pre = vec![
            rec("P1", Some("alexlee"), Some("1"), 0),
            rec("P2", Some("alexlee"), Some("2"), 0),
        ];
        let post = vec![
            rec("Q2", Some("alexlee"), Some("2"), 0),
            rec("Q1", Some("alexlee"), Some("1"), 0),
        ];
        let out = matcher(vec![by_id(), by_name()]).run(pre.clone(), post.clone());

        assert_eq!(out.rows.len(), 2);
        for row in &out.rows {
            assert_eq!(row.pre.as_ref().unwrap().id, row.post.as_ref().unwrap().id);
            assert_eq!(row.matched_on[0], "id");
        }
        assert_eq!(out.report.pairs_by_key["id"], 2);
        assert_eq!(out.report.pairs_by_key["name"], 0);
        // the cross-name candidates P1–Q2 and P2–Q1 are surfaced
        assert_eq!(out.report.ambiguities.len(), 2);
        assert_complete(&out.rows, &pre, &post);
    }

    #[test]
    fn name_first_is_deterministic_and_reported() {
        let pre = vec![
            rec("P1", Some("alexlee"), Some("1"), 0),
            rec("P2", Some("alexlee"), Some("2"), 0),
        ];
        let post = vec![
            rec("Q2", Some("alexlee"), Some("2"), 0),
            rec("Q1", Some("alexlee"), Some("1"), 0),
        ];
        let first = matcher(vec![by_name(), by_id()]).run(pre.clone(), post.clone());
        let second = matcher(vec![by_name(), by_id()]).run(pre, post);
        assert_eq!(first.rows, second.rows);

        // name wins by priority: P1 takes the first post row with that name
        let pairs: Vec<(String, String)> = first
            .rows
            .iter()
            .map(|r| (r.pre.as_ref().unwrap().row.clone(), r.post.as_ref().unwrap().row.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![("P1".to_string(), "Q2".to_string()), ("P2".to_string(), "Q1".to_string())]
        );
        let ambiguity = &first.report.ambiguities[0];
        assert_eq!(ambiguity.key, "name");
        assert_eq!(ambiguity.pre_row, "P1");
        assert_eq!(ambiguity.post_row, "Q1");
        assert_eq!(ambiguity.pre_partner.as_deref(), Some("Q2"));
        assert!(first.report.ambiguities.len() >= 2);
    }

    #[test]
    fn reconcile_falls_back_to_pre() {
        let row = MatchedRow {
            pre: Some(rec("P1", None, Some("7"), 0)),
            post: Some(rec("Q1", None, None, 0)),
            matched_on: vec![],
        };
        assert_eq!(row.reconcile(|r| r.id.clone()), Some("7".to_string()));
    }

    /// Deterministic pseudo-random fixtures over a tiny identity space so
    /// keys collide often
    fn fixture(seed: u64, n: usize, prefix: &str) -> Vec<Rec> {
        let mut state = seed;
        let mut next = move |m: u64| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) % m
        };
        (0..n)
            .map(|i| {
                let name = match next(4) {
                    0 => None,
                    v => Some(format!("n{}", v)),
                };
                let id = match next(5) {
                    0 => None,
                    v => Some(format!("{}", v)),
                };
                Rec {
                    row: format!("{}{}", prefix, i),
                    name,
                    id,
                    score: 0,
                }
            })
            .collect()
    }

    #[test]
    fn no_duplication_and_completeness_over_many_inputs() {
        for seed in 0..200u64 {
            let pre = fixture(seed, (seed % 7) as usize + 1, "P");
            let post = fixture(seed.wrapping_mul(31) + 5, (seed % 5) as usize, "Q");
            let out = matcher(vec![by_id(), by_name()]).run(pre.clone(), post.clone());
            assert_complete(&out.rows, &pre, &post);
            assert_eq!(
                out.report.total_pairs(),
                out.rows.iter().filter(|r| r.is_pair()).count()
            );
            assert_eq!(
                out.report.unmatched_pre + out.report.total_pairs(),
                pre.len()
            );
        }
    }
}
