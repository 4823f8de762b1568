//! Registrar merge.
//!
//! The roster is authoritative for course context and demographics, the
//! assessment side for scores. Assessment rows are joined to roster records
//! within an offering, first on student ID and then on login. Every roster
//! record of an assessed offering ends up in the output exactly once, with
//! empty scores when the student never took the instrument.

use crate::models::{AssessmentRow, MergedRecord, Offering, RosterRecord};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Merges supported by the student ID join
    pub merged_by_primary: usize,
    /// Merges found only through the login join
    pub merged_by_secondary: usize,
    /// Candidates rejected because the roster record or the assessment row
    /// was already merged with something else
    pub conflicts: usize,
    /// Roster records of assessed offerings appended without scores
    pub roster_only: usize,
    /// Roster records of offerings this instrument never assessed
    pub roster_excluded: usize,
    /// Assessment rows that matched no roster record
    pub unrostered: usize,
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub records: Vec<MergedRecord>,
    pub report: MergeReport,
}

type RosterIndex = HashMap<(Offering, String), Vec<usize>>;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    assessment: usize,
    roster: usize,
}

pub struct RegistrarMerge<'a> {
    roster: &'a [RosterRecord],
    by_student_id: RosterIndex,
    by_login: RosterIndex,
    keep_unrostered: bool,
}

impl<'a> RegistrarMerge<'a> {
    pub fn new(roster: &'a [RosterRecord]) -> Self {
        let mut by_student_id = RosterIndex::new();
        let mut by_login = RosterIndex::new();
        for (j, record) in roster.iter().enumerate() {
            by_student_id
                .entry((record.offering(), record.student_id.clone()))
                .or_default()
                .push(j);
            if let Some(login) = record.login.as_deref() {
                by_login
                    .entry((record.offering(), login.to_string()))
                    .or_default()
                    .push(j);
            }
        }
        Self {
            roster,
            by_student_id,
            by_login,
            keep_unrostered: false,
        }
    }

    /// Keep assessment rows with no roster match, with empty roster fields
    pub fn keep_unrostered(mut self, keep: bool) -> Self {
        self.keep_unrostered = keep;
        self
    }

    pub fn run(&self, name: &str, assessments: Vec<AssessmentRow>) -> MergeOutcome {
        let mut report = MergeReport::default();

        let primary = candidates(&assessments, |a| a.primary_id.as_deref(), &self.by_student_id);
        let secondary = candidates(&assessments, |a| a.secondary_id.as_deref(), &self.by_login);
        let primary_pairs: HashSet<(usize, usize)> =
            primary.iter().map(|c| (c.assessment, c.roster)).collect();
        let union: Vec<Candidate> = primary.into_iter().chain(secondary).collect();

        // Keep-last over the union: walk from the end and take a candidate
        // only while both of its rows are still free.
        let mut roster_used = vec![false; self.roster.len()];
        let mut assessment_used = vec![false; assessments.len()];
        let mut accepted_pairs: HashSet<(usize, usize)> = HashSet::new();
        let mut accepted: Vec<usize> = Vec::new();
        for (k, c) in union.iter().enumerate().rev() {
            if accepted_pairs.contains(&(c.assessment, c.roster)) {
                continue;
            }
            if roster_used[c.roster] || assessment_used[c.assessment] {
                debug!(
                    "{}: merge conflict for roster student {} in {}",
                    name, self.roster[c.roster].student_id, self.roster[c.roster].course
                );
                report.conflicts += 1;
                continue;
            }
            roster_used[c.roster] = true;
            assessment_used[c.assessment] = true;
            accepted_pairs.insert((c.assessment, c.roster));
            accepted.push(k);
        }
        accepted.reverse();

        let assessed: BTreeSet<Offering> =
            assessments.iter().map(AssessmentRow::offering).collect();
        let mut slots: Vec<Option<AssessmentRow>> = assessments.into_iter().map(Some).collect();
        let mut records = Vec::with_capacity(self.roster.len());

        for k in accepted {
            let c = union[k];
            if primary_pairs.contains(&(c.assessment, c.roster)) {
                report.merged_by_primary += 1;
            } else {
                report.merged_by_secondary += 1;
            }
            records.push(MergedRecord {
                assessment_name: name.to_string(),
                assessment: slots[c.assessment].take(),
                roster: Some(self.roster[c.roster].clone()),
            });
        }

        for (j, record) in self.roster.iter().enumerate() {
            if roster_used[j] {
                continue;
            }
            if assessed.contains(&record.offering()) {
                report.roster_only += 1;
                records.push(MergedRecord {
                    assessment_name: name.to_string(),
                    assessment: None,
                    roster: Some(record.clone()),
                });
            } else {
                report.roster_excluded += 1;
            }
        }

        for row in slots.into_iter().flatten() {
            report.unrostered += 1;
            if self.keep_unrostered {
                records.push(MergedRecord {
                    assessment_name: name.to_string(),
                    assessment: Some(row),
                    roster: None,
                });
            }
        }

        if report.conflicts > 0 {
            warn!(
                "{}: {} registrar merge conflicts resolved by keeping the last candidate",
                name, report.conflicts
            );
        }
        info!(
            "{}: merged {} by student ID, {} by login; {} enrolled without scores; {} assessment rows without roster record{}",
            name,
            report.merged_by_primary,
            report.merged_by_secondary,
            report.roster_only,
            report.unrostered,
            if self.keep_unrostered { " (kept)" } else { " (dropped)" }
        );

        MergeOutcome { records, report }
    }
}

/// Join candidates in assessment order, then roster order
fn candidates(
    assessments: &[AssessmentRow],
    id: impl Fn(&AssessmentRow) -> Option<&str>,
    index: &RosterIndex,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for (i, row) in assessments.iter().enumerate() {
        let Some(value) = id(row) else { continue };
        if let Some(hits) = index.get(&(row.offering(), value.to_string())) {
            out.extend(hits.iter().map(|&j| Candidate {
                assessment: i,
                roster: j,
            }));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrolled(id: &str, login: &str, course: &str) -> RosterRecord {
        RosterRecord {
            student_id: id.to_string(),
            login: Some(login.to_string()),
            course: course.to_string(),
            term: "2017FA".to_string(),
            year: "2017".to_string(),
            semester: "FA".to_string(),
            class_id: format!("2017FA-{}", &course[1..]),
            instruction: "Old".to_string(),
            ..RosterRecord::default()
        }
    }

    fn assessed(
        primary: Option<&str>,
        secondary: Option<&str>,
        course: &str,
        pre: i32,
    ) -> AssessmentRow {
        AssessmentRow {
            primary_id: primary.map(str::to_string),
            secondary_id: secondary.map(str::to_string),
            course: course.to_string(),
            year: "2017".to_string(),
            semester: "FA".to_string(),
            pre_score: Some(pre),
            post_score: None,
            intended_major: None,
        }
    }

    fn ids(records: &[MergedRecord]) -> Vec<String> {
        records.iter().map(|r| r.field("Student_ID")).collect()
    }

    #[test]
    fn unassessed_classmates_are_kept_with_empty_scores() {
        let roster = vec![
            enrolled("X", "x1", "P1112"),
            enrolled("Y", "y1", "P1112"),
            enrolled("Z", "z1", "P1112"),
        ];
        let rows = vec![
            assessed(Some("X"), None, "P1112", 10),
            assessed(Some("Y"), None, "P1112", 7),
        ];
        let out = RegistrarMerge::new(&roster).run("CSEM", rows);

        assert_eq!(ids(&out.records), vec!["X", "Y", "Z"]);
        assert_eq!(out.records[0].field("PreScores"), "10");
        assert_eq!(out.records[2].field("PreScores"), "");
        assert_eq!(out.report.roster_only, 1);
    }

    #[test]
    fn login_join_catches_missing_student_id() {
        let roster = vec![enrolled("100", "abc12", "P2213")];
        let rows = vec![assessed(None, Some("abc12"), "P2213", 4)];
        let out = RegistrarMerge::new(&roster).run("MBT", rows);

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].field("Student_ID"), "100");
        assert_eq!(out.records[0].field("PreScores"), "4");
        assert_eq!(out.report.merged_by_secondary, 1);
        assert_eq!(out.report.merged_by_primary, 0);
    }

    #[test]
    fn both_joins_agreeing_merge_once() {
        let roster = vec![enrolled("100", "abc12", "P2213")];
        let rows = vec![assessed(Some("100"), Some("abc12"), "P2213", 4)];
        let out = RegistrarMerge::new(&roster).run("MBT", rows);

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.report.merged_by_primary, 1);
        assert_eq!(out.report.conflicts, 0);
    }

    #[test]
    fn unassessed_offering_is_excluded() {
        let roster = vec![enrolled("X", "x1", "P1112"), enrolled("W", "w1", "P2213")];
        let rows = vec![assessed(Some("X"), None, "P1112", 3)];
        let out = RegistrarMerge::new(&roster).run("CSEM", rows);

        assert_eq!(ids(&out.records), vec!["X"]);
        assert_eq!(out.report.roster_excluded, 1);
    }

    #[test]
    fn roster_record_never_duplicated() {
        // Two assessment rows point at the same student; the later one wins.
        let roster = vec![enrolled("X", "x1", "P1112"), enrolled("Y", "y1", "P1112")];
        let rows = vec![
            assessed(Some("X"), None, "P1112", 1),
            assessed(None, Some("x1"), "P1112", 2),
        ];
        let out = RegistrarMerge::new(&roster).run("CSEM", rows);

        assert_eq!(ids(&out.records), vec!["X", "Y"]);
        assert_eq!(out.records[0].field("PreScores"), "2");
        assert_eq!(out.report.conflicts, 1);
        assert_eq!(out.report.unrostered, 1);
    }

    #[test]
    fn unrostered_rows_dropped_unless_kept() {
        let roster = vec![enrolled("X", "x1", "P1112")];
        let rows = || vec![assessed(Some("Q"), Some("q9"), "P1112", 5)];

        let dropped = RegistrarMerge::new(&roster).run("CSEM", rows());
        assert_eq!(ids(&dropped.records), vec!["X"]);
        assert_eq!(dropped.report.unrostered, 1);

        let kept = RegistrarMerge::new(&roster).keep_unrostered(true).run("CSEM", rows());
        assert_eq!(ids(&kept.records), vec!["X", "Q"]);
        assert_eq!(kept.records[1].field("Netid"), "q9");
        assert_eq!(kept.records[1].field("Class_ID"), "");
    }

    #[test]
    fn every_assessed_roster_record_appears_once() {
        let roster: Vec<RosterRecord> = (0..12)
            .map(|n| {
                let course = if n % 3 == 0 { "P2213" } else { "P1112" };
                enrolled(&format!("S{n}"), &format!("s{n}"), course)
            })
            .collect();
        let rows: Vec<AssessmentRow> = (0..20)
            .map(|n| {
                let s = n % 7;
                let course = if s % 3 == 0 { "P2213" } else { "P1112" };
                if n % 2 == 0 {
                    assessed(Some(&format!("S{s}")), None, course, n)
                } else {
                    assessed(None, Some(&format!("s{s}")), course, n)
                }
            })
            .collect();
        let out = RegistrarMerge::new(&roster).run("CSEM", rows);

        for record in &roster {
            let hits = out
                .records
                .iter()
                .filter(|r| r.roster.as_ref() == Some(record))
                .count();
            assert_eq!(hits, 1, "{} appears {} times", record.student_id, hits);
        }
    }
}
