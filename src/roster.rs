use crate::config::{
    AttributeRule, DedupPolicy, InstructionRule, MemberList, RegistrarConfig, RosterFilter,
};
use crate::consent::ConsentList;
use crate::dedup::{dedup, KeyFn};
use crate::error::Result;
use crate::identity::{canonical_number, normalize_id, normalize_login};
use crate::models::RosterRecord;
use crate::reader::{Row, Table};
use std::collections::{BTreeMap, HashSet};
use std::slice;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterReport {
    pub rows_read: usize,
    pub missing_identity: usize,
    pub repeats_dropped: usize,
    pub opted_out: usize,
    pub ineligible: usize,
}

#[derive(Debug)]
pub struct RosterOutcome {
    pub records: Vec<RosterRecord>,
    pub report: RosterReport,
}

struct Candidate {
    record: RosterRecord,
    eligible: bool,
}

/// Turns the registrar extract into one record per (student, course)
pub struct RosterBuilder<'a> {
    config: &'a RegistrarConfig,
    consent: Option<&'a ConsentList>,
}

impl<'a> RosterBuilder<'a> {
    pub fn new(config: &'a RegistrarConfig, consent: Option<&'a ConsentList>) -> Self {
        Self { config, consent }
    }

    pub fn load(&self) -> Result<RosterOutcome> {
        let table = Table::read(&self.config.file, 0)?;
        let members = self
            .config
            .instruction
            .rules
            .iter()
            .map(|rule| rule.members.as_ref().map(load_members).transpose())
            .collect::<Result<Vec<_>>>()?;
        let outcome = self.build(&table, &members)?;
        info!(
            "Roster: {} rows read, {} kept ({} repeats, {} opted out, {} ineligible, {} without ID)",
            outcome.report.rows_read,
            outcome.records.len(),
            outcome.report.repeats_dropped,
            outcome.report.opted_out,
            outcome.report.ineligible,
            outcome.report.missing_identity
        );
        Ok(outcome)
    }

    /// `members[i]` is the login set for instruction rule `i`, if it has one
    pub fn build(
        &self,
        table: &Table,
        members: &[Option<HashSet<String>>],
    ) -> Result<RosterOutcome> {
        let cols = &self.config.columns;
        let id_col = table.require(slice::from_ref(&cols.student_id))?;
        let login_col = table.require(slice::from_ref(&cols.login))?;
        let term_col = table.require(slice::from_ref(&cols.term))?;
        let course_col = table.require(slice::from_ref(&cols.course))?;
        self.warn_missing_sources(table);

        let mut report = RosterReport {
            rows_read: table.len(),
            ..RosterReport::default()
        };

        let mut candidates = Vec::new();
        for row in table.rows() {
            let (Some(student_id), Some(term), Some(course_number)) = (
                normalize_id(row.at(id_col)),
                row.at(term_col),
                row.at(course_col).map(canonical_number),
            ) else {
                report.missing_identity += 1;
                continue;
            };
            let login = normalize_login(row.at(login_col));
            let course = format!("{}{}", self.config.course_prefix, course_number);
            let attributes: BTreeMap<String, String> = self
                .config
                .attributes
                .iter()
                .filter_map(|rule| derive_attribute(rule, &row).map(|v| (rule.name.clone(), v)))
                .collect();
            let eligible = self
                .config
                .filters
                .iter()
                .all(|filter| passes(filter, &attributes, &row));
            let instruction = self.instruction_for(&course, term, login.as_deref(), members);

            candidates.push(Candidate {
                record: RosterRecord {
                    student_id,
                    login,
                    year: term.chars().take(4).collect(),
                    semester: term_suffix(term),
                    class_id: format!("{}-{}", term, course_number),
                    sequence: self.config.sequences.get(&course).cloned(),
                    course_content: self.config.course_content.get(&course).cloned(),
                    instruction,
                    term: term.to_string(),
                    course,
                    attributes,
                },
                eligible,
            });
        }

        // Oldest term first, so keep-last retains the most recent offering
        // of a repeated course. Unknown terms sort after known ones.
        candidates.sort_by_key(|c| self.term_rank(&c.record.term));
        let repeat_key: KeyFn<'_, Candidate> = Box::new(|c: &Candidate| {
            Some(format!("{}\u{1f}{}", c.record.student_id, c.record.course))
        });
        let deduped = dedup(candidates, slice::from_ref(&repeat_key), DedupPolicy::KeepLast);
        report.repeats_dropped = deduped.dropped;

        let mut records = Vec::with_capacity(deduped.kept.len());
        for candidate in deduped.kept {
            let record = candidate.record;
            if self
                .consent
                .is_some_and(|c| c.excludes_login(&record.course, record.login.as_deref()))
            {
                report.opted_out += 1;
            } else if !candidate.eligible {
                report.ineligible += 1;
            } else {
                records.push(record);
            }
        }

        Ok(RosterOutcome { records, report })
    }

    fn term_rank(&self, term: &str) -> usize {
        self.config
            .term_order
            .iter()
            .position(|t| t == term)
            .unwrap_or(self.config.term_order.len())
    }

    fn instruction_for(
        &self,
        course: &str,
        term: &str,
        login: Option<&str>,
        members: &[Option<HashSet<String>>],
    ) -> String {
        let instruction = &self.config.instruction;
        instruction
            .rules
            .iter()
            .enumerate()
            .find(|(i, rule)| {
                rule_applies(rule, course, term)
                    && match members.get(*i).and_then(|m| m.as_ref()) {
                        Some(set) => login.is_some_and(|l| set.contains(l)),
                        None => rule.members.is_none(),
                    }
            })
            .map(|(_, rule)| rule.label.clone())
            .unwrap_or_else(|| instruction.default_label.clone())
    }

    fn warn_missing_sources(&self, table: &Table) {
        for rule in &self.config.attributes {
            for source in &rule.sources {
                if table.column(&source.column).is_none() {
                    warn!(
                        "Registrar file has no column '{}' (attribute {})",
                        source.column, rule.name
                    );
                }
            }
        }
    }
}

fn term_suffix(term: &str) -> String {
    let chars: Vec<char> = term.chars().collect();
    chars[chars.len().saturating_sub(2)..].iter().collect()
}

fn rule_applies(rule: &InstructionRule, course: &str, term: &str) -> bool {
    rule.course == course
        && (rule.terms.is_empty() || rule.terms.iter().any(|t| t == term))
        && !rule.except_terms.iter().any(|t| t == term)
}

/// Combine an attribute's sources: lookup tables first, then the largest
/// numeric value (or the first value if none is numeric), then the value
/// map. Missing sources fall back to the default.
fn derive_attribute(rule: &AttributeRule, row: &Row<'_>) -> Option<String> {
    let values: Vec<String> = rule
        .sources
        .iter()
        .filter_map(|source| {
            let raw = row.get(&source.column)?;
            if source.table.is_empty() {
                Some(raw.to_string())
            } else {
                source.table.get(&canonical_number(raw)).cloned()
            }
        })
        .collect();

    let combined = values
        .iter()
        .filter_map(|v| v.parse::<f64>().ok().map(|n| (n, v)))
        .fold(None::<(f64, &String)>, |best, (n, v)| match best {
            Some((b, _)) if b >= n => best,
            _ => Some((n, v)),
        })
        .map(|(_, v)| v.clone())
        .or_else(|| values.first().cloned());

    match combined {
        None => rule.default.clone(),
        Some(value) if rule.map.is_empty() => Some(value),
        Some(value) => rule
            .map
            .get(&canonical_number(&value))
            .or_else(|| rule.map.get(&value))
            .cloned()
            .or_else(|| rule.default.clone()),
    }
}

fn passes(filter: &RosterFilter, attributes: &BTreeMap<String, String>, row: &Row<'_>) -> bool {
    let value = |column: &str| -> Option<String> {
        attributes
            .get(column)
            .cloned()
            .or_else(|| row.get(column).map(str::to_string))
    };
    match filter {
        RosterFilter::OneOf { column, values } => value(column)
            .map(|v| values.iter().any(|allowed| *allowed == v))
            .unwrap_or(false),
        RosterFilter::AnyPresent { columns } => columns.iter().any(|c| value(c).is_some()),
    }
}

/// Logins listed in an instruction-variant file, optionally filtered on one
/// column
pub fn load_members(list: &MemberList) -> Result<HashSet<String>> {
    let table = Table::read(&list.file, 0)?;
    let login_col = table.require(slice::from_ref(&list.login_column))?;
    let filter = match (&list.filter_column, &list.filter_value) {
        (Some(column), Some(value)) => Some((
            table.require(slice::from_ref(column))?,
            canonical_number(value),
        )),
        _ => None,
    };

    Ok(table
        .rows()
        .filter(|row| match &filter {
            Some((col, wanted)) => row.at(*col).map(canonical_number).as_ref() == Some(wanted),
            None => true,
        })
        .filter_map(|row| normalize_login(row.at(login_col)))
        .collect())
}
