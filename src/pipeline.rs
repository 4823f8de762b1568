//! Per-instrument orchestration.
//!
//! Each instrument runs independently: clean and score both sessions of
//! every administration, link pre to post, then merge with the roster. A
//! file that cannot be read fails its instrument only; the others still run.

use crate::config::{
    CategoryRule, Config, IdentifierMode, IdentityField, InstrumentConfig, Session,
};
use crate::consent::ConsentList;
use crate::dedup::{dedup, identity_key, KeyFn};
use crate::error::{PipelineError, Result};
use crate::matcher::{KeyPair, MatchReport, MatchedRow, MultiKeyMatcher};
use crate::merge::{MergeReport, RegistrarMerge};
use crate::models::{AssessmentRow, MergedRecord, RosterRecord, ScoredResponse};
use crate::reader::ResponseReader;
use crate::roster::{RosterBuilder, RosterReport};
use crate::scoring::{load_likert_key, same_response, Scorer};
use tracing::{error, info, warn};

/// Row counts from cleaning one or more survey exports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleaningReport {
    pub rows_read: usize,
    pub too_fast: usize,
    pub failed_attention: usize,
    pub duplicates: usize,
    pub opted_out: usize,
    pub kept: usize,
}

impl CleaningReport {
    fn absorb(&mut self, other: &CleaningReport) {
        self.rows_read += other.rows_read;
        self.too_fast += other.too_fast;
        self.failed_attention += other.failed_attention;
        self.duplicates += other.duplicates;
        self.opted_out += other.opted_out;
        self.kept += other.kept;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentReport {
    pub pre: CleaningReport,
    pub post: CleaningReport,
    pub matching: MatchReport,
    pub merge: MergeReport,
}

/// One row of the matched pre/post table
#[derive(Debug, Clone, PartialEq)]
pub struct MasterRow {
    pub pre_row: Option<String>,
    pub post_row: Option<String>,
    pub full_name: Option<String>,
    pub matched_on: Vec<String>,
    pub assessment: AssessmentRow,
}

#[derive(Debug)]
pub struct InstrumentRun {
    pub name: String,
    pub master: Vec<MasterRow>,
    pub merged: Vec<MergedRecord>,
    pub report: InstrumentReport,
}

#[derive(Debug, Clone)]
pub struct InstrumentFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug)]
pub struct PipelineSummary {
    pub roster: RosterReport,
    pub runs: Vec<InstrumentRun>,
    pub failures: Vec<InstrumentFailure>,
}

impl PipelineSummary {
    /// Merged rows of every instrument, in configuration order
    pub fn combined(&self) -> impl Iterator<Item = &MergedRecord> {
        self.runs.iter().flat_map(|run| run.merged.iter())
    }
}

pub struct Pipeline<'a> {
    config: &'a Config,
    roster: Vec<RosterRecord>,
    roster_report: RosterReport,
    consent: Option<ConsentList>,
}

impl<'a> Pipeline<'a> {
    /// Load the consent list and build the roster. Both are shared by every
    /// instrument, so failures here abort the run.
    pub fn load(config: &'a Config) -> Result<Self> {
        let consent = config
            .consent
            .as_ref()
            .map(|c| ConsentList::load(c, &config.registrar.course_prefix))
            .transpose()?;
        let roster = RosterBuilder::new(&config.registrar, consent.as_ref()).load()?;
        Ok(Self::from_parts(config, roster.records, roster.report, consent))
    }

    pub fn from_parts(
        config: &'a Config,
        roster: Vec<RosterRecord>,
        roster_report: RosterReport,
        consent: Option<ConsentList>,
    ) -> Self {
        Self {
            config,
            roster,
            roster_report,
            consent,
        }
    }

    pub fn roster(&self) -> &[RosterRecord] {
        &self.roster
    }

    /// Run the named instruments, or all of them when `only` is empty
    pub fn run(&self, only: &[String]) -> Result<PipelineSummary> {
        if let Some(unknown) = only
            .iter()
            .find(|name| !self.config.instruments.iter().any(|i| &i.name == *name))
        {
            return Err(PipelineError::Config(format!(
                "unknown instrument '{}'",
                unknown
            )));
        }

        let mut summary = PipelineSummary {
            roster: self.roster_report.clone(),
            runs: Vec::new(),
            failures: Vec::new(),
        };
        for instrument in self
            .config
            .instruments
            .iter()
            .filter(|i| only.is_empty() || only.contains(&i.name))
        {
            match self.run_instrument(instrument) {
                Ok(run) => summary.runs.push(run),
                Err(e) => {
                    error!("{}: skipped: {}", instrument.name, e);
                    summary.failures.push(InstrumentFailure {
                        name: instrument.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(summary)
    }

    pub fn run_instrument(&self, instrument: &InstrumentConfig) -> Result<InstrumentRun> {
        info!("{}: {} session(s)", instrument.name, instrument.sessions.len());
        let loaded_key = instrument
            .answer_key_file
            .as_ref()
            .map(load_likert_key)
            .transpose()?;
        let answer_key = loaded_key.as_ref().unwrap_or(&instrument.answer_key);
        let scorer = Scorer::new(answer_key, instrument.invalid_response.as_ref());
        let matcher = build_matcher(instrument);

        let mut report = InstrumentReport::default();
        let mut master = Vec::new();
        for session in &instrument.sessions {
            let reader = ResponseReader::new(&instrument.columns, session.skip_rows(instrument));
            let (pre, pre_report) =
                self.clean(instrument, &reader, &scorer, session, &session.pre)?;
            let (post, post_report) =
                self.clean(instrument, &reader, &scorer, session, &session.post)?;
            report.pre.absorb(&pre_report);
            report.post.absorb(&post_report);

            let outcome = matcher.run(pre, post);
            for ambiguity in &outcome.report.ambiguities {
                warn!(
                    "{}: {} {}{} ambiguous on {}: pre {} (paired with {}) / post {} (paired with {})",
                    instrument.name,
                    session.course,
                    session.year,
                    session.semester,
                    ambiguity.key,
                    ambiguity.pre_row,
                    ambiguity.pre_partner.as_deref().unwrap_or("-"),
                    ambiguity.post_row,
                    ambiguity.post_partner.as_deref().unwrap_or("-")
                );
            }
            info!(
                "{}: {} {}{}: {} pairs, {} pre only, {} post only",
                instrument.name,
                session.course,
                session.year,
                session.semester,
                outcome.report.total_pairs(),
                outcome.report.unmatched_pre,
                outcome.report.unmatched_post
            );
            master.extend(
                outcome
                    .rows
                    .into_iter()
                    .map(|row| master_row(instrument, session, row)),
            );
            report.matching.absorb(outcome.report);
        }

        let assessments = master.iter().map(|m| m.assessment.clone()).collect();
        let merge = RegistrarMerge::new(&self.roster)
            .keep_unrostered(instrument.keep_unrostered)
            .run(&instrument.name, assessments);
        report.merge = merge.report;

        Ok(InstrumentRun {
            name: instrument.name.clone(),
            master,
            merged: merge.records,
            report,
        })
    }

    /// Read one export and drop what should not be linked: rushed
    /// responses, failed attention checks, repeat submissions and opt-outs
    fn clean(
        &self,
        instrument: &InstrumentConfig,
        reader: &ResponseReader<'_>,
        scorer: &Scorer<'_>,
        session: &Session,
        path: &str,
    ) -> Result<(Vec<ScoredResponse>, CleaningReport)> {
        let raws = reader.read_file(path, &session.course)?;
        let mut report = CleaningReport {
            rows_read: raws.len(),
            ..CleaningReport::default()
        };

        let mut kept = Vec::with_capacity(raws.len());
        for raw in raws {
            if let (Some(min), Some(secs)) = (instrument.min_duration_secs, raw.duration_secs) {
                if secs < min {
                    report.too_fast += 1;
                    continue;
                }
            }
            if let Some(check) = &instrument.attention_check {
                let passed = raw
                    .response(&check.item)
                    .is_some_and(|v| check.accept.iter().any(|a| same_response(a, v)));
                if !passed {
                    report.failed_attention += 1;
                    continue;
                }
            }
            kept.push(raw);
        }

        let keys: Vec<KeyFn<'_, ScoredResponse>> =
            instrument.dedup_keys.iter().map(|k| identity_key(k)).collect();
        let deduped = dedup(scorer.score_all(kept), &keys, instrument.dedup_policy);
        report.duplicates = deduped.dropped;

        let mut responses = deduped.kept;
        if let Some(consent) = &self.consent {
            let before = responses.len();
            responses.retain(|r| {
                let name = r.identity(IdentityField::FullName);
                !consent.excludes_name(&r.raw.course, name.as_deref())
            });
            report.opted_out = before - responses.len();
        }
        report.kept = responses.len();

        info!(
            "{}: {} of {} rows kept from {} ({} too fast, {} failed attention check, {} duplicates, {} opted out)",
            instrument.name,
            report.kept,
            report.rows_read,
            path,
            report.too_fast,
            report.failed_attention,
            report.duplicates,
            report.opted_out
        );
        Ok((responses, report))
    }
}

fn build_matcher(instrument: &InstrumentConfig) -> MultiKeyMatcher<'_, ScoredResponse> {
    let keys = instrument
        .match_keys
        .iter()
        .map(|key| KeyPair::new(key.name.clone(), identity_key(&key.pre), identity_key(&key.post)))
        .collect();
    MultiKeyMatcher::new(keys).with_row_label(|r: &ScoredResponse| r.raw.row_id.clone())
}

fn master_row(
    instrument: &InstrumentConfig,
    session: &Session,
    row: MatchedRow<ScoredResponse>,
) -> MasterRow {
    let login = row.reconcile(|r| r.raw.login.clone());
    let student_id = row.reconcile(|r| r.raw.student_id.clone());
    let (primary_id, secondary_id) = match instrument.identifier_mode {
        IdentifierMode::Separate => (student_id, login),
        IdentifierMode::SingleColumn => {
            let id = login.or(student_id);
            (id.clone(), id)
        }
    };

    let section = instrument.reported_section.as_deref();
    let reported = |side: &Option<ScoredResponse>| {
        side.as_ref()
            .and_then(|r| r.score.as_ref())
            .map(|s| s.reported(section))
    };

    let assessment = AssessmentRow {
        primary_id,
        secondary_id,
        course: row
            .reconcile(|r| Some(r.raw.course.clone()).filter(|c| !c.is_empty()))
            .unwrap_or_else(|| session.course.clone()),
        year: session.year.clone(),
        semester: session.semester.clone(),
        pre_score: reported(&row.pre),
        post_score: reported(&row.post),
        intended_major: instrument
            .intended_major
            .as_ref()
            .and_then(|rule| row.reconcile(|r| categorize(rule, r))),
    };

    MasterRow {
        pre_row: row.pre.as_ref().map(|r| r.raw.row_id.clone()),
        post_row: row.post.as_ref().map(|r| r.raw.row_id.clone()),
        full_name: row.reconcile(|r| r.identity(IdentityField::FullName)),
        matched_on: row.matched_on,
        assessment,
    }
}

/// First category listing the response
fn categorize(rule: &CategoryRule, response: &ScoredResponse) -> Option<String> {
    let value = response.raw.response(&rule.item)?;
    rule.categories
        .iter()
        .find(|c| c.values.iter().any(|v| same_response(v, value)))
        .map(|c| c.label.clone())
}
