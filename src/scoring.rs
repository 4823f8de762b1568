//! Answer-key scoring.
//!
//! Exact keys award one point per matching item. Likert keys collapse a
//! 1–5 response to disagree/neutral/agree (−1/0/+1) and multiply by the
//! item's expert polarity, so agreeing with experts earns +1 and opposing
//! them −1. Unanswered or unreadable items are worth 0.

use crate::config::{AnswerKey, AnswerKeyFile, InvalidMarker, LikertItem, Polarity};
use crate::error::{PipelineError, Result};
use crate::identity::canonical_number;
use crate::models::{RawResponse, Score, ScoredResponse};
use crate::reader::Table;
use std::slice;
use tracing::{debug, info};

pub struct Scorer<'a> {
    key: &'a AnswerKey,
    invalid: Option<&'a InvalidMarker>,
}

impl<'a> Scorer<'a> {
    pub fn new(key: &'a AnswerKey, invalid: Option<&'a InvalidMarker>) -> Self {
        Self { key, invalid }
    }

    pub fn score(&self, raw: RawResponse) -> ScoredResponse {
        let score = if self.is_invalid(&raw) {
            None
        } else {
            Some(self.score_items(&raw))
        };
        ScoredResponse { raw, score }
    }

    pub fn score_all(&self, raws: Vec<RawResponse>) -> Vec<ScoredResponse> {
        raws.into_iter().map(|raw| self.score(raw)).collect()
    }

    fn is_invalid(&self, raw: &RawResponse) -> bool {
        let Some(marker) = self.invalid else {
            return false;
        };
        raw.response(&marker.item)
            .map(|value| marker.values.iter().any(|v| same_response(v, value)))
            .unwrap_or(false)
    }

    fn score_items(&self, raw: &RawResponse) -> Score {
        let mut score = Score::default();
        let mut add = |section: Option<&String>, points: i32| {
            score.total += points;
            if let Some(section) = section {
                *score.sections.entry(section.clone()).or_insert(0) += points;
            }
        };

        match self.key {
            AnswerKey::Exact { items } => {
                for item in items {
                    let points = raw
                        .response(&item.item)
                        .map(|r| i32::from(same_response(r, &item.answer)))
                        .unwrap_or(0);
                    add(item.section.as_ref(), points);
                }
            }
            AnswerKey::Likert { items } => {
                for item in items {
                    let points = raw
                        .response(&item.item)
                        .and_then(collapse_likert)
                        .map(|c| c * item.polarity.weight())
                        .unwrap_or(0);
                    add(item.section.as_ref(), points);
                }
            }
        }
        score
    }

    /// Highest total a response can reach under this key
    pub fn max_total(&self) -> i32 {
        match self.key {
            AnswerKey::Exact { items } => items.len() as i32,
            AnswerKey::Likert { items } => {
                items.iter().map(|i| i.polarity.weight().abs()).sum()
            }
        }
    }
}

/// Build a Likert key from an expert-response sheet. Control items carry
/// no points and are left out; the item-name suffix picks the section.
pub fn load_likert_key(source: &AnswerKeyFile) -> Result<AnswerKey> {
    let table = Table::read(&source.file, 0)?;
    let item_col = table.require(slice::from_ref(&source.item_column))?;
    let polarity_col = table.require(slice::from_ref(&source.polarity_column))?;

    let mut items = Vec::new();
    for row in table.rows() {
        let Some(item) = row.at(item_col) else {
            continue;
        };
        match row.at(polarity_col).and_then(Polarity::from_code) {
            Some(Polarity::Control) => {}
            Some(polarity) => items.push(LikertItem {
                item: item.to_string(),
                polarity,
                section: source
                    .suffix_sections
                    .iter()
                    .find(|(suffix, _)| item.ends_with(suffix.as_str()))
                    .map(|(_, section)| section.clone()),
            }),
            None => debug!("{}: no expert polarity for {}", source.file, item),
        }
    }

    if items.is_empty() {
        return Err(PipelineError::Config(format!(
            "{} lists no scorable items",
            source.file
        )));
    }
    info!("Loaded {} answer-key items from {}", items.len(), source.file);
    Ok(AnswerKey::Likert { items })
}

/// Numeric-aware comparison so `2` and `2.0` agree
pub(crate) fn same_response(a: &str, b: &str) -> bool {
    canonical_number(a).eq_ignore_ascii_case(&canonical_number(b))
}

fn collapse_likert(response: &str) -> Option<i32> {
    match canonical_number(response).as_str() {
        "1" | "2" => Some(-1),
        "3" => Some(0),
        "4" | "5" => Some(1),
        _ => None,
    }
}
