use crate::config::ColumnMap;
use crate::error::{PipelineError, Result};
use crate::identity::{canonical_number, normalize_id, normalize_login, normalize_name};
use crate::models::RawResponse;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

const TIMESTAMP_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
];

/// A delimited file addressed by header name
#[derive(Debug)]
pub struct Table {
    path: PathBuf,
    headers: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<csv::StringRecord>,
}

impl Table {
    /// Read a CSV file; `skip_rows` descriptive rows after the header are
    /// discarded (survey tools put question text there)
    pub fn read(path: impl AsRef<Path>, skip_rows: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| PipelineError::csv(path, e))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| PipelineError::csv(path, e))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut index = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            // first occurrence wins for repeated headers
            index.entry(header.clone()).or_insert(i);
        }

        let mut rows = Vec::new();
        for record in reader.records().skip(skip_rows) {
            rows.push(record.map_err(|e| PipelineError::csv(path, e))?);
        }
        debug!("Read {} rows from {}", rows.len(), path.display());

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            index,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// First candidate header present in the file
    pub fn resolve(&self, candidates: &[String]) -> Option<usize> {
        candidates.iter().find_map(|c| self.column(c))
    }

    /// Like `resolve`, but a mapped column must exist
    pub fn require(&self, candidates: &[String]) -> Result<usize> {
        self.resolve(candidates)
            .ok_or_else(|| PipelineError::MissingColumn {
                path: self.path.clone(),
                column: candidates.join(" | "),
            })
    }

    /// Optional mapping: unmapped is fine, mapped-but-absent is an error
    fn require_if_mapped(&self, candidates: &[String]) -> Result<Option<usize>> {
        if candidates.is_empty() {
            Ok(None)
        } else {
            self.require(candidates).map(Some)
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |record| Row {
            table: self,
            record,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    record: &'a csv::StringRecord,
}

impl<'a> Row<'a> {
    /// Trimmed cell; `None` when empty or past the end of a short row
    pub fn at(&self, index: usize) -> Option<&'a str> {
        self.record
            .get(index)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.table.column(column).and_then(|i| self.at(i))
    }

    fn at_opt(&self, index: Option<usize>) -> Option<&'a str> {
        index.and_then(|i| self.at(i))
    }

    /// Every non-empty cell keyed by header
    pub fn cells(&self) -> BTreeMap<String, String> {
        self.table
            .headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| self.at(i).map(|v| (h.clone(), v.to_string())))
            .collect()
    }
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Newer survey exports carry a row of `{"ImportId":"..."}` records under
/// the question text
fn is_import_id(cell: &str) -> bool {
    cell.starts_with('{') && cell.contains("\"ImportId\"")
}

/// Reads one survey export into normalized responses
pub struct ResponseReader<'a> {
    columns: &'a ColumnMap,
    skip_rows: usize,
}

impl<'a> ResponseReader<'a> {
    pub fn new(columns: &'a ColumnMap, skip_rows: usize) -> Self {
        Self { columns, skip_rows }
    }

    pub fn read_file(
        &self,
        path: impl AsRef<Path>,
        session_course: &str,
    ) -> Result<Vec<RawResponse>> {
        let table = Table::read(path, self.skip_rows)?;
        self.parse_table(&table, session_course)
    }

    /// Map a table onto responses. Missing mapped columns reject the file;
    /// nothing at row level does.
    pub fn parse_table(&self, table: &Table, session_course: &str) -> Result<Vec<RawResponse>> {
        let cols = self.columns;
        let row_id = table.require(&cols.row_id)?;
        let first_name = table.require_if_mapped(&cols.first_name)?;
        let last_name = table.require_if_mapped(&cols.last_name)?;
        let login = table.require_if_mapped(&cols.login)?;
        let student_id = table.require_if_mapped(&cols.student_id)?;
        // Course and timing columns vary between export layouts; an absent
        // course column means the session course
        let course = table.resolve(&cols.course);
        let started_at = table.resolve(&cols.started_at);
        let ended_at = table.resolve(&cols.ended_at);
        let duration = table.resolve(&cols.duration);

        let responses = table
            .rows()
            .enumerate()
            .filter(|(_, row)| match row.at(row_id) {
                Some(id) if is_import_id(id) => {
                    debug!("Skipped export metadata row {}", id);
                    false
                }
                _ => true,
            })
            .map(|(i, row)| {
                let duration_secs = row
                    .at_opt(duration)
                    .and_then(|d| d.parse::<f64>().ok())
                    .map(|d| d as i64)
                    .or_else(|| {
                        let start = row.at_opt(started_at).and_then(parse_timestamp)?;
                        let end = row.at_opt(ended_at).and_then(parse_timestamp)?;
                        Some((end - start).num_seconds())
                    });

                RawResponse {
                    row_id: row
                        .at(row_id)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("row{}", i + 1)),
                    first_name: normalize_name(row.at_opt(first_name)),
                    last_name: normalize_name(row.at_opt(last_name)),
                    login: normalize_login(row.at_opt(login)),
                    student_id: normalize_id(row.at_opt(student_id)),
                    course: self.course_for(row.at_opt(course), session_course),
                    duration_secs,
                    responses: row.cells(),
                }
            })
            .collect();

        Ok(responses)
    }

    fn course_for(&self, code: Option<&str>, session_course: &str) -> String {
        let codes = &self.columns.course_codes;
        match code {
            Some(code) if codes.is_empty() => code.to_string(),
            Some(code) => codes
                .get(&canonical_number(code))
                .cloned()
                .unwrap_or_else(|| session_course.to_string()),
            None => session_course.to_string(),
        }
    }
}
