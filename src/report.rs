use crate::error::{PipelineError, Result};
use crate::models::MergedRecord;
use crate::pipeline::{InstrumentRun, MasterRow, PipelineSummary};
use csv::Writer;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

pub const COMBINED_FILE: &str = "Combined_Master.csv";

const MASTER_COLUMNS: [&str; 12] = [
    "Course",
    "Year",
    "Semester",
    "Pre_Row",
    "Post_Row",
    "Student_ID",
    "Netid",
    "Full_Name",
    "PreScores",
    "PostScores",
    "IntendedMajor",
    "Matched_On",
];

/// Write every table of a run: per instrument the matched table and the
/// registrar merge, then the combined merge. Returns the files written.
pub fn write_outputs(
    summary: &PipelineSummary,
    columns: &[String],
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;

    let mut written = Vec::new();
    for run in &summary.runs {
        written.push(write_master(run, output_dir)?);
        let merged_path = output_dir.join(format!("{}_Merged.csv", run.name));
        write_merged(&run.merged, columns, &merged_path)?;
        written.push(merged_path);
    }

    let combined_path = output_dir.join(COMBINED_FILE);
    write_merged(summary.combined(), columns, &combined_path)?;
    written.push(combined_path);

    info!("Wrote {} files to {}", written.len(), output_dir.display());
    Ok(written)
}

/// Matched pre/post table of one instrument
pub fn write_master(run: &InstrumentRun, output_dir: &Path) -> Result<PathBuf> {
    let path = output_dir.join(format!("{}_Master.csv", run.name));
    let mut writer = open(&path)?;
    writer
        .write_record(MASTER_COLUMNS)
        .map_err(|e| PipelineError::csv(&path, e))?;
    for row in &run.master {
        writer
            .write_record(master_record(row))
            .map_err(|e| PipelineError::csv(&path, e))?;
    }
    writer.flush().map_err(|e| PipelineError::io(&path, e))?;
    Ok(path)
}

/// Merged records projected onto `columns`; absent values are empty cells
pub fn write_merged<'r>(
    records: impl IntoIterator<Item = &'r MergedRecord>,
    columns: &[String],
    path: &Path,
) -> Result<()> {
    let mut writer = open(path)?;
    writer
        .write_record(columns)
        .map_err(|e| PipelineError::csv(path, e))?;
    for record in records {
        writer
            .write_record(columns.iter().map(|c| record.field(c)))
            .map_err(|e| PipelineError::csv(path, e))?;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

fn open(path: &Path) -> Result<Writer<File>> {
    Writer::from_path(path).map_err(|e| PipelineError::csv(path, e))
}

fn master_record(row: &MasterRow) -> [String; 12] {
    let a = &row.assessment;
    let text = |v: &Option<String>| v.clone().unwrap_or_default();
    let score = |v: Option<i32>| v.map(|s| s.to_string()).unwrap_or_default();
    [
        a.course.clone(),
        a.year.clone(),
        a.semester.clone(),
        text(&row.pre_row),
        text(&row.post_row),
        text(&a.primary_id),
        text(&a.secondary_id),
        text(&row.full_name),
        score(a.pre_score),
        score(a.post_score),
        text(&a.intended_major),
        row.matched_on.join(";"),
    ]
}
