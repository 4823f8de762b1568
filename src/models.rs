use crate::config::IdentityField;
use crate::identity::full_name;
use std::collections::BTreeMap;

/// One row of an assessment export after identity normalization
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawResponse {
    pub row_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub login: Option<String>,
    pub student_id: Option<String>,
    pub course: String,
    pub duration_secs: Option<i64>,
    /// Raw item responses keyed by item column; missing cells are absent
    pub responses: BTreeMap<String, String>,
}

impl RawResponse {
    pub fn identity(&self, field: IdentityField) -> Option<String> {
        match field {
            IdentityField::FirstName => self.first_name.clone(),
            IdentityField::LastName => self.last_name.clone(),
            IdentityField::FullName => {
                full_name(self.first_name.as_deref(), self.last_name.as_deref())
            }
            IdentityField::Login => self.login.clone(),
            IdentityField::StudentId => self.student_id.clone(),
        }
    }

    pub fn response(&self, item: &str) -> Option<&str> {
        self.responses.get(item).map(|s| s.as_str())
    }
}

/// Section sums and total for one scored response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Score {
    pub sections: BTreeMap<String, i32>,
    pub total: i32,
}

impl Score {
    /// The figure reported downstream: a named section, or the total
    pub fn reported(&self, section: Option<&str>) -> i32 {
        match section {
            Some(name) => self.sections.get(name).copied().unwrap_or(0),
            None => self.total,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResponse {
    pub raw: RawResponse,
    /// `None` when the response was flagged invalid; distinct from a zero score
    pub score: Option<Score>,
}

impl ScoredResponse {
    pub fn identity(&self, field: IdentityField) -> Option<String> {
        self.raw.identity(field)
    }
}

/// One registrar row per (student, course) after cleaning
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RosterRecord {
    pub student_id: String,
    pub login: Option<String>,
    pub course: String,
    pub term: String,
    pub year: String,
    pub semester: String,
    pub class_id: String,
    pub sequence: Option<String>,
    pub course_content: Option<String>,
    pub instruction: String,
    pub attributes: BTreeMap<String, String>,
}

impl RosterRecord {
    pub fn offering(&self) -> Offering {
        Offering::new(&self.course, &self.year, &self.semester)
    }
}

/// Course taught in one term; the roster/assessment join granularity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Offering {
    pub course: String,
    pub year: String,
    pub semester: String,
}

impl Offering {
    pub fn new(course: &str, year: &str, semester: &str) -> Self {
        Self {
            course: course.to_string(),
            year: year.to_string(),
            semester: semester.to_string(),
        }
    }
}

/// Per-student instrument outcome ready for the registrar merge
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssessmentRow {
    /// Joins the roster student ID
    pub primary_id: Option<String>,
    /// Joins the roster login
    pub secondary_id: Option<String>,
    pub course: String,
    pub year: String,
    pub semester: String,
    pub pre_score: Option<i32>,
    pub post_score: Option<i32>,
    pub intended_major: Option<String>,
}

impl AssessmentRow {
    pub fn offering(&self) -> Offering {
        Offering::new(&self.course, &self.year, &self.semester)
    }
}

/// Final table row: an assessment outcome, a roster record, or both
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub assessment_name: String,
    pub assessment: Option<AssessmentRow>,
    pub roster: Option<RosterRecord>,
}

impl MergedRecord {
    /// Value of a named output column; empty when absent
    pub fn field(&self, column: &str) -> String {
        let roster = self.roster.as_ref();
        let assessment = self.assessment.as_ref();
        let value = match column {
            "Student_ID" => roster
                .map(|r| r.student_id.clone())
                .or_else(|| assessment.and_then(|a| a.primary_id.clone())),
            "Netid" => roster
                .and_then(|r| r.login.clone())
                .or_else(|| assessment.and_then(|a| a.secondary_id.clone())),
            "Course" => roster
                .map(|r| r.course.clone())
                .or_else(|| assessment.map(|a| a.course.clone())),
            "Year" => roster
                .map(|r| r.year.clone())
                .or_else(|| assessment.map(|a| a.year.clone())),
            "Semester" => roster
                .map(|r| r.semester.clone())
                .or_else(|| assessment.map(|a| a.semester.clone())),
            "Class_ID" => roster.map(|r| r.class_id.clone()),
            "Sequence" => roster.and_then(|r| r.sequence.clone()),
            "Course_Content" => roster.and_then(|r| r.course_content.clone()),
            "Instruction" => roster.map(|r| r.instruction.clone()),
            "PreScores" => assessment.and_then(|a| a.pre_score).map(|s| s.to_string()),
            "PostScores" => assessment.and_then(|a| a.post_score).map(|s| s.to_string()),
            "IntendedMajor" => assessment.and_then(|a| a.intended_major.clone()),
            "Assessment" => Some(self.assessment_name.clone()),
            other => roster.and_then(|r| r.attributes.get(other).cloned()),
        };
        value.unwrap_or_default()
    }
}
