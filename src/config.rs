use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub output_directory: Option<String>,
    /// Columns of the merged tables, in order
    #[serde(default = "default_output_columns")]
    pub output_columns: Vec<String>,
    pub consent: Option<ConsentConfig>,
    pub registrar: RegistrarConfig,
    pub instruments: Vec<InstrumentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentConfig {
    pub file: String,
    #[serde(default = "default_consent_first_name")]
    pub first_name_column: String,
    #[serde(default = "default_consent_last_name")]
    pub last_name_column: String,
    #[serde(default = "default_consent_login")]
    pub login_column: String,
    #[serde(default = "default_consent_course")]
    pub course_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrarConfig {
    pub file: String,
    /// Prepended to catalog numbers so roster courses line up with
    /// assessment course tags (`1112` → `P1112`)
    #[serde(default)]
    pub course_prefix: String,
    /// Terms from oldest to newest; decides which offering survives when a
    /// student repeats a course
    #[serde(default)]
    pub term_order: Vec<String>,
    pub columns: RosterColumns,
    #[serde(default)]
    pub sequences: BTreeMap<String, String>,
    #[serde(default)]
    pub course_content: BTreeMap<String, String>,
    #[serde(default)]
    pub filters: Vec<RosterFilter>,
    #[serde(default)]
    pub attributes: Vec<AttributeRule>,
    #[serde(default)]
    pub instruction: InstructionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterColumns {
    pub student_id: String,
    pub login: String,
    pub term: String,
    pub course: String,
}

/// Row eligibility rule; evaluated against derived attributes first, then
/// raw registrar columns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RosterFilter {
    OneOf { column: String, values: Vec<String> },
    AnyPresent { columns: Vec<String> },
}

/// Derived roster attribute. With several sources the largest numeric value
/// (after each source's lookup table) wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeRule {
    pub name: String,
    /// Used when no source has a value
    pub default: Option<String>,
    pub sources: Vec<SourceColumn>,
    /// Final value map; when non-empty, unmapped values become missing
    #[serde(default)]
    pub map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceColumn {
    pub column: String,
    /// Per-source lookup (e.g. raw test score → percentile)
    #[serde(default)]
    pub table: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionConfig {
    pub default_label: String,
    #[serde(default)]
    pub rules: Vec<InstructionRule>,
}

impl Default for InstructionConfig {
    fn default() -> Self {
        Self {
            default_label: "Old".to_string(),
            rules: Vec::new(),
        }
    }
}

/// First matching rule labels the roster row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionRule {
    pub course: String,
    pub label: String,
    /// Empty means every term
    #[serde(default)]
    pub terms: Vec<String>,
    #[serde(default)]
    pub except_terms: Vec<String>,
    pub members: Option<MemberList>,
}

/// CSV list of logins that received a variant of instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberList {
    pub file: String,
    pub login_column: String,
    pub filter_column: Option<String>,
    pub filter_value: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
    FirstName,
    LastName,
    /// First and last name concatenated
    FullName,
    Login,
    StudentId,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    #[default]
    KeepLast,
    KeepFirst,
}

/// How an instrument's identifiers line up with the roster
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierMode {
    /// Student ID joins the roster student ID, login joins the roster login
    #[default]
    Separate,
    /// One free-text ID column holding either; tried against both
    SingleColumn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchKey {
    pub name: String,
    pub pre: Vec<IdentityField>,
    pub post: Vec<IdentityField>,
}

impl MatchKey {
    pub fn same(name: &str, fields: &[IdentityField]) -> Self {
        Self {
            name: name.to_string(),
            pre: fields.to_vec(),
            post: fields.to_vec(),
        }
    }
}

/// Candidate header names per field; the first one present in a file is
/// used. Instruments changed export layouts between terms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnMap {
    pub row_id: Vec<String>,
    #[serde(default)]
    pub first_name: Vec<String>,
    #[serde(default)]
    pub last_name: Vec<String>,
    #[serde(default)]
    pub login: Vec<String>,
    #[serde(default)]
    pub student_id: Vec<String>,
    #[serde(default)]
    pub started_at: Vec<String>,
    #[serde(default)]
    pub ended_at: Vec<String>,
    #[serde(default)]
    pub duration: Vec<String>,
    #[serde(default)]
    pub course: Vec<String>,
    /// Response code in the course column → course tag
    #[serde(default)]
    pub course_codes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum AnswerKey {
    Exact { items: Vec<ExactItem> },
    Likert { items: Vec<LikertItem> },
}

impl AnswerKey {
    pub fn item_names(&self) -> Vec<&str> {
        match self {
            AnswerKey::Exact { items } => items.iter().map(|i| i.item.as_str()).collect(),
            AnswerKey::Likert { items } => items.iter().map(|i| i.item.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExactItem {
    pub item: String,
    pub answer: String,
    pub section: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikertItem {
    pub item: String,
    pub polarity: Polarity,
    pub section: Option<String>,
}

/// Expert-response sheet exported as CSV, one row per item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerKeyFile {
    pub file: String,
    #[serde(default = "default_key_item_column")]
    pub item_column: String,
    #[serde(default = "default_key_polarity_column")]
    pub polarity_column: String,
    /// Item-name suffix → score section
    #[serde(default = "default_suffix_sections")]
    pub suffix_sections: BTreeMap<String, String>,
}

/// Expert-consensus direction of a Likert item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    #[serde(alias = "A")]
    Agree,
    #[serde(alias = "D")]
    Disagree,
    #[serde(alias = "CONTROL")]
    Control,
}

impl Polarity {
    /// Parse a sheet cell: `A`, `D`, `CONTROL` or the spelled-out names
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "a" | "agree" => Some(Polarity::Agree),
            "d" | "disagree" => Some(Polarity::Disagree),
            "control" => Some(Polarity::Control),
            _ => None,
        }
    }

    pub fn weight(self) -> i32 {
        match self {
            Polarity::Agree => 1,
            Polarity::Disagree => -1,
            Polarity::Control => 0,
        }
    }
}

/// A planted item: rows answering outside `accept` are dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionCheck {
    pub item: String,
    pub accept: Vec<String>,
}

/// A planted item: rows answering one of `values` keep their row but lose
/// their score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidMarker {
    pub item: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub item: String,
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub label: String,
    pub values: Vec<String>,
}

/// One pre/post administration of an instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub course: String,
    pub year: String,
    pub semester: String,
    pub pre: String,
    pub post: String,
    /// Overrides the instrument's `skip_rows` for this administration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_rows: Option<usize>,
}

impl Session {
    pub fn skip_rows(&self, instrument: &InstrumentConfig) -> usize {
        self.skip_rows.unwrap_or(instrument.skip_rows)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub name: String,
    /// Descriptive rows between the header and the first response
    #[serde(default)]
    pub skip_rows: usize,
    /// Score section reported as Pre/PostScores; the total when unset
    pub reported_section: Option<String>,
    pub min_duration_secs: Option<i64>,
    #[serde(default)]
    pub dedup_policy: DedupPolicy,
    #[serde(default)]
    pub identifier_mode: IdentifierMode,
    /// Applied in order within each file
    pub dedup_keys: Vec<Vec<IdentityField>>,
    /// Assessment rows without a roster match are kept with empty roster fields
    #[serde(default)]
    pub keep_unrostered: bool,
    pub columns: ColumnMap,
    pub answer_key: AnswerKey,
    /// Likert polarities read from a file; replaces `answer_key` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_key_file: Option<AnswerKeyFile>,
    pub attention_check: Option<AttentionCheck>,
    pub invalid_response: Option<InvalidMarker>,
    pub intended_major: Option<CategoryRule>,
    /// Highest priority first
    pub match_keys: Vec<MatchKey>,
    pub sessions: Vec<Session>,
}

fn default_output_columns() -> Vec<String> {
    [
        "Student_ID",
        "Netid",
        "Course",
        "Class_Standing",
        "Major",
        "Gender",
        "URM_Status",
        "First_Gen_Status",
        "GPA",
        "ACT_SAT_Math_Percentile",
        "AP_Calculus_AB",
        "AP_Calculus_BC",
        "AP_Physics_EM",
        "AP_Physics_Mech",
        "PreScores",
        "PostScores",
        "Assessment",
        "Year",
        "Semester",
        "Sequence",
        "Course_Content",
        "Instruction",
        "IntendedMajor",
        "Class_ID",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_key_item_column() -> String {
    "Item".to_string()
}

fn default_key_polarity_column() -> String {
    "Expert".to_string()
}

fn default_suffix_sections() -> BTreeMap<String, String> {
    string_map(&[("a", "student"), ("b", "expert")])
}

fn default_consent_first_name() -> String {
    "First Name:".to_string()
}

fn default_consent_last_name() -> String {
    "Last Name:".to_string()
}

fn default_consent_login() -> String {
    "Net ID:".to_string()
}

fn default_consent_course() -> String {
    "Course".to_string()
}

fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn exact_key(answers: &[u8]) -> AnswerKey {
    AnswerKey::Exact {
        items: answers
            .iter()
            .enumerate()
            .map(|(i, answer)| ExactItem {
                item: format!("Q{}", i + 1),
                answer: answer.to_string(),
                section: None,
            })
            .collect(),
    }
}

/// Score → percentile tables for scaled tests reported in steps of 10
fn stepped_table(start: u32, percentiles: &[u8]) -> BTreeMap<String, String> {
    percentiles
        .iter()
        .enumerate()
        .map(|(i, p)| ((start + 10 * i as u32).to_string(), p.to_string()))
        .collect()
}

fn act_math_table() -> BTreeMap<String, String> {
    const ABOVE_12: [u8; 24] = [
        3, 8, 18, 29, 38, 46, 51, 55, 59, 63, 68, 73, 78, 83, 88, 91, 93, 95, 96, 97, 98, 99, 99,
        100,
    ];
    let mut table: BTreeMap<String, String> =
        (1..=12).map(|s: u32| (s.to_string(), "1".to_string())).collect();
    for (i, p) in ABOVE_12.iter().enumerate() {
        table.insert((13 + i).to_string(), p.to_string());
    }
    table
}

fn sat_math_table() -> BTreeMap<String, String> {
    const FROM_200: [u8; 61] = [
        1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 2, 3, 4, 6, 7, 9, 11, 13, 15, 17, 20, 22, 25, 28,
        31, 34, 37, 40, 44, 49, 53, 57, 61, 64, 66, 69, 72, 75, 77, 79, 81, 83, 85, 86, 88, 89,
        91, 92, 93, 94, 95, 96, 96, 97, 98, 98, 99, 99,
    ];
    stepped_table(200, &FROM_200)
}

fn sat_math_section_table() -> BTreeMap<String, String> {
    const FROM_200: [u8; 61] = [
        0, 1, 1, 1, 1, 2, 2, 2, 3, 3, 4, 5, 6, 7, 8, 10, 12, 14, 17, 19, 22, 25, 29, 32, 35, 39,
        42, 46, 49, 53, 56, 59, 62, 65, 68, 71, 74, 76, 78, 80, 82, 84, 86, 88, 89, 91, 92, 93,
        94, 95, 96, 96, 97, 98, 98, 98, 99, 99, 99, 99, 99,
    ];
    stepped_table(200, &FROM_200)
}

/// AP grade → credit band; `well_from` is the lowest grade earning credit
fn ap_band(name: &str, sources: &[&str], well_from: u8) -> AttributeRule {
    AttributeRule {
        name: name.to_string(),
        default: Some("NotTaken".to_string()),
        sources: sources
            .iter()
            .map(|column| SourceColumn {
                column: column.to_string(),
                table: BTreeMap::new(),
            })
            .collect(),
        map: (0..=5u8)
            .map(|grade| {
                let band = if grade >= well_from { "Well" } else { "Poor" };
                (grade.to_string(), band.to_string())
            })
            .collect(),
    }
}

fn passthrough(name: &str, column: &str) -> AttributeRule {
    AttributeRule {
        name: name.to_string(),
        default: None,
        sources: vec![SourceColumn {
            column: column.to_string(),
            table: BTreeMap::new(),
        }],
        map: BTreeMap::new(),
    }
}

fn default_registrar() -> RegistrarConfig {
    let math_percentile = AttributeRule {
        name: "ACT_SAT_Math_Percentile".to_string(),
        default: None,
        sources: vec![
            SourceColumn {
                column: "ACT | Math".to_string(),
                table: act_math_table(),
            },
            SourceColumn {
                column: "SAT I | Math".to_string(),
                table: sat_math_table(),
            },
            SourceColumn {
                column: "SAT I | Math Section Score".to_string(),
                table: sat_math_section_table(),
            },
        ],
        map: BTreeMap::new(),
    };

    let mut urm = passthrough("URM_Status", "St Urm Flag");
    urm.map = string_map(&[("Y", "URM"), ("N", "Majority")]);
    let mut first_gen = passthrough("First_Gen_Status", "Student Group Sdescr");
    first_gen.default = Some("ContGen".to_string());
    first_gen.map = string_map(&[("Frst Gen", "FirstGen"), ("ContGen", "ContGen")]);

    RegistrarConfig {
        file: "data/registrar.csv".to_string(),
        course_prefix: "P".to_string(),
        term_order: cols(&["2017FA", "2018SP", "2018FA", "2019SP"]),
        columns: RosterColumns {
            student_id: "Employee Id".to_string(),
            login: "Netid".to_string(),
            term: "Academic Term Sdescr".to_string(),
            course: "Catalog Nbr".to_string(),
        },
        sequences: string_map(&[
            ("P1112", "Engineering"),
            ("P2213", "Engineering"),
            ("P1116", "Honours"),
            ("P2217", "Honours"),
        ]),
        course_content: string_map(&[
            ("P1112", "Mechanics"),
            ("P2213", "EM"),
            ("P1116", "Mechanics"),
            ("P2217", "EM"),
        ]),
        filters: vec![
            RosterFilter::OneOf {
                column: "Class_Standing".to_string(),
                values: cols(&["Fresh", "Sophomore", "Junior", "Senior"]),
            },
            RosterFilter::AnyPresent {
                columns: cols(&["URM_Status"]),
            },
            RosterFilter::AnyPresent {
                columns: cols(&["ACT | Math", "SAT I | Math", "SAT I | Math Section Score"]),
            },
        ],
        attributes: vec![
            passthrough("Class_Standing", "Acad Level Ldescr"),
            passthrough("Major", "Academic Plan"),
            passthrough("Gender", "Effdt Gender"),
            urm,
            first_gen,
            passthrough("GPA", "Cum GPA"),
            math_percentile,
            ap_band(
                "AP_Calculus_AB",
                &["AP | Calculus AB Subscore Grade", "AP | Mathematics: Calculus AB"],
                4,
            ),
            ap_band("AP_Calculus_BC", &["AP | Mathematics: Calculus BC"], 4),
            ap_band("AP_Physics_EM", &["AP | Physics C - Electricity & Magt"], 5),
            ap_band("AP_Physics_Mech", &["AP | Physics C - Mechanics"], 5),
        ],
        instruction: InstructionConfig {
            default_label: "Old".to_string(),
            rules: vec![
                InstructionRule {
                    course: "P1112".to_string(),
                    label: "New".to_string(),
                    terms: cols(&["2019SP"]),
                    except_terms: Vec::new(),
                    members: None,
                },
                InstructionRule {
                    course: "P1116".to_string(),
                    label: "New".to_string(),
                    terms: Vec::new(),
                    except_terms: cols(&["2017FA"]),
                    members: None,
                },
                InstructionRule {
                    course: "P1116".to_string(),
                    label: "New".to_string(),
                    terms: cols(&["2017FA"]),
                    except_terms: Vec::new(),
                    members: Some(MemberList {
                        file: "data/Fa2017-1116_ID-condition.csv".to_string(),
                        login_column: "Username".to_string(),
                        filter_column: Some("Lab.Intervention".to_string()),
                        filter_value: Some("1".to_string()),
                    }),
                },
                InstructionRule {
                    course: "P2217".to_string(),
                    label: "New".to_string(),
                    terms: cols(&["2018FA", "2019SP"]),
                    except_terms: Vec::new(),
                    members: None,
                },
                InstructionRule {
                    course: "P2217".to_string(),
                    label: "New".to_string(),
                    terms: cols(&["2018SP"]),
                    except_terms: Vec::new(),
                    members: Some(MemberList {
                        file: "data/Sp2018_2217_ID-condition.csv".to_string(),
                        login_column: "Username".to_string(),
                        filter_column: Some("Lab.Condition".to_string()),
                        filter_value: Some("I".to_string()),
                    }),
                },
            ],
        },
    }
}

fn default_csem() -> InstrumentConfig {
    use IdentityField::*;
    InstrumentConfig {
        name: "CSEM".to_string(),
        skip_rows: 1,
        reported_section: None,
        min_duration_secs: None,
        dedup_policy: DedupPolicy::KeepLast,
        identifier_mode: IdentifierMode::Separate,
        dedup_keys: vec![vec![FirstName, LastName], vec![Login], vec![StudentId]],
        keep_unrostered: false,
        columns: ColumnMap {
            row_id: cols(&["V1", "ResponseId"]),
            first_name: cols(&["Q38"]),
            last_name: cols(&["Name"]),
            login: cols(&["NetID"]),
            student_id: cols(&["Q39"]),
            started_at: cols(&["V3", "StartDate"]),
            ended_at: cols(&["V4", "EndDate"]),
            duration: cols(&["Duration (in seconds)"]),
            course: cols(&["Course"]),
            course_codes: string_map(&[
                ("1", "P1102"),
                ("2", "P2208"),
                ("3", "P2213"),
                ("4", "P2217"),
            ]),
        },
        answer_key: exact_key(&[
            2, 1, 2, 2, 3, 5, 2, 2, 2, 3, 5, 4, 5, 4, 1, 5, 5, 4, 1, 4, 5, 4, 1, 3, 4, 1, 5, 3, 3,
            1, 5, 4,
        ]),
        answer_key_file: None,
        attention_check: None,
        invalid_response: None,
        intended_major: None,
        match_keys: vec![
            MatchKey::same("student_id", &[StudentId]),
            MatchKey::same("login", &[Login]),
            MatchKey::same("name", &[FirstName, LastName]),
        ],
        sessions: vec![Session {
            course: "P2213".to_string(),
            year: "2017".to_string(),
            semester: "FA".to_string(),
            pre: "data/CSEM/RAW/CSEM_Pre_2213_FA_2017.csv".to_string(),
            post: "data/CSEM/RAW/CSEM_Post_2213_FA_2017.csv".to_string(),
            skip_rows: None,
        }],
    }
}

fn default_mbt() -> InstrumentConfig {
    use IdentityField::*;
    InstrumentConfig {
        name: "MBT".to_string(),
        skip_rows: 1,
        reported_section: None,
        min_duration_secs: None,
        dedup_policy: DedupPolicy::KeepFirst,
        identifier_mode: IdentifierMode::Separate,
        dedup_keys: vec![vec![FirstName, LastName], vec![Login], vec![StudentId]],
        keep_unrostered: false,
        columns: ColumnMap {
            row_id: cols(&["V1", "ResponseId"]),
            first_name: cols(&["QA", "Q49"]),
            last_name: cols(&["QB", "Q51"]),
            login: cols(&["QC", "Q53"]),
            student_id: cols(&["QD", "Q61"]),
            started_at: cols(&["V3", "StartDate"]),
            ended_at: cols(&["V4", "EndDate"]),
            duration: cols(&["Duration (in seconds)"]),
            course: cols(&["Q47"]),
            course_codes: string_map(&[("2", "P1112"), ("3", "P1116")]),
        },
        answer_key: exact_key(&[
            2, 4, 5, 3, 1, 3, 3, 4, 1, 5, 5, 3, 2, 2, 5, 1, 4, 2, 3, 3, 1, 2, 4, 1, 1, 5,
        ]),
        answer_key_file: None,
        attention_check: None,
        invalid_response: None,
        intended_major: None,
        match_keys: vec![
            MatchKey::same("student_id", &[StudentId]),
            MatchKey::same("login", &[Login]),
            MatchKey::same("name", &[FirstName, LastName]),
        ],
        sessions: vec![Session {
            course: "P1112".to_string(),
            year: "2018".to_string(),
            semester: "SP".to_string(),
            pre: "data/MBT/RAW/MBT_Pre_1112_SP_2018.csv".to_string(),
            post: "data/MBT/RAW/MBT_Post_1112_SP_2018.csv".to_string(),
            skip_rows: None,
        }],
    }
}

fn default_eclass() -> InstrumentConfig {
    use IdentityField::*;
    let engineering_or_other: Vec<String> = [2, 3, 4, 5, 10, 11, 12, 13]
        .iter()
        .map(|v| v.to_string())
        .collect();
    InstrumentConfig {
        name: "ECLASS".to_string(),
        skip_rows: 0,
        reported_section: Some("student".to_string()),
        min_duration_secs: None,
        dedup_policy: DedupPolicy::KeepLast,
        identifier_mode: IdentifierMode::SingleColumn,
        dedup_keys: vec![vec![FirstName, LastName], vec![Login]],
        keep_unrostered: false,
        columns: ColumnMap {
            row_id: cols(&["V1", "ResponseId"]),
            first_name: cols(&["Q3_1_TEXT"]),
            last_name: cols(&["Q3_2_TEXT"]),
            login: cols(&["Q3_3_TEXT"]),
            ..ColumnMap::default()
        },
        answer_key: AnswerKey::Likert { items: Vec::new() },
        answer_key_file: Some(AnswerKeyFile {
            file: "data/ECLASS/ECLASS_Answer_Key.csv".to_string(),
            item_column: default_key_item_column(),
            polarity_column: default_key_polarity_column(),
            suffix_sections: default_suffix_sections(),
        }),
        attention_check: Some(AttentionCheck {
            item: "q40a".to_string(),
            accept: cols(&["4"]),
        }),
        invalid_response: None,
        intended_major: Some(CategoryRule {
            item: "Q47".to_string(),
            categories: vec![
                Category {
                    label: "Physics".to_string(),
                    values: cols(&["1", "6", "7", "8", "9"]),
                },
                Category {
                    label: "EngineeringOrOtherSci".to_string(),
                    values: engineering_or_other,
                },
            ],
        }),
        match_keys: vec![
            MatchKey::same("login", &[Login]),
            MatchKey::same("name", &[FirstName, LastName]),
            MatchKey {
                name: "reversed_name".to_string(),
                pre: vec![FirstName, LastName],
                post: vec![LastName, FirstName],
            },
        ],
        sessions: vec![Session {
            course: "P1112".to_string(),
            year: "2017".to_string(),
            semester: "FA".to_string(),
            pre: "data/ECLASS/RAW/FA2017/ECLASS-PRE-1112.csv".to_string(),
            post: "data/ECLASS/RAW/FA2017/ECLASS-POST-1112.csv".to_string(),
            skip_rows: None,
        }],
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_directory: Some("output".to_string()),
            output_columns: default_output_columns(),
            consent: Some(ConsentConfig {
                file: "data/MasterList.csv".to_string(),
                first_name_column: default_consent_first_name(),
                last_name_column: default_consent_last_name(),
                login_column: default_consent_login(),
                course_column: default_consent_course(),
            }),
            registrar: default_registrar(),
            instruments: vec![default_csem(), default_mbt(), default_eclass()],
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(file_path).map_err(|e| PipelineError::io(file_path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content).map_err(|e| PipelineError::io(file_path, e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.output_columns.is_empty() {
            return Err(PipelineError::Config("output_columns is empty".to_string()));
        }
        let mut names = BTreeSet::new();
        for instrument in &self.instruments {
            if instrument.name.trim().is_empty() {
                return Err(PipelineError::Config("instrument with empty name".to_string()));
            }
            if !names.insert(instrument.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "instrument '{}' is configured twice",
                    instrument.name
                )));
            }
            instrument.validate()?;
        }
        Ok(())
    }
}

impl InstrumentConfig {
    fn validate(&self) -> Result<()> {
        let err = |msg: String| Err(PipelineError::Config(format!("{}: {}", self.name, msg)));
        if self.columns.row_id.is_empty() {
            return err("columns.row_id is not mapped".to_string());
        }
        if self.match_keys.is_empty() {
            return err("no match_keys configured".to_string());
        }
        for key in &self.match_keys {
            if key.pre.is_empty() || key.pre.len() != key.post.len() {
                return err(format!(
                    "match key '{}' needs the same non-zero number of pre and post fields",
                    key.name
                ));
            }
        }
        if self.dedup_keys.iter().any(|k| k.is_empty()) {
            return err("empty dedup key".to_string());
        }
        if self.answer_key_file.is_none() && self.answer_key.item_names().is_empty() {
            return err("answer key has no items and no answer_key_file".to_string());
        }
        Ok(())
    }
}
