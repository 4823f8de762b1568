//! End-to-end runs over fixture files in a temporary directory

use assessment_linker::report::{write_outputs, COMBINED_FILE};
use assessment_linker::{Config, Pipeline};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const REGISTRAR: &str = "\
Employee Id,Netid,Academic Term Sdescr,Catalog Nbr,St Urm Flag
1001,xx1,2017FA,1112,N
1002,yy2,2017FA,1112,Y
1003,zz3,2017FA,1112,N
1004,js4,2017FA,1112,N
1005,js5,2017FA,1112,N
1006,vv6,2017FA,1112,N
2001,ww1,2017FA,2213,N
";

const OPT_OUT: &str = "\
First Name:,Last Name:,Net ID:,Course
Vic,Vale,vv6,Phys 1112:
";

// Two students named Jane Smith; only their IDs tell them apart
const PRE: &str = "\
V1,First,Last,NetID,ID,Q1,Q2
R1,Xavier,Ames,xx1,1001,1,2
R2,Yolanda,Bell,yy2,1002,1,9
R3,Jane,Smith,js4,1004,1,2
R4,Jane,Smith,js5,1005,9,9
R5,Vic,Vale,vv6,1006,1,2
";

const POST: &str = "\
V1,First,Last,NetID,ID,Q1,Q2
P1,Xavier,Ames,xx1,1001,1,1
P2,Jane,Smith,js5,1005,1,2
P3,Jane,Smith,js4,1004,9,2
P4,Vic,Vale,vv6,1006,1,2
";

const OUTPUT_COLUMNS: &str = "Student_ID,Netid,Course,Year,Semester,Class_ID,Instruction,URM_Status,PreScores,PostScores,Assessment";

fn instrument_toml(name: &str, pre: &str, post: &str) -> String {
    format!(
        r#"
[[instruments]]
name = "{name}"
dedup_keys = [["student_id"]]

[instruments.columns]
row_id = ["V1"]
first_name = ["First"]
last_name = ["Last"]
login = ["NetID"]
student_id = ["ID"]

[instruments.answer_key]
scheme = "exact"

[[instruments.answer_key.items]]
item = "Q1"
answer = "1"

[[instruments.answer_key.items]]
item = "Q2"
answer = "2"

[[instruments.match_keys]]
name = "student_id"
pre = ["student_id"]
post = ["student_id"]

[[instruments.match_keys]]
name = "name"
pre = ["full_name"]
post = ["full_name"]

[[instruments.sessions]]
course = "P1112"
year = "2017"
semester = "FA"
pre = '{pre}'
post = '{post}'
"#
    )
}

fn fixture() -> (TempDir, Config) {
    let dir = TempDir::new().unwrap();
    let path = |name: &str| dir.path().join(name).to_string_lossy().into_owned();
    fs::write(path("registrar.csv"), REGISTRAR).unwrap();
    fs::write(path("optout.csv"), OPT_OUT).unwrap();
    fs::write(path("csem_pre.csv"), PRE).unwrap();
    fs::write(path("csem_post.csv"), POST).unwrap();

    let columns: Vec<String> = OUTPUT_COLUMNS.split(',').map(|c| format!("\"{c}\"")).collect();
    let mut text = format!(
        r#"
output_columns = [{columns}]

[consent]
file = '{consent}'

[registrar]
file = '{registrar}'
course_prefix = "P"
term_order = ["2017FA", "2018SP"]

[registrar.columns]
student_id = "Employee Id"
login = "Netid"
term = "Academic Term Sdescr"
course = "Catalog Nbr"

[[registrar.attributes]]
name = "URM_Status"

[[registrar.attributes.sources]]
column = "St Urm Flag"

[registrar.attributes.map]
Y = "URM"
N = "Majority"
"#,
        columns = columns.join(", "),
        consent = path("optout.csv"),
        registrar = path("registrar.csv"),
    );
    text.push_str(&instrument_toml("CSEM", &path("csem_pre.csv"), &path("csem_post.csv")));
    // post export never delivered
    text.push_str(&instrument_toml("MBT", &path("csem_pre.csv"), &path("mbt_post.csv")));

    let config = Config::from_toml(&text).unwrap();
    (dir, config)
}

fn data_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

#[test]
fn full_run_links_scores_and_merges_roster() {
    let (dir, config) = fixture();
    let out = dir.path().join("out");

    let pipeline = Pipeline::load(&config).unwrap();
    // the opted-out student and nobody else leaves the roster
    assert_eq!(pipeline.roster().len(), 6);

    let summary = pipeline.run(&[]).unwrap();
    assert_eq!(summary.runs.len(), 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].name, "MBT");

    let csem = &summary.runs[0];
    assert_eq!(csem.report.pre.opted_out, 1);
    assert_eq!(csem.report.post.opted_out, 1);
    assert_eq!(csem.report.matching.pairs_by_key["student_id"], 3);
    assert_eq!(csem.report.matching.ambiguities.len(), 2);
    assert_eq!(csem.report.merge.roster_only, 1);
    assert_eq!(csem.report.merge.roster_excluded, 1);

    write_outputs(&summary, &config.output_columns, &out).unwrap();

    assert_eq!(
        data_lines(&out.join("CSEM_Merged.csv")),
        vec![
            "1001,xx1,P1112,2017,FA,2017FA-1112,Old,Majority,2,1,CSEM",
            "1004,js4,P1112,2017,FA,2017FA-1112,Old,Majority,2,1,CSEM",
            "1005,js5,P1112,2017,FA,2017FA-1112,Old,Majority,0,2,CSEM",
            "1002,yy2,P1112,2017,FA,2017FA-1112,Old,URM,1,,CSEM",
            "1003,zz3,P1112,2017,FA,2017FA-1112,Old,Majority,,,CSEM",
        ]
    );

    let master = data_lines(&out.join("CSEM_Master.csv"));
    assert_eq!(master.len(), 4);
    assert_eq!(master[1], "P1112,2017,FA,R3,P3,1004,js4,janesmith,2,1,,student_id;name");
    assert_eq!(master[3], "P1112,2017,FA,R2,,1002,yy2,yolandabell,1,,,");

    let combined = fs::read_to_string(out.join(COMBINED_FILE)).unwrap();
    let merged = fs::read_to_string(out.join("CSEM_Merged.csv")).unwrap();
    assert_eq!(combined, merged);
    assert!(!out.join("MBT_Merged.csv").exists());
}

#[test]
fn instrument_restriction_skips_the_others() {
    let (_dir, config) = fixture();
    let pipeline = Pipeline::load(&config).unwrap();
    let summary = pipeline.run(&["CSEM".to_string()]).unwrap();
    assert_eq!(summary.runs.len(), 1);
    assert!(summary.failures.is_empty());
}

#[test]
fn rerun_is_byte_identical() {
    let (dir, config) = fixture();
    let mut outputs = Vec::new();
    for attempt in ["first", "second"] {
        let out = dir.path().join(attempt);
        let summary = Pipeline::load(&config).unwrap().run(&[]).unwrap();
        let written = write_outputs(&summary, &config.output_columns, &out).unwrap();
        let contents: Vec<(String, Vec<u8>)> = written
            .iter()
            .map(|p| {
                (
                    p.file_name().unwrap().to_string_lossy().into_owned(),
                    fs::read(p).unwrap(),
                )
            })
            .collect();
        outputs.push(contents);
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn default_config_written_and_reloaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    let path = path.to_str().unwrap();
    Config::default().save_to_file(path).unwrap();
    let loaded = Config::load_from_file(path).unwrap();
    let names: Vec<&str> = loaded.instruments.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["CSEM", "MBT", "ECLASS"]);
}
