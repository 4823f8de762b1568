use crate::config::ConsentConfig;
use crate::error::{PipelineError, Result};
use crate::identity::{full_name, normalize_login, normalize_name};
use crate::reader::Table;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info};

/// Students who opted out of research, per course
#[derive(Debug, Default)]
pub struct ConsentList {
    names: HashSet<(String, String)>,
    logins: HashSet<(String, String)>,
}

impl ConsentList {
    pub fn load(config: &ConsentConfig, course_prefix: &str) -> Result<Self> {
        let table = Table::read(&config.file, 0)?;
        let list = Self::from_table(&table, config, course_prefix)?;
        info!(
            "Loaded {} opt-out names and {} opt-out logins from {}",
            list.names.len(),
            list.logins.len(),
            config.file
        );
        Ok(list)
    }

    pub fn from_table(table: &Table, config: &ConsentConfig, course_prefix: &str) -> Result<Self> {
        // Course labels were entered by hand: "Phys 1112:", "1112", "PHYS 2213 "
        let course_number =
            Regex::new(r"(\d{4})").map_err(|e| PipelineError::Config(e.to_string()))?;
        let course_col = table.require(std::slice::from_ref(&config.course_column))?;
        let first_col = table.column(&config.first_name_column);
        let last_col = table.column(&config.last_name_column);
        let login_col = table.column(&config.login_column);

        let mut list = ConsentList::default();
        for row in table.rows() {
            let Some(course) = row
                .at(course_col)
                .and_then(|label| course_number.captures(label))
                .and_then(|caps| caps.get(1))
                .map(|m| format!("{}{}", course_prefix, m.as_str()))
            else {
                debug!("Opt-out row without a recognisable course skipped");
                continue;
            };

            let first = normalize_name(first_col.and_then(|i| row.at(i)));
            let last = normalize_name(last_col.and_then(|i| row.at(i)));
            if let Some(name) = full_name(first.as_deref(), last.as_deref()) {
                list.add_name(&course, &name);
            }
            if let Some(login) = normalize_login(login_col.and_then(|i| row.at(i))) {
                list.add_login(&course, &login);
            }
        }
        Ok(list)
    }

    pub fn add_name(&mut self, course: &str, name: &str) {
        self.names.insert((course.to_string(), name.to_string()));
    }

    pub fn add_login(&mut self, course: &str, login: &str) {
        self.logins.insert((course.to_string(), login.to_string()));
    }

    pub fn excludes_name(&self, course: &str, name: Option<&str>) -> bool {
        name.map(|n| self.names.contains(&(course.to_string(), n.to_string())))
            .unwrap_or(false)
    }

    pub fn excludes_login(&self, course: &str, login: Option<&str>) -> bool {
        login
            .map(|l| self.logins.contains(&(course.to_string(), l.to_string())))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(file: String) -> ConsentConfig {
        ConsentConfig {
            file,
            first_name_column: "First Name:".to_string(),
            last_name_column: "Last Name:".to_string(),
            login_column: "Net ID:".to_string(),
            course_column: "Course".to_string(),
        }
    }

    #[test]
    fn opt_outs_are_keyed_by_parsed_course() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("optout.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            b"First Name:,Last Name:,Net ID:,Course\n\
              Jane,Smith, JS1 ,Phys 1112:\n\
              Mary Ann,Lee,,2213\n\
              Bob,Ray,br9,Physics\n",
        )
        .unwrap();

        let list = ConsentList::load(&config(path.to_string_lossy().into_owned()), "P").unwrap();
        assert!(list.excludes_name("P1112", Some("janesmith")));
        assert!(list.excludes_login("P1112", Some("js1")));
        assert!(!list.excludes_login("P2213", Some("js1")));
        assert!(list.excludes_name("P2213", Some("maryannlee")));
        assert!(!list.excludes_login("P2213", None));
        assert!(!list.excludes_name("P1112", Some("bobray")));
    }

    #[test]
    fn missing_course_column_rejects_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("optout.csv");
        std::fs::write(&path, "First Name:,Last Name:\nJane,Smith\n").unwrap();
        let err = ConsentList::load(&config(path.to_string_lossy().into_owned()), "P").unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }
}
