use crate::manifest::TestType;
use comfy_table::{presets::ASCII_FULL, Table};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const BANNER_RULE: usize = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub product: String,
    pub test_type: TestType,
    pub fixture: String,
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub case: usize,
    #[serde(flatten)]
    pub evaluation: Evaluation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: String,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub total_cases: usize,
    pub evaluated_cases: usize,
    pub results: Vec<EvaluationRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to write report {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to render JUnit report: {0}")]
    Xml(String),
}

/// Prints the result block that follows each scanner run.
pub fn write_banner<W: Write>(
    out: &mut W,
    passed: bool,
    product: &str,
    test_type: &TestType,
) -> io::Result<()> {
    let rule = "=".repeat(BANNER_RULE);
    let header = format!("{rule} Test result {rule}");
    writeln!(out)?;
    writeln!(out, "{header}")?;
    writeln!(
        out,
        "{} — {} ({})",
        if passed { "PASS" } else { "FAIL" },
        product,
        test_type.label()
    )?;
    writeln!(out, "{}", "=".repeat(header.chars().count()))?;
    out.flush()
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::Failed => 1,
        }
    }
}

impl Evaluation {
    /// Short explanation of the verdict, used for failures.
    pub fn describe(&self) -> String {
        let observed = match (self.timed_out, self.exit_code) {
            (true, _) => "timed out".to_string(),
            (false, Some(code)) => format!("exited with {code}"),
            (false, None) => "was terminated by a signal".to_string(),
        };
        let expected = if self.test_type.is_positive() {
            "expected exit status 0"
        } else {
            "expected a non-zero exit status"
        };
        format!("{expected}; scanner {observed}")
    }

    fn exit_cell(&self) -> String {
        match (self.timed_out, self.exit_code) {
            (true, _) => "timeout".to_string(),
            (false, Some(code)) => code.to_string(),
            (false, None) => "signal".to_string(),
        }
    }
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &EvaluationRecord> {
        self.results
            .iter()
            .filter(|record| !record.evaluation.passed)
    }

    pub fn summary_table(&self) -> String {
        let mut display = Table::new();
        display.load_preset(ASCII_FULL);
        display.set_header(vec!["#", "Product", "Test type", "Exit", "Result"]);

        for record in &self.results {
            let evaluation = &record.evaluation;
            display.add_row(vec![
                (record.case + 1).to_string(),
                evaluation.product.clone(),
                evaluation.test_type.to_string(),
                evaluation.exit_cell(),
                if evaluation.passed { "PASS" } else { "FAIL" }.to_string(),
            ]);
        }

        display.to_string()
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_junit(&self) -> Result<String, ReportError> {
        render_junit(self).map_err(|err| ReportError::Xml(err.to_string()))
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        write_report_file(path, &self.to_json()?)
    }

    pub fn write_junit(&self, path: &Path) -> Result<(), ReportError> {
        write_report_file(path, &self.to_junit()?)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.results.is_empty() {
            writeln!(f, "No test cases to run.")?;
        } else {
            writeln!(f, "{}", self.summary_table())?;
        }

        let evaluations = self.results.len();
        match self.status {
            RunStatus::Completed => writeln!(
                f,
                "PASS: {evaluations} evaluation(s) across {} case(s) succeeded",
                self.total_cases
            ),
            RunStatus::Failed => {
                let skipped = self.total_cases.saturating_sub(self.evaluated_cases);
                match self.failures().next() {
                    Some(record) => writeln!(
                        f,
                        "FAIL: {} ({}) {}; {skipped} of {} case(s) not evaluated",
                        record.evaluation.product,
                        record.evaluation.test_type.label(),
                        record.evaluation.describe(),
                        self.total_cases
                    ),
                    None => writeln!(f, "FAIL"),
                }
            }
        }
    }
}

fn render_junit(report: &RunReport) -> Result<String, Box<dyn std::error::Error>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let tests = report.results.len().to_string();
    let failures = report.failures().count().to_string();
    let total_time = seconds(report.duration_ms);
    let mut suite = BytesStart::new("testsuite");
    suite.push_attribute(("name", "xpubcheck"));
    suite.push_attribute(("tests", tests.as_str()));
    suite.push_attribute(("failures", failures.as_str()));
    suite.push_attribute(("errors", "0"));
    suite.push_attribute(("time", total_time.as_str()));
    suite.push_attribute(("timestamp", report.started_at.as_str()));
    writer.write_event(Event::Start(suite))?;

    for record in &report.results {
        let evaluation = &record.evaluation;
        let name = format!("{} [{}]", evaluation.test_type.label(), evaluation.fixture);
        let time = seconds(evaluation.duration_ms);
        let mut case = BytesStart::new("testcase");
        case.push_attribute(("classname", evaluation.product.as_str()));
        case.push_attribute(("name", name.as_str()));
        case.push_attribute(("time", time.as_str()));

        if evaluation.passed {
            writer.write_event(Event::Empty(case))?;
            continue;
        }

        writer.write_event(Event::Start(case))?;
        let message = evaluation.describe();
        let mut failure = BytesStart::new("failure");
        failure.push_attribute(("message", message.as_str()));
        writer.write_event(Event::Start(failure))?;
        let command = shell_words::join(&evaluation.command);
        writer.write_event(Event::Text(BytesText::new(&command)))?;
        writer.write_event(Event::End(BytesEnd::new("failure")))?;
        writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    let mut xml = String::from_utf8(writer.into_inner())?;
    xml.push('\n');
    Ok(xml)
}

fn seconds(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

fn write_report_file(path: &Path, contents: &str) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| ReportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    fs::write(path, contents).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}
