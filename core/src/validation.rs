use crate::manifest::{TestCase, TestManifest};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub location: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationOptions<'a> {
    /// Reject test types other than `positive`/`negative` instead of running them as negative.
    pub strict: bool,
    /// When set, warn about fixtures missing from this directory.
    pub datasets_dir: Option<&'a Path>,
}

impl Diagnostic {
    fn error(location: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            location,
            message: message.into(),
        }
    }

    fn warning(location: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            location,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.level, DiagnosticLevel::Error)
    }
}

pub fn validate_manifest(manifest: &TestManifest, options: ValidationOptions<'_>) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for (index, case) in manifest.iter().enumerate() {
        validate_case(index, case, options, &mut diagnostics);
    }
    diagnostics
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

fn validate_case(
    index: usize,
    case: &TestCase,
    options: ValidationOptions<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let location = Some(format!("case #{} ({})", index + 1, case.product));

    for (field, value) in [
        ("xpub", &case.xpub),
        ("coin_ticker", &case.coin_ticker),
        ("filename", &case.filename),
    ] {
        if value.trim().is_empty() {
            diagnostics.push(Diagnostic::error(
                location.clone(),
                format!("'{field}' must not be empty"),
            ));
        }
    }

    if case.test_types.is_empty() {
        diagnostics.push(Diagnostic::error(
            location.clone(),
            "'test_types' must list at least one of positive, negative",
        ));
    }

    let mut seen = HashSet::new();
    for test_type in &case.test_types {
        if !test_type.is_recognized() {
            let message = format!("unknown test type '{test_type}'");
            if options.strict {
                diagnostics.push(Diagnostic::error(location.clone(), message));
            } else {
                diagnostics.push(Diagnostic::warning(
                    location.clone(),
                    format!("{message}, it will run as a negative test"),
                ));
            }
        }

        if !seen.insert(test_type) {
            diagnostics.push(Diagnostic::warning(
                location.clone(),
                format!("test type '{test_type}' is listed more than once"),
            ));
            continue;
        }

        if let Some(datasets_dir) = options.datasets_dir {
            if case.filename.trim().is_empty() {
                continue;
            }
            let fixture = case.fixture_path(datasets_dir, test_type);
            if !fixture.is_file() {
                diagnostics.push(Diagnostic::warning(
                    location.clone(),
                    format!("fixture {} does not exist", fixture.display()),
                ));
            }
        }
    }
}
