pub mod config;
pub mod manifest;
pub mod report;
pub mod run;
pub mod runner;
pub mod validation;

pub use config::{ConfigOverrides, RunnerConfig};
pub use manifest::{
    load_manifest, parse_manifest, ManifestError, ManifestFormat, TestCase, TestManifest, TestType,
};
pub use report::{
    write_banner, Evaluation, EvaluationRecord, ReportError, RunReport, RunStatus,
};
pub use run::{execute, Pending, RunMachine, RunState};
pub use runner::{
    classify, CaseRunner, Invocation, LaunchError, ProcessOutcome, ProcessScanner, RunError,
    Scanner, ScannerCommand,
};
pub use validation::{
    has_errors, validate_manifest, Diagnostic, DiagnosticLevel, ValidationOptions,
};
