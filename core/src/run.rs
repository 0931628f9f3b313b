use crate::manifest::{TestCase, TestManifest, TestType};
use crate::report::{EvaluationRecord, RunReport, RunStatus};
use crate::runner::{CaseRunner, RunError, Scanner};
use std::io::Write;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// `Running` points at the next case/test-type pair to evaluate. `Failed`
/// keeps the pair that failed. Both `Failed` and `Completed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running { case: usize, test_type: usize },
    Failed { case: usize, test_type: usize },
    Completed,
}

#[derive(Debug, Clone, Copy)]
pub struct Pending<'m> {
    pub case_index: usize,
    pub case: &'m TestCase,
    pub test_type: &'m TestType,
}

/// Fail-fast walk over every declared test type of every case.
#[derive(Debug)]
pub struct RunMachine<'m> {
    manifest: &'m TestManifest,
    state: RunState,
}

impl<'m> RunMachine<'m> {
    pub fn new(manifest: &'m TestManifest) -> Self {
        let mut machine = Self {
            manifest,
            state: RunState::Running {
                case: 0,
                test_type: 0,
            },
        };
        machine.settle();
        machine
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.state, RunState::Running { .. })
    }

    pub fn pending(&self) -> Option<Pending<'m>> {
        let RunState::Running { case, test_type } = self.state else {
            return None;
        };
        let test_case = self.manifest.cases().get(case)?;
        let declared = test_case.test_types.get(test_type)?;
        Some(Pending {
            case_index: case,
            case: test_case,
            test_type: declared,
        })
    }

    /// Records the verdict for the pending pair. No-op once finished.
    pub fn advance(&mut self, passed: bool) -> RunState {
        if let RunState::Running { case, test_type } = self.state {
            if passed {
                self.state = RunState::Running {
                    case,
                    test_type: test_type + 1,
                };
                self.settle();
            } else {
                self.state = RunState::Failed { case, test_type };
            }
        }
        self.state
    }

    /// Moves past exhausted cases, completing when none remain.
    fn settle(&mut self) {
        while let RunState::Running { case, test_type } = self.state {
            match self.manifest.cases().get(case) {
                None => self.state = RunState::Completed,
                Some(current) if test_type >= current.test_types.len() => {
                    self.state = RunState::Running {
                        case: case + 1,
                        test_type: 0,
                    }
                }
                Some(_) => break,
            }
        }
    }
}

/// Evaluates the manifest in order, stopping at the first failure.
///
/// Launch and banner failures abort the run; a failed classification is
/// part of the returned report.
pub fn execute<S: Scanner, W: Write>(
    manifest: &TestManifest,
    runner: &mut CaseRunner<S, W>,
) -> Result<RunReport, RunError> {
    let started_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());
    let timer = Instant::now();

    let mut machine = RunMachine::new(manifest);
    let mut results = Vec::new();

    while let Some(pending) = machine.pending() {
        let evaluation = runner.run_case(pending.case, pending.test_type)?;
        let passed = evaluation.passed;
        results.push(EvaluationRecord {
            case: pending.case_index,
            evaluation,
        });
        if let RunState::Failed { .. } = machine.advance(passed) {
            tracing::warn!(
                product = %pending.case.product,
                test_type = %pending.test_type,
                "case failed, skipping the rest of the manifest"
            );
        }
    }

    let status = match machine.state() {
        RunState::Failed { .. } => RunStatus::Failed,
        _ => RunStatus::Completed,
    };
    let evaluated_cases = results.last().map(|record| record.case + 1).unwrap_or(0);

    Ok(RunReport {
        started_at,
        duration_ms: timer.elapsed().as_millis() as u64,
        status,
        total_cases: manifest.len(),
        evaluated_cases,
        results,
    })
}
