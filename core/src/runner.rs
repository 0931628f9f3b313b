use crate::config::DEFAULT_SCANNER;
use crate::manifest::{TestCase, TestType};
use crate::report::{write_banner, Evaluation};
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const FIXED_FLAGS: [&str; 3] = ["--diff", "--custom-provider", "--quiet"];

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("invalid scanner entry point '{entry_point}': {reason}")]
    InvalidEntryPoint { entry_point: String, reason: String },
    #[error("failed to launch scanner '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for scanner '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to relay scanner output: {source}")]
    Output {
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("failed to print result banner: {source}")]
    Banner {
        #[source]
        source: io::Error,
    },
}

/// Program and leading arguments that start the scanner, e.g. `node lib/scan.js`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerCommand {
    program: String,
    args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

/// What the scanner process left behind. Output is echoed, not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was terminated by a signal or killed on timeout.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

pub trait Scanner {
    fn scan(&self, invocation: &Invocation) -> Result<ProcessOutcome, LaunchError>;
}

/// Spawns the scanner as a child process, echoing its stdout line by line.
#[derive(Debug, Clone, Default)]
pub struct ProcessScanner {
    timeout: Option<Duration>,
}

pub struct CaseRunner<S, W> {
    scanner: S,
    command: ScannerCommand,
    datasets_dir: PathBuf,
    out: W,
}

impl ScannerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn parse(entry_point: &str) -> Result<Self, LaunchError> {
        let mut parts =
            shell_words::split(entry_point).map_err(|err| LaunchError::InvalidEntryPoint {
                entry_point: entry_point.to_string(),
                reason: err.to_string(),
            })?;
        if parts.is_empty() {
            return Err(LaunchError::InvalidEntryPoint {
                entry_point: entry_point.to_string(),
                reason: "no executable given".to_string(),
            });
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// `<entry-point> <xpub> --currency <coin> --operations <fixture> --diff --custom-provider --quiet`
    pub fn invocation(&self, case: &TestCase, fixture: &Path) -> Invocation {
        let mut args = self.args.clone();
        args.push(case.xpub.clone());
        args.push("--currency".to_string());
        args.push(case.coin_ticker.clone());
        args.push("--operations".to_string());
        args.push(fixture.to_string_lossy().to_string());
        args.extend(FIXED_FLAGS.iter().map(|flag| flag.to_string()));

        Invocation {
            program: self.program.clone(),
            args,
        }
    }
}

impl Default for ScannerCommand {
    fn default() -> Self {
        let mut parts = DEFAULT_SCANNER.split_whitespace().map(str::to_string);
        Self {
            program: parts.next().unwrap_or_default(),
            args: parts.collect(),
        }
    }
}

impl Invocation {
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_words::join(self.argv()))
    }
}

impl ProcessOutcome {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            timed_out: false,
            duration: Duration::ZERO,
        }
    }

    fn from_status(status: ExitStatus, duration: Duration) -> Self {
        Self {
            exit_code: status.code(),
            timed_out: false,
            duration,
        }
    }

    fn timed_out(duration: Duration) -> Self {
        Self {
            exit_code: None,
            timed_out: true,
            duration,
        }
    }

    pub fn is_clean(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Positive tests want a clean exit, every other type wants a non-zero one.
/// A timed-out scan satisfies neither.
pub fn classify(test_type: &TestType, outcome: &ProcessOutcome) -> bool {
    if outcome.timed_out {
        return false;
    }
    if test_type.is_positive() {
        outcome.is_clean()
    } else {
        !outcome.is_clean()
    }
}

impl ProcessScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn wait_bounded(
        &self,
        child: &mut Child,
        program: &str,
        deadline: Instant,
    ) -> Result<Option<ExitStatus>, LaunchError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(Some(status)),
                Ok(None) => {}
                Err(source) => {
                    let _ = child.kill();
                    return Err(LaunchError::Wait {
                        program: program.to_string(),
                        source,
                    });
                }
            }
            if Instant::now() >= deadline {
                tracing::warn!(program, "scanner exceeded its time limit, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Scanner for ProcessScanner {
    fn scan(&self, invocation: &Invocation) -> Result<ProcessOutcome, LaunchError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).stdout(Stdio::piped());

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(LaunchError::Output {
                    source: io::Error::other("scanner stdout was not captured"),
                });
            }
        };

        let Some(timeout) = self.timeout else {
            if let Err(source) = forward_lines(stdout, &mut io::stdout()) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(LaunchError::Output { source });
            }
            let status = child.wait().map_err(|source| LaunchError::Wait {
                program: invocation.program.clone(),
                source,
            })?;
            return Ok(ProcessOutcome::from_status(status, started.elapsed()));
        };

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = done_tx.send(forward_lines(stdout, &mut io::stdout()));
        });
        let deadline = started + timeout;
        let Some(status) = self.wait_bounded(&mut child, &invocation.program, deadline)? else {
            tracing::debug!(
                program = %invocation.program,
                "leaving output forwarder detached after timeout"
            );
            return Ok(ProcessOutcome::timed_out(started.elapsed()));
        };

        // A background grandchild may keep the pipe open past the scanner's exit.
        match done_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(Ok(())) => {}
            Ok(Err(source)) => return Err(LaunchError::Output { source }),
            Err(RecvTimeoutError::Timeout) => {
                tracing::debug!(
                    program = %invocation.program,
                    "scanner exited but its stdout is still open, leaving forwarder detached"
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(LaunchError::Output {
                    source: io::Error::other("output forwarder panicked"),
                })
            }
        }
        Ok(ProcessOutcome::from_status(status, started.elapsed()))
    }
}

pub fn forward_lines<R: Read, W: Write>(source: R, sink: &mut W) -> io::Result<()> {
    let mut reader = BufReader::new(source);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        sink.write_all(&line)?;
        sink.flush()?;
    }
}

impl<S: Scanner, W: Write> CaseRunner<S, W> {
    pub fn new(scanner: S, command: ScannerCommand, datasets_dir: PathBuf, out: W) -> Self {
        Self {
            scanner,
            command,
            datasets_dir,
            out,
        }
    }

    pub fn evaluate(&mut self, case: &TestCase, test_type: &TestType) -> Result<bool, RunError> {
        self.run_case(case, test_type)
            .map(|evaluation| evaluation.passed)
    }

    pub fn run_case(
        &mut self,
        case: &TestCase,
        test_type: &TestType,
    ) -> Result<Evaluation, RunError> {
        let fixture = case.fixture_path(&self.datasets_dir, test_type);
        let invocation = self.command.invocation(case, &fixture);
        tracing::debug!(
            product = %case.product,
            test_type = %test_type,
            command = %invocation,
            "invoking scanner"
        );

        let outcome = self.scanner.scan(&invocation)?;
        let passed = classify(test_type, &outcome);

        write_banner(&mut self.out, passed, &case.product, test_type)
            .map_err(|source| RunError::Banner { source })?;

        Ok(Evaluation {
            product: case.product.clone(),
            test_type: test_type.clone(),
            fixture: fixture.to_string_lossy().to_string(),
            command: invocation.argv(),
            exit_code: outcome.exit_code,
            timed_out: outcome.timed_out,
            duration_ms: outcome.duration.as_millis() as u64,
            passed,
        })
    }

    pub fn into_output(self) -> W {
        self.out
    }
}
