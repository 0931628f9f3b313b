use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use xpubcheck_core::{
    execute, has_errors, load_manifest, validate_manifest, CaseRunner, ConfigOverrides,
    Diagnostic, DiagnosticLevel, ProcessScanner, RunStatus, RunnerConfig, TestManifest,
    ValidationOptions,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Runs the xpub scanner against recorded fixtures and checks its verdicts",
    args_conflicts_with_subcommands = true
)]
struct XpubCheckCli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every manifest case against the scanner, stopping at the first failure (default)
    Run(RunArgs),
    /// Validate the manifest and print the scanner invocations without running them
    Plan {
        #[command(flatten)]
        target: TargetArgs,
        /// Output JSON instead of a human-readable plan
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Directory holding datasets.json and the datasets/ fixtures [default: __tests__]
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,
    /// Manifest file (JSON, or YAML for .yaml/.yml) [default: <root>/datasets.json]
    #[arg(long, value_name = "PATH")]
    manifest: Option<PathBuf>,
    /// Directory containing positive_tests/ and negative_tests/ [default: <root>/datasets]
    #[arg(long, value_name = "DIR")]
    datasets: Option<PathBuf>,
    /// Scanner entry point, split with shell quoting rules [default: "node lib/scan.js"]
    #[arg(long, value_name = "CMD")]
    scanner: Option<String>,
    /// Treat test types other than positive/negative as manifest errors
    #[arg(long)]
    strict: bool,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Kill a scanner run that takes longer than this many seconds
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    timeout: Option<Duration>,
    /// Write a JSON run report to this path
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    /// Write a JUnit XML report to this path
    #[arg(long, value_name = "PATH")]
    junit: Option<PathBuf>,
}

fn main() -> anyhow::Result<ExitCode> {
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let cli = XpubCheckCli::parse();

    match cli.command.unwrap_or(Command::Run(cli.run)) {
        Command::Run(args) => {
            let status = run(args)?;
            Ok(ExitCode::from(status.exit_code() as u8))
        }
        Command::Plan { target, json } => {
            if plan(target, json)? {
                anyhow::bail!("manifest validation failed");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(args: RunArgs) -> anyhow::Result<RunStatus> {
    let config = resolve_config(args.target, args.timeout)?;
    let manifest = load_manifest(&config.manifest_path)?;

    let diagnostics = validate(&manifest, &config);
    log_diagnostics(&diagnostics);
    if has_errors(&diagnostics) {
        anyhow::bail!(
            "manifest {} failed validation",
            config.manifest_path.display()
        );
    }

    let scanner = ProcessScanner::with_timeout(config.timeout);
    let mut runner = CaseRunner::new(
        scanner,
        config.scanner.clone(),
        config.datasets_dir.clone(),
        io::stdout(),
    );
    let report = execute(&manifest, &mut runner).context("aborting test run")?;

    println!();
    print!("{report}");

    if let Some(path) = &args.report {
        report
            .write_json(path)
            .with_context(|| format!("writing run report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "run report written");
    }
    if let Some(path) = &args.junit {
        report
            .write_junit(path)
            .with_context(|| format!("writing JUnit report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "JUnit report written");
    }

    Ok(report.status)
}

fn plan(target: TargetArgs, json: bool) -> anyhow::Result<bool> {
    let config = resolve_config(target, None)?;
    let manifest = load_manifest(&config.manifest_path)?;
    let diagnostics = validate(&manifest, &config);

    let mut invocations = Vec::new();
    for (index, case) in manifest.iter().enumerate() {
        for test_type in &case.test_types {
            let fixture = case.fixture_path(&config.datasets_dir, test_type);
            invocations.push((index, case, test_type, config.scanner.invocation(case, &fixture)));
        }
    }

    if json {
        let planned: Vec<_> = invocations
            .iter()
            .map(|(index, case, test_type, invocation)| {
                json!({
                    "case": index,
                    "product": case.product,
                    "test_type": test_type,
                    "command": invocation.argv(),
                })
            })
            .collect();
        let payload = json!({
            "manifest": config.manifest_path.display().to_string(),
            "cases": manifest.len(),
            "diagnostics": diagnostics,
            "invocations": planned,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_diagnostics(&diagnostics);
        println!(
            "Manifest: {} ({} case(s))",
            config.manifest_path.display(),
            manifest.len()
        );
        if invocations.is_empty() {
            println!("Nothing to run.");
        }
        for (index, case, test_type, invocation) in &invocations {
            println!("  {}. {} ({})", index + 1, case.product, test_type.label());
            println!("     {invocation}");
        }
    }

    Ok(has_errors(&diagnostics))
}

fn resolve_config(target: TargetArgs, timeout: Option<Duration>) -> anyhow::Result<RunnerConfig> {
    let config = RunnerConfig::resolve(ConfigOverrides {
        root: target.root,
        manifest: target.manifest,
        datasets: target.datasets,
        scanner: target.scanner,
        timeout,
        strict: target.strict,
    })?;
    Ok(config)
}

fn validate(manifest: &TestManifest, config: &RunnerConfig) -> Vec<Diagnostic> {
    validate_manifest(
        manifest,
        ValidationOptions {
            strict: config.strict,
            datasets_dir: Some(&config.datasets_dir),
        },
    )
}

fn log_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let location = diagnostic.location.as_deref().unwrap_or("manifest");
        match diagnostic.level {
            DiagnosticLevel::Error => tracing::error!(location, "{}", diagnostic.message),
            DiagnosticLevel::Warning => tracing::warn!(location, "{}", diagnostic.message),
        }
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }

    println!("Diagnostics:");
    for diagnostic in diagnostics {
        let level = match diagnostic.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warn",
        };
        match &diagnostic.location {
            Some(location) => println!("  - [{level}] {location}: {}", diagnostic.message),
            None => println!("  - [{level}] {}", diagnostic.message),
        }
    }
    println!();
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("expected a number of seconds, got '{s}'"))?;
    if secs <= 0.0 {
        return Err(format!("timeout must be positive, got '{s}'"));
    }
    Duration::try_from_secs_f64(secs).map_err(|err| format!("invalid timeout '{s}': {err}"))
}
