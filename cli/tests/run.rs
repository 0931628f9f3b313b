#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Exits with the number stored in the fixture passed via `--operations`.
const FAKE_SCANNER: &str = r#"#!/bin/sh
ops=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--operations" ]; then ops="$2"; fi
  shift
done
echo "scanned $ops"
exit "$(cat "$ops")"
"#;

const PASS_COINX: &str = "PASS — CoinX (positive test)";
const FAIL_COINX: &str = "FAIL — CoinX (positive test)";

struct TestTree {
    dir: TempDir,
}

impl TestTree {
    fn new(manifest: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let tree = Self { dir };
        fs::write(tree.root().join("datasets.json"), manifest).expect("write manifest");
        fs::write(tree.scanner(), FAKE_SCANNER).expect("write scanner");
        tree
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn scanner(&self) -> PathBuf {
        self.root().join("scanner.sh")
    }

    fn fixture(&self, kind: &str, filename: &str, exit_code: i32) -> &Self {
        let dir = self.root().join("datasets").join(kind);
        fs::create_dir_all(&dir).expect("create fixture dir");
        fs::write(dir.join(filename), exit_code.to_string()).expect("write fixture");
        self
    }

    fn xpubcheck(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_xpubcheck"))
            .args(args)
            .arg("--root")
            .arg(self.root())
            .arg("--scanner")
            .arg(format!("sh '{}'", self.scanner().display()))
            .env("RUST_LOG", "warn")
            .output()
            .expect("xpubcheck runs")
    }

    fn run(&self, args: &[&str]) -> Output {
        let mut full = vec!["run"];
        full.extend_from_slice(args);
        self.xpubcheck(&full)
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn single_case(test_types: &str) -> String {
    format!(
        r#"[{{"product":"CoinX","xpub":"xpub6D","coin_ticker":"btc","filename":"f1.json","test_types":{test_types}}}]"#
    )
}

#[test]
fn clean_positive_scan_passes() {
    let tree = TestTree::new(&single_case(r#"["positive"]"#));
    tree.fixture("positive_tests", "f1.json", 0);

    let output = tree.run(&[]);
    let out = stdout(&output);

    assert_eq!(output.status.code(), Some(0), "stdout: {out}");
    assert_eq!(out.matches("Test result").count(), 1);
    assert!(out.contains(PASS_COINX));
    assert!(out.contains("positive_tests/f1.json"));
}

#[test]
fn flagged_positive_scan_fails() {
    let tree = TestTree::new(&single_case(r#"["positive"]"#));
    tree.fixture("positive_tests", "f1.json", 1);

    let output = tree.run(&[]);
    let out = stdout(&output);

    assert_eq!(output.status.code(), Some(1), "stdout: {out}");
    assert_eq!(out.matches("Test result").count(), 1);
    assert!(out.contains(FAIL_COINX));
}

#[test]
fn run_is_the_default_command() {
    let tree = TestTree::new(&single_case(r#"["positive"]"#));
    tree.fixture("positive_tests", "f1.json", 0);

    let output = tree.xpubcheck(&[]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains(PASS_COINX));
}

#[test]
fn negative_case_needs_a_flagged_scan() {
    let tree = TestTree::new(&single_case(r#"["positive", "negative"]"#));
    tree.fixture("positive_tests", "f1.json", 0)
        .fixture("negative_tests", "f1.json", 3);

    let output = tree.run(&[]);
    let out = stdout(&output);

    assert_eq!(output.status.code(), Some(0), "stdout: {out}");
    assert!(out.contains(PASS_COINX));
    assert!(out.contains("PASS — CoinX (negative test)"));
    assert!(out.contains("negative_tests/f1.json"));
}

#[test]
fn first_failure_skips_remaining_cases() {
    let manifest = r#"[
  {"product":"CoinA","xpub":"xpubA","coin_ticker":"btc","filename":"a.json","test_types":["negative"]},
  {"product":"CoinB","xpub":"xpubB","coin_ticker":"ltc","filename":"b.json","test_types":["positive"]}
]"#;
    let tree = TestTree::new(manifest);
    tree.fixture("negative_tests", "a.json", 0)
        .fixture("positive_tests", "b.json", 0);

    let output = tree.run(&[]);
    let out = stdout(&output);

    assert_eq!(output.status.code(), Some(1), "stdout: {out}");
    assert!(out.contains("FAIL — CoinA (negative test)"));
    assert!(!out.contains("b.json"));
    assert!(!out.contains("CoinB"));
}

#[test]
fn empty_manifest_succeeds() {
    let tree = TestTree::new("[]");
    let output = tree.run(&[]);
    assert_eq!(output.status.code(), Some(0));
    assert!(!stdout(&output).contains("Test result"));
}

#[test]
fn malformed_manifest_aborts_before_scanning() {
    let tree = TestTree::new(r#"[{"product":"CoinX","xpub":"xpub6D"}]"#);
    let output = tree.run(&[]);

    assert_ne!(output.status.code(), Some(0));
    assert!(!stdout(&output).contains("Test result"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("malformed JSON manifest"));
}

#[test]
fn missing_manifest_aborts() {
    let tree = TestTree::new("[]");
    fs::remove_file(tree.root().join("datasets.json")).expect("remove manifest");

    let output = tree.run(&[]);
    assert_ne!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stderr).contains("manifest not found"));
}

#[test]
fn unlaunchable_scanner_is_fatal() {
    let tree = TestTree::new(&single_case(r#"["negative"]"#));
    tree.fixture("negative_tests", "f1.json", 1);

    let output = Command::new(env!("CARGO_BIN_EXE_xpubcheck"))
        .args(["run", "--scanner", "/nonexistent/xpub-scan"])
        .arg("--root")
        .arg(tree.root())
        .output()
        .expect("xpubcheck runs");

    assert_ne!(output.status.code(), Some(0));
    assert!(!stdout(&output).contains("Test result"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to launch scanner"));
}

#[test]
fn unknown_type_runs_as_negative_unless_strict() {
    let tree = TestTree::new(&single_case(r#"["negtive"]"#));
    tree.fixture("negative_tests", "f1.json", 1);

    let lenient = tree.run(&[]);
    assert_eq!(lenient.status.code(), Some(0));
    assert!(stdout(&lenient).contains("PASS — CoinX (negative test)"));

    let strict = tree.run(&["--strict"]);
    assert_ne!(strict.status.code(), Some(0));
    assert!(!stdout(&strict).contains("Test result"));
}

#[test]
fn hung_scanner_fails_after_timeout() {
    let tree = TestTree::new(&single_case(r#"["negative"]"#));
    tree.fixture("negative_tests", "f1.json", 1);
    let sleeper = tree.root().join("sleeper.sh");
    fs::write(&sleeper, "#!/bin/sh\nexec sleep 30\n").expect("write sleeper");

    let output = Command::new(env!("CARGO_BIN_EXE_xpubcheck"))
        .args(["run", "--timeout", "0.5"])
        .arg("--root")
        .arg(tree.root())
        .arg("--scanner")
        .arg(format!("sh '{}'", sleeper.display()))
        .output()
        .expect("xpubcheck runs");

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("FAIL — CoinX (negative test)"));
}

#[test]
fn writes_json_and_junit_reports() {
    let tree = TestTree::new(&single_case(r#"["positive"]"#));
    tree.fixture("positive_tests", "f1.json", 4);
    let report = tree.root().join("out").join("report.json");
    let junit = tree.root().join("out").join("junit.xml");

    let output = tree.run(&[
        "--report",
        report.to_str().expect("utf8 path"),
        "--junit",
        junit.to_str().expect("utf8 path"),
    ]);
    assert_eq!(output.status.code(), Some(1));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).expect("report written"))
            .expect("report is json");
    assert_eq!(json["status"], "failed");
    assert_eq!(json["results"][0]["exit_code"], 4);
    assert_eq!(json["results"][0]["command"][0], "sh");

    let xml = fs::read_to_string(&junit).expect("junit written");
    assert!(xml.contains("<testsuite"));
    assert!(xml.contains("failures=\"1\""));
    assert!(xml.contains("scanner exited with 4"));
}

#[test]
fn plan_lists_invocations_without_running() {
    let tree = TestTree::new(&single_case(r#"["positive", "negative"]"#));

    let output = tree.xpubcheck(&["plan", "--json"]);
    assert_eq!(output.status.code(), Some(0));

    let plan: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("plan is json");
    let invocations = plan["invocations"].as_array().expect("invocations list");
    assert_eq!(invocations.len(), 2);
    let command: Vec<&str> = invocations[0]["command"]
        .as_array()
        .expect("command array")
        .iter()
        .filter_map(|part| part.as_str())
        .collect();
    assert_eq!(
        &command[2..5],
        ["xpub6D", "--currency", "btc"].as_slice()
    );
    assert_eq!(
        &command[command.len() - 3..],
        ["--diff", "--custom-provider", "--quiet"].as_slice()
    );
    assert_eq!(plan["diagnostics"].as_array().map(Vec::len), Some(2));
}

#[test]
fn plan_fails_on_invalid_manifest() {
    let tree = TestTree::new(&single_case("[]"));
    let output = tree.xpubcheck(&["plan"]);

    assert_ne!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("[error]"));
}
