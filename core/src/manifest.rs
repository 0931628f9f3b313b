use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const POSITIVE_FIXTURE_DIR: &str = "positive_tests";
pub const NEGATIVE_FIXTURE_DIR: &str = "negative_tests";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestManifest {
    cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCase {
    pub product: String,
    pub xpub: String,
    pub coin_ticker: String,
    pub filename: String,
    pub test_types: Vec<TestType>,
}

/// Expectation a case is checked against.
///
/// Anything other than `positive` is run as a negative test. Unknown
/// spellings are kept verbatim so validation can point at them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TestType {
    Positive,
    Negative,
    Unrecognized(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read manifest {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed JSON manifest {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed YAML manifest {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => ManifestFormat::Yaml,
            _ => ManifestFormat::Json,
        }
    }
}

pub fn load_manifest(path: &Path) -> Result<TestManifest, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ManifestError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ManifestError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let manifest = parse_manifest(&content, ManifestFormat::from_path(path), path)?;
    tracing::info!(
        path = %path.display(),
        cases = manifest.len(),
        "loaded test manifest"
    );
    Ok(manifest)
}

/// Parses manifest text. `origin` is only used to label errors.
pub fn parse_manifest(
    source: &str,
    format: ManifestFormat,
    origin: &Path,
) -> Result<TestManifest, ManifestError> {
    match format {
        ManifestFormat::Json => {
            serde_json::from_str(source).map_err(|source| ManifestError::Json {
                path: origin.to_path_buf(),
                source,
            })
        }
        ManifestFormat::Yaml => {
            serde_yaml::from_str(source).map_err(|source| ManifestError::Yaml {
                path: origin.to_path_buf(),
                source,
            })
        }
    }
}

impl TestManifest {
    pub fn new(cases: Vec<TestCase>) -> Self {
        Self { cases }
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TestCase> {
        self.cases.iter()
    }
}

impl<'a> IntoIterator for &'a TestManifest {
    type Item = &'a TestCase;
    type IntoIter = std::slice::Iter<'a, TestCase>;

    fn into_iter(self) -> Self::IntoIter {
        self.cases.iter()
    }
}

impl TestCase {
    pub fn fixture_path(&self, datasets_dir: &Path, test_type: &TestType) -> PathBuf {
        datasets_dir
            .join(test_type.fixture_dir())
            .join(&self.filename)
    }
}

impl TestType {
    pub fn is_positive(&self) -> bool {
        matches!(self, TestType::Positive)
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, TestType::Unrecognized(_))
    }

    pub fn fixture_dir(&self) -> &'static str {
        if self.is_positive() {
            POSITIVE_FIXTURE_DIR
        } else {
            NEGATIVE_FIXTURE_DIR
        }
    }

    /// Wording used in result banners.
    pub fn label(&self) -> &'static str {
        if self.is_positive() {
            "positive test"
        } else {
            "negative test"
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TestType::Positive => "positive",
            TestType::Negative => "negative",
            TestType::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for TestType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "positive" => TestType::Positive,
            "negative" => TestType::Negative,
            _ => TestType::Unrecognized(value),
        }
    }
}

impl From<&str> for TestType {
    fn from(value: &str) -> Self {
        TestType::from(value.to_string())
    }
}

impl From<TestType> for String {
    fn from(value: TestType) -> Self {
        match value {
            TestType::Positive => "positive".to_string(),
            TestType::Negative => "negative".to_string(),
            TestType::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
