use crate::runner::{LaunchError, ScannerCommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ROOT: &str = "__tests__";
pub const MANIFEST_FILE: &str = "datasets.json";
pub const DATASETS_DIR: &str = "datasets";
pub const DEFAULT_SCANNER: &str = "node lib/scan.js";

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub manifest_path: PathBuf,
    pub datasets_dir: PathBuf,
    pub scanner: ScannerCommand,
    pub timeout: Option<Duration>,
    pub strict: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub root: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub datasets: Option<PathBuf>,
    pub scanner: Option<String>,
    pub timeout: Option<Duration>,
    pub strict: bool,
}

impl RunnerConfig {
    /// Layout rooted at `root`: `<root>/datasets.json` and `<root>/datasets/`.
    pub fn from_root(root: &Path) -> Self {
        Self {
            manifest_path: root.join(MANIFEST_FILE),
            datasets_dir: root.join(DATASETS_DIR),
            scanner: ScannerCommand::default(),
            timeout: None,
            strict: false,
        }
    }

    pub fn resolve(overrides: ConfigOverrides) -> Result<Self, LaunchError> {
        let root = overrides
            .root
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
        let mut config = Self::from_root(&root);

        if let Some(manifest) = overrides.manifest {
            config.manifest_path = manifest;
        }
        if let Some(datasets) = overrides.datasets {
            config.datasets_dir = datasets;
        }
        if let Some(scanner) = overrides.scanner {
            config.scanner = ScannerCommand::parse(&scanner)?;
        }
        config.timeout = overrides.timeout;
        config.strict = overrides.strict;

        Ok(config)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from_root(Path::new(DEFAULT_ROOT))
    }
}
