use std::path::PathBuf;
use std::time::Duration;

use crate::types::{Category, RunMode};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Output directory does not exist: {0}")]
    OutputDirMissing(PathBuf),
    #[error("Output path is not a directory: {0}")]
    OutputDirNotDirectory(PathBuf),
    #[error("Fixtures directory does not exist: {0}")]
    FixturesDirMissing(PathBuf),
    #[error("Concurrency must be greater than 0")]
    InvalidConcurrency,
    #[error("{0} timeout must be greater than 0")]
    InvalidTimeout(&'static str),
    #[error("Provider '{0}' is not an enabled {1} provider")]
    UnknownProvider(String, Category),
    #[error("Provider registry entry has an empty name")]
    EmptyProviderName,
    #[error("Provider '{0}' is registered more than once")]
    DuplicateProvider(String),
    #[error("Provider '{provider}' is registered under {found} but the registry is for {expected}")]
    CategoryMismatch {
        provider: String,
        expected: Category,
        found: Category,
    },
    #[error("Registry lists {found} providers but the run is for {expected}")]
    RegistryMismatch { expected: Category, found: Category },
    #[error("Invalid selector '{selector}' for {provider}: {reason}")]
    InvalidSelector {
        provider: String,
        selector: String,
        reason: String,
    },
    #[error("Invalid class pattern '{pattern}' for {provider}: {source}")]
    InvalidClassPattern {
        provider: String,
        pattern: String,
        source: regex::Error,
    },
}

/// Everything a run needs, resolved before any provider is contacted.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub category: Category,
    pub mode: RunMode,
    pub output_dir: PathBuf,
    /// Page fixtures served in test mode, `<dir>/<url-slug>.html`.
    pub fixtures_dir: Option<PathBuf>,
    /// Restrict the run to a single provider by name.
    pub provider: Option<String>,
    pub force_update: bool,
    pub concurrency: usize,
    pub provider_timeout: Duration,
    pub run_timeout: Duration,
}

impl RunConfig {
    pub fn new(category: Category, mode: RunMode, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            category,
            mode,
            output_dir: output_dir.into(),
            fixtures_dir: None,
            provider: None,
            force_update: false,
            concurrency: 1,
            provider_timeout: Duration::from_secs(45),
            run_timeout: Duration::from_secs(600),
        }
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.output_dir.join(self.category.file_name())
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if !self.output_dir.exists() {
            return Err(ConfigError::OutputDirMissing(self.output_dir));
        }
        if !self.output_dir.is_dir() {
            return Err(ConfigError::OutputDirNotDirectory(self.output_dir));
        }
        if let Some(dir) = &self.fixtures_dir
            && !dir.is_dir()
        {
            return Err(ConfigError::FixturesDirMissing(dir.clone()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if self.provider_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("Provider"));
        }
        if self.run_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("Run"));
        }
        Ok(self)
    }
}
