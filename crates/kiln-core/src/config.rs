//! Configuration: TOML file + `KILN_*` environment overrides.
//!
//! ```toml
//! enforce_ownership = false
//!
//! [pool]
//! workers = 4
//! queue_capacity = 64
//!
//! [build]
//! program = "mvn"
//! args = ["--batch-mode"]
//! descriptor_flag = "-f"
//! goals = ["test"]
//! descriptor = "pom.xml"
//! timeout_secs = 1800
//!
//! [storage]
//! backend = "file"
//! dir = "/var/lib/kiln/logs"
//!
//! [status]
//! retention_secs = 3600
//!
//! [auth]
//! username = "ci"
//! password = "secret"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::LoggingConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KilnConfig {
    pub pool: PoolConfig,
    pub build: BuildToolConfig,
    pub storage: StorageConfig,
    pub status: StatusConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    pub logging: LoggingConfig,

    /// Bind request ids to the principal that created them.
    pub enforce_ownership: bool,

    /// Parent directory for cached uploads and extracted projects.
    /// Defaults to the system temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Number of jobs that may run at once.
    pub workers: usize,

    /// Accepted jobs waiting for a worker. Submissions beyond this are rejected.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
        }
    }
}

/// External build tool invocation.
///
/// The command line is `program args.. descriptor_flag <descriptor> goals..`,
/// run from the directory containing the descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildToolConfig {
    pub program: String,
    pub args: Vec<String>,
    pub descriptor_flag: Option<String>,
    pub goals: Vec<String>,

    /// File name searched for inside the extracted archive.
    pub descriptor: String,

    pub timeout_secs: u64,
}

impl Default for BuildToolConfig {
    fn default() -> Self {
        Self {
            program: "mvn".to_string(),
            args: vec!["--batch-mode".to_string()],
            descriptor_flag: Some("-f".to_string()),
            goals: vec!["test".to_string()],
            descriptor: "pom.xml".to_string(),
            timeout_secs: 30 * 60,
        }
    }
}

impl BuildToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Arguments passed to `program` for a given descriptor path.
    pub fn command_args(&self, descriptor: &Path) -> Vec<std::ffi::OsString> {
        let mut out: Vec<std::ffi::OsString> = self.args.iter().map(Into::into).collect();
        if let Some(flag) = &self.descriptor_flag {
            out.push(flag.into());
        }
        out.push(descriptor.as_os_str().to_owned());
        out.extend(self.goals.iter().map(Into::into));
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// How long finished jobs stay queryable by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatusConfig {
    pub retention_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            retention_secs: 60 * 60,
        }
    }
}

impl StatusConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl KilnConfig {
    /// Load from an optional TOML file, then apply `KILN_*` overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply overrides from a variable lookup (the process env in `load`).
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("KILN_WORKERS") {
            self.pool.workers = parse_var("KILN_WORKERS", v)?;
        }
        if let Some(v) = lookup("KILN_QUEUE_CAPACITY") {
            self.pool.queue_capacity = parse_var("KILN_QUEUE_CAPACITY", v)?;
        }
        if let Some(v) = lookup("KILN_BUILD_TIMEOUT_SECS") {
            self.build.timeout_secs = parse_var("KILN_BUILD_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("KILN_STATUS_RETENTION_SECS") {
            self.status.retention_secs = parse_var("KILN_STATUS_RETENTION_SECS", v)?;
        }
        if let Some(v) = lookup("KILN_BUILD_PROGRAM").filter(|v| !v.is_empty()) {
            self.build.program = v;
        }
        if let Some(v) = lookup("KILN_LOG_DIR").filter(|v| !v.is_empty()) {
            self.storage.backend = StorageBackend::File;
            self.storage.dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Fail-fast checks run before anything is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.workers == 0 {
            return Err(ConfigError::Invalid("pool.workers must be at least 1".into()));
        }
        if self.pool.queue_capacity == 0 {
            return Err(ConfigError::Invalid("pool.queue_capacity must be at least 1".into()));
        }
        if self.build.program.trim().is_empty() {
            return Err(ConfigError::Invalid("build.program is empty".into()));
        }
        if self.build.descriptor.trim().is_empty() || self.build.descriptor.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "build.descriptor must be a plain file name, got {:?}",
                self.build.descriptor
            )));
        }
        if self.build.timeout_secs == 0 {
            return Err(ConfigError::Invalid("build.timeout_secs must be at least 1".into()));
        }
        if self.status.retention_secs == 0 {
            return Err(ConfigError::Invalid("status.retention_secs must be at least 1".into()));
        }
        if self.storage.backend == StorageBackend::File && self.storage.dir.is_none() {
            return Err(ConfigError::Invalid("storage.dir is required for the file backend".into()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = KilnConfig::default();
        config.validate().unwrap();
        assert_eq!(config.build.program, "mvn");
        assert_eq!(config.build.descriptor, "pom.xml");
        assert_eq!(config.build.timeout(), Duration::from_secs(1800));
        assert!(!config.enforce_ownership);
        assert_eq!(config.status.retention(), Duration::from_secs(3600));
    }

    #[test]
    fn parses_partial_toml() {
        let config: KilnConfig = toml::from_str(
            r#"
            enforce_ownership = true

            [pool]
            workers = 2

            [build]
            program = "gradle"
            descriptor = "build.gradle"
            descriptor_flag = "-b"

            [storage]
            backend = "file"
            dir = "/tmp/kiln-logs"

            [auth]
            username = "ci"
            password = "pw"
            "#,
        )
        .unwrap();

        assert!(config.enforce_ownership);
        assert_eq!(config.pool.workers, 2);
        assert_eq!(config.pool.queue_capacity, 64);
        assert_eq!(config.build.program, "gradle");
        assert_eq!(config.build.goals, vec!["test".to_string()]);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.auth.as_ref().map(|a| a.username.as_str()), Some("ci"));
        config.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<KilnConfig>("[pool]\nthreads = 3\n").unwrap_err();
        assert!(err.to_string().contains("threads"));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = KilnConfig::default();
        config
            .apply_env_from(env(&[
                ("KILN_WORKERS", "8"),
                ("KILN_BUILD_TIMEOUT_SECS", "60"),
                ("KILN_LOG_DIR", "/var/log/kiln"),
                ("KILN_STATUS_RETENTION_SECS", "120"),
            ]))
            .unwrap();

        assert_eq!(config.status.retention_secs, 120);
        assert_eq!(config.pool.workers, 8);
        assert_eq!(config.build.timeout_secs, 60);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.storage.dir, Some(PathBuf::from("/var/log/kiln")));
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = KilnConfig::default();
        let err = config
            .apply_env_from(env(&[("KILN_QUEUE_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "KILN_QUEUE_CAPACITY", .. }));
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = KilnConfig::default();
        config.pool.workers = 0;
        assert!(config.validate().is_err());

        let mut config = KilnConfig::default();
        config.build.descriptor = "sub/pom.xml".into();
        assert!(config.validate().is_err());

        let mut config = KilnConfig::default();
        config.storage.backend = StorageBackend::File;
        assert!(config.validate().is_err());

        let mut config = KilnConfig::default();
        config.status.retention_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn command_args_place_descriptor_before_goals() {
        let build = BuildToolConfig::default();
        let args = build.command_args(Path::new("/tmp/x/pom.xml"));
        let args: Vec<String> = args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["--batch-mode", "-f", "/tmp/x/pom.xml", "test"]);
    }

    #[test]
    fn auth_debug_hides_password() {
        let auth = AuthConfig {
            username: "ci".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
