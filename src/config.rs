//! Configuration loading and management
//!
//! Handles parsing of `.projectflow.toml` configuration files. The loaded
//! [`Config`] is immutable once handed to the engine.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// File name looked up at the repository root.
pub const CONFIG_FILE_NAME: &str = ".projectflow.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shared integration branch all workspaces are updated against
    #[serde(default = "default_mainline")]
    pub mainline: String,

    /// Path of the project configuration file inside the repository
    #[serde(default = "default_project_config_path")]
    pub project_config_path: String,

    /// Branch and tag naming tokens
    #[serde(default)]
    pub refs: RefsConfig,

    /// Changeset commit settings
    #[serde(default)]
    pub commit: CommitConfig,

    /// Foreground retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Background (cleanup) retry policy
    #[serde(default = "default_background_retry")]
    pub background: RetryConfig,

    /// Rebase polling
    #[serde(default)]
    pub rebase: RebaseConfig,

    /// Workspace update tuning
    #[serde(default)]
    pub update: UpdateConfig,

    /// Commit identity used by the local git backend
    #[serde(default)]
    pub author: AuthorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mainline: default_mainline(),
            project_config_path: default_project_config_path(),
            refs: RefsConfig::default(),
            commit: CommitConfig::default(),
            retry: RetryConfig::default(),
            background: default_background_retry(),
            rebase: RebaseConfig::default(),
            update: UpdateConfig::default(),
            author: AuthorConfig::default(),
        }
    }
}

fn default_mainline() -> String {
    "main".to_string()
}

fn default_project_config_path() -> String {
    "project.json".to_string()
}

fn default_background_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 10,
        backoff_ms: 1000,
    }
}

/// Tokens used to build branch and tag names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefsConfig {
    #[serde(default = "default_user_workspace")]
    pub user_workspace: String,
    #[serde(default = "default_group_workspace")]
    pub group_workspace: String,
    #[serde(default = "default_user_conflict_resolution")]
    pub user_conflict_resolution: String,
    #[serde(default = "default_group_conflict_resolution")]
    pub group_conflict_resolution: String,
    #[serde(default = "default_user_backup")]
    pub user_backup: String,
    #[serde(default = "default_group_backup")]
    pub group_backup: String,
    /// Leading token of patch release branches and patch workspaces
    #[serde(default = "default_patch")]
    pub patch: String,
    /// Prefix of release tags, joined directly to the version string
    #[serde(default = "default_version_tag_prefix")]
    pub version_tag_prefix: String,
    /// Leading token of temporary and integration branches
    #[serde(default = "default_temporary")]
    pub temporary: String,
}

fn default_user_workspace() -> String {
    "workspace".to_string()
}

fn default_group_workspace() -> String {
    "group-workspace".to_string()
}

fn default_user_conflict_resolution() -> String {
    "resolution".to_string()
}

fn default_group_conflict_resolution() -> String {
    "group-resolution".to_string()
}

fn default_user_backup() -> String {
    "backup".to_string()
}

fn default_group_backup() -> String {
    "group-backup".to_string()
}

fn default_patch() -> String {
    "patch".to_string()
}

fn default_version_tag_prefix() -> String {
    "release-".to_string()
}

fn default_temporary() -> String {
    "tmp".to_string()
}

impl Default for RefsConfig {
    fn default() -> Self {
        Self {
            user_workspace: default_user_workspace(),
            group_workspace: default_group_workspace(),
            user_conflict_resolution: default_user_conflict_resolution(),
            group_conflict_resolution: default_group_conflict_resolution(),
            user_backup: default_user_backup(),
            group_backup: default_group_backup(),
            patch: default_patch(),
            version_tag_prefix: default_version_tag_prefix(),
            temporary: default_temporary(),
        }
    }
}

impl RefsConfig {
    fn validate(&self) -> crate::error::Result<()> {
        let segment_tokens = [
            ("refs.user_workspace", &self.user_workspace),
            ("refs.group_workspace", &self.group_workspace),
            ("refs.user_conflict_resolution", &self.user_conflict_resolution),
            ("refs.group_conflict_resolution", &self.group_conflict_resolution),
            ("refs.user_backup", &self.user_backup),
            ("refs.group_backup", &self.group_backup),
            ("refs.patch", &self.patch),
            ("refs.temporary", &self.temporary),
        ];

        let mut seen = HashSet::new();
        for (key, token) in segment_tokens {
            if token.is_empty() || token.contains('/') {
                return Err(crate::error::Error::InvalidConfig(format!(
                    "{key} must be a non-empty token without '/'"
                )));
            }
            if !seen.insert(token.as_str()) {
                return Err(crate::error::Error::InvalidConfig(format!(
                    "{key} duplicates another branch token: {token}"
                )));
            }
        }

        if self.version_tag_prefix.is_empty() || self.version_tag_prefix.contains('/') {
            return Err(crate::error::Error::InvalidConfig(
                "refs.version_tag_prefix must be non-empty and must not contain '/'".to_string(),
            ));
        }
        Ok(())
    }
}

/// Changeset commit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Largest number of file operations a single remote commit may carry
    #[serde(default = "default_max_single_commit_size")]
    pub max_single_commit_size: usize,

    /// Attempts per chunk when a changeset is split
    #[serde(default = "default_chunk_max_attempts")]
    pub chunk_max_attempts: u32,
}

fn default_max_single_commit_size() -> usize {
    512
}

fn default_chunk_max_attempts() -> u32 {
    5
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            max_single_commit_size: default_max_single_commit_size(),
            chunk_max_attempts: default_chunk_max_attempts(),
        }
    }
}

/// Bounded retry with linearly increasing backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; attempt `n` waits `n * backoff_ms`
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    200
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    fn validate(&self, section: &str) -> crate::error::Result<()> {
        if self.max_attempts == 0 {
            return Err(crate::error::Error::InvalidConfig(format!(
                "{section}.max_attempts must be at least 1"
            )));
        }
        Ok(())
    }
}

/// Rebase polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebaseConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_rebase_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_rebase_timeout_ms() -> u64 {
    600_000
}

impl Default for RebaseConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_rebase_timeout_ms(),
        }
    }
}

impl RebaseConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Workspace update tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Minimum commits past the merge base before squash-and-retry is
    /// attempted. Zero always attempts it.
    #[serde(default = "default_squash_min_commits")]
    pub squash_min_commits: usize,
}

fn default_squash_min_commits() -> usize {
    2
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            squash_min_commits: default_squash_min_commits(),
        }
    }
}

/// Commit identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorConfig {
    #[serde(default = "default_author_name")]
    pub name: String,
    #[serde(default = "default_author_email")]
    pub email: String,
}

fn default_author_name() -> String {
    "projectflow".to_string()
}

fn default_author_email() -> String {
    "projectflow@localhost".to_string()
}

impl Default for AuthorConfig {
    fn default() -> Self {
        Self {
            name: default_author_name(),
            email: default_author_email(),
        }
    }
}

impl Config {
    /// Load configuration from a `.projectflow.toml` file
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from repo root, or return defaults
    pub fn load_from_repo(repo_root: &PathBuf) -> Self {
        let config_path = repo_root.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path).unwrap_or_default()
        } else {
            Self::default()
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &PathBuf) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.mainline.trim().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "mainline cannot be empty".to_string(),
            ));
        }
        if crate::paths::canonicalize(&self.project_config_path).is_none() {
            return Err(crate::error::Error::InvalidConfig(format!(
                "project_config_path is not a valid repository path: {}",
                self.project_config_path
            )));
        }
        if self.mainline.starts_with(&format!("{}/", self.refs.temporary)) {
            return Err(crate::error::Error::InvalidConfig(
                "mainline cannot live under the temporary branch namespace".to_string(),
            ));
        }
        self.refs.validate()?;
        if self.commit.max_single_commit_size == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "commit.max_single_commit_size must be at least 1".to_string(),
            ));
        }
        if self.commit.chunk_max_attempts == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "commit.chunk_max_attempts must be at least 1".to_string(),
            ));
        }
        self.retry.validate("retry")?;
        self.background.validate("background")?;
        if self.rebase.poll_interval_ms == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "rebase.poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
