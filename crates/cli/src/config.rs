//! `labportal.toml` loading and validation.
//!
//! The file is deserialized into [`RawConfig`] (every field optional, with
//! defaults), environment overrides are applied, and the result is validated
//! into a [`CliConfig`]. Nothing downstream sees an unvalidated value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use github::{GithubConfig, DEFAULT_API_BASE};
use portal::{BranchName, CacheTtl, ConflictStrategy, ContentPath, PortalError, RepositoryId};
use serde::Deserialize;
use sync_engine::SyncSettings;

pub const TOKEN_ENV: &str = "LABPORTAL_GITHUB_TOKEN";
pub const OTLP_ENV: &str = "LABPORTAL_OTLP_ENDPOINT";

const TOKEN_FILE: &str = "token";

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    repository: RawRepository,
    github: RawGithub,
    cache: RawCache,
    sync: RawSync,
    observability: RawObservability,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawRepository {
    owner: Option<String>,
    name: Option<String>,
    branch: String,
    data_dir: String,
}

impl Default for RawRepository {
    fn default() -> Self {
        Self {
            owner: None,
            name: None,
            branch: "main".to_string(),
            data_dir: "data".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawGithub {
    api_base: String,
    user_agent: String,
    low_rate_limit_warning: u32,
    timeout_secs: u64,
}

impl Default for RawGithub {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            user_agent: concat!("labportal/", env!("CARGO_PKG_VERSION")).to_string(),
            low_rate_limit_warning: 10,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawCache {
    dir: Option<PathBuf>,
    ttl_secs: u64,
}

impl Default for RawCache {
    fn default() -> Self {
        Self {
            dir: None,
            ttl_secs: CacheTtl::default().as_duration().as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSync {
    write_delay_ms: u64,
    max_conflict_retries: u32,
    conflict_strategy: ConflictStrategy,
    commit_prefix: String,
}

impl Default for RawSync {
    fn default() -> Self {
        let defaults = SyncSettings::default();
        Self {
            write_delay_ms: defaults.write_delay.as_millis() as u64,
            max_conflict_retries: defaults.max_conflict_retries,
            conflict_strategy: defaults.conflict_strategy,
            commit_prefix: defaults.commit_prefix,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawObservability {
    log_format: LogFormat,
    otlp_endpoint: Option<String>,
}

// ---------------------------------------------------------------------------
// Validated configuration
// ---------------------------------------------------------------------------

/// Formatting of log lines on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

/// Everything the binary needs, validated.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub github: GithubConfig,
    pub sync: SyncSettings,
    pub cache_dir: PathBuf,
    pub observability: ObservabilityConfig,
    /// Token from the environment; the token file is consulted separately.
    pub env_token: Option<String>,
}

impl CliConfig {
    /// Reads `path`, applies environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text, |name| std::env::var(name).ok())
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parses and validates TOML text, looking environment overrides up through `env`.
    pub fn from_toml(text: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text).context("failed to parse TOML")?;
        Ok(Self::validate(raw, env)?)
    }

    /// Path of the persisted token file.
    pub fn token_path(&self) -> PathBuf {
        self.cache_dir.join(TOKEN_FILE)
    }

    fn validate(raw: RawConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, PortalError> {
        let RawConfig {
            repository,
            github,
            cache,
            sync,
            observability,
        } = raw;

        let (Some(owner), Some(name)) = (repository.owner, repository.name) else {
            return Err(invalid("[repository] owner and name are required"));
        };
        let repository_id = RepositoryId::from_parts(&owner, &name)
            .ok_or_else(|| invalid(format!("invalid repository '{owner}/{name}'")))?;
        let branch =
            BranchName::new(repository.branch).ok_or_else(|| invalid("[repository] branch must not be empty"))?;
        let data_dir = ContentPath::new(repository.data_dir.trim_matches('/'))
            .ok_or_else(|| invalid("[repository] data_dir must not be empty"))?;

        let api_base = github.api_base.trim_end_matches('/').to_string();
        if !(api_base.starts_with("https://") || api_base.starts_with("http://")) {
            return Err(invalid(format!(
                "[github] api_base must be an http(s) URL, got '{}'",
                github.api_base
            )));
        }
        if github.user_agent.trim().is_empty() {
            return Err(invalid("[github] user_agent must not be empty"));
        }
        if github.timeout_secs == 0 {
            return Err(invalid("[github] timeout_secs must be greater than zero"));
        }

        let commit_prefix = sync.commit_prefix;
        if commit_prefix.trim().is_empty() {
            return Err(invalid("[sync] commit_prefix must not be empty"));
        }

        let cache_dir = match cache.dir {
            Some(dir) => dir,
            None => dirs::cache_dir()
                .map(|d| d.join("labportal"))
                .ok_or_else(|| invalid("no platform cache directory; set [cache] dir"))?,
        };

        let otlp_endpoint = env(OTLP_ENV)
            .or(observability.otlp_endpoint)
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());

        let env_token = env(TOKEN_ENV).map(|t| t.trim().to_string()).filter(|t| !t.is_empty());

        Ok(Self {
            github: GithubConfig {
                api_base,
                repository: repository_id,
                branch,
                data_dir,
                user_agent: github.user_agent,
                low_rate_limit_warning: github.low_rate_limit_warning,
                timeout: Duration::from_secs(github.timeout_secs),
            },
            sync: SyncSettings {
                cache_ttl: CacheTtl::new(Duration::from_secs(cache.ttl_secs)),
                write_delay: Duration::from_millis(sync.write_delay_ms),
                max_conflict_retries: sync.max_conflict_retries,
                conflict_strategy: sync.conflict_strategy,
                commit_prefix,
            },
            cache_dir,
            observability: ObservabilityConfig {
                log_format: observability.log_format,
                otlp_endpoint,
            },
            env_token,
        })
    }
}

fn invalid(message: impl Into<String>) -> PortalError {
    PortalError::Configuration { message: message.into() }
}
