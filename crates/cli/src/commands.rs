//! Command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use github::GithubContentStore;
use local_store::{FileCache, MemoryCache, TokenStore};
use portal::{
    parse_records, render_records, CollectionKind, LocalCache, PortalError, RateLimitSnapshot, Record, RecordId,
    Timestamp,
};
use serde_json::Value;
use sync_engine::{DataSource, LoadMode, SyncEngine, WriteReceipt};
use tracing::{info, warn};

use crate::config::CliConfig;

/// Everything a command needs, wired once per process.
pub struct App {
    config: CliConfig,
    github: Arc<GithubContentStore>,
    tokens: TokenStore,
    engine: SyncEngine,
}

impl App {
    /// Resolves the access token and starts the sync engine.
    ///
    /// The environment wins over the stored token. Without either, reads of
    /// public repositories still work. With `no_cache` the persisted cache is
    /// neither read nor written.
    pub async fn connect(config: CliConfig, no_cache: bool) -> Result<Self> {
        let tokens = TokenStore::new(config.token_path());
        let token = match config.env_token.clone() {
            Some(token) => Some(token),
            None => tokens.load().await.context("failed to read the stored access token")?,
        };
        if token.is_none() {
            info!("no access token; only public reads will work");
        }

        let github = Arc::new(GithubContentStore::new(config.github.clone(), token)?);
        let cache: Arc<dyn LocalCache> = if no_cache {
            Arc::new(MemoryCache::new())
        } else {
            Arc::new(FileCache::new(config.cache_dir.clone()))
        };
        let engine = SyncEngine::start(github.clone(), cache, config.sync.clone());
        Ok(Self {
            config,
            github,
            tokens,
            engine,
        })
    }

    /// Drains the write queue and stops the worker.
    pub async fn close(&self) -> Result<()> {
        let pending = self.engine.pending_writes();
        if pending > 0 {
            info!(pending, "waiting for queued writes");
        }
        self.engine.shutdown().await.context("failed to drain the write queue")
    }

    pub async fn pull(&self, refresh: bool, kinds: Vec<CollectionKind>) -> Result<()> {
        let mode = if refresh { LoadMode::Refresh } else { LoadMode::PreferCache };
        let kinds = if kinds.is_empty() { CollectionKind::ALL.to_vec() } else { kinds };
        for kind in kinds {
            let outcome = self
                .engine
                .load(kind, mode)
                .await
                .with_context(|| format!("failed to load {kind}"))?;
            let mut line = format!("{kind:<13} {:>4} records  ({})", outcome.records.len(), source_label(outcome.source));
            if outcome.kept_local_edits {
                line.push_str("  newer remote data not applied: local edits pending");
            }
            println!("{line}");
        }
        Ok(())
    }

    pub async fn list(&self, kind: CollectionKind, json: bool) -> Result<()> {
        let records = self.engine.records(kind).await?;
        if json {
            print!("{}", render_records(&records));
            return Ok(());
        }
        if records.is_empty() {
            println!("no {kind}");
        }
        for record in &records {
            println!("{}", summary_line(record));
        }
        Ok(())
    }

    pub async fn get(&self, kind: CollectionKind, id: RecordId) -> Result<()> {
        let record = self.engine.get(kind, id).await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        Ok(())
    }

    pub async fn put(&self, kind: CollectionKind, data: Option<String>, file: Option<PathBuf>) -> Result<()> {
        self.require_token()?;
        let text = match (data, file) {
            (Some(data), _) => data,
            (None, Some(path)) => std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            (None, None) => bail!("either --data or --file is required"),
        };
        let value: Value = serde_json::from_str(&text).context("record is not valid JSON")?;
        let record = Record::from_value(value).context("record must be a JSON object")?;

        let (id, pending) = self.engine.upsert(kind, record).await?;
        let receipt = pending.wait().await?;
        println!("saved {kind} #{id}{}", receipt_suffix(&receipt));
        Ok(())
    }

    pub async fn delete(&self, kind: CollectionKind, id: RecordId) -> Result<()> {
        self.require_token()?;
        let receipt = self.engine.delete(kind, id).await?.wait().await?;
        println!("deleted {kind} #{id}{}", receipt_suffix(&receipt));
        Ok(())
    }

    pub async fn import(&self, kind: CollectionKind, file: &Path) -> Result<()> {
        self.require_token()?;
        let body = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
        let records = parse_records(&body)
            .map_err(|message| PortalError::InvalidRecord { message })
            .with_context(|| format!("{} is not a collection file", file.display()))?;
        let count = records.len();
        let receipt = self.engine.replace_all(kind, records).await?.wait().await?;
        println!("imported {count} {kind}{}", receipt_suffix(&receipt));
        Ok(())
    }

    pub async fn status(&self) -> Result<()> {
        println!(
            "repository    {}@{} ({})",
            self.config.github.repository,
            self.config.github.branch,
            self.config.github.data_dir
        );
        println!("cache         {}", self.config.cache_dir.display());
        println!("signed in     {}", if self.github.has_token() { "yes" } else { "no" });

        for kind in CollectionKind::ALL {
            if let Err(e) = self.engine.load(kind, LoadMode::PreferCache).await {
                warn!(kind = %kind, error = %e, "could not load collection");
                println!("{kind:<13} unavailable: {e}");
            }
        }
        let now = Timestamp::now();
        for status in self.engine.status() {
            let sha = status.sha.as_ref().map(|s| short_sha(s.as_str())).unwrap_or("-");
            let age = now.duration_since(status.loaded_at).as_secs();
            let state = match (status.dirty, status.in_flight) {
                (_, true) => "writing",
                (true, false) => "unsaved",
                (false, false) => "clean",
            };
            println!(
                "{:<13} {:>4} records  {:<8} sha {:<8} {} ({}s ago)",
                status.kind,
                status.records,
                state,
                sha,
                source_label(status.source),
                age
            );
        }
        if let Some(limit) = self.engine.rate_limit() {
            println!("{}", rate_limit_line(&limit, now));
        }
        Ok(())
    }

    pub async fn rate_limit(&self) -> Result<()> {
        match self.github.refresh_rate_limit().await? {
            Some(limit) => println!("{}", rate_limit_line(&limit, Timestamp::now())),
            None => println!("GitHub did not report a rate limit"),
        }
        Ok(())
    }

    pub async fn login(&self, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            bail!("the access token must not be empty");
        }
        let candidate = GithubContentStore::new(self.config.github.clone(), Some(token.to_string()))?;
        let login = candidate.verify_token().await.context("GitHub rejected the access token")?;
        self.tokens.save(token).await?;
        println!("signed in as {login}; token stored in {}", self.tokens.path().display());
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.tokens.clear().await?;
        println!("stored access token removed");
        if self.config.env_token.is_some() {
            println!("note: {} is still set", crate::config::TOKEN_ENV);
        }
        Ok(())
    }

    pub async fn whoami(&self) -> Result<()> {
        self.require_token()?;
        let login = self.github.verify_token().await?;
        println!("{login}");
        Ok(())
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.engine.clear_cache().await?;
        println!("cache cleared");
        Ok(())
    }

    fn require_token(&self) -> Result<(), PortalError> {
        if self.github.has_token() {
            Ok(())
        } else {
            Err(PortalError::MissingToken)
        }
    }
}

fn source_label(source: DataSource) -> &'static str {
    match source {
        DataSource::Memory => "memory",
        DataSource::Cache => "cache",
        DataSource::Remote => "github",
        DataSource::StaleCache => "stale cache, GitHub unreachable",
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

fn receipt_suffix(receipt: &WriteReceipt) -> String {
    match (&receipt.sha, receipt.attempts) {
        (_, 0) => " (no changes to write)".to_string(),
        (Some(sha), 1) => format!(" (commit {})", short_sha(sha.as_str())),
        (Some(sha), attempts) => format!(" (commit {} after {attempts} attempts)", short_sha(sha.as_str())),
        (None, _) => String::new(),
    }
}

/// One line per record: id and the first descriptive field present.
fn summary_line(record: &Record) -> String {
    let id = record.id().map_or_else(|| "-".to_string(), |id| id.to_string());
    let label = ["name", "title", "headline"]
        .iter()
        .find_map(|field| record.get(field).and_then(Value::as_str))
        .unwrap_or("");
    format!("{id:>5}  {label}")
}

fn rate_limit_line(limit: &RateLimitSnapshot, now: Timestamp) -> String {
    let resets_in = limit.reset_at.duration_since(now).as_secs();
    format!(
        "rate limit    {}/{} remaining ({}), resets in {}m{:02}s",
        limit.remaining,
        limit.limit,
        limit.resource,
        resets_in / 60,
        resets_in % 60
    )
}
