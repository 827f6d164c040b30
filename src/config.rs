use std::path::PathBuf;
use std::time::Duration;

use crate::cli::SyncArgs;
use crate::retry::RetryConfig;
use crate::sync::SyncSettings;
use crate::types::ArchiveNaming;

/// Validated configuration for the `sync` command.
pub struct Config {
    pub feed_url: String,
    pub supabase_url: String,
    pub supabase_key: String,
    pub bucket: String,
    pub database: PathBuf,
    pub scratch_dir: PathBuf,

    pub watch_with_interval: Option<u64>,
    pub request_timeout: Duration,
    pub retry: RetryConfig,

    pub workers: u16,
    pub archive_naming: ArchiveNaming,

    pub dry_run: bool,
    pub skip_archives: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("feed_url", &self.feed_url)
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("database", &self.database)
            .field("workers", &self.workers)
            .field("archive_naming", &self.archive_naming)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn required(value: Option<String>, flag: &str, env: &str) -> anyhow::Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => anyhow::bail!("{} is required (or set {})", flag, env),
    }
}

impl Config {
    pub fn from_cli(args: SyncArgs) -> anyhow::Result<Self> {
        let feed_url = required(args.feed_url, "--feed-url", "FEED_URL")?;
        let supabase_url = required(args.supabase_url, "--supabase-url", "SUPABASE_URL")?;
        let supabase_key = required(args.supabase_key, "--supabase-key", "SUPABASE_KEY")?;

        if args.workers == 0 {
            anyhow::bail!("--workers must be at least 1");
        }
        if args.request_timeout == 0 {
            anyhow::bail!("--request-timeout must be at least 1 second");
        }
        if args.watch_with_interval == Some(0) {
            anyhow::bail!("--watch-with-interval must be at least 1 second");
        }
        if args.bucket.trim().is_empty() {
            anyhow::bail!("--bucket must not be empty");
        }

        let scratch_dir = args
            .scratch_dir
            .map(|d| expand_tilde(&d))
            .unwrap_or_else(std::env::temp_dir);

        Ok(Self {
            feed_url,
            supabase_url,
            supabase_key,
            bucket: args.bucket,
            database: expand_tilde(&args.database),
            scratch_dir,
            watch_with_interval: args.watch_with_interval,
            request_timeout: Duration::from_secs(args.request_timeout),
            retry: RetryConfig {
                max_retries: args.max_retries,
                base_delay_secs: args.retry_delay,
                max_delay_secs: 60,
            },
            workers: args.workers,
            archive_naming: args.archive_naming,
            dry_run: args.dry_run,
            skip_archives: args.skip_archives,
            no_progress_bar: args.no_progress_bar,
        })
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            naming: self.archive_naming,
            workers: self.workers as usize,
            dry_run: self.dry_run,
            skip_archives: self.skip_archives,
            no_progress_bar: self.no_progress_bar,
        }
    }
}
