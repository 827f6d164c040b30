use clap::{Args, Parser, Subcommand};

use crate::types::{ArchiveNaming, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "vehicle-sync",
    version,
    about = "Sync a vehicle listing feed into a local store and publish image archives"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Sync options, used when no subcommand is given
    #[command(flatten)]
    pub sync: SyncArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch the feed, reconcile the store and refresh archives (default)
    Sync(SyncArgs),

    /// Print a summary of the local store
    Status(StatusArgs),
}

impl Cli {
    /// The command to run, falling back to `sync` with the top-level options.
    pub fn effective_command(self) -> Command {
        self.command.unwrap_or(Command::Sync(self.sync))
    }
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// URL of the XML listing feed
    #[arg(long, env = "FEED_URL")]
    pub feed_url: Option<String>,

    /// Base URL of the Supabase project hosting the archive bucket
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Supabase service key.
    /// WARNING: passing via --supabase-key is visible in process listings.
    /// Prefer the SUPABASE_KEY environment variable instead.
    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,

    /// Storage bucket receiving the image archives
    #[arg(long, default_value = "vehicle_images")]
    pub bucket: String,

    /// SQLite database path
    #[arg(long, env = "VEHICLE_SYNC_DATABASE", default_value = "vehicles.db")]
    pub database: String,

    /// Directory for temporary image downloads (default: system temp dir)
    #[arg(long)]
    pub scratch_dir: Option<String>,

    /// Number of vehicles processed concurrently
    #[arg(long, default_value_t = 4)]
    pub workers: u16,

    /// Timeout in seconds for each external request
    #[arg(long, default_value_t = 30)]
    pub request_timeout: u64,

    /// Max retries per request (0 = no retries)
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// How archive objects are named
    #[arg(long, value_enum, default_value = "title")]
    pub archive_naming: ArchiveNaming,

    /// Run continuously, waiting N seconds between runs
    #[arg(long)]
    pub watch_with_interval: Option<u64>,

    /// Report planned changes without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Only reconcile vehicle data, leave archives untouched
    #[arg(long)]
    pub skip_archives: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// SQLite database path
    #[arg(long, env = "VEHICLE_SYNC_DATABASE", default_value = "vehicles.db")]
    pub database: String,

    /// Log level
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,
}

impl Command {
    pub fn log_level(&self) -> LogLevel {
        match self {
            Command::Sync(args) => args.log_level,
            Command::Status(args) => args.log_level,
        }
    }
}
