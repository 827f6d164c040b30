#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// How a vehicle's archive object is named in the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ArchiveNaming {
    /// Title with spaces replaced by underscores, e.g. `Model_A_images.zip`.
    #[default]
    Title,
    /// Internal vehicle identifier; survives title edits and duplicate titles.
    #[value(name = "vehicle-id")]
    VehicleId,
}
