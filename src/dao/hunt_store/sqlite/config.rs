use std::time::Duration;

const DEFAULT_URL: &str = "sqlite://hunt.db?mode=rwc";
const DEFAULT_MAX_CONNECTIONS: u32 = 16;

/// Runtime configuration describing how to open the SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    /// Keep connections open forever; required for `sqlite::memory:` where every
    /// connection owns its own database.
    pub pin_connections: bool,
}

impl SqliteConfig {
    /// Configuration for a database file or URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: Duration::from_secs(5),
            pin_connections: false,
        }
    }

    /// Private in-memory database served by a single pinned connection.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_owned(),
            max_connections: 1,
            busy_timeout: Duration::from_secs(5),
            pin_connections: true,
        }
    }

    /// Build a configuration from `DATABASE_URL`, falling back to a local file.
    pub fn from_env() -> Self {
        let url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_owned());
        Self::new(url)
    }
}
