use std::path::PathBuf;

/// Server settings, read from `RACKD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub master_key: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numeric values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: lookup("RACKD_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(5480),
            bind: lookup("RACKD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(lookup("RACKD_DATA_DIR").unwrap_or_else(|| "./data".into())),
            master_key: lookup("RACKD_MASTER_KEY").unwrap_or_else(|| "rackd".into()),
            max_connections: lookup("RACKD_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(256),
            compact_threshold: lookup("RACKD_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            metrics_port: lookup("RACKD_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("rackd.wal")
    }
}
