use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_MERGE_PARALLELISM: usize = 16;
const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_REAP_INTERVAL_SECS: u64 = 10 * 60;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub max_body_bytes: usize,
    pub merge_parallelism: usize,
    pub session_ttl_secs: u64,
    pub reap_interval_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Resumable chunked upload server")]
pub struct Args {
    /// Host to bind to (overrides CHUNK_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CHUNK_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding chunks and merged files (overrides CHUNK_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Largest accepted request body in bytes (overrides CHUNK_STORE_MAX_BODY_BYTES)
    #[arg(long)]
    pub max_body_bytes: Option<usize>,

    /// Chunk copies running at once across all merges (overrides CHUNK_STORE_MERGE_PARALLELISM)
    #[arg(long)]
    pub merge_parallelism: Option<usize>,

    /// Seconds an unmerged upload may sit idle before it is removed; 0 disables
    /// reaping (overrides CHUNK_STORE_SESSION_TTL_SECS)
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,

    /// Seconds between reaper passes (overrides CHUNK_STORE_REAP_INTERVAL_SECS)
    #[arg(long)]
    pub reap_interval_secs: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse(), |key| env::var(key))
    }

    /// Merge CLI arguments over values looked up through `lookup`, then defaults.
    fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        // --- Environment fallback ---
        let env_host = lookup("CHUNK_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "CHUNK_STORE_PORT", 1234)?;
        let env_storage =
            lookup("CHUNK_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_max_body =
            parse_var(&lookup, "CHUNK_STORE_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?;
        let env_parallelism = parse_var(
            &lookup,
            "CHUNK_STORE_MERGE_PARALLELISM",
            DEFAULT_MERGE_PARALLELISM,
        )?;
        let env_ttl = parse_var(&lookup, "CHUNK_STORE_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;
        let env_interval = parse_var(
            &lookup,
            "CHUNK_STORE_REAP_INTERVAL_SECS",
            DEFAULT_REAP_INTERVAL_SECS,
        )?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            max_body_bytes: args.max_body_bytes.unwrap_or(env_max_body),
            merge_parallelism: args.merge_parallelism.unwrap_or(env_parallelism).max(1),
            session_ttl_secs: args.session_ttl_secs.unwrap_or(env_ttl),
            reap_interval_secs: args.reap_interval_secs.unwrap_or(env_interval).max(1),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `None` when reaping is disabled.
    pub fn session_ttl(&self) -> Option<Duration> {
        (self.session_ttl_secs > 0).then(|| Duration::from_secs(self.session_ttl_secs))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(
        vars: &'static [(&'static str, &'static str)],
    ) -> impl Fn(&str) -> Result<String, env::VarError> {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| {
            vars.get(key)
                .map(|v| v.to_string())
                .ok_or(env::VarError::NotPresent)
        }
    }

    #[test]
    fn defaults_apply_without_env_or_args() {
        let cfg = AppConfig::merge(Args::default(), lookup(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:1234");
        assert_eq!(cfg.storage_dir, "./data/uploads");
        assert_eq!(cfg.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(cfg.session_ttl(), Some(Duration::from_secs(86400)));
    }

    #[test]
    fn args_override_env() {
        let args = Args {
            port: Some(9000),
            ..Args::default()
        };
        let cfg = AppConfig::merge(
            args,
            lookup(&[("CHUNK_STORE_PORT", "8000"), ("CHUNK_STORE_HOST", "127.0.0.1")]),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = AppConfig::merge(
            Args::default(),
            lookup(&[("CHUNK_STORE_MERGE_PARALLELISM", "lots")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("CHUNK_STORE_MERGE_PARALLELISM"));
    }

    #[test]
    fn zero_ttl_disables_reaping() {
        let cfg = AppConfig::merge(
            Args::default(),
            lookup(&[("CHUNK_STORE_SESSION_TTL_SECS", "0")]),
        )
        .unwrap();
        assert_eq!(cfg.session_ttl(), None);
    }
}
