use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::services::{retry::RetryPolicy, scheduler::SchedulerSettings};

/// Where migrated objects are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ObjectBackend {
    /// S3-like layout under `storage_dir` on local disk.
    Disk,
    /// Any S3-compatible endpoint (requires the `s3` feature).
    S3,
}

impl FromStr for ObjectBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(ObjectBackend::Disk),
            "s3" => Ok(ObjectBackend::S3),
            other => bail!("unknown object backend `{}` (expected `disk` or `s3`)", other),
        }
    }
}

/// What the process should do after loading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Periodic scheduler plus the status API.
    Serve,
    /// Apply the schema and exit.
    Migrate,
    /// Run a single batch and exit.
    Once,
    /// Register a local file as a pending record and exit.
    Enqueue(PathBuf),
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Root that relative record paths are resolved against.
    pub local_root: PathBuf,
    pub backend: ObjectBackend,
    /// Object directory for the disk backend.
    pub storage_dir: PathBuf,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub endpoint: Option<String>,
    pub scheduler: SchedulerSettings,
    pub retry: RetryPolicy,
    pub network_timeout: Option<Duration>,
    pub stale_after: Option<Duration>,
    pub concurrency: Option<usize>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Migrates local material files to object storage")]
pub struct Args {
    /// Host for the status API (overrides MIGRATOR_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port for the status API (overrides MIGRATOR_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides MIGRATOR_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Root directory for relative record paths (overrides MIGRATOR_LOCAL_ROOT)
    #[arg(long)]
    pub local_root: Option<PathBuf>,

    /// Object store backend (overrides MIGRATOR_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<ObjectBackend>,

    /// Directory for the disk backend (overrides MIGRATOR_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Target bucket (overrides MIGRATOR_S3_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides MIGRATOR_S3_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Custom S3 endpoint, forces path-style addressing (overrides MIGRATOR_S3_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Disable the periodic scheduler (overrides MIGRATOR_SCHEDULER_ENABLED)
    #[arg(long)]
    pub no_scheduler: bool,

    /// Seconds between batches (overrides MIGRATOR_SCHEDULER_INTERVAL_SECS)
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Records per selection query (overrides MIGRATOR_BATCH_SIZE)
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Run a single batch and exit
    #[arg(long, conflicts_with = "migrate")]
    pub once: bool,

    /// Register a local file as a pending record and exit
    #[arg(long, value_name = "PATH", conflicts_with_all = ["migrate", "once"])]
    pub enqueue: Option<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// CLI wins over environment, environment over defaults.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<(Self, RunMode)> {
        let non_empty = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let env_port = parse_env(&env, "MIGRATOR_PORT", 3000u16)?;
        let env_backend = parse_env(&env, "MIGRATOR_BACKEND", ObjectBackend::Disk)?;
        let env_enabled = parse_env(&env, "MIGRATOR_SCHEDULER_ENABLED", true)?;
        let env_interval = parse_env(&env, "MIGRATOR_SCHEDULER_INTERVAL_SECS", 300u64)?;
        let env_batch = parse_env(&env, "MIGRATOR_BATCH_SIZE", 10u32)?;
        let max_attempts = parse_env(&env, "MIGRATOR_MAX_ATTEMPTS", 3u32)?;
        let base_delay_secs = parse_env(&env, "MIGRATOR_BASE_DELAY_SECS", 300u64)?;
        let timeout_secs = parse_env(&env, "MIGRATOR_NETWORK_TIMEOUT_SECS", 60u64)?;
        let stale_secs = parse_env(&env, "MIGRATOR_STALE_AFTER_SECS", 0u64)?;
        let concurrency = parse_env(&env, "MIGRATOR_CONCURRENCY", 0usize)?;

        let batch_size = args.batch_size.unwrap_or(env_batch);
        if batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if max_attempts == 0 {
            bail!("MIGRATOR_MAX_ATTEMPTS must be at least 1");
        }
        if base_delay_secs == 0 {
            bail!("MIGRATOR_BASE_DELAY_SECS must be at least 1");
        }
        let interval_secs = args.interval_secs.unwrap_or(env_interval);
        if interval_secs == 0 {
            bail!("scheduler interval must be at least one second");
        }

        let cfg = Self {
            host: args
                .host
                .or_else(|| non_empty("MIGRATOR_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.unwrap_or(env_port),
            database_url: args
                .database_url
                .or_else(|| non_empty("MIGRATOR_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/migrator.db".into()),
            local_root: args
                .local_root
                .or_else(|| non_empty("MIGRATOR_LOCAL_ROOT").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("./uploads")),
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args
                .storage_dir
                .or_else(|| non_empty("MIGRATOR_STORAGE_DIR").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("./data/objects")),
            bucket: args
                .bucket
                .or_else(|| non_empty("MIGRATOR_S3_BUCKET"))
                .unwrap_or_else(|| "materials".into()),
            region: args
                .region
                .or_else(|| non_empty("MIGRATOR_S3_REGION"))
                .unwrap_or_else(|| "us-east-1".into()),
            access_key: non_empty("MIGRATOR_S3_ACCESS_KEY"),
            secret_key: non_empty("MIGRATOR_S3_SECRET_KEY"),
            endpoint: args.endpoint.or_else(|| non_empty("MIGRATOR_S3_ENDPOINT")),
            scheduler: SchedulerSettings {
                enabled: env_enabled && !args.no_scheduler,
                interval: Duration::from_secs(interval_secs),
                batch_size,
            },
            retry: RetryPolicy::new(max_attempts, Duration::from_secs(base_delay_secs)),
            network_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            stale_after: (stale_secs > 0).then(|| Duration::from_secs(stale_secs)),
            concurrency: (concurrency > 0).then_some(concurrency),
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.once {
            RunMode::Once
        } else if let Some(path) = args.enqueue {
            RunMode::Enqueue(path)
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env(name).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_the_reference_schedule() {
        let (cfg, mode) = AppConfig::resolve(Args::default(), env_of(&[])).unwrap();
        assert_eq!(mode, RunMode::Serve);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.backend, ObjectBackend::Disk);
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.scheduler, SchedulerSettings::default());
        assert_eq!(cfg.network_timeout, Some(Duration::from_secs(60)));
        assert_eq!(cfg.stale_after, None);
        assert_eq!(cfg.concurrency, None);
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args {
            port: Some(8080),
            batch_size: Some(25),
            no_scheduler: true,
            once: true,
            ..Args::default()
        };
        let env = env_of(&[
            ("MIGRATOR_PORT", "9000"),
            ("MIGRATOR_BATCH_SIZE", "5"),
            ("MIGRATOR_BACKEND", "s3"),
            ("MIGRATOR_S3_ENDPOINT", "http://minio:9000"),
            ("MIGRATOR_NETWORK_TIMEOUT_SECS", "0"),
        ]);
        let (cfg, mode) = AppConfig::resolve(args, env).unwrap();
        assert_eq!(mode, RunMode::Once);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.scheduler.batch_size, 25);
        assert!(!cfg.scheduler.enabled);
        assert_eq!(cfg.backend, ObjectBackend::S3);
        assert_eq!(cfg.endpoint.as_deref(), Some("http://minio:9000"));
        assert_eq!(cfg.network_timeout, None);
    }

    #[test]
    fn invalid_values_are_reported_with_the_variable_name() {
        let err = AppConfig::resolve(Args::default(), env_of(&[("MIGRATOR_PORT", "http")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("MIGRATOR_PORT"), "{err:#}");

        let err = AppConfig::resolve(
            Args::default(),
            env_of(&[("MIGRATOR_BATCH_SIZE", "0")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("batch size"));
    }

    #[test]
    fn zero_retry_delay_is_rejected() {
        let err = AppConfig::resolve(
            Args::default(),
            env_of(&[("MIGRATOR_BASE_DELAY_SECS", "0")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("MIGRATOR_BASE_DELAY_SECS"));

        let (cfg, _) = AppConfig::resolve(
            Args::default(),
            env_of(&[("MIGRATOR_BASE_DELAY_SECS", "1")]),
        )
        .unwrap();
        assert_eq!(cfg.retry.base_delay, Duration::from_secs(1));
    }
}
