//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{Resource, ResourceCacheConfig, ResourceTable, TierStrategy};

mod cli;

pub use cli::{CliArgs, Command, GlobalOverrides, InvalidateArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tiercache";
const ENV_PREFIX: &str = "TIERCACHE";
const DEFAULT_FAST_MAX_ENTRIES: u64 = 100;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;
const DEFAULT_DURABLE_PATH: &str = "data/tiercache.sqlite3";
const DEFAULT_DURABLE_MAX_CONNECTIONS: u64 = 4;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_COMPRESS_THRESHOLD_BYTES: u64 = 8 * 1024;
/// Ten years.
const MAX_RESOURCE_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    /// Built-in resource policies with file and environment overrides applied.
    pub resources: ResourceTable,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub fast_tier: FastTierSettings,
    pub durable_tier: DurableTierSettings,
}

#[derive(Debug, Clone)]
pub struct FastTierSettings {
    pub default_max_entries: NonZeroUsize,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DurableTierSettings {
    pub enabled: bool,
    pub path: PathBuf,
    pub max_connections: NonZeroU32,
    pub busy_timeout: Duration,
    pub cleanup_interval: Duration,
    pub compress_threshold_bytes: usize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("invalid configuration for resource `{resource}`: {reason}")]
    InvalidResource { resource: String, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }

    fn invalid_resource(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResource {
            resource: resource.into(),
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    load_layered(cli, Environment::with_prefix(ENV_PREFIX).separator("__"))
}

fn load_layered(cli: &CliArgs, environment: Environment) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(environment);

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    fast_tier: RawFastTierSettings,
    durable_tier: RawDurableTierSettings,
    resources: BTreeMap<String, RawResourceSettings>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFastTierSettings {
    default_max_entries: Option<u64>,
    sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDurableTierSettings {
    enabled: Option<bool>,
    path: Option<PathBuf>,
    max_connections: Option<u64>,
    busy_timeout_ms: Option<u64>,
    cleanup_interval_secs: Option<u64>,
    compress_threshold_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawResourceSettings {
    enabled: Option<bool>,
    ttl_seconds: Option<u64>,
    tier: Option<TierStrategy>,
    max_entries: Option<u64>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.durable_path.as_ref() {
            self.durable_tier.path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            fast_tier,
            durable_tier,
            resources,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let fast_tier = build_fast_tier_settings(fast_tier)?;
        let durable_tier = build_durable_tier_settings(durable_tier)?;
        let resources = build_resource_table(resources)?;

        Ok(Self {
            logging,
            cache: CacheSettings {
                fast_tier,
                durable_tier,
            },
            resources,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_fast_tier_settings(fast: RawFastTierSettings) -> Result<FastTierSettings, LoadError> {
    let max_entries = fast.default_max_entries.unwrap_or(DEFAULT_FAST_MAX_ENTRIES);
    let default_max_entries = non_zero_usize(max_entries, "fast_tier.default_max_entries")?;

    let sweep_ms = fast.sweep_interval_ms.unwrap_or(DEFAULT_SWEEP_INTERVAL_MS);
    if sweep_ms == 0 {
        return Err(LoadError::invalid(
            "fast_tier.sweep_interval_ms",
            "must be greater than zero",
        ));
    }

    Ok(FastTierSettings {
        default_max_entries,
        sweep_interval: Duration::from_millis(sweep_ms),
    })
}

fn build_durable_tier_settings(
    durable: RawDurableTierSettings,
) -> Result<DurableTierSettings, LoadError> {
    let path = durable
        .path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DURABLE_PATH));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "durable_tier.path",
            "path must not be empty",
        ));
    }

    let max_connections = non_zero_u32(
        durable
            .max_connections
            .unwrap_or(DEFAULT_DURABLE_MAX_CONNECTIONS),
        "durable_tier.max_connections",
    )?;

    let busy_timeout_ms = durable.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);

    let cleanup_secs = durable
        .cleanup_interval_secs
        .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECS);
    if cleanup_secs == 0 {
        return Err(LoadError::invalid(
            "durable_tier.cleanup_interval_secs",
            "must be greater than zero",
        ));
    }

    let threshold = durable
        .compress_threshold_bytes
        .unwrap_or(DEFAULT_COMPRESS_THRESHOLD_BYTES);
    let compress_threshold_bytes = usize::try_from(threshold).map_err(|_| {
        LoadError::invalid(
            "durable_tier.compress_threshold_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(DurableTierSettings {
        enabled: durable.enabled.unwrap_or(true),
        path,
        max_connections,
        busy_timeout: Duration::from_millis(busy_timeout_ms),
        cleanup_interval: Duration::from_secs(cleanup_secs),
        compress_threshold_bytes,
    })
}

/// Apply `[resources.<name>]` sections on top of the built-in table.
///
/// Unset fields inherit the built-in policy. Resources without one must
/// give `ttl_seconds`; their tier defaults to hybrid.
fn build_resource_table(
    overrides: BTreeMap<String, RawResourceSettings>,
) -> Result<ResourceTable, LoadError> {
    let mut table = ResourceTable::builtin();

    for (name, raw) in overrides {
        let resource = Resource::from_str(&name)
            .map_err(|err| LoadError::invalid_resource(&name, err.to_string()))?;

        if raw.enabled == Some(false) {
            table = table.without(resource);
            continue;
        }

        let base = table.get(resource).copied();

        let ttl = match raw.ttl_seconds.or(base.map(|policy| policy.ttl.as_secs())) {
            Some(0) => {
                return Err(LoadError::invalid_resource(
                    name,
                    "ttl_seconds must be greater than zero",
                ));
            }
            Some(secs) if secs > MAX_RESOURCE_TTL_SECS => {
                return Err(LoadError::invalid_resource(
                    name,
                    format!("ttl_seconds must not exceed {MAX_RESOURCE_TTL_SECS}"),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => {
                return Err(LoadError::invalid_resource(
                    name,
                    "ttl_seconds is required for resources without a built-in policy",
                ));
            }
        };

        let tier = raw
            .tier
            .or(base.map(|policy| policy.tier))
            .unwrap_or(TierStrategy::Hybrid);

        let max_entries = match raw.max_entries {
            Some(value) => Some(
                usize::try_from(value)
                    .ok()
                    .and_then(NonZeroUsize::new)
                    .ok_or_else(|| {
                        LoadError::invalid_resource(
                            &name,
                            "max_entries must be a positive integer",
                        )
                    })?,
            ),
            None => base.and_then(|policy| policy.max_entries),
        };

        table = table.with(resource, ResourceCacheConfig::new(ttl, tier, max_entries));
    }

    Ok(table)
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
