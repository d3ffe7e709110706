use std::path::{Path, PathBuf};

use herald_common::audit::AuditConfig;
use herald_delivery::{
    DispatchConfig, RateLimitConfig, RetryPolicy, ServiceConfig, TransportConfig,
};
use herald_store::StoreConfig;
use serde::Deserialize;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

/// Top-level configuration, read from a RON file
///
/// ```ron
/// Herald (
///     store: File(path: "/var/lib/herald"),
///     dispatch: (batch_size: 200, time_budget_secs: 50),
///     rate_limit: (messages_per_second: 14.0, burst_size: 14),
///     transport: Smtp(
///         relay: "127.0.0.1:25",
///         from_address: "news@example.org",
///         from_name: "Example News",
///     ),
///     audit: (redact_recipients: true),
/// )
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename = "Herald")]
pub struct HeraldConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

impl HeraldConfig {
    /// Parse a configuration document.
    ///
    /// Newtype variants may be written without the inner parentheses and
    /// optional values without `Some(..)`.
    ///
    /// # Errors
    /// Returns an error if the document is not valid RON for this structure.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        ron::Options::default()
            .with_default_extension(
                ron::extensions::Extensions::IMPLICIT_SOME
                    | ron::extensions::Extensions::UNWRAP_VARIANT_NEWTYPES,
            )
            .from_str(content)
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))
    }

    /// Read and parse the configuration at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;
        Self::parse(&content)
    }

    /// The dispatch-side subset of the configuration
    #[must_use]
    pub fn service(&self) -> ServiceConfig {
        ServiceConfig {
            dispatch: self.dispatch.clone(),
            retry: self.retry.clone(),
            rate_limit: self.rate_limit.clone(),
        }
    }
}

/// Find the configuration file using the following precedence:
/// 1. An explicit `--config` path
/// 2. `HERALD_CONFIG` environment variable
/// 3. ./herald.config.ron (current working directory)
/// 4. /etc/herald/herald.config.ron (system-wide config)
///
/// # Errors
/// Returns an error if an explicit path does not exist or nothing was found.
pub fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    locate(
        explicit,
        std::env::var(CONFIG_ENV).ok(),
        &[
            PathBuf::from("./herald.config.ron"),
            PathBuf::from("/etc/herald/herald.config.ron"),
        ],
    )
}

fn locate(
    explicit: Option<PathBuf>,
    env_path: Option<String>,
    default_paths: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    for path in default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
