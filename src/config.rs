use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    File,
    Sql,
    Sheets,
    Script,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Sql => "sql",
            BackendKind::Sheets => "sheets",
            BackendKind::Script => "script",
        }
    }

    /// Backends that keep working without the network.
    pub fn is_local(self) -> bool {
        matches!(self, BackendKind::Memory | BackendKind::File | BackendKind::Sql)
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "file" | "json" => Ok(BackendKind::File),
            "sql" | "sqlite" => Ok(BackendKind::Sql),
            "sheets" => Ok(BackendKind::Sheets),
            "script" => Ok(BackendKind::Script),
            other => Err(anyhow!("unknown backend: {other}")),
        }
    }
}

/// A fallback setting: `none` in any case, or a backend name.
pub fn parse_fallback(raw: &str) -> anyhow::Result<Option<BackendKind>> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "none" => Ok(None),
        other => other.parse().map(Some),
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub data_dir: PathBuf,
    pub fallback: Option<BackendKind>,
    pub sheets_id: Option<String>,
    pub sheets_token: Option<String>,
    pub sheets_endpoint: String,
    pub script_url: Option<String>,
    pub http_timeout: Duration,
}

impl BackendConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(fallback) = self.fallback {
            if !fallback.is_local() {
                bail!("fallback backend must be memory, file or sql, got {}", fallback.as_str());
            }
            if fallback == self.kind {
                bail!("fallback backend must differ from the primary");
            }
        }
        match self.kind {
            BackendKind::Sheets if self.sheets_id.is_none() || self.sheets_token.is_none() => {
                bail!("sheets backend needs ROSTER_SHEETS_ID and ROSTER_SHEETS_TOKEN")
            }
            BackendKind::Script if self.script_url.is_none() => {
                bail!("script backend needs ROSTER_SCRIPT_URL")
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginPolicy {
    pub max_failures: u32,
    pub lockout: Duration,
    pub failure_delay: Duration,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            max_failures: 5,
            lockout: Duration::from_secs(300),
            failure_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub login: LoginPolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let fallback = match optional(&lookup, "ROSTER_FALLBACK") {
            Some(raw) => parse_fallback(&raw).context("invalid ROSTER_FALLBACK value")?,
            None => None,
        };

        let backend = BackendConfig {
            kind: try_load(&lookup, "ROSTER_BACKEND", "memory")?,
            data_dir: try_load(&lookup, "ROSTER_DATA_DIR", "./roster-data")?,
            fallback,
            sheets_id: optional(&lookup, "ROSTER_SHEETS_ID"),
            sheets_token: optional(&lookup, "ROSTER_SHEETS_TOKEN"),
            sheets_endpoint: try_load(
                &lookup,
                "ROSTER_SHEETS_ENDPOINT",
                "https://sheets.googleapis.com",
            )?,
            script_url: optional(&lookup, "ROSTER_SCRIPT_URL"),
            http_timeout: Duration::from_secs(try_load(&lookup, "ROSTER_HTTP_TIMEOUT_SECS", "10")?),
        };
        backend.validate()?;

        let login = LoginPolicy {
            max_failures: try_load(&lookup, "ROSTER_LOGIN_MAX_FAILURES", "5")?,
            lockout: Duration::from_secs(try_load(&lookup, "ROSTER_LOGIN_LOCKOUT_SECS", "300")?),
            failure_delay: Duration::from_millis(try_load(
                &lookup,
                "ROSTER_LOGIN_FAILURE_DELAY_MS",
                "250",
            )?),
        };

        Ok(Self { backend, login })
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = optional(lookup, key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse::<T>()
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("invalid {key} value: {raw:?}"))
}
