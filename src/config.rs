use std::path::PathBuf;
use std::str::FromStr;

use crate::model::BusinessHoursConfig;

/// Process-wide settings, read from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub hours: BusinessHoursConfig,
    pub pending_ttl_secs: Option<u64>,
    pub meeting_base_url: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Hours(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::Hours(e) => write!(f, "invalid business hours: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their defaults;
    /// set but unparsable keys are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = BusinessHoursConfig::default();
        let hours = BusinessHoursConfig {
            open: parsed(&lookup, "SLOTBOOK_OPEN_TIME")?.unwrap_or(defaults.open),
            close: parsed(&lookup, "SLOTBOOK_CLOSE_TIME")?.unwrap_or(defaults.close),
            break_start: parsed(&lookup, "SLOTBOOK_BREAK_START")?.unwrap_or(defaults.break_start),
            break_end: parsed(&lookup, "SLOTBOOK_BREAK_END")?.unwrap_or(defaults.break_end),
            slot_minutes: parsed(&lookup, "SLOTBOOK_SLOT_MINUTES")?.unwrap_or(defaults.slot_minutes),
            working_weekdays: match lookup("SLOTBOOK_WORKING_DAYS") {
                Some(v) => parse_weekdays(&v)?,
                None => defaults.working_weekdays,
            },
        };
        hours.validate().map_err(ConfigError::Hours)?;
        if !hours.divides_evenly() {
            tracing::warn!(
                "slot length {} min does not divide business hours evenly; trailing partial slots are dropped",
                hours.slot_minutes
            );
        }

        Ok(Self {
            bind: lookup("SLOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "SLOTBOOK_PORT")?.unwrap_or(5433),
            data_dir: PathBuf::from(lookup("SLOTBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("SLOTBOOK_PASSWORD").unwrap_or_else(|| "slotbook".into()),
            max_connections: parsed(&lookup, "SLOTBOOK_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parsed(&lookup, "SLOTBOOK_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parsed(&lookup, "SLOTBOOK_METRICS_PORT")?,
            tls_cert: lookup("SLOTBOOK_TLS_CERT"),
            tls_key: lookup("SLOTBOOK_TLS_KEY"),
            hours,
            pending_ttl_secs: parsed(&lookup, "SLOTBOOK_PENDING_TTL_SECS")?,
            meeting_base_url: lookup("SLOTBOOK_MEETING_BASE_URL").filter(|s| !s.trim().is_empty()),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// `"1,2,3"` → `[1, 2, 3]` (0 = Sunday).
fn parse_weekdays(value: &str) -> Result<Vec<u8>, ConfigError> {
    let invalid = || ConfigError::Invalid {
        var: "SLOTBOOK_WORKING_DAYS",
        value: value.to_string(),
    };
    let mut days = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let day: u8 = part.parse().map_err(|_| invalid())?;
        if day > 6 {
            return Err(invalid());
        }
        if !days.contains(&day) {
            days.push(day);
        }
    }
    days.sort_unstable();
    Ok(days)
}
