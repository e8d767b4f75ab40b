use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;

/// Default daily windows: the club's morning and evening flying blocks,
/// in 20-minute slots.
pub const DEFAULT_WINDOWS: &str = "06:00-07:30/20,17:00-18:30/20";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid window `{0}`: expected HH:MM-HH:MM/STEP")]
    MalformedWindow(String),
    #[error("invalid window `{0}`: start must be before end")]
    EmptyWindow(String),
    #[error("invalid window `{0}`: step must be between 1 minute and the window length")]
    BadStep(String),
    #[error("window `{0}` overlaps or precedes the window before it")]
    Overlap(String),
    #[error("invalid value for {name}: `{value}`")]
    BadValue { name: &'static str, value: String },
}

/// One recurring daily booking window. Slots are emitted every `step_minutes`
/// from `start`, as long as the whole slot fits before `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub step_minutes: u32,
}

impl SlotWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, step_minutes: u32) -> Result<Self, ConfigError> {
        let label = format!("{}-{}/{step_minutes}", start.format("%H:%M"), end.format("%H:%M"));
        if start >= end {
            return Err(ConfigError::EmptyWindow(label));
        }
        let window_minutes = (end - start).num_minutes();
        if step_minutes == 0 || i64::from(step_minutes) > window_minutes {
            return Err(ConfigError::BadStep(label));
        }
        Ok(Self { start, end, step_minutes })
    }
}

/// Parse `HH:MM-HH:MM/STEP[,HH:MM-HH:MM/STEP...]`. Windows must be listed in
/// ascending order and must not overlap. An empty string yields no windows.
pub fn parse_windows(raw: &str) -> Result<Vec<SlotWindow>, ConfigError> {
    let mut windows: Vec<SlotWindow> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let malformed = || ConfigError::MalformedWindow(part.to_string());
        let (range, step) = part.split_once('/').ok_or_else(malformed)?;
        let (start, end) = range.split_once('-').ok_or_else(malformed)?;
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").map_err(|_| malformed())?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").map_err(|_| malformed())?;
        let step: u32 = step
            .trim()
            .parse()
            .map_err(|_| ConfigError::BadStep(part.to_string()))?;
        let window = SlotWindow::new(start, end, step)?;
        if let Some(prev) = windows.last()
            && window.start < prev.end
        {
            return Err(ConfigError::Overlap(part.to_string()));
        }
        windows.push(window);
    }
    Ok(windows)
}

/// Process configuration, read once at start from `JOYRIDE_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub windows: Vec<SlotWindow>,
    pub store_timeout: Duration,
    pub compact_threshold: u64,
    pub session_ttl: Duration,
    pub metrics_port: Option<u16>,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let windows = parse_windows(
            &lookup("JOYRIDE_WINDOWS").unwrap_or_else(|| DEFAULT_WINDOWS.to_string()),
        )?;
        Ok(Self {
            bind: lookup("JOYRIDE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_var(&lookup, "JOYRIDE_PORT")?.unwrap_or(8080),
            data_dir: PathBuf::from(lookup("JOYRIDE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            windows,
            store_timeout: Duration::from_millis(
                parse_var(&lookup, "JOYRIDE_STORE_TIMEOUT_MS")?.unwrap_or(5000),
            ),
            compact_threshold: parse_var(&lookup, "JOYRIDE_COMPACT_THRESHOLD")?.unwrap_or(1000),
            session_ttl: Duration::from_secs(
                parse_var(&lookup, "JOYRIDE_SESSION_TTL_SECS")?.unwrap_or(86_400),
            ),
            metrics_port: parse_var(&lookup, "JOYRIDE_METRICS_PORT")?,
            admin_username: lookup("JOYRIDE_ADMIN_USERNAME"),
            admin_password: lookup("JOYRIDE_ADMIN_PASSWORD"),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("joyride.wal")
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::BadValue { name, value }),
    }
}
