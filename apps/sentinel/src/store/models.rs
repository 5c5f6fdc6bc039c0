use serde::{Deserialize, Serialize};

/// Key prefix for station records in the shared store.
pub const STATION_KEY_PREFIX: &str = "station:";
/// Key prefix for target records in the shared store.
pub const TARGET_KEY_PREFIX: &str = "target:";

pub fn target_key(id: &str) -> String {
    format!("{TARGET_KEY_PREFIX}{id}")
}

/// Wall-clock timestamp in unix milliseconds, the resolution stored in
/// `lastChecked` and compared by the timestamp guard.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Reachability state of a target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::Up => write!(f, "up"),
            TargetStatus::Down => write!(f, "down"),
            TargetStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Station record - a named grouping of targets, stored at `station:{id}`.
///
/// Stations are created and deleted by the presentation layer; the sentinel
/// only enumerates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    /// Derived from the store key; absent in records written by older
    /// presentation builds.
    #[serde(default)]
    pub id: String,

    pub name: String,

    /// Member target ids, order irrelevant.
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Target record - one monitored URL and its latest known state, stored at
/// `target:{id}`.
///
/// The presentation layer owns `url` and `stationId`; the sentinel owns every
/// status field and never touches the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub id: String,

    pub url: String,

    /// Owning station id; ungrouped targets are allowed.
    #[serde(default)]
    pub station_id: Option<String>,

    /// Unknown until the first probe completes.
    #[serde(default)]
    pub status: TargetStatus,

    /// Unix milliseconds of the newest reconciled probe.
    #[serde(default)]
    pub last_checked: Option<i64>,

    /// HTTP status code of the last probe, when a response was received.
    #[serde(default)]
    pub http_code: Option<u16>,

    /// Categorized failure label of the last probe, set only on failure.
    #[serde(default)]
    pub error_message: Option<String>,

    /// Latency of the last completed probe.
    #[serde(default)]
    pub latency_ms: Option<u64>,

    /// Sequential DOWN classifications since the last UP.
    #[serde(default)]
    pub consecutive_failures: u32,
}

/// One classified probe outcome headed for a target's status fields.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: TargetStatus,
    pub http_code: Option<u16>,
    pub error_message: Option<String>,
    pub latency_ms: Option<u64>,
    /// When the probe was performed, unix milliseconds.
    pub timestamp_ms: i64,
}

// Creating targets belongs to the presentation layer; the constructor exists
// for test fixtures only.
#[cfg(test)]
impl Target {
    pub fn new(id: impl Into<String>, url: impl Into<String>, station_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            station_id,
            status: TargetStatus::Unknown,
            last_checked: None,
            http_code: None,
            error_message: None,
            latency_ms: None,
            consecutive_failures: 0,
        }
    }
}

impl Target {
    /// Apply `update` unless a newer (or identical) result is already stored.
    ///
    /// Returns false when the update is stale. Equal timestamps count as
    /// stale, which is what makes re-delivering the same result a no-op
    /// instead of double-counting failures.
    pub fn reconcile(&mut self, update: &StatusUpdate) -> bool {
        if let Some(stored) = self.last_checked {
            if stored >= update.timestamp_ms {
                return false;
            }
        }
        self.apply(update);
        true
    }

    fn apply(&mut self, update: &StatusUpdate) {
        self.consecutive_failures = match update.status {
            TargetStatus::Up => 0,
            TargetStatus::Down => self.consecutive_failures.saturating_add(1),
            TargetStatus::Unknown => self.consecutive_failures,
        };
        self.status = update.status;
        self.last_checked = Some(update.timestamp_ms);
        self.http_code = update.http_code;
        self.error_message = update.error_message.clone();
        self.latency_ms = update.latency_ms;
    }
}
