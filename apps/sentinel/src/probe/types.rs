use std::time::Duration;

use crate::store::{StatusUpdate, TargetStatus};

/// Failure classification for probes that produced no usable HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeErrorKind {
    Timeout,
    Dns,
    Tls,
    Connection,
    InvalidUrl,
    Request,
}

impl ProbeErrorKind {
    /// Short stable label stored in the target's `errorMessage` field;
    /// operators diagnose failures from this, not from process logs.
    pub fn label(&self) -> &'static str {
        match self {
            ProbeErrorKind::Timeout => "timeout",
            ProbeErrorKind::Dns => "dns_error",
            ProbeErrorKind::Tls => "tls_error",
            ProbeErrorKind::Connection => "connection_error",
            ProbeErrorKind::InvalidUrl => "invalid_url",
            ProbeErrorKind::Request => "request_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    /// Root-cause detail, logged but never stored.
    pub message: String,
}

/// Classified outcome of a single probe. `status` is Up or Down only;
/// Unknown exists solely in the store, before a target's first probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub status: TargetStatus,
    pub http_code: Option<u16>,
    pub error: Option<ProbeError>,
    pub latency: Duration,
}

impl ProbeResult {
    /// Response received with a code in [200, 399].
    pub fn up(http_code: u16, latency: Duration) -> Self {
        Self { status: TargetStatus::Up, http_code: Some(http_code), error: None, latency }
    }

    /// Response received with a code >= 400; the code itself is the
    /// diagnostic, so no error label is attached.
    pub fn down_status(http_code: u16, latency: Duration) -> Self {
        Self { status: TargetStatus::Down, http_code: Some(http_code), error: None, latency }
    }

    /// No usable response.
    pub fn down_error(kind: ProbeErrorKind, message: impl Into<String>, latency: Duration) -> Self {
        Self {
            status: TargetStatus::Down,
            http_code: None,
            error: Some(ProbeError { kind, message: message.into() }),
            latency,
        }
    }

    pub fn error_label(&self) -> Option<&'static str> {
        self.error.as_ref().map(|e| e.kind.label())
    }

    pub fn to_status_update(&self, timestamp_ms: i64) -> StatusUpdate {
        StatusUpdate {
            status: self.status,
            http_code: self.http_code,
            error_message: self.error_label().map(str::to_owned),
            latency_ms: Some(self.latency.as_millis() as u64),
            timestamp_ms,
        }
    }
}
