//! Append-only delivery attempt history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest response snapshot kept per attempt.
pub const RESPONSE_SNAPSHOT_LIMIT: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
    Retrying,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Retrying => "retrying",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Success | AttemptStatus::Failed)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "success" => Ok(AttemptStatus::Success),
            "failed" => Ok(AttemptStatus::Failed),
            "retrying" => Ok(AttemptStatus::Retrying),
            other => Err(format!("unknown attempt status: '{other}'")),
        }
    }
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Timeout,
    ServerError,
    Rejected,
    MaxRetries,
    Payload,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Rejected => "rejected",
            ErrorKind::MaxRetries => "max_retries",
            ErrorKind::Payload => "payload",
        }
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transport" => Ok(ErrorKind::Transport),
            "timeout" => Ok(ErrorKind::Timeout),
            "server_error" => Ok(ErrorKind::ServerError),
            "rejected" => Ok(ErrorKind::Rejected),
            "max_retries" => Ok(ErrorKind::MaxRetries),
            "payload" => Ok(ErrorKind::Payload),
            other => Err(format!("unknown error kind: '{other}'")),
        }
    }
}

/// What started an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Auto,
    Sweep,
    Manual,
    Batch,
    Resend,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Auto => "auto",
            Trigger::Sweep => "sweep",
            Trigger::Manual => "manual",
            Trigger::Batch => "batch",
            Trigger::Resend => "resend",
        }
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Trigger::Auto),
            "sweep" => Ok(Trigger::Sweep),
            "manual" => Ok(Trigger::Manual),
            "batch" => Ok(Trigger::Batch),
            "resend" => Ok(Trigger::Resend),
            other => Err(format!("unknown trigger: '{other}'")),
        }
    }
}

/// One send attempt for one grant. Never updated after append.
///
/// `sequence` groups the attempts of one automatic retry chain; an operator
/// resend opens the next sequence at attempt 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub grant_id: String,
    pub sequence: u32,
    pub attempt_number: u32,
    pub status: AttemptStatus,
    pub http_status: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_body: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub latency_ms: Option<u64>,
    pub trigger: Trigger,
}

impl DeliveryAttempt {
    pub fn new(grant_id: impl Into<String>, sequence: u32, attempt_number: u32, trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            grant_id: grant_id.into(),
            sequence,
            attempt_number,
            status: AttemptStatus::Pending,
            http_status: None,
            created_at: Utc::now(),
            sent_at: None,
            next_retry_at: None,
            response_body: None,
            error_kind: None,
            error_message: None,
            latency_ms: None,
            trigger,
        }
    }

    /// Due for a sweep re-attempt at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == AttemptStatus::Retrying && self.next_retry_at.is_some_and(|at| at <= now)
    }
}

/// Cut a response body down to the stored snapshot size on a char boundary.
pub fn snapshot(body: &str) -> String {
    if body.len() <= RESPONSE_SNAPSHOT_LIMIT {
        return body.to_string();
    }
    let mut end = RESPONSE_SNAPSHOT_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// History query. All fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttemptFilter {
    pub grant_id: Option<String>,
    pub status: Option<AttemptStatus>,
    pub limit: Option<usize>,
}

/// Aggregate counters over the attempt log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub retrying: u64,
    pub pending: u64,
    /// Retrying attempts whose retry time has elapsed.
    pub pending_retries: u64,
    /// `successful / total_attempts`, 0 when empty.
    pub success_rate: f64,
    pub forwarded_grants: u64,
}
