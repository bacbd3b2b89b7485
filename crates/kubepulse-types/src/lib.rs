//! Shared types for kubepulse
//!
//! This crate contains data structures used across multiple kubepulse crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on the per-context event working set
pub const MAX_EVENT_RECORDS: usize = 500;

/// Default auto-refresh cadence
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Default deadline for a single connectivity probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Cluster Types
// ============================================================================

/// Kubernetes context information
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterContext {
    pub name: String,
    pub cluster: String,
    pub user: String,
    pub namespace: Option<String>,
    pub is_current: bool,
}

impl ClusterContext {
    pub fn new(
        name: String,
        cluster: String,
        user: String,
        namespace: Option<String>,
        is_current: bool,
    ) -> Self {
        Self {
            name,
            cluster,
            user,
            namespace,
            is_current,
        }
    }

    /// Context with only a name, used by hosts that don't read kubeconfig
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), name, String::new(), None, false)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectivityStatus {
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("Connected"),
            Self::Disconnected => f.write_str("Disconnected"),
        }
    }
}

/// Outcome of one connectivity probe
#[derive(Clone, Debug)]
pub struct ConnectivityResult {
    pub context_name: String,
    pub status: ConnectivityStatus,
    /// Set exactly when `status` is `Disconnected`
    pub error: Option<ClassifiedError>,
    pub checked_at: DateTime<Utc>,
}

impl ConnectivityResult {
    pub fn connected(context_name: impl Into<String>) -> Self {
        Self {
            context_name: context_name.into(),
            status: ConnectivityStatus::Connected,
            error: None,
            checked_at: Utc::now(),
        }
    }

    pub fn disconnected(error: ClassifiedError) -> Self {
        Self {
            context_name: error.context_name.clone(),
            status: ConnectivityStatus::Disconnected,
            error: Some(error),
            checked_at: Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectivityStatus::Connected
    }

    /// Failure kind, if the probe failed
    pub fn failure(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

// ============================================================================
// Failure Types
// ============================================================================

/// Stable failure taxonomy shared by every consumer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Timeout,
    /// RBAC denial or rejected credentials
    Unauthorized,
    NotFound,
    FinalizerBlocked,
    ResourceConflict,
    NetworkUnreachable,
    CommandNotFound,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not-found",
            Self::FinalizerBlocked => "finalizer-blocked",
            Self::ResourceConflict => "resource-conflict",
            Self::NetworkUnreachable => "network-unreachable",
            Self::CommandNotFound => "command-not-found",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the next scheduled refresh may reasonably succeed.
    /// Unauthorized and NotFound are stable conditions.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::NetworkUnreachable)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Original low-level failure, kept for diagnostics
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RawError {
    #[error("API error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{program} exited with {exit_code:?}: {stderr}")]
    Command {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to spawn {program}: {message}")]
    Spawn {
        program: String,
        kind: std::io::ErrorKind,
        message: String,
    },

    #[error("{name} still present after delete, finalizers: {finalizers:?}")]
    DeletePending {
        name: String,
        finalizers: Vec<String>,
    },

    #[error("deadline elapsed after {0:?}")]
    Elapsed(Duration),

    #[error("failed to build client: {0}")]
    Client(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("context '{0}' is not registered")]
    UnknownContext(String),

    #[error("{0}")]
    Other(String),
}

impl RawError {
    /// Free-form text carried by this error, used for pattern matching
    pub fn text(&self) -> &str {
        match self {
            Self::Api { message, .. } => message,
            Self::Transport(msg)
            | Self::Client(msg)
            | Self::Decode(msg)
            | Self::Unsupported(msg)
            | Self::UnknownContext(msg)
            | Self::Other(msg) => msg,
            Self::Command { stderr, .. } => stderr,
            Self::Spawn { message, .. } => message,
            Self::DeletePending { name, .. } => name,
            Self::Elapsed(_) => "",
        }
    }
}

/// A failure normalised into exactly one [`FailureKind`]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("[{context_name}] {kind}: {message}")]
pub struct ClassifiedError {
    pub kind: FailureKind,
    pub message: String,
    pub context_name: String,
    pub raw: RawError,
}

// ============================================================================
// Namespace Types
// ============================================================================

/// Alphabetically ordered, deduplicated namespace names for one cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceSet(Vec<String>);

impl NamespaceSet {
    pub fn from_names<I>(names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let sorted: BTreeSet<String> = names.into_iter().collect();
        Self(sorted.into_iter().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// Event Types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum EventSeverity {
    #[default]
    Normal,
    Warning,
    Error,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }
}

impl From<&str> for EventSeverity {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "warning" | "warn" => Self::Warning,
            "error" | "err" => Self::Error,
            _ => Self::Normal,
        }
    }
}

impl From<String> for EventSeverity {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The object an event is about
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvolvedObject {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

impl fmt::Display for InvolvedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A single cluster event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "type")]
    pub severity: EventSeverity,
    #[serde(default)]
    pub reason: String,
    #[serde(alias = "involvedObject")]
    pub involved: InvolvedObject,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub namespace: String,
}

/// Time range for event filtering
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TimeRange {
    /// No lower bound on event age
    #[default]
    All,
    Last5m,
    Last15m,
    Last30m,
    Last1h,
    Last6h,
    Last24h,
}

impl TimeRange {
    /// Get the number of seconds for this time range
    pub fn as_seconds(&self) -> Option<i64> {
        match self {
            Self::All => None,
            Self::Last5m => Some(5 * 60),
            Self::Last15m => Some(15 * 60),
            Self::Last30m => Some(30 * 60),
            Self::Last1h => Some(60 * 60),
            Self::Last6h => Some(6 * 60 * 60),
            Self::Last24h => Some(24 * 60 * 60),
        }
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "5m" => Ok(Self::Last5m),
            "15m" => Ok(Self::Last15m),
            "30m" => Ok(Self::Last30m),
            "1h" | "60m" => Ok(Self::Last1h),
            "6h" => Ok(Self::Last6h),
            "24h" | "1d" => Ok(Self::Last24h),
            other => Err(format!(
                "unsupported time range '{}' (expected all, 5m, 15m, 30m, 1h, 6h or 24h)",
                other
            )),
        }
    }
}

/// Per-context event filter, kept until explicitly cleared
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilterState {
    pub namespace: Option<String>,
    /// Severities to include (empty = all)
    pub severities: HashSet<EventSeverity>,
    pub since: TimeRange,
    pub resource_kind: Option<String>,
    pub search_text: Option<String>,
}

impl EventFilterState {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.namespace.is_none()
            && self.severities.is_empty()
            && self.since == TimeRange::All
            && self.resource_kind.is_none()
            && self.search_text.as_deref().is_none_or(str::is_empty)
    }
}

// ============================================================================
// Preference Types
// ============================================================================

/// Per-context panel settings persisted across sessions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelPreferences {
    /// Keep the newest events in view
    pub follow: bool,
    pub show_timestamps: bool,
    pub line_limit: usize,
    pub refresh_interval_secs: u64,
    pub refresh_enabled: bool,
}

impl PanelPreferences {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

impl Default for PanelPreferences {
    fn default() -> Self {
        Self {
            follow: true,
            show_timestamps: true,
            line_limit: MAX_EVENT_RECORDS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
            refresh_enabled: false,
        }
    }
}
