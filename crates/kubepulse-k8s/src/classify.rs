//! Failure classification
//!
//! Maps raw API, transport and CLI failures onto the [`FailureKind`] taxonomy.
//! Rules are evaluated in a fixed priority order, so a single raw error always
//! lands in the same bucket.

use std::io::ErrorKind;
use std::time::Duration;

use kubepulse_types::{ClassifiedError, FailureKind, RawError};
use tracing::debug;

/// Longest raw message written to the classification log
const LOG_MESSAGE_LIMIT: usize = 256;

/// Exit status a POSIX shell reports for a missing command
const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// A raw failure plus how long the failing call ran
#[derive(Clone, Debug)]
pub struct RawFailure {
    pub error: RawError,
    pub elapsed: Option<Duration>,
}

impl RawFailure {
    pub fn new(error: RawError) -> Self {
        Self {
            error,
            elapsed: None,
        }
    }

    pub fn after(error: RawError, elapsed: Duration) -> Self {
        Self {
            error,
            elapsed: Some(elapsed),
        }
    }
}

impl From<RawError> for RawFailure {
    fn from(error: RawError) -> Self {
        Self::new(error)
    }
}

/// Classifies raw failures against a configured timeout
#[derive(Clone, Copy, Debug)]
pub struct ErrorClassifier {
    timeout: Duration,
}

impl ErrorClassifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Classify a failure observed on `context_name`. Never fails.
    pub fn classify(&self, failure: impl Into<RawFailure>, context_name: &str) -> ClassifiedError {
        let failure = failure.into();
        let kind = self.kind_of(&failure);
        let message = match &failure.error {
            RawError::Elapsed(after) => format!("no response within {:?}", after),
            other => other.to_string(),
        };

        debug!(
            context = %context_name,
            kind = %kind,
            raw = %truncate(&message, LOG_MESSAGE_LIMIT),
            "Classified failure"
        );

        ClassifiedError {
            kind,
            message,
            context_name: context_name.to_string(),
            raw: failure.error,
        }
    }

    fn kind_of(&self, failure: &RawFailure) -> FailureKind {
        let error = &failure.error;
        let text = error.text().to_ascii_lowercase();

        if failure.elapsed.is_some_and(|e| e >= self.timeout)
            || matches!(error, RawError::Elapsed(_))
        {
            return FailureKind::Timeout;
        }

        if is_permission_denied(error, &text) {
            return FailureKind::Unauthorized;
        }

        if is_not_found(error, &text) {
            return FailureKind::NotFound;
        }

        if is_finalizer_blocked(error, &text) {
            return FailureKind::FinalizerBlocked;
        }

        if is_conflict(error, &text) {
            return FailureKind::ResourceConflict;
        }

        if is_unreachable(error, &text) {
            return FailureKind::NetworkUnreachable;
        }

        if is_command_missing(error, &text) {
            return FailureKind::CommandNotFound;
        }

        FailureKind::Unknown
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(kubepulse_types::DEFAULT_PROBE_TIMEOUT)
    }
}

fn is_permission_denied(error: &RawError, text: &str) -> bool {
    match error {
        RawError::Api { code, .. } => matches!(code, 401 | 403),
        RawError::Command { .. } | RawError::Other(_) => {
            text.contains("forbidden") || text.contains("unauthorized")
        }
        _ => false,
    }
}

fn is_not_found(error: &RawError, text: &str) -> bool {
    match error {
        RawError::Api { code, .. } => *code == 404,
        RawError::UnknownContext(_) => true,
        RawError::Command { exit_code, .. } => {
            *exit_code != Some(EXIT_COMMAND_NOT_FOUND)
                && text.contains("not found")
                && !mentions_missing_binary(text)
        }
        RawError::Other(_) => text.contains("not found") && !mentions_missing_binary(text),
        _ => false,
    }
}

fn is_finalizer_blocked(error: &RawError, text: &str) -> bool {
    match error {
        RawError::DeletePending { finalizers, .. } => !finalizers.is_empty(),
        RawError::Command { .. } | RawError::Other(_) => text.contains("finalizer"),
        _ => false,
    }
}

fn is_conflict(error: &RawError, text: &str) -> bool {
    match error {
        RawError::Api { code, .. } => *code == 409,
        RawError::Command { .. } | RawError::Other(_) => {
            text.contains("the object has been modified") || text.contains("already exists")
        }
        _ => false,
    }
}

fn is_unreachable(error: &RawError, text: &str) -> bool {
    const PATTERNS: &[&str] = &[
        "connection refused",
        "no route to host",
        "network is unreachable",
        "dns error",
        "failed to lookup address",
        "no such host",
        "name or service not known",
        "unable to connect to the server",
        "tcp connect error",
    ];

    match error {
        RawError::Transport(_) => true,
        RawError::Command { .. } | RawError::Client(_) | RawError::Other(_) => {
            PATTERNS.iter().any(|p| text.contains(p))
        }
        _ => false,
    }
}

fn is_command_missing(error: &RawError, text: &str) -> bool {
    match error {
        RawError::Spawn { kind, .. } => *kind == ErrorKind::NotFound,
        RawError::Command { exit_code, .. } => {
            *exit_code == Some(EXIT_COMMAND_NOT_FOUND) || mentions_missing_binary(text)
        }
        RawError::Other(_) => mentions_missing_binary(text),
        _ => false,
    }
}

fn mentions_missing_binary(text: &str) -> bool {
    text.contains("executable file not found") || text.contains("command not found")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
