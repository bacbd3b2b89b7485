//! Plain-text output for the CLI

use std::fmt::Write;

use kubepulse_k8s::{ClassifiedError, ConnectivityResult, FailureKind};
use kubepulse_types::{EventRecord, PanelPreferences};

/// Actionable advice for each failure kind
pub fn failure_hint(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Timeout => "the cluster did not answer in time; check VPN or API server load",
        FailureKind::Unauthorized => "check RBAC bindings and credentials for this context",
        FailureKind::NotFound => "the context or resource does not exist; check kubeconfig",
        FailureKind::FinalizerBlocked => "remove or resolve the listed finalizers",
        FailureKind::ResourceConflict => "the resource changed concurrently; retry the operation",
        FailureKind::NetworkUnreachable => "the API server is unreachable; check network access",
        FailureKind::CommandNotFound => "install the missing CLI or fix its path in the config",
        FailureKind::Unknown => "see the error message for details",
    }
}

pub fn error_line(error: &ClassifiedError) -> String {
    format!("{} (hint: {})", error, failure_hint(error.kind))
}

/// One row per context, in the order given
pub fn status_table(results: &[ConnectivityResult]) -> String {
    let width = results
        .iter()
        .map(|r| r.context_name.len())
        .max()
        .unwrap_or(0)
        .max("CONTEXT".len());

    let mut out = String::new();
    let _ = writeln!(out, "{:<width$}  {:<12}  DETAIL", "CONTEXT", "STATUS");
    for result in results {
        let detail = match &result.error {
            Some(error) => format!("{}: {}", error.kind, error.message),
            None => String::new(),
        };
        let _ = writeln!(
            out,
            "{:<width$}  {:<12}  {}",
            result.context_name,
            result.status.to_string(),
            detail
        );
    }
    out
}

pub fn event_line(event: &EventRecord, show_timestamps: bool) -> String {
    let mut line = String::new();
    if show_timestamps {
        let _ = write!(line, "{}  ", event.timestamp.format("%Y-%m-%d %H:%M:%S"));
    }
    let _ = write!(
        line,
        "{:<7}  {}  {}  {}: {}",
        event.severity.as_str(),
        event.namespace,
        event.involved,
        event.reason,
        event.message
    );
    line
}

/// Render up to `prefs.line_limit` of the newest events
pub fn event_lines(events: &[EventRecord], prefs: &PanelPreferences) -> Vec<String> {
    let start = events.len().saturating_sub(prefs.line_limit);
    events[start..]
        .iter()
        .map(|e| event_line(e, prefs.show_timestamps))
        .collect()
}

pub fn preferences(context_name: &str, prefs: &PanelPreferences) -> String {
    format!(
        "context:          {}\n\
         follow:           {}\n\
         show_timestamps:  {}\n\
         line_limit:       {}\n\
         refresh_enabled:  {}\n\
         refresh_interval: {}s",
        context_name,
        prefs.follow,
        prefs.show_timestamps,
        prefs.line_limit,
        prefs.refresh_enabled,
        prefs.refresh_interval_secs,
    )
}
