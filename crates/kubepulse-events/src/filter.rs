use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use kubepulse_types::{EventFilterState, EventRecord, EventSeverity};

/// Compiled filter for event records
///
/// Stages run cheapest first: namespace, severity, time range, resource kind,
/// then the text scan over whatever survived.
#[derive(Clone)]
pub struct CompiledEventFilter {
    namespace: Option<String>,

    /// Severities to include (empty = all)
    severities: HashSet<EventSeverity>,

    /// Events older than this are dropped
    not_before: Option<DateTime<Utc>>,

    /// Compared case-insensitively
    resource_kind: Option<String>,

    /// Case-insensitive literal search
    search: Option<Regex>,
}

impl CompiledEventFilter {
    /// Compile `state` relative to `now`
    pub fn new(state: &EventFilterState, now: DateTime<Utc>) -> Self {
        let pattern = state
            .search_text
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        // An escaped literal always compiles
        let search = if pattern.is_empty() {
            None
        } else {
            RegexBuilder::new(&regex::escape(&pattern))
                .case_insensitive(true)
                .build()
                .ok()
        };

        Self {
            namespace: state.namespace.clone().filter(|ns| !ns.is_empty()),
            severities: state.severities.clone(),
            not_before: state
                .since
                .as_seconds()
                .map(|secs| now - ChronoDuration::seconds(secs)),
            resource_kind: state.resource_kind.clone().filter(|k| !k.is_empty()),
            search,
        }
    }

    /// Run every stage in order over `records`
    pub fn apply(&self, mut records: Vec<EventRecord>) -> Vec<EventRecord> {
        if self.is_empty() {
            return records;
        }
        if let Some(namespace) = &self.namespace {
            records.retain(|e| &e.namespace == namespace);
        }
        if !self.severities.is_empty() {
            records.retain(|e| self.severities.contains(&e.severity));
        }
        if let Some(not_before) = self.not_before {
            records.retain(|e| e.timestamp >= not_before);
        }
        if let Some(kind) = &self.resource_kind {
            records.retain(|e| e.involved.kind.eq_ignore_ascii_case(kind));
        }
        if let Some(search) = &self.search {
            records.retain(|e| Self::text_matches(search, e));
        }
        records
    }

    fn text_matches(search: &Regex, entry: &EventRecord) -> bool {
        search.is_match(&entry.message)
            || search.is_match(&entry.reason)
            || search.is_match(&entry.involved.name)
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.namespace.is_none()
            && self.severities.is_empty()
            && self.not_before.is_none()
            && self.resource_kind.is_none()
            && self.search.is_none()
    }
}

impl std::fmt::Debug for CompiledEventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledEventFilter")
            .field("namespace", &self.namespace)
            .field("severities", &self.severities)
            .field("not_before", &self.not_before)
            .field("resource_kind", &self.resource_kind)
            .field("search", &self.search.as_ref().map(Regex::as_str))
            .finish()
    }
}
