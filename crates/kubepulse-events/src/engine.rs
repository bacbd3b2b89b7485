//! Cluster-scoped queries with per-context working sets
//!
//! The engine owns the namespace set, the event working set and the filter
//! state of every context. Failures never replace data: the last good working
//! set stays in place and the classified error is reported next to it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kubepulse_k8s::{
    ClassifiedError, ConnectivityMonitor, ContextRegistry, ErrorClassifier, EventQuery,
    RawError, RawFailure,
};
use kubepulse_types::{EventFilterState, EventRecord, MAX_EVENT_RECORDS, NamespaceSet};

use crate::buffer::EventBuffer;
use crate::filter::CompiledEventFilter;

/// Default deadline for namespace and event queries
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Conditions under which an event fetch produces no snapshot at all
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("event queries are not supported on '{context}': cluster is not operated")]
    Unsupported { context: String },

    #[error("result for '{context}' was superseded before it could be applied")]
    Superseded { context: String },
}

/// Working set after a fetch, plus the failure that kept it stale (if any)
#[derive(Clone, Debug)]
pub struct EventsSnapshot {
    pub context_name: String,
    /// Oldest first, at most [`MAX_EVENT_RECORDS`]
    pub records: Vec<EventRecord>,
    pub error: Option<ClassifiedError>,
    /// Time of the last successful fetch
    pub fetched_at: Option<DateTime<Utc>>,
}

impl EventsSnapshot {
    pub fn is_stale(&self) -> bool {
        self.error.is_some()
    }
}

struct ContextState {
    namespaces: Option<NamespaceSet>,
    events: EventBuffer,
    filter: EventFilterState,
    last_error: Option<ClassifiedError>,
    fetched_at: Option<DateTime<Utc>>,
}

impl Default for ContextState {
    fn default() -> Self {
        Self {
            namespaces: None,
            events: EventBuffer::new(MAX_EVENT_RECORDS),
            filter: EventFilterState::default(),
            last_error: None,
            fetched_at: None,
        }
    }
}

pub struct ResourceQueryEngine {
    registry: Arc<ContextRegistry>,
    monitor: Arc<ConnectivityMonitor>,
    query_timeout: Duration,
    classifier: ErrorClassifier,
    states: RwLock<HashMap<String, ContextState>>,
}

impl ResourceQueryEngine {
    pub fn new(
        registry: Arc<ContextRegistry>,
        monitor: Arc<ConnectivityMonitor>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            monitor,
            query_timeout,
            classifier: ErrorClassifier::new(query_timeout),
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// List namespaces; on failure the previous set is kept
    pub async fn fetch_namespaces(&self, context_name: &str) -> Result<NamespaceSet, ClassifiedError> {
        let Some(handle) = self.registry.get(context_name) else {
            return Err(self.unknown_context(context_name));
        };

        let names = self
            .bounded(context_name, handle.source.list_namespaces())
            .await?;
        let set = NamespaceSet::from_names(names);

        debug!(context = %context_name, count = set.len(), "Namespaces refreshed");
        self.with_state(context_name, |state| state.namespaces = Some(set.clone()));
        Ok(set)
    }

    /// Fetch events for `context_name` and make them the new working set
    pub async fn fetch_events(
        &self,
        context_name: &str,
        filter: &EventFilterState,
    ) -> Result<EventsSnapshot, QueryError> {
        self.fetch_events_with(context_name, filter, || true).await
    }

    /// Like [`Self::fetch_events`], but nothing is applied unless
    /// `is_current()` still holds once the remote call has finished
    pub async fn fetch_events_with<F>(
        &self,
        context_name: &str,
        filter: &EventFilterState,
        is_current: F,
    ) -> Result<EventsSnapshot, QueryError>
    where
        F: Fn() -> bool,
    {
        let Some(handle) = self.registry.get(context_name) else {
            let error = self.unknown_context(context_name);
            warn!(context = %context_name, "Event fetch for unknown context");
            return Ok(EventsSnapshot {
                context_name: context_name.to_string(),
                records: Vec::new(),
                error: Some(error),
                fetched_at: None,
            });
        };

        if !handle.is_operated() {
            return Err(QueryError::Unsupported {
                context: context_name.to_string(),
            });
        }

        // Only a connected result is trusted; anything else is probed again
        let connectivity = match self.monitor.status(context_name) {
            Some(result) if result.is_connected() => result,
            _ => self.monitor.check(context_name).await,
        };
        if let Some(error) = connectivity.error {
            Self::ensure_current(context_name, &is_current)?;
            return Ok(self.settle_failure(context_name, error));
        }

        let query = EventQuery::from_filter(filter);
        let outcome = self
            .bounded(context_name, handle.source.query_events(&query))
            .await;

        Self::ensure_current(context_name, &is_current)?;

        match outcome {
            Ok(records) => Ok(self.settle_success(context_name, filter, records)),
            Err(error) => Ok(self.settle_failure(context_name, error)),
        }
    }

    pub async fn delete_namespace(&self, context_name: &str, name: &str) -> Result<(), ClassifiedError> {
        let Some(handle) = self.registry.get(context_name) else {
            return Err(self.unknown_context(context_name));
        };

        self.bounded(context_name, handle.source.delete_namespace(name))
            .await?;
        info!(context = %context_name, namespace = %name, "Namespace deleted");
        Ok(())
    }

    /// Current filter for a context (default when never set)
    pub fn filter(&self, context_name: &str) -> EventFilterState {
        self.states
            .read()
            .get(context_name)
            .map(|s| s.filter.clone())
            .unwrap_or_default()
    }

    pub fn set_filter(&self, context_name: &str, filter: EventFilterState) {
        self.with_state(context_name, |state| state.filter = filter);
    }

    pub fn update_filter(&self, context_name: &str, update: impl FnOnce(&mut EventFilterState)) {
        self.with_state(context_name, |state| update(&mut state.filter));
    }

    pub fn clear_filters(&self, context_name: &str) {
        self.with_state(context_name, |state| state.filter.clear());
    }

    pub fn namespaces(&self, context_name: &str) -> Option<NamespaceSet> {
        self.states
            .read()
            .get(context_name)
            .and_then(|s| s.namespaces.clone())
    }

    /// Current event working set, oldest first
    pub fn events(&self, context_name: &str) -> Vec<EventRecord> {
        self.states
            .read()
            .get(context_name)
            .map(|s| s.events.all())
            .unwrap_or_default()
    }

    pub fn last_error(&self, context_name: &str) -> Option<ClassifiedError> {
        self.states
            .read()
            .get(context_name)
            .and_then(|s| s.last_error.clone())
    }

    /// Time of the last successful event fetch
    pub fn fetched_at(&self, context_name: &str) -> Option<DateTime<Utc>> {
        self.states.read().get(context_name).and_then(|s| s.fetched_at)
    }

    /// Drop everything held for a removed context
    pub fn forget(&self, context_name: &str) {
        self.states.write().remove(context_name);
        self.monitor.forget(context_name);
    }

    fn settle_success(
        &self,
        context_name: &str,
        filter: &EventFilterState,
        records: Vec<EventRecord>,
    ) -> EventsSnapshot {
        let now = Utc::now();
        let received = records.len();
        let mut records = CompiledEventFilter::new(filter, now).apply(records);
        records.sort_by_key(|e| e.timestamp);

        let (records, fetched_at) = self.with_state(context_name, |state| {
            state.events.replace(records);
            state.last_error = None;
            state.fetched_at = Some(now);
            (state.events.all(), state.fetched_at)
        });

        debug!(
            context = %context_name,
            received,
            kept = records.len(),
            "Event working set replaced"
        );

        EventsSnapshot {
            context_name: context_name.to_string(),
            records,
            error: None,
            fetched_at,
        }
    }

    fn settle_failure(&self, context_name: &str, error: ClassifiedError) -> EventsSnapshot {
        warn!(
            context = %context_name,
            kind = %error.kind,
            "Event fetch failed, keeping previous working set"
        );

        let (records, fetched_at) = self.with_state(context_name, |state| {
            state.last_error = Some(error.clone());
            (state.events.all(), state.fetched_at)
        });

        EventsSnapshot {
            context_name: context_name.to_string(),
            records,
            error: Some(error),
            fetched_at,
        }
    }

    fn ensure_current<F: Fn() -> bool>(context_name: &str, is_current: &F) -> Result<(), QueryError> {
        if is_current() {
            Ok(())
        } else {
            debug!(context = %context_name, "Discarding superseded fetch result");
            Err(QueryError::Superseded {
                context: context_name.to_string(),
            })
        }
    }

    /// Run one remote call under the query deadline, classifying failures
    async fn bounded<T>(
        &self,
        context_name: &str,
        call: impl Future<Output = Result<T, RawError>>,
    ) -> Result<T, ClassifiedError> {
        let started = Instant::now();
        match tokio::time::timeout(self.query_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(raw)) => Err(self
                .classifier
                .classify(RawFailure::after(raw, started.elapsed()), context_name)),
            Err(_) => Err(self.classifier.classify(
                RawFailure::after(RawError::Elapsed(self.query_timeout), started.elapsed()),
                context_name,
            )),
        }
    }

    fn unknown_context(&self, context_name: &str) -> ClassifiedError {
        self.classifier
            .classify(RawError::UnknownContext(context_name.to_string()), context_name)
    }

    fn with_state<R>(&self, context_name: &str, f: impl FnOnce(&mut ContextState) -> R) -> R {
        let mut states = self.states.write();
        f(states.entry(context_name.to_string()).or_default())
    }
}
