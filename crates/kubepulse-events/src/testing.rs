//! Scripted cluster source shared by the engine and scheduler tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;

use kubepulse_k8s::{
    ClusterContext, ClusterSource, ConnectivityMonitor, ContextHandle, ContextRegistry, EventQuery,
    RawError,
};
use kubepulse_types::{EventRecord, EventSeverity, InvolvedObject};

use crate::engine::{DEFAULT_QUERY_TIMEOUT, ResourceQueryEngine};

#[derive(Default)]
pub struct FakeSource {
    operated: bool,
    ping_error: Mutex<Option<RawError>>,
    delete_error: Mutex<Option<RawError>>,
    namespaces: Mutex<VecDeque<Result<Vec<String>, RawError>>>,
    events: Mutex<VecDeque<Result<Vec<EventRecord>, RawError>>>,
    event_delay: Mutex<Option<Duration>>,
    hang: Mutex<bool>,
    last_query: Mutex<Option<EventQuery>>,
    pub pings: AtomicUsize,
    pub event_queries: AtomicUsize,
    /// Event queries running right now
    pub in_flight: AtomicUsize,
    /// Highest value `in_flight` ever reached
    pub max_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn plain() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn operated() -> Arc<Self> {
        Arc::new(Self {
            operated: true,
            ..Default::default()
        })
    }

    pub fn push_namespaces(&self, result: Result<Vec<String>, RawError>) {
        self.namespaces.lock().push_back(result);
    }

    pub fn push_events(&self, result: Result<Vec<EventRecord>, RawError>) {
        self.events.lock().push_back(result);
    }

    pub fn fail_pings(&self, error: RawError) {
        *self.ping_error.lock() = Some(error);
    }

    pub fn recover_pings(&self) {
        *self.ping_error.lock() = None;
    }

    pub fn fail_delete(&self, error: RawError) {
        *self.delete_error.lock() = Some(error);
    }

    pub fn delay_events(&self, delay: Duration) {
        *self.event_delay.lock() = Some(delay);
    }

    pub fn hang_events(&self) {
        *self.hang.lock() = true;
    }

    pub fn last_query(&self) -> Option<EventQuery> {
        self.last_query.lock().clone()
    }

    pub fn queries(&self) -> usize {
        self.event_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterSource for FakeSource {
    async fn ping(&self) -> Result<(), RawError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        match self.ping_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, RawError> {
        self.namespaces.lock().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>, RawError> {
        self.event_queries.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock() = Some(query.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let hang = *self.hang.lock();
        if hang {
            std::future::pending::<()>().await;
        }
        let delay = *self.event_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn delete_namespace(&self, _name: &str) -> Result<(), RawError> {
        match self.delete_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn is_operated(&self) -> bool {
        self.operated
    }
}

pub fn registry_with(sources: Vec<(&str, Arc<FakeSource>)>) -> Arc<ContextRegistry> {
    Arc::new(ContextRegistry::from_handles(sources.into_iter().map(
        |(name, source)| {
            let source: Arc<dyn ClusterSource> = source;
            ContextHandle::new(ClusterContext::named(name), source)
        },
    )))
}

pub fn engine_for(registry: Arc<ContextRegistry>) -> Arc<ResourceQueryEngine> {
    let monitor = Arc::new(ConnectivityMonitor::new(
        Arc::clone(&registry),
        Duration::from_secs(5),
    ));
    Arc::new(ResourceQueryEngine::new(
        registry,
        monitor,
        DEFAULT_QUERY_TIMEOUT,
    ))
}

pub fn engine_with(sources: Vec<(&str, Arc<FakeSource>)>) -> Arc<ResourceQueryEngine> {
    engine_for(registry_with(sources))
}

/// Normal event in `default`, `second` seconds after a fixed base time
pub fn event_at(second: u32) -> EventRecord {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    EventRecord {
        timestamp: base + ChronoDuration::seconds(i64::from(second)),
        severity: EventSeverity::Normal,
        reason: format!("e{}", second),
        involved: InvolvedObject {
            kind: "Pod".to_string(),
            name: format!("pod-{}", second),
        },
        message: String::new(),
        namespace: "default".to_string(),
    }
}

pub fn forbidden() -> RawError {
    RawError::Api {
        code: 403,
        reason: "Forbidden".to_string(),
        message: "namespaces is forbidden".to_string(),
    }
}
