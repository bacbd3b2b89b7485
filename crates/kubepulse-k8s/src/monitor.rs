//! Concurrent connectivity checks across contexts

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::info;

use kubepulse_types::ConnectivityResult;

use crate::probe::ConnectivityProbe;
use crate::registry::ContextRegistry;

/// Fans probes out over many contexts and keeps the latest result per context
pub struct ConnectivityMonitor {
    probe: ConnectivityProbe,
    timeout: Duration,
    /// Written only by this monitor
    latest: RwLock<HashMap<String, ConnectivityResult>>,
}

impl ConnectivityMonitor {
    pub fn new(registry: Arc<ContextRegistry>, timeout: Duration) -> Self {
        Self {
            probe: ConnectivityProbe::new(registry),
            timeout,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Probe every context concurrently.
    ///
    /// Results line up positionally with `contexts`, whatever order the probes
    /// finish in. Wall time is bounded by one probe timeout, and a failing
    /// context never affects the others. No retries.
    pub async fn check_all<S: AsRef<str>>(&self, contexts: &[S]) -> Vec<ConnectivityResult> {
        let probes = contexts
            .iter()
            .map(|name| self.probe.probe(name.as_ref(), self.timeout));
        let results = join_all(probes).await;

        {
            let mut latest = self.latest.write();
            for result in &results {
                latest.insert(result.context_name.clone(), result.clone());
            }
        }

        let connected = results.iter().filter(|r| r.is_connected()).count();
        info!(
            contexts = results.len(),
            connected,
            "Connectivity check complete"
        );

        results
    }

    /// Probe a single context and record the result
    pub async fn check(&self, context_name: &str) -> ConnectivityResult {
        let result = self.probe.probe(context_name, self.timeout).await;
        self.latest
            .write()
            .insert(context_name.to_string(), result.clone());
        result
    }

    /// Latest known result, if the context was ever probed
    pub fn status(&self, context_name: &str) -> Option<ConnectivityResult> {
        self.latest.read().get(context_name).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, ConnectivityResult> {
        self.latest.read().clone()
    }

    pub fn forget(&self, context_name: &str) {
        self.latest.write().remove(context_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kubepulse_types::{ClusterContext, EventRecord, FailureKind, RawError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    use crate::registry::ContextHandle;
    use crate::source::{ClusterSource, EventQuery};

    /// Answers pings after a delay; `None` delay never answers
    struct ScriptedSource {
        delay: Option<Duration>,
        outcome: Result<(), RawError>,
        pings: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(delay: Option<Duration>, outcome: Result<(), RawError>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                outcome,
                pings: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ClusterSource for ScriptedSource {
        async fn ping(&self) -> Result<(), RawError> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            match self.delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            self.outcome.clone()
        }

        async fn list_namespaces(&self) -> Result<Vec<String>, RawError> {
            Ok(Vec::new())
        }

        async fn query_events(&self, _query: &EventQuery) -> Result<Vec<EventRecord>, RawError> {
            Ok(Vec::new())
        }

        async fn delete_namespace(&self, _name: &str) -> Result<(), RawError> {
            Ok(())
        }
    }

    fn registry(sources: Vec<(&str, Arc<ScriptedSource>)>) -> Arc<ContextRegistry> {
        Arc::new(ContextRegistry::from_handles(sources.into_iter().map(
            |(name, source)| {
                let source: Arc<dyn ClusterSource> = source;
                ContextHandle::new(ClusterContext::named(name), source)
            },
        )))
    }

    fn forbidden() -> RawError {
        RawError::Api {
            code: 403,
            reason: "Forbidden".to_string(),
            message: "forbidden".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_input_order() {
        let registry = registry(vec![
            ("slow", ScriptedSource::new(Some(Duration::from_millis(900)), Ok(()))),
            ("medium", ScriptedSource::new(Some(Duration::from_millis(500)), Ok(()))),
            ("fast", ScriptedSource::new(Some(Duration::from_millis(10)), Ok(()))),
        ]);
        let monitor = ConnectivityMonitor::new(registry, Duration::from_secs(5));

        for order in [
            ["slow", "medium", "fast"],
            ["fast", "slow", "medium"],
            ["medium", "fast", "slow"],
        ] {
            let results = monitor.check_all(&order).await;
            let names: Vec<&str> = results.iter().map(|r| r.context_name.as_str()).collect();
            assert_eq!(names, order);
            assert!(results.iter().all(|r| r.is_connected()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_times_out() {
        let registry = registry(vec![("hang", ScriptedSource::new(None, Ok(())))]);
        let monitor = ConnectivityMonitor::new(registry, Duration::from_secs(5));

        let started = Instant::now();
        let result = monitor.check("hang").await;

        assert_eq!(result.failure(), Some(FailureKind::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5) + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_does_not_delay_others() {
        let healthy = ScriptedSource::new(Some(Duration::from_millis(20)), Ok(()));
        let registry = registry(vec![
            ("a", Arc::clone(&healthy)),
            ("hang", ScriptedSource::new(None, Ok(()))),
            ("b", ScriptedSource::new(Some(Duration::from_millis(20)), Ok(()))),
        ]);
        let monitor = Arc::new(ConnectivityMonitor::new(registry, Duration::from_secs(5)));

        let started = Instant::now();
        let results = monitor.check_all(&["a", "hang", "b"]).await;

        assert!(results[0].is_connected());
        assert_eq!(results[1].failure(), Some(FailureKind::Timeout));
        assert!(results[2].is_connected());
        // Bounded by one timeout, not the sum
        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(healthy.pings.load(Ordering::SeqCst), 1);

        // A healthy probe racing a hanging one answers at its own pace
        let hanging = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.check("hang").await })
        };
        let started = Instant::now();
        assert!(monitor.check("b").await.is_connected());
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(
            hanging.await.unwrap().failure(),
            Some(FailureKind::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_classified_and_recorded() {
        let registry = registry(vec![
            ("denied", ScriptedSource::new(Some(Duration::ZERO), Err(forbidden()))),
            ("ok", ScriptedSource::new(Some(Duration::ZERO), Ok(()))),
        ]);
        let monitor = ConnectivityMonitor::new(registry, Duration::from_secs(5));
        monitor.check_all(&["denied", "ok", "unknown"]).await;

        assert_eq!(
            monitor.status("denied").and_then(|r| r.failure()),
            Some(FailureKind::Unauthorized)
        );
        assert!(monitor.status("ok").is_some_and(|r| r.is_connected()));
        assert_eq!(
            monitor.status("unknown").and_then(|r| r.failure()),
            Some(FailureKind::NotFound)
        );

        monitor.forget("ok");
        assert!(monitor.status("ok").is_none());
        assert_eq!(monitor.snapshot().len(), 2);
    }
}
