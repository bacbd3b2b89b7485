use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use kubepulse_k8s::{
    ClusterContext, ClusterSource, ConnectivityMonitor, ContextHandle, ContextRegistry,
    EventQuery, FailureKind, RawError,
};
use kubepulse_types::EventRecord;

struct DelayedPing {
    delay: Duration,
    outcome: Result<(), RawError>,
}

#[async_trait]
impl ClusterSource for DelayedPing {
    async fn ping(&self) -> Result<(), RawError> {
        tokio::time::sleep(self.delay).await;
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

fn handle(name: &str, delay: Duration, outcome: Result<(), RawError>) -> ContextHandle {
    ContextHandle::new(
        ClusterContext::named(name),
        Arc::new(DelayedPing { delay, outcome }),
    )
}

#[tokio::test(start_paused = true)]
async fn test_three_contexts_mixed_outcomes() {
    let registry = Arc::new(ContextRegistry::from_handles([
        handle("a", Duration::from_secs(6), Ok(())),
        handle(
            "b",
            Duration::from_millis(200),
            Err(RawError::Api {
                code: 403,
                reason: "Forbidden".to_string(),
                message: "namespaces is forbidden: User \"dev\" cannot list".to_string(),
            }),
        ),
        handle("c", Duration::from_millis(100), Ok(())),
    ]));
    let monitor = ConnectivityMonitor::new(registry, Duration::from_secs(5));

    let started = Instant::now();
    let results = monitor.check_all(&["a", "b", "c"]).await;
    let elapsed = started.elapsed();

    let kinds: Vec<Option<FailureKind>> = results.iter().map(|r| r.failure()).collect();
    assert_eq!(
        kinds,
        vec![Some(FailureKind::Timeout), Some(FailureKind::Unauthorized), None]
    );
    assert!(results[2].is_connected());
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_millis(5_100));
}
