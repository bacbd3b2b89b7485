//! Single-context reachability check

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use kubepulse_types::{ConnectivityResult, RawError};

use crate::classify::{ErrorClassifier, RawFailure};
use crate::registry::ContextRegistry;

/// Issues one liveness call per probe, bounded by a deadline
#[derive(Clone)]
pub struct ConnectivityProbe {
    registry: Arc<ContextRegistry>,
}

impl ConnectivityProbe {
    pub fn new(registry: Arc<ContextRegistry>) -> Self {
        Self { registry }
    }

    /// Probe `context_name`, returning no later than `timeout`.
    ///
    /// When the deadline passes the in-flight call is dropped, not awaited;
    /// the remote side may never learn that it was abandoned.
    pub async fn probe(&self, context_name: &str, timeout: Duration) -> ConnectivityResult {
        let classifier = ErrorClassifier::new(timeout);

        let Some(handle) = self.registry.get(context_name) else {
            let error = RawError::UnknownContext(context_name.to_string());
            return ConnectivityResult::disconnected(classifier.classify(error, context_name));
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, handle.source.ping()).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(Ok(())) => ConnectivityResult::connected(context_name),
            Ok(Err(raw)) => ConnectivityResult::disconnected(
                classifier.classify(RawFailure::after(raw, elapsed), context_name),
            ),
            Err(_) => ConnectivityResult::disconnected(classifier.classify(
                RawFailure::after(RawError::Elapsed(timeout), elapsed),
                context_name,
            )),
        };

        debug!(
            context = %context_name,
            status = %result.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Probe finished"
        );

        result
    }
}
