//! Backing data sources
//!
//! A [`ClusterSource`] is the single capability interface the engine talks to.
//! [`KubeApiSource`] goes straight to the API server; the operator-backed
//! source in [`crate::operator`] adds event queries on top of it.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use tokio::sync::OnceCell;
use tracing::debug;

use kubepulse_types::{EventFilterState, EventRecord, EventSeverity, RawError};

/// Timeout for connecting to K8s API
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for reading K8s API responses
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Filters a source may apply before records leave the cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub namespace: Option<String>,
    pub severities: Vec<EventSeverity>,
    pub since_seconds: Option<i64>,
    pub resource_kind: Option<String>,
}

impl EventQuery {
    /// Cheap server-side subset of a filter; text search always runs locally
    pub fn from_filter(filter: &EventFilterState) -> Self {
        let mut severities: Vec<EventSeverity> = filter.severities.iter().copied().collect();
        severities.sort_by_key(|s| s.as_str());

        Self {
            namespace: filter.namespace.clone(),
            severities,
            since_seconds: filter.since.as_seconds(),
            resource_kind: filter.resource_kind.clone(),
        }
    }
}

/// Everything the engine needs from one cluster
#[async_trait]
pub trait ClusterSource: Send + Sync {
    /// Cheapest possible side-effect-free call
    async fn ping(&self) -> Result<(), RawError>;

    async fn list_namespaces(&self) -> Result<Vec<String>, RawError>;

    /// Only operated clusters answer event queries
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>, RawError>;

    async fn delete_namespace(&self, name: &str) -> Result<(), RawError>;

    fn is_operated(&self) -> bool {
        false
    }
}

/// Connect/read timeouts applied to every client built from kubeconfig
#[derive(Clone, Copy, Debug)]
pub struct ClientTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect: CONNECT_TIMEOUT,
            read: READ_TIMEOUT,
        }
    }
}

/// Direct API server access for one context
pub struct KubeApiSource {
    context_name: String,
    kubeconfig: Arc<Kubeconfig>,
    timeouts: ClientTimeouts,
    client: OnceCell<Client>,
}

impl KubeApiSource {
    /// Source whose client is built from kubeconfig on first use
    pub fn from_kubeconfig(
        context_name: impl Into<String>,
        kubeconfig: Arc<Kubeconfig>,
        timeouts: ClientTimeouts,
    ) -> Self {
        Self {
            context_name: context_name.into(),
            kubeconfig,
            timeouts,
            client: OnceCell::new(),
        }
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    async fn client(&self) -> Result<Client, RawError> {
        self.client
            .get_or_try_init(|| self.build_client())
            .await
            .cloned()
    }

    /// Exec-based auth plugins run here, so a hanging credential helper
    /// stalls only this context's calls
    async fn build_client(&self) -> Result<Client, RawError> {
        debug!(context = %self.context_name, "Building API client");

        let mut config = kube::Config::from_custom_kubeconfig(
            Kubeconfig::clone(&self.kubeconfig),
            &KubeConfigOptions {
                context: Some(self.context_name.clone()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| RawError::Client(error_chain(&e)))?;

        config.connect_timeout = Some(self.timeouts.connect);
        config.read_timeout = Some(self.timeouts.read);

        Client::try_from(config).map_err(|e| RawError::Client(error_chain(&e)))
    }
}

#[async_trait]
impl ClusterSource for KubeApiSource {
    async fn ping(&self) -> Result<(), RawError> {
        let client = self.client().await?;
        client.apiserver_version().await.map_err(from_kube)?;
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, RawError> {
        let namespaces: Api<Namespace> = Api::all(self.client().await?);
        let list = namespaces
            .list(&ListParams::default())
            .await
            .map_err(from_kube)?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn query_events(&self, _query: &EventQuery) -> Result<Vec<EventRecord>, RawError> {
        Err(RawError::Unsupported(format!(
            "event queries need the operator on '{}'",
            self.context_name
        )))
    }

    /// Deletes the namespace, then reads it back: an object that is still
    /// present with finalizers set is reported as delete-pending
    async fn delete_namespace(&self, name: &str) -> Result<(), RawError> {
        let namespaces: Api<Namespace> = Api::all(self.client().await?);
        namespaces
            .delete(name, &DeleteParams::default())
            .await
            .map_err(from_kube)?;

        let Some(remaining) = namespaces.get_opt(name).await.map_err(from_kube)? else {
            return Ok(());
        };

        let finalizers = remaining.metadata.finalizers.unwrap_or_default();
        if finalizers.is_empty() {
            Ok(())
        } else {
            Err(RawError::DeletePending {
                name: name.to_string(),
                finalizers,
            })
        }
    }
}

/// Convert a kube client error into its raw, cloneable form
pub fn from_kube(err: kube::Error) -> RawError {
    match err {
        kube::Error::Api(resp) => RawError::Api {
            code: resp.code,
            reason: resp.reason,
            message: resp.message,
        },
        kube::Error::HyperError(e) => RawError::Transport(error_chain(&e)),
        kube::Error::Service(e) => RawError::Transport(error_chain(&*e)),
        other => RawError::Other(error_chain(&other)),
    }
}

/// Join an error with all of its sources, so text rules see the root cause
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}
