//! Event queries through the in-cluster operator CLI
//!
//! Operated clusters run a companion utility that can answer event queries.
//! It is reached by exec-ing into its pod with `kubectl`; everything else is
//! delegated to the wrapped [`KubeApiSource`].

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use kubepulse_types::{EventRecord, RawError};

use crate::source::{ClusterSource, EventQuery, KubeApiSource};

/// Where the operator CLI lives inside an operated cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorSettings {
    /// Local `kubectl` binary
    pub kubectl: String,
    /// Namespace of the operator workload
    pub namespace: String,
    /// Exec target, e.g. `deploy/kubepulse-operator`
    pub target: String,
    /// CLI binary inside the target container
    pub binary: String,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            namespace: "kubepulse-system".to_string(),
            target: "deploy/kubepulse-operator".to_string(),
            binary: "kubepulse-operator".to_string(),
        }
    }
}

pub struct OperatorCliSource {
    context_name: String,
    api: KubeApiSource,
    settings: OperatorSettings,
}

impl OperatorCliSource {
    pub fn new(api: KubeApiSource, settings: OperatorSettings) -> Self {
        Self {
            context_name: api.context_name().to_string(),
            api,
            settings,
        }
    }

    /// Full `kubectl` argument list for an event query
    pub fn exec_args(&self, query: &EventQuery) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--context".into(),
            self.context_name.clone(),
            "--namespace".into(),
            self.settings.namespace.clone(),
            "exec".into(),
            self.settings.target.clone(),
            "--".into(),
            self.settings.binary.clone(),
            "events".into(),
            "--output".into(),
            "json".into(),
        ];

        if let Some(namespace) = &query.namespace {
            args.push("--namespace".into());
            args.push(namespace.clone());
        }
        if !query.severities.is_empty() {
            let severities: Vec<&str> = query.severities.iter().map(|s| s.as_str()).collect();
            args.push("--severity".into());
            args.push(severities.join(","));
        }
        if let Some(seconds) = query.since_seconds {
            args.push("--since".into());
            args.push(format!("{}s", seconds));
        }
        if let Some(kind) = &query.resource_kind {
            args.push("--kind".into());
            args.push(kind.clone());
        }

        args
    }
}

#[async_trait]
impl ClusterSource for OperatorCliSource {
    async fn ping(&self) -> Result<(), RawError> {
        self.api.ping().await
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, RawError> {
        self.api.list_namespaces().await
    }

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>, RawError> {
        let program = self.settings.kubectl.clone();
        let args = self.exec_args(query);

        debug!(context = %self.context_name, ?args, "Querying operator events");

        // Dropping the future (deadline hit) kills the child
        let output = Command::new(&program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RawError::Spawn {
                program: program.clone(),
                kind: e.kind(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RawError::Command {
                program,
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_events(&output.stdout)
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), RawError> {
        self.api.delete_namespace(name).await
    }

    fn is_operated(&self) -> bool {
        true
    }
}

/// Decode the operator's JSON array output
pub fn parse_events(stdout: &[u8]) -> Result<Vec<EventRecord>, RawError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(stdout).map_err(|e| RawError::Decode(e.to_string()))
}
