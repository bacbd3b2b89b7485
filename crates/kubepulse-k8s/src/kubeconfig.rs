//! Kubeconfig loading and registry construction

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use kube::config::Kubeconfig;
use tracing::info;

use kubepulse_types::ClusterContext;

use crate::operator::{OperatorCliSource, OperatorSettings};
use crate::registry::{ContextHandle, ContextRegistry};
use crate::source::{ClientTimeouts, ClusterSource, KubeApiSource};

/// Reads kubeconfig and turns its contexts into registry handles
pub struct KubeconfigLoader {
    kubeconfig: Arc<Kubeconfig>,
    current_context: Option<String>,
}

impl KubeconfigLoader {
    /// Load the kubeconfig from the default locations
    pub fn new() -> Result<Self> {
        let kubeconfig =
            Kubeconfig::read().context("Failed to read kubeconfig. Is kubectl configured?")?;
        Ok(Self::from_kubeconfig(kubeconfig))
    }

    pub fn from_kubeconfig(kubeconfig: Kubeconfig) -> Self {
        let current_context = kubeconfig.current_context.clone();
        Self {
            kubeconfig: Arc::new(kubeconfig),
            current_context,
        }
    }

    /// Get all available contexts from kubeconfig
    pub fn get_contexts(&self) -> Vec<ClusterContext> {
        self.kubeconfig
            .contexts
            .iter()
            .map(|ctx| {
                let context = ctx.context.as_ref();
                ClusterContext::new(
                    ctx.name.clone(),
                    context.map(|c| c.cluster.clone()).unwrap_or_default(),
                    context.and_then(|c| c.user.clone()).unwrap_or_default(),
                    context.and_then(|c| c.namespace.clone()),
                    Some(&ctx.name) == self.current_context.as_ref(),
                )
            })
            .collect()
    }

    pub fn current_context(&self) -> Option<&str> {
        self.current_context.as_deref()
    }

    /// Build one handle per context. Contexts named in `operated` get the
    /// operator-backed source; no client is created until first use.
    pub fn build_registry(
        &self,
        timeouts: ClientTimeouts,
        operated: &HashSet<String>,
        operator: &OperatorSettings,
    ) -> ContextRegistry {
        let handles = self.get_contexts().into_iter().map(|context| {
            let api = KubeApiSource::from_kubeconfig(
                context.name.clone(),
                Arc::clone(&self.kubeconfig),
                timeouts,
            );
            let source: Arc<dyn ClusterSource> = if operated.contains(&context.name) {
                Arc::new(OperatorCliSource::new(api, operator.clone()))
            } else {
                Arc::new(api)
            };
            ContextHandle::new(context, source)
        });

        let registry = ContextRegistry::from_handles(handles);
        info!(
            contexts = registry.len(),
            operated = operated.len(),
            "Loaded contexts from kubeconfig"
        );
        registry
    }
}
