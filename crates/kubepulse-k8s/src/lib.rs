//! Kubernetes connectivity for kubepulse
//!
//! This crate provides failure classification, per-context data sources and
//! the concurrent connectivity monitor.

pub mod classify;
pub mod kubeconfig;
pub mod monitor;
pub mod operator;
pub mod probe;
pub mod registry;
pub mod source;

pub use classify::{ErrorClassifier, RawFailure};
pub use kubeconfig::KubeconfigLoader;
pub use monitor::ConnectivityMonitor;
pub use operator::{OperatorCliSource, OperatorSettings};
pub use probe::ConnectivityProbe;
pub use registry::{ContextHandle, ContextRegistry};
pub use source::{ClientTimeouts, ClusterSource, EventQuery, KubeApiSource};

// Re-export types that are used in our public API
pub use kubepulse_types::{
    ClassifiedError, ClusterContext, ConnectivityResult, ConnectivityStatus, FailureKind, RawError,
};
