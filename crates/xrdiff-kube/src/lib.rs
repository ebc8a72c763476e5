//! xrdiff kube - caching, schema-aware cluster facade
//!
//! This crate provides:
//! - **TypeResolver**: Kind<->Resource mapping via live discovery, cached
//! - **ClusterClient**: typed reads, dry-run apply, resource-tree walk and
//!   the process-lifetime composition/function/XRD caches
//! - **CompositionMatcher**: direct-ref / label-selector / default selection
//! - **MockClusterClient**: in-memory implementation with operation counts

pub mod client;
pub mod composition;
pub mod discovery;
pub mod error;
pub mod mock;

pub use client::{ApiClusterClient, ClusterClient, ResourceTree};
pub use composition::{functions_from_pipeline, CompositionMatcher};
pub use discovery::{group_requires_crd, TypeResolver};
pub use error::{KubeError, Result, ResultExt};
pub use mock::{MockClusterClient, OperationCounts};
