//! Trellis Core - data model for the component lifecycle engine
//!
//! This crate provides the types shared by every lifecycle operation:
//! - `ResourceKind` / `ObjectKey`: typed references to externally-reconciled objects
//! - `Operation`: the annotation-driven verbs understood by downstream controllers
//! - `RetryPolicy`: interval, severity threshold and timeout for polling waits
//! - `ExtensionStatus` / `ManagedResourceStatus`: status views with their convergence tables
//! - `Payload`: manifest bundles with content-addressed naming
//!
//! Nothing in here performs I/O; the async engine lives in `trellis-kube`.

pub mod annotations;
pub mod bundle;
pub mod error;
pub mod extension;
pub mod payload;
pub mod policy;
pub mod resource;
pub mod validation;

pub use annotations::Operation;
pub use bundle::{
    BundleClass, Condition, ConditionStatus, ManagedResourceSpec, ManagedResourceStatus,
    SecretRef,
};
pub use error::{CoreError, Result};
pub use extension::{
    ConvergenceState, ExtensionStatus, LastError, LastOperation, MigrationPhase, OperationState,
    OperationType,
};
pub use payload::{Payload, content_name};
pub use policy::RetryPolicy;
pub use resource::{ObjectKey, ResourceKind};
