//! Uplift - cluster autoscaling remediator for pods stuck pending
//!
//! Uplift watches a Kubernetes cluster for pods that have sat in the
//! `Pending` phase long enough to be considered stuck, totals the compute
//! those pods are asking for, and grows AWS autoscaling groups until the
//! scheduler has somewhere to put them. It is an outer control loop that
//! complements the native scheduler; it never mutates the cluster itself.
//!
//! # Modules
//!
//! - [`resources`] - the two-dimensional CPU/memory demand value type
//! - [`demand`] - Kubernetes resource quantity parsing and pod demand
//! - [`predicate`] - pod predicates gating remediation strategies
//! - [`registry`] - name-indexed factories for predicates and remediators
//! - [`failing`] - the synchronized working set of stuck pods
//! - [`cache`] - read-only view of the cluster's pod listing
//! - [`strategy`] - predicate-gated ordered remediator pipelines
//! - [`remediator`] - the remediator contract and implementations
//! - [`aws`] - the narrow autoscaling API surface and its SDK client
//! - [`controller`] - reconciliation and the timer-driven tick loop
//! - [`config`] - YAML strategy configuration
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod aws;
pub mod cache;
pub mod config;
pub mod controller;
pub mod demand;
pub mod error;
pub mod failing;
pub mod predicate;
pub mod registry;
pub mod remediator;
pub mod resources;
pub mod strategy;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default number of minutes between remediation attempts
pub const DEFAULT_REMEDIATION_MINUTES: u64 = 5;
