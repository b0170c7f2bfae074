//! Common types for configcheck: errors, Kubernetes helpers, and telemetry

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Label key identifying the tool that manages a resource
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label key for the application name
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Label key for the application component
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Value of [`LABEL_MANAGED_BY`] on every configcheck resource
pub const LABEL_MANAGED_BY_CONFIGCHECK: &str = "configcheck";

/// Default field manager for server-side apply
pub const DEFAULT_FIELD_MANAGER: &str = "configcheck";
