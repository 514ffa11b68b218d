//! Node plugin configuration.

use std::path::PathBuf;
use std::time::Duration;

use devalloc_core::NodeName;
use devalloc_crd::RetryPolicy;

use crate::{PluginError, Result};

/// Configuration for the node plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Node this plugin runs on.
    pub node_name: NodeName,
    /// Namespace holding the node allocation records.
    pub namespace: String,
    /// Directory holding CDI spec files.
    pub cdi_root: PathBuf,
    /// sysfs directory enumerated for DRM devices.
    pub sysfs_drm_dir: PathBuf,
    /// Address the HTTP server binds to.
    pub listen_addr: String,
    /// Deadline for each API server request.
    pub request_timeout: Duration,
    /// Conflict retry policy for prepare and unprepare.
    pub retry: RetryPolicy,
}

impl PluginConfig {
    /// Configuration for `node_name` with every other setting defaulted.
    #[must_use]
    pub fn new(node_name: impl Into<NodeName>) -> Self {
        Self {
            node_name: node_name.into(),
            namespace: "default".to_string(),
            cdi_root: PathBuf::from("/etc/cdi"),
            sysfs_drm_dir: PathBuf::from("/sys/class/drm"),
            listen_addr: "0.0.0.0:8081".to_string(),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `NODE_NAME`: Node this plugin runs on (required)
    /// - `POD_NAMESPACE`: Namespace holding the node allocation records
    /// - `CDI_ROOT`: CDI spec directory
    /// - `SYSFS_DRM_DIR`: DRM class directory in sysfs
    /// - `LISTEN_ADDR`: HTTP bind address
    /// - `REQUEST_TIMEOUT_SECS`: Per-request API server deadline
    /// - `RETRY_MAX_ATTEMPTS`: Conflict retry ceiling
    /// - `RETRY_BACKOFF_MS`: Delay between conflict retries
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Config` if `NODE_NAME` is unset or empty.
    pub fn from_env() -> Result<Self> {
        let node_name = parse_node_name(std::env::var("NODE_NAME").ok().as_deref())?;
        let mut config = Self::new(node_name);

        if let Ok(val) = std::env::var("POD_NAMESPACE") {
            config.namespace = val;
        }
        if let Ok(val) = std::env::var("CDI_ROOT") {
            config.cdi_root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SYSFS_DRM_DIR") {
            config.sysfs_drm_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.request_timeout = Duration::from_secs(n);
            }
        }
        if let Ok(val) = std::env::var("RETRY_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.retry.max_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("RETRY_BACKOFF_MS") {
            if let Ok(n) = val.parse() {
                config.retry.initial_backoff = Duration::from_millis(n);
            }
        }

        Ok(config)
    }
}

fn parse_node_name(value: Option<&str>) -> Result<NodeName> {
    NodeName::parse(value.unwrap_or_default())
        .map_err(|e| PluginError::Config(format!("NODE_NAME must be set: {e}")))
}
