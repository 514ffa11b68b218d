//! Controller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ControllerError, Result};

/// Configuration for the allocation controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Namespace holding the node allocation records.
    pub namespace: String,
    /// Number of driver calls served concurrently.
    pub workers: usize,
    /// Address the HTTP server binds to.
    pub listen_addr: String,
    /// Deadline for each API server request.
    pub request_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            workers: 10,
            listen_addr: "0.0.0.0:8080".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `POD_NAMESPACE`: Namespace holding the node allocation records
    /// - `WORKERS`: Concurrent driver calls
    /// - `LISTEN_ADDR`: HTTP bind address
    /// - `REQUEST_TIMEOUT_SECS`: Per-request API server deadline
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("POD_NAMESPACE") {
            config.namespace = val;
        }
        if let Ok(val) = std::env::var("WORKERS") {
            if let Ok(n) = val.parse() {
                config.workers = n;
            }
        }
        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.request_timeout = Duration::from_secs(n);
            }
        }

        config
    }

    /// Check the configuration for values the controller cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker count or timeout is zero, or the
    /// namespace is empty.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(ControllerError::Config("namespace must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(ControllerError::Config("workers must be at least 1".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(ControllerError::Config(
                "request timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}
