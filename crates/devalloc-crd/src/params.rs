//! Class and claim parameter resolution.
//!
//! Parameters arrive as a loosely-typed `(apiGroup, kind, name)` reference.
//! Resolution checks the group, dispatches on the kind to a closed set of
//! variants, fetches the object, and validates it. A missing reference yields
//! the default variant.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{CrdError, Result};
use crate::types::{
    api_group_version, DeviceClaimParametersSpec, DeviceClassParametersSpec,
    CLAIM_PARAMETERS_KIND, CLASS_PARAMETERS_KIND, MAX_DEVICES_PER_CLAIM,
};
use crate::ParameterStore;

/// Reference from a claim or class to its parameters object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParametersRef {
    /// `group/version` of the referenced object.
    pub api_group: String,
    /// Kind of the referenced object.
    pub kind: String,
    /// Name of the referenced object.
    pub name: String,
}

impl ParametersRef {
    /// Reference a claim parameters object served by this driver.
    #[must_use]
    pub fn claim(name: impl Into<String>) -> Self {
        Self {
            api_group: api_group_version(),
            kind: CLAIM_PARAMETERS_KIND.to_string(),
            name: name.into(),
        }
    }

    /// Reference a class parameters object served by this driver.
    #[must_use]
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            api_group: api_group_version(),
            kind: CLASS_PARAMETERS_KIND.to_string(),
            name: name.into(),
        }
    }

    fn check_api_group(&self) -> Result<()> {
        let expected = api_group_version();
        if self.api_group == expected {
            Ok(())
        } else {
            Err(CrdError::IncorrectApiGroup {
                actual: self.api_group.clone(),
                expected,
            })
        }
    }
}

/// Parsed claim parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ClaimParameters {
    /// A [`crate::DeviceClaimParameters`] object.
    DeviceClaimParameters(DeviceClaimParametersSpec),
}

impl Default for ClaimParameters {
    fn default() -> Self {
        Self::DeviceClaimParameters(DeviceClaimParametersSpec::default())
    }
}

impl ClaimParameters {
    /// The device request carried by these parameters.
    #[must_use]
    pub const fn device_request(&self) -> &DeviceClaimParametersSpec {
        match self {
            Self::DeviceClaimParameters(spec) => spec,
        }
    }
}

/// Parsed class parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ClassParameters {
    /// A [`crate::DeviceClassParameters`] object.
    DeviceClassParameters(DeviceClassParametersSpec),
}

impl Default for ClassParameters {
    fn default() -> Self {
        Self::DeviceClassParameters(DeviceClassParametersSpec::default())
    }
}

/// Check a claim's request before it reaches the allocator.
///
/// # Errors
///
/// Returns `CrdError::InvalidParameters` if the count is outside
/// `1..=MAX_DEVICES_PER_CLAIM`.
pub fn validate_claim_parameters(spec: &DeviceClaimParametersSpec) -> Result<()> {
    if spec.count == 0 || spec.count > MAX_DEVICES_PER_CLAIM {
        return Err(CrdError::InvalidParameters(format!(
            "count must be between 1 and {MAX_DEVICES_PER_CLAIM}, got {}",
            spec.count
        )));
    }
    Ok(())
}

/// Resolve a class's parameters reference.
///
/// # Errors
///
/// Returns an error if the reference carries the wrong group or an unknown
/// kind, or if the object cannot be fetched.
pub async fn resolve_class_parameters<P>(
    store: &P,
    reference: Option<&ParametersRef>,
) -> Result<ClassParameters>
where
    P: ParameterStore + ?Sized,
{
    let Some(reference) = reference else {
        return Ok(ClassParameters::default());
    };
    reference.check_api_group()?;

    match reference.kind.as_str() {
        CLASS_PARAMETERS_KIND => {
            let spec = store.get_class_parameters(&reference.name).await?;
            debug!(name = %reference.name, "Resolved class parameters");
            Ok(ClassParameters::DeviceClassParameters(spec))
        }
        other => Err(CrdError::UnsupportedKind(other.to_string())),
    }
}

/// Resolve a claim's parameters reference in the claim's namespace.
///
/// # Errors
///
/// Returns an error if the reference carries the wrong group or an unknown
/// kind, if the object cannot be fetched, or if it fails validation.
pub async fn resolve_claim_parameters<P>(
    store: &P,
    namespace: &str,
    reference: Option<&ParametersRef>,
) -> Result<ClaimParameters>
where
    P: ParameterStore + ?Sized,
{
    let Some(reference) = reference else {
        return Ok(ClaimParameters::default());
    };
    reference.check_api_group()?;

    match reference.kind.as_str() {
        CLAIM_PARAMETERS_KIND => {
            let spec = store
                .get_claim_parameters(namespace, &reference.name)
                .await?;
            validate_claim_parameters(&spec)?;
            debug!(
                namespace,
                name = %reference.name,
                count = spec.count,
                "Resolved claim parameters"
            );
            Ok(ClaimParameters::DeviceClaimParameters(spec))
        }
        other => {
            error!(kind = other, "Unsupported claim parameters kind");
            Err(CrdError::UnsupportedKind(other.to_string()))
        }
    }
}
