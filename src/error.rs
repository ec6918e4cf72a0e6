use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by a [`crate::provider::TreeProvider`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("accessibility permission denied: {0}")]
    PermissionDenied(String),

    #[error("accessibility API unavailable: {0}")]
    ApiUnavailable(String),

    #[error("element is no longer valid")]
    InvalidElement,

    #[error("provider could not complete the request: {0}")]
    CannotComplete(String),

    #[error("attribute not supported: {0}")]
    AttributeUnsupported(String),
}

impl ProviderError {
    /// Permission and availability failures cannot be fixed by retrying the
    /// same call; they move the engine into degraded mode.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::PermissionDenied(_) | ProviderError::ApiUnavailable(_)
        )
    }
}

/// The only errors that cross the detection engine boundary.
///
/// Everything else (not found, skipped subtrees, bad geometry) is reported
/// through `MatchResult` diagnostics instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectionError {
    #[error("accessibility permission denied: {0}")]
    PermissionDenied(String),

    #[error("accessibility API unavailable: {0}")]
    ApiUnavailable(String),
}

impl DetectionError {
    pub fn from_provider(err: &ProviderError) -> Option<Self> {
        match err {
            ProviderError::PermissionDenied(msg) => {
                Some(DetectionError::PermissionDenied(msg.clone()))
            }
            ProviderError::ApiUnavailable(msg) => Some(DetectionError::ApiUnavailable(msg.clone())),
            _ => None,
        }
    }
}

/// Absorbed failure classes recorded in search diagnostics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ElementNotFound,
    TreeTraversalFailure,
    CoordinateCalculationFailure,
    FuzzyMatchFailure,
    TargetExtractionFailure,
    AttributeAccessFailure,
    ConfigurationInvalid,
    DegradedMode,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ElementNotFound => "element_not_found",
            FailureKind::TreeTraversalFailure => "tree_traversal_failure",
            FailureKind::CoordinateCalculationFailure => "coordinate_calculation_failure",
            FailureKind::FuzzyMatchFailure => "fuzzy_match_failure",
            FailureKind::TargetExtractionFailure => "target_extraction_failure",
            FailureKind::AttributeAccessFailure => "attribute_access_failure",
            FailureKind::ConfigurationInvalid => "configuration_invalid",
            FailureKind::DegradedMode => "degraded_mode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_permission_and_availability_are_fatal() {
        assert!(ProviderError::PermissionDenied("untrusted".into()).is_fatal());
        assert!(ProviderError::ApiUnavailable("no server".into()).is_fatal());
        assert!(!ProviderError::InvalidElement.is_fatal());
        assert!(!ProviderError::CannotComplete("busy".into()).is_fatal());
        assert!(!ProviderError::AttributeUnsupported("AXValue".into()).is_fatal());
    }

    #[test]
    fn detection_error_maps_fatal_variants_only() {
        assert_eq!(
            DetectionError::from_provider(&ProviderError::PermissionDenied("x".into())),
            Some(DetectionError::PermissionDenied("x".into()))
        );
        assert_eq!(DetectionError::from_provider(&ProviderError::InvalidElement), None);
    }
}
