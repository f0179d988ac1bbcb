//! Resolution results and fallback provenance.

use serde::{Deserialize, Serialize};

use flow_model::{CandidateKind, TargetLocator};
use reflow_core_types::FrameId;

/// A successful element resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolved {
    /// Opaque session-scoped element handle.
    pub ref_id: String,

    /// Viewport center of the element, when the bridge reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<(f64, f64)>,

    /// Candidate kind that produced the hit.
    pub resolved_by: CandidateKind,

    /// Frame the element lives in.
    pub frame_id: FrameId,
}

/// Caller-visible record of selector degradation: the first-ranked
/// candidate kind failed and a lower tier resolved instead. A recorded
/// selector that keeps falling back should be reviewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackReport {
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<CandidateKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_to: Option<CandidateKind>,
}

impl FallbackReport {
    pub fn none() -> Self {
        Self {
            fallback_used: false,
            fallback_from: None,
            fallback_to: None,
        }
    }

    /// Compare the resolution against the target's declared first choice.
    pub fn from_resolution(target: &TargetLocator, resolved: &Resolved) -> Self {
        match target.primary_kind() {
            Some(declared) if declared != resolved.resolved_by => Self {
                fallback_used: true,
                fallback_from: Some(declared),
                fallback_to: Some(resolved.resolved_by),
            },
            _ => Self::none(),
        }
    }
}
