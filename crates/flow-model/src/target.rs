//! Target locators: how a recorded step re-finds its element.

use serde::{Deserialize, Serialize};

/// Candidate selector kinds, in decreasing stability.
///
/// Text candidates are intentionally last: textual matches are the least
/// stable across DOM changes and are only consulted once everything else
/// has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    Css,
    Attr,
    Aria,
    Xpath,
    Text,
}

impl CandidateKind {
    pub fn name(&self) -> &'static str {
        match self {
            CandidateKind::Css => "css",
            CandidateKind::Attr => "attr",
            CandidateKind::Aria => "aria",
            CandidateKind::Xpath => "xpath",
            CandidateKind::Text => "text",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, CandidateKind::Text)
    }
}

/// One ranked selector alternative for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorCandidate {
    #[serde(rename = "type")]
    pub kind: CandidateKind,
    pub value: String,
}

impl SelectorCandidate {
    pub fn new(kind: CandidateKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Abstract element reference recorded with a step.
///
/// `ref_id` is an opaque session-scoped handle from a prior resolution and
/// is only valid within the same page lifecycle. `candidates` is the ranked
/// fallback list; `selector` is an optional primary CSS fast path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetLocator {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,

    #[serde(default)]
    pub candidates: Vec<SelectorCandidate>,

    /// Primary selector fast path, treated as CSS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Tag hint used to narrow text matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl TargetLocator {
    pub fn from_css(selector: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            ..Default::default()
        }
    }

    /// Declared kind of the highest-ranked candidate, used to detect
    /// selector-fallback degradation.
    pub fn primary_kind(&self) -> Option<CandidateKind> {
        if self.selector.is_some() {
            return Some(CandidateKind::Css);
        }
        self.candidates.first().map(|c| c.kind)
    }

    pub fn is_empty(&self) -> bool {
        self.ref_id.is_none() && self.candidates.is_empty() && self.selector.is_none()
    }
}

/// Separator marking a composite cross-frame selector. The left side is
/// queried in the top frame and bridges into the child frame on the right.
pub const FRAME_SEPARATOR: &str = "|>";

/// Split a composite selector into (outer frame selector, inner selector).
pub fn split_composite(selector: &str) -> Option<(&str, &str)> {
    selector
        .split_once(FRAME_SEPARATOR)
        .map(|(outer, inner)| (outer.trim(), inner.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_kind_prefers_fast_path() {
        let target = TargetLocator {
            selector: Some("#submit".into()),
            candidates: vec![SelectorCandidate::new(CandidateKind::Aria, "button[name=Go]")],
            ..Default::default()
        };
        assert_eq!(target.primary_kind(), Some(CandidateKind::Css));
    }

    #[test]
    fn composite_selector_splits_on_separator() {
        let (outer, inner) = split_composite("iframe#checkout |> button.pay").unwrap();
        assert_eq!(outer, "iframe#checkout");
        assert_eq!(inner, "button.pay");
        assert!(split_composite("button.pay").is_none());
    }
}
