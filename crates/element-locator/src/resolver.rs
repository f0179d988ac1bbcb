//! Tiered resolution with fallback provenance.

use std::sync::Arc;

use tracing::{debug, warn};

use flow_model::{split_composite, CandidateKind, TargetLocator};
use reflow_core_types::{FrameId, TabId};

use crate::bridge::{FrameBridge, RefHandle};
use crate::types::Resolved;

/// Element locator over a frame bridge.
///
/// Resolution order, first success wins with no backtracking:
/// 1. the primary `selector` fast path, treated as CSS;
/// 2. non-text candidates in listed priority (css/attr direct, aria
///    expanded per role, xpath via the injected helper);
/// 3. text candidates last, optionally narrowed by tag;
/// 4. the stale-`ref` fallback, valid only within the same page lifecycle.
pub struct Locator {
    bridge: Arc<dyn FrameBridge>,
}

impl Locator {
    pub fn new(bridge: Arc<dyn FrameBridge>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Arc<dyn FrameBridge> {
        &self.bridge
    }

    /// Resolve a target to a live element reference. `None` means no tier
    /// matched; callers turn that into a typed step failure.
    pub async fn locate(
        &self,
        tab: TabId,
        target: &TargetLocator,
        frame: Option<FrameId>,
    ) -> Option<Resolved> {
        let frame = frame.unwrap_or(FrameId::MAIN);

        if let Some(selector) = &target.selector {
            if let Some(hit) = self.resolve_css(tab, frame, selector).await {
                debug!(selector, "resolved via primary selector");
                return Some(hit);
            }
        }

        for candidate in target.candidates.iter().filter(|c| !c.kind.is_text()) {
            let hit = match candidate.kind {
                CandidateKind::Css | CandidateKind::Attr => {
                    self.resolve_css(tab, frame, &candidate.value)
                        .await
                        .map(|r| r.with_kind(candidate.kind))
                }
                CandidateKind::Aria => self.resolve_aria(tab, frame, &candidate.value).await,
                CandidateKind::Xpath => self.resolve_xpath(tab, frame, &candidate.value).await,
                CandidateKind::Text => None,
            };
            if let Some(resolved) = hit {
                debug!(kind = candidate.kind.name(), "candidate resolved");
                return Some(resolved);
            }
        }

        for candidate in target.candidates.iter().filter(|c| c.kind.is_text()) {
            match self
                .bridge
                .query_text(tab, frame, &candidate.value, target.tag.as_deref())
                .await
            {
                Ok(Some(handle)) => {
                    debug!(text = %candidate.value, "resolved via text match");
                    return Some(resolved(handle, CandidateKind::Text, frame));
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "text query failed"),
            }
        }

        if let Some(ref_id) = &target.ref_id {
            match self.bridge.resolve_ref(tab, frame, ref_id).await {
                Ok(Some(handle)) => {
                    debug!(ref_id, "resolved via stale ref");
                    // Provenance stays at the declared primary kind's tier
                    // boundary: a ref re-hit is reported as css so callers
                    // still see a concrete kind.
                    return Some(resolved(handle, CandidateKind::Css, frame));
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "ref re-resolution failed"),
            }
        }

        None
    }

    async fn resolve_css(&self, tab: TabId, frame: FrameId, selector: &str) -> Option<Resolved> {
        if let Some((outer, inner)) = split_composite(selector) {
            return self.resolve_composite(tab, outer, inner).await;
        }
        match self.bridge.ensure_ref_for_selector(tab, frame, selector).await {
            Ok(Some(handle)) => Some(resolved(handle, CandidateKind::Css, frame)),
            Ok(None) => None,
            Err(err) => {
                warn!(%err, selector, "css query failed");
                None
            }
        }
    }

    /// Composite selectors are always queried from the top frame, which
    /// bridges into the child document and reports its URL.
    async fn resolve_composite(&self, tab: TabId, outer: &str, inner: &str) -> Option<Resolved> {
        match self.bridge.bridge_composite(tab, outer, inner).await {
            Ok(Some(hit)) => {
                let frame = match self.bridge.frame_for_url(tab, &hit.child_url).await {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        warn!(url = %hit.child_url, "no frame mapped for child url");
                        FrameId::MAIN
                    }
                    Err(err) => {
                        warn!(%err, "frame lookup failed");
                        FrameId::MAIN
                    }
                };
                Some(resolved(hit.handle, CandidateKind::Css, frame))
            }
            Ok(None) => None,
            Err(err) => {
                warn!(%err, outer, "composite bridge failed");
                None
            }
        }
    }

    async fn resolve_aria(&self, tab: TabId, frame: FrameId, value: &str) -> Option<Resolved> {
        for selector in crate::aria::expand_aria(value) {
            match self
                .bridge
                .ensure_ref_for_selector(tab, frame, &selector)
                .await
            {
                Ok(Some(handle)) => return Some(resolved(handle, CandidateKind::Aria, frame)),
                Ok(None) => {}
                Err(err) => warn!(%err, selector, "aria alternative failed"),
            }
        }
        None
    }

    async fn resolve_xpath(&self, tab: TabId, frame: FrameId, xpath: &str) -> Option<Resolved> {
        match self.bridge.query_xpath(tab, frame, xpath).await {
            Ok(Some(handle)) => Some(resolved(handle, CandidateKind::Xpath, frame)),
            Ok(None) => None,
            Err(err) => {
                warn!(%err, xpath, "xpath query failed");
                None
            }
        }
    }
}

fn resolved(handle: RefHandle, kind: CandidateKind, frame: FrameId) -> Resolved {
    Resolved {
        ref_id: handle.ref_id,
        center: handle.center,
        resolved_by: kind,
        frame_id: frame,
    }
}

impl Resolved {
    fn with_kind(mut self, kind: CandidateKind) -> Self {
        self.resolved_by = kind;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::CompositeHit;
    use crate::errors::LocatorError;
    use crate::types::FallbackReport;
    use async_trait::async_trait;
    use flow_model::SelectorCandidate;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockBridge {
        css: Mutex<HashMap<String, RefHandle>>,
        xpath: Mutex<HashMap<String, RefHandle>>,
        text: Mutex<HashMap<String, RefHandle>>,
        refs: Mutex<HashMap<String, RefHandle>>,
        composite: Mutex<HashMap<String, CompositeHit>>,
        frames: Mutex<HashMap<String, FrameId>>,
    }

    fn handle(id: &str) -> RefHandle {
        RefHandle {
            ref_id: id.to_string(),
            center: Some((10.0, 20.0)),
        }
    }

    #[async_trait]
    impl FrameBridge for MockBridge {
        async fn ensure_ref_for_selector(
            &self,
            _tab: TabId,
            _frame: FrameId,
            selector: &str,
        ) -> Result<Option<RefHandle>, LocatorError> {
            Ok(self.css.lock().get(selector).cloned())
        }

        async fn resolve_ref(
            &self,
            _tab: TabId,
            _frame: FrameId,
            ref_id: &str,
        ) -> Result<Option<RefHandle>, LocatorError> {
            Ok(self.refs.lock().get(ref_id).cloned())
        }

        async fn query_xpath(
            &self,
            _tab: TabId,
            _frame: FrameId,
            xpath: &str,
        ) -> Result<Option<RefHandle>, LocatorError> {
            Ok(self.xpath.lock().get(xpath).cloned())
        }

        async fn query_text(
            &self,
            _tab: TabId,
            _frame: FrameId,
            text: &str,
            _tag: Option<&str>,
        ) -> Result<Option<RefHandle>, LocatorError> {
            Ok(self.text.lock().get(text).cloned())
        }

        async fn bridge_composite(
            &self,
            _tab: TabId,
            outer: &str,
            _inner: &str,
        ) -> Result<Option<CompositeHit>, LocatorError> {
            Ok(self.composite.lock().get(outer).cloned())
        }

        async fn frame_for_url(
            &self,
            _tab: TabId,
            url: &str,
        ) -> Result<Option<FrameId>, LocatorError> {
            Ok(self.frames.lock().get(url).copied())
        }

        async fn read_attribute(
            &self,
            _tab: TabId,
            _frame: FrameId,
            _ref_id: &str,
            _attribute: Option<&str>,
        ) -> Result<Option<String>, LocatorError> {
            Ok(None)
        }

        async fn focus_by_ref(
            &self,
            _tab: TabId,
            _frame: FrameId,
            _ref_id: &str,
        ) -> Result<bool, LocatorError> {
            Ok(true)
        }

        async fn is_file_input(
            &self,
            _tab: TabId,
            _frame: FrameId,
            _ref_id: &str,
        ) -> Result<bool, LocatorError> {
            Ok(false)
        }

        async fn eval_script(
            &self,
            _tab: TabId,
            _frame: FrameId,
            _code: &str,
            _arg: Value,
        ) -> Result<Value, LocatorError> {
            Ok(Value::Null)
        }

        async fn dispatch_event(
            &self,
            _tab: TabId,
            _frame: FrameId,
            _ref_id: &str,
            _event: &str,
        ) -> Result<(), LocatorError> {
            Ok(())
        }

        async fn set_attribute(
            &self,
            _tab: TabId,
            _frame: FrameId,
            _ref_id: &str,
            _name: &str,
            _value: &str,
        ) -> Result<(), LocatorError> {
            Ok(())
        }

        async fn query_all(
            &self,
            _tab: TabId,
            _frame: FrameId,
            _selector: &str,
        ) -> Result<Vec<RefHandle>, LocatorError> {
            Ok(Vec::new())
        }
    }

    fn locator(bridge: MockBridge) -> Locator {
        Locator::new(Arc::new(bridge))
    }

    #[tokio::test]
    async fn fallback_from_css_to_aria_is_reported() {
        let bridge = MockBridge::default();
        bridge.css.lock().insert(
            r#"[role="button"][aria-label="Pay"]"#.to_string(),
            handle("el-7"),
        );

        let target = TargetLocator {
            candidates: vec![
                SelectorCandidate::new(CandidateKind::Css, "#pay-button"),
                SelectorCandidate::new(CandidateKind::Aria, "button[name=Pay]"),
            ],
            ..Default::default()
        };

        let resolved = locator(bridge)
            .locate(TabId(1), &target, None)
            .await
            .expect("aria tier should hit");
        assert_eq!(resolved.resolved_by, CandidateKind::Aria);

        let report = FallbackReport::from_resolution(&target, &resolved);
        assert!(report.fallback_used);
        assert_eq!(report.fallback_from, Some(CandidateKind::Css));
        assert_eq!(report.fallback_to, Some(CandidateKind::Aria));
    }

    #[tokio::test]
    async fn primary_selector_wins_without_fallback() {
        let bridge = MockBridge::default();
        bridge.css.lock().insert("#go".to_string(), handle("el-1"));

        let target = TargetLocator::from_css("#go");
        let resolved = locator(bridge).locate(TabId(1), &target, None).await.unwrap();
        assert_eq!(resolved.resolved_by, CandidateKind::Css);
        assert!(!FallbackReport::from_resolution(&target, &resolved).fallback_used);
    }

    #[tokio::test]
    async fn text_candidates_are_last_resort() {
        let bridge = MockBridge::default();
        bridge.text.lock().insert("Sign in".to_string(), handle("el-2"));
        bridge.xpath.lock().insert(
            "//button[@id='signin']".to_string(),
            handle("el-3"),
        );

        let target = TargetLocator {
            candidates: vec![
                SelectorCandidate::new(CandidateKind::Text, "Sign in"),
                SelectorCandidate::new(CandidateKind::Xpath, "//button[@id='signin']"),
            ],
            tag: Some("button".into()),
            ..Default::default()
        };

        // xpath is listed after text but still tried first
        let resolved = locator(bridge).locate(TabId(1), &target, None).await.unwrap();
        assert_eq!(resolved.resolved_by, CandidateKind::Xpath);
    }

    #[tokio::test]
    async fn stale_ref_is_tried_after_all_candidates() {
        let bridge = MockBridge::default();
        bridge.refs.lock().insert("ref-9".to_string(), handle("ref-9"));

        let target = TargetLocator {
            ref_id: Some("ref-9".into()),
            candidates: vec![SelectorCandidate::new(CandidateKind::Css, "#gone")],
            ..Default::default()
        };

        let resolved = locator(bridge).locate(TabId(1), &target, None).await.unwrap();
        assert_eq!(resolved.ref_id, "ref-9");
    }

    #[tokio::test]
    async fn composite_selector_maps_child_frame() {
        let bridge = MockBridge::default();
        bridge.composite.lock().insert(
            "iframe#checkout".to_string(),
            CompositeHit {
                handle: handle("el-5"),
                child_url: "https://pay.example.com/widget".into(),
            },
        );
        bridge
            .frames
            .lock()
            .insert("https://pay.example.com/widget".to_string(), FrameId(42));

        let target = TargetLocator::from_css("iframe#checkout |> button.pay");
        let resolved = locator(bridge).locate(TabId(1), &target, None).await.unwrap();
        assert_eq!(resolved.frame_id, FrameId(42));
    }

    #[tokio::test]
    async fn exhausted_tiers_return_none() {
        let target = TargetLocator {
            candidates: vec![SelectorCandidate::new(CandidateKind::Css, "#missing")],
            ..Default::default()
        };
        assert!(locator(MockBridge::default())
            .locate(TabId(1), &target, None)
            .await
            .is_none());
    }
}
