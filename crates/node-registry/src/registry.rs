//! Handler registry and the step execution protocol.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use element_locator::{FrameBridge, Locator};
use executor_api::ActionExecutor;
use flow_expr::ConditionEvaluator;
use flow_model::{Node, NodeKind, ScriptConfig};

use crate::ctx::ExecCtx;
use crate::errors::StepError;
use crate::handlers::{
    AssertHandler, ClickHandler, Deps, DownloadHandler, DragHandler, ExecuteFlowHandler,
    ExtractHandler, FillHandler, ForeachHandler, HttpHandler, IfHandler, KeyHandler,
    LoopElementsHandler, NavigateHandler, ScreenshotHandler, ScriptHandler, ScrollHandler,
    SetAttributeHandler, StepHandler, SwitchFrameHandler, TabsHandler, TriggerEventHandler,
    WaitHandler, WhileHandler,
};
use crate::outcome::StepOutcome;
use crate::template::expand_templates;

/// Node runtime registry: one handler per step kind.
pub struct Registry {
    click: ClickHandler,
    fill: FillHandler,
    navigate: NavigateHandler,
    wait: WaitHandler,
    assert: AssertHandler,
    http: HttpHandler,
    extract: ExtractHandler,
    script: ScriptHandler,
    tabs: TabsHandler,
    scroll: ScrollHandler,
    drag: DragHandler,
    key: KeyHandler,
    r#if: IfHandler,
    foreach: ForeachHandler,
    r#while: WhileHandler,
    execute_flow: ExecuteFlowHandler,
    download: DownloadHandler,
    screenshot: ScreenshotHandler,
    trigger_event: TriggerEventHandler,
    set_attribute: SetAttributeHandler,
    switch_frame: SwitchFrameHandler,
    loop_elements: LoopElementsHandler,

    deps: Arc<Deps>,
}

impl Registry {
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        bridge: Arc<dyn FrameBridge>,
        wait_cap_ms: u64,
    ) -> Self {
        let deps = Arc::new(Deps {
            executor,
            locator: Arc::new(Locator::new(bridge)),
            evaluator: ConditionEvaluator::new(),
            wait_cap_ms,
        });
        Self {
            click: ClickHandler { deps: deps.clone() },
            fill: FillHandler { deps: deps.clone() },
            navigate: NavigateHandler { deps: deps.clone() },
            wait: WaitHandler { deps: deps.clone() },
            assert: AssertHandler { deps: deps.clone() },
            http: HttpHandler { deps: deps.clone() },
            extract: ExtractHandler { deps: deps.clone() },
            script: ScriptHandler { deps: deps.clone() },
            tabs: TabsHandler { deps: deps.clone() },
            scroll: ScrollHandler { deps: deps.clone() },
            drag: DragHandler { deps: deps.clone() },
            key: KeyHandler { deps: deps.clone() },
            r#if: IfHandler { deps: deps.clone() },
            foreach: ForeachHandler,
            r#while: WhileHandler,
            execute_flow: ExecuteFlowHandler,
            download: DownloadHandler { deps: deps.clone() },
            screenshot: ScreenshotHandler { deps: deps.clone() },
            trigger_event: TriggerEventHandler { deps: deps.clone() },
            set_attribute: SetAttributeHandler { deps: deps.clone() },
            switch_frame: SwitchFrameHandler { deps: deps.clone() },
            loop_elements: LoopElementsHandler { deps: deps.clone() },
            deps,
        }
    }

    pub fn locator(&self) -> &Arc<Locator> {
        &self.deps.locator
    }

    pub fn executor(&self) -> &Arc<dyn ActionExecutor> {
        &self.deps.executor
    }

    pub fn evaluator(&self) -> &ConditionEvaluator {
        &self.deps.evaluator
    }

    /// Exhaustive kind → handler mapping: a new step kind does not compile
    /// until it has a handler.
    fn handler_for(&self, kind: NodeKind) -> &dyn StepHandler {
        match kind {
            NodeKind::Click | NodeKind::Dblclick => &self.click,
            NodeKind::Fill => &self.fill,
            NodeKind::Navigate => &self.navigate,
            NodeKind::Wait => &self.wait,
            NodeKind::Assert => &self.assert,
            NodeKind::Http => &self.http,
            NodeKind::Extract => &self.extract,
            NodeKind::Script => &self.script,
            NodeKind::OpenTab | NodeKind::SwitchTab | NodeKind::CloseTab => &self.tabs,
            NodeKind::Scroll => &self.scroll,
            NodeKind::Drag => &self.drag,
            NodeKind::Key => &self.key,
            NodeKind::If => &self.r#if,
            NodeKind::Foreach => &self.foreach,
            NodeKind::While => &self.r#while,
            NodeKind::ExecuteFlow => &self.execute_flow,
            NodeKind::HandleDownload => &self.download,
            NodeKind::Screenshot => &self.screenshot,
            NodeKind::TriggerEvent => &self.trigger_event,
            NodeKind::SetAttribute => &self.set_attribute,
            NodeKind::SwitchFrame => &self.switch_frame,
            NodeKind::LoopElements => &self.loop_elements,
        }
    }

    /// Execute one step: validate (short-circuiting with every violated
    /// precondition), expand `{var}` templates deep through the config,
    /// then run. Unknown step types cannot reach this point: they fail
    /// flow deserialization with an "unsupported step type" error.
    pub async fn execute_step(
        &self,
        ctx: &ExecCtx,
        node: &Node,
    ) -> Result<StepOutcome, StepError> {
        if ctx.flags.is_terminated() {
            return Err(StepError::Canceled);
        }

        let handler = self.handler_for(node.kind());
        handler.validate(node).into_step_result()?;

        let node = self.expand_node(ctx, node)?;
        debug!(id = %node.id, kind = %node.kind(), "executing step");
        handler.run(ctx, &node).await
    }

    /// Run a deferred "run after" script at the end of the run.
    pub async fn run_deferred_script(
        &self,
        ctx: &ExecCtx,
        config: &ScriptConfig,
    ) -> Result<(), StepError> {
        let arg = Value::Object(ctx.vars_snapshot().into_iter().collect());
        let result = self
            .deps
            .locator
            .bridge()
            .eval_script(ctx.tab(), ctx.frame(), &config.code, arg)
            .await
            .map_err(|e| StepError::Executor(e.to_string()))?;
        if let Some(save_as) = &config.save_as {
            ctx.set_var(save_as.clone(), result);
        }
        Ok(())
    }

    fn expand_node(&self, ctx: &ExecCtx, node: &Node) -> Result<Node, StepError> {
        let vars = ctx.vars_snapshot();
        if vars.is_empty() {
            return Ok(node.clone());
        }
        let value = serde_json::to_value(node)
            .map_err(|e| StepError::Control(format!("step serialization failed: {e}")))?;
        let expanded = expand_templates(&value, &vars);
        serde_json::from_value(expanded).map_err(|e| {
            StepError::Validation(vec![format!(
                "template expansion produced an invalid step: {e}"
            )])
        })
    }
}
