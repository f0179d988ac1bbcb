//! End-to-end runner behavior over the stub executor and a scripted
//! frame bridge.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use element_locator::{CompositeHit, FrameBridge, LocatorError, RefHandle};
use executor_api::{StubExecutor, ToolName};
use flow_model::{
    CaseBranch, ClickConfig, Edge, ExecuteFlowConfig, Flow, ForeachConfig, IfConfig,
    NavigateConfig, Node, NodeConfig, RetrySpec, ScriptConfig, Subgraph, TargetLocator,
    WhileConfig,
};
use flow_runner::{EngineLimits, FlowRunner, RunResult};
use flow_store::InMemoryFlowStore;
use node_registry::{ExecCtx, Registry, RunStatus};
use reflow_core_types::{FrameId, RunId, TabId};
use run_events::{EventBus, EventQuery, InMemoryEventsStore, RunEventKind};

/// Bridge that resolves a fixed selector set and records script
/// executions, including the number of concurrently active ones.
#[derive(Default)]
struct ScriptedBridge {
    css: Mutex<HashMap<String, RefHandle>>,
    script_args: Mutex<Vec<Value>>,
    active: Mutex<usize>,
    max_active: Mutex<usize>,
    script_delay_ms: u64,
}

impl ScriptedBridge {
    fn with_delay(ms: u64) -> Self {
        Self {
            script_delay_ms: ms,
            ..Default::default()
        }
    }

    fn add_css(&self, selector: &str, ref_id: &str) {
        self.css.lock().insert(
            selector.to_string(),
            RefHandle {
                ref_id: ref_id.to_string(),
                center: Some((1.0, 1.0)),
            },
        );
    }

    fn recorded_items(&self) -> Vec<Value> {
        self.script_args
            .lock()
            .iter()
            .map(|arg| arg.get("item").cloned().unwrap_or(Value::Null))
            .collect()
    }
}

#[async_trait]
impl FrameBridge for ScriptedBridge {
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
        _ref_id: &str,
    ) -> Result<Option<RefHandle>, LocatorError> {
        Ok(None)
    }

    async fn query_xpath(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _xpath: &str,
    ) -> Result<Option<RefHandle>, LocatorError> {
        Ok(None)
    }

    async fn query_text(
        &self,
        _tab: TabId,
        _frame: FrameId,
        _text: &str,
        _tag: Option<&str>,
    ) -> Result<Option<RefHandle>, LocatorError> {
        Ok(None)
    }

    async fn bridge_composite(
        &self,
        _tab: TabId,
        _outer: &str,
        _inner: &str,
    ) -> Result<Option<CompositeHit>, LocatorError> {
        Ok(None)
    }

    async fn frame_for_url(
        &self,
        _tab: TabId,
        _url: &str,
    ) -> Result<Option<FrameId>, LocatorError> {
        Ok(None)
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
        arg: Value,
    ) -> Result<Value, LocatorError> {
        {
            let mut active = self.active.lock();
            *active += 1;
            let mut max = self.max_active.lock();
            if *active > *max {
                *max = *active;
            }
        }
        if self.script_delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.script_delay_ms)).await;
        }
        self.script_args.lock().push(arg);
        *self.active.lock() -= 1;
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

struct Harness {
    runner: Arc<FlowRunner>,
    executor: Arc<StubExecutor>,
    bridge: Arc<ScriptedBridge>,
    bus: Arc<EventBus>,
}

fn harness_with(bridge: ScriptedBridge, limits: EngineLimits) -> Harness {
    let executor = Arc::new(StubExecutor::new());
    let bridge = Arc::new(bridge);
    let registry = Arc::new(Registry::new(
        executor.clone(),
        bridge.clone(),
        limits.wait_cap_ms,
    ));
    let bus = Arc::new(EventBus::new(Arc::new(InMemoryEventsStore::new())));
    let store = Arc::new(InMemoryFlowStore::new());
    let runner = FlowRunner::new(registry, bus.clone(), store, limits);
    Harness {
        runner,
        executor,
        bridge,
        bus,
    }
}

fn harness() -> Harness {
    harness_with(ScriptedBridge::default(), EngineLimits::default())
}

fn navigate(id: &str, url: &str) -> Node {
    Node::new(
        id,
        NodeConfig::Navigate(NavigateConfig { url: url.into() }),
    )
}

fn script(id: &str) -> Node {
    Node::new(
        id,
        NodeConfig::Script(ScriptConfig {
            code: "return ctx.item".into(),
            run_after: false,
            save_as: None,
        }),
    )
}

fn chain(nodes: &[Node]) -> Vec<Edge> {
    flow_model::rechain(nodes)
}

fn linear_flow(name: &str, nodes: Vec<Node>) -> Flow {
    let mut flow = Flow::new(name);
    flow.edges = chain(&nodes);
    flow.nodes = nodes;
    flow
}

async fn run(harness: &Harness, flow: Flow) -> (RunResult, Arc<ExecCtx>) {
    let ctx = Arc::new(ExecCtx::new(RunId::new(), flow.id.clone(), TabId(1)));
    let result = harness
        .runner
        .clone()
        .run_flow(Arc::new(flow), ctx.clone())
        .await;
    (result, ctx)
}

#[tokio::test]
async fn linear_flow_publishes_ordered_lifecycle_events() {
    let h = harness();
    let flow = linear_flow(
        "linear",
        vec![navigate("s1", "https://a"), navigate("s2", "https://b")],
    );

    let (result, ctx) = run(&h, flow).await;
    assert!(result.success);
    assert_eq!(result.summary.attempted, 2);
    assert_eq!(result.summary.succeeded, 2);
    assert_eq!(result.summary.failed, 0);

    let events = h
        .bus
        .list(EventQuery::for_run(ctx.run_id.clone()))
        .await
        .unwrap();
    let kinds: Vec<String> = events.iter().map(|e| e.kind.as_name()).collect();
    assert_eq!(
        kinds,
        [
            "run.started",
            "node.started",
            "node.succeeded",
            "node.started",
            "node.succeeded",
            "run.succeeded"
        ]
    );
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64 + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn retry_policy_produces_three_attempts_with_backoff() {
    let h = harness();
    h.bridge.add_css("#go", "el-1");
    h.executor.fail_next(ToolName::Click, "element not visible", 3);

    let mut node = Node::new(
        "s1",
        NodeConfig::Click(ClickConfig {
            target: TargetLocator::from_css("#go"),
            wait_after: None,
        }),
    );
    node.retry = Some(RetrySpec {
        count: 2,
        interval_ms: 100,
        backoff: flow_model::Backoff::Exp,
    });
    let flow = linear_flow("retry", vec![node]);

    let before = tokio::time::Instant::now();
    let (result, _ctx) = run(&h, flow).await;
    let elapsed = before.elapsed();

    // 1 attempt + 2 retries
    assert_eq!(h.executor.calls_for(ToolName::Click), 3);
    // ~100ms + ~200ms of backoff under virtual time
    assert!(elapsed >= tokio::time::Duration::from_millis(300));

    assert!(!result.success);
    assert_eq!(result.summary.failed, 1);
    let retrying: Vec<_> = result
        .logs
        .iter()
        .filter(|e| e.status == RunStatus::Retrying)
        .collect();
    assert_eq!(retrying.len(), 2);
    let failed = result
        .logs
        .iter()
        .find(|e| e.status == RunStatus::Failed)
        .unwrap();
    assert!(failed.message.contains("element not visible"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn foreach_fan_out_is_bounded_and_processes_each_item_once() {
    let limits = EngineLimits {
        max_foreach_concurrency: 2,
        ..Default::default()
    };
    let h = harness_with(ScriptedBridge::with_delay(20), limits);

    let mut flow = linear_flow(
        "fanout",
        vec![Node::new(
            "loop",
            NodeConfig::Foreach(ForeachConfig {
                list_var: "items".into(),
                item_var: "item".into(),
                subflow_id: "per-item".into(),
                concurrency: 1000,
            }),
        )],
    );
    let sub_nodes = vec![script("work")];
    flow.subflows.insert(
        "per-item".into(),
        Subgraph {
            edges: chain(&sub_nodes),
            nodes: sub_nodes,
        },
    );

    let ctx = Arc::new(ExecCtx::new(RunId::new(), flow.id.clone(), TabId(1)));
    ctx.set_var("items", json!(["a", "b", "c", "d", "e"]));
    let result = h.runner.clone().run_flow(Arc::new(flow), ctx).await;
    assert!(result.success, "error: {:?}", result.error);

    let mut items = h.bridge.recorded_items();
    assert_eq!(items.len(), 5);
    items.sort_by_key(|v| v.as_str().unwrap_or("").to_string());
    assert_eq!(items, vec![json!("a"), json!("b"), json!("c"), json!("d"), json!("e")]);

    // requested 1000, launched at most the engine bound
    assert!(*h.bridge.max_active.lock() <= 2);
}

#[tokio::test]
async fn foreach_sequential_preserves_item_order() {
    let h = harness();
    let mut flow = linear_flow(
        "seq",
        vec![Node::new(
            "loop",
            NodeConfig::Foreach(ForeachConfig {
                list_var: "items".into(),
                item_var: "item".into(),
                subflow_id: "per-item".into(),
                concurrency: 1,
            }),
        )],
    );
    let sub_nodes = vec![script("work")];
    flow.subflows.insert(
        "per-item".into(),
        Subgraph {
            edges: chain(&sub_nodes),
            nodes: sub_nodes,
        },
    );

    let ctx = Arc::new(ExecCtx::new(RunId::new(), flow.id.clone(), TabId(1)));
    ctx.set_var("items", json!([1, 2, 3]));
    let result = h.runner.clone().run_flow(Arc::new(flow), ctx.clone()).await;
    assert!(result.success);
    assert_eq!(h.bridge.recorded_items(), vec![json!(1), json!(2), json!(3)]);
    // sequential iteration writes the item variable into the shared scope
    assert_eq!(ctx.get_var("item"), Some(json!(3)));
}

#[tokio::test]
async fn parallel_branch_writes_do_not_merge_back() {
    let h = harness();
    let mut flow = linear_flow(
        "branch-scope",
        vec![Node::new(
            "loop",
            NodeConfig::Foreach(ForeachConfig {
                list_var: "items".into(),
                item_var: "item".into(),
                subflow_id: "per-item".into(),
                concurrency: 2,
            }),
        )],
    );
    let sub_nodes = vec![Node::new(
        "work",
        NodeConfig::Script(ScriptConfig {
            code: "return 'written'".into(),
            run_after: false,
            save_as: Some("note".into()),
        }),
    )];
    flow.subflows.insert(
        "per-item".into(),
        Subgraph {
            edges: chain(&sub_nodes),
            nodes: sub_nodes,
        },
    );

    let ctx = Arc::new(ExecCtx::new(RunId::new(), flow.id.clone(), TabId(1)));
    ctx.set_var("items", json!(["x", "y"]));
    let result = h.runner.clone().run_flow(Arc::new(flow), ctx.clone()).await;
    assert!(result.success);

    // the branch-scoped save_as write stays in the branch clone
    assert_eq!(ctx.get_var("note"), None);
    assert_eq!(ctx.get_var("item"), None);
}

#[tokio::test]
async fn while_always_true_stops_at_iteration_cap_without_error() {
    let h = harness();
    let mut flow = linear_flow(
        "while-cap",
        vec![Node::new(
            "loop",
            NodeConfig::While(WhileConfig {
                condition: "true".into(),
                subflow_id: "body".into(),
                max_iterations: 10,
            }),
        )],
    );
    let sub_nodes = vec![script("tick")];
    flow.subflows.insert(
        "body".into(),
        Subgraph {
            edges: chain(&sub_nodes),
            nodes: sub_nodes,
        },
    );

    let (result, _ctx) = run(&h, flow).await;
    assert!(result.success, "cap must not be an error: {:?}", result.error);
    assert_eq!(h.bridge.script_args.lock().len(), 10);
}

#[tokio::test]
async fn branch_dispatch_follows_labelled_edge() {
    let h = harness();
    let mut flow = Flow::new("branching");
    flow.nodes = vec![
        Node::new(
            "cond",
            NodeConfig::If(IfConfig {
                branches: Some(vec![CaseBranch {
                    label: "case:skip-ahead".into(),
                    expression: "mode == 'fast'".into(),
                }]),
                else_label: None,
                ..Default::default()
            }),
        ),
        navigate("slow", "https://slow"),
        navigate("end", "https://end"),
    ];
    flow.edges = vec![
        Edge::default_edge("e1", "cond", "slow"),
        Edge::default_edge("e2", "slow", "end"),
        Edge {
            id: "e3".into(),
            from: "cond".into(),
            to: "end".into(),
            label: "case:skip-ahead".into(),
        },
    ];

    let ctx = Arc::new(ExecCtx::new(RunId::new(), flow.id.clone(), TabId(1)));
    ctx.set_var("mode", json!("fast"));
    let result = h.runner.clone().run_flow(Arc::new(flow), ctx).await;
    assert!(result.success);

    let urls: Vec<String> = h
        .executor
        .calls()
        .into_iter()
        .filter(|c| c.tool == ToolName::Navigate)
        .map(|c| c.args["url"].as_str().unwrap_or("").to_string())
        .collect();
    assert_eq!(urls, ["https://end"]);
}

#[tokio::test]
async fn execute_flow_recurses_into_named_subflow() {
    let h = harness();
    let mut flow = linear_flow(
        "outer",
        vec![Node::new(
            "call",
            NodeConfig::ExecuteFlow(ExecuteFlowConfig {
                subflow_id: Some("inner".into()),
                flow_id: None,
            }),
        )],
    );
    let sub_nodes = vec![navigate("inner-nav", "https://inner")];
    flow.subflows.insert(
        "inner".into(),
        Subgraph {
            edges: chain(&sub_nodes),
            nodes: sub_nodes,
        },
    );

    let (result, _ctx) = run(&h, flow).await;
    assert!(result.success);
    assert_eq!(h.executor.calls_for(ToolName::Navigate), 1);
}

#[tokio::test]
async fn canceled_run_reports_canceled_event() {
    let h = harness();
    let flow = linear_flow("cancel", vec![navigate("s1", "https://a")]);
    let ctx = Arc::new(ExecCtx::new(RunId::new(), flow.id.clone(), TabId(1)));
    ctx.flags.cancel();

    let result = h.runner.clone().run_flow(Arc::new(flow), ctx.clone()).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("run canceled"));

    let events = h
        .bus
        .list(EventQuery::for_run(ctx.run_id.clone()))
        .await
        .unwrap();
    assert_eq!(
        events.last().unwrap().kind,
        RunEventKind::RunCanceled
    );
}

#[tokio::test]
async fn unknown_subflow_fails_the_run() {
    let h = harness();
    let flow = linear_flow(
        "missing-sub",
        vec![Node::new(
            "call",
            NodeConfig::ExecuteFlow(ExecuteFlowConfig {
                subflow_id: Some("ghost".into()),
                flow_id: None,
            }),
        )],
    );
    let (result, _ctx) = run(&h, flow).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("ghost"));
}
