//! Step outcomes handed back to the flow runner.

use flow_model::{ExecuteFlowConfig, ScriptConfig};

/// Control directive returned by a loop node instead of completing
/// normally. Directives are additive: kinds this engine does not know are
/// carried as `Other` and interpreted as a no-op, so a flow recorded by a
/// newer engine never hard-fails here.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlDirective {
    Foreach {
        list_var: String,
        item_var: String,
        subflow_id: String,
        concurrency: u32,
    },
    While {
        condition: String,
        subflow_id: String,
        max_iterations: u32,
    },
    Other(String),
}

/// What a handler's `run` produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Step completed; the runner logs success.
    Done,
    /// Step completed with a locally recovered failure; the handler
    /// already wrote the warning entry, the runner must not double-log.
    Warned,
    /// Conditional decision: follow the edge carrying this label.
    Branch(String),
    /// Hand control to the control-flow runner.
    Control(ControlDirective),
    /// Recurse into a named subflow or another persisted flow.
    RunSubflow(ExecuteFlowConfig),
    /// Script marked "run after": queue instead of executing inline.
    DeferAfterScript(ScriptConfig),
}
