//! Reflow engine facade: wires the recording session, flow runner, stores
//! and event bus together and exposes the recording/replay control
//! surfaces the host (extension background process, CLI) talks to.

pub mod config;
pub mod engine;
pub mod stubs;

pub use config::EngineConfig;
pub use engine::{Engine, OpResult, StopOutcome};

pub use element_locator::FrameBridge;
pub use executor_api::ActionExecutor;
pub use flow_model::Flow;
pub use flow_runner::{EngineLimits, RunResult};
pub use recording_session::{BarrierConfig, CapturedStep, TabChannel};
pub use reflow_core_types::{FlowId, RunId, TabId};
