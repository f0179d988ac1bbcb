//! Recording session management: the finite-state machine that turns
//! captured browser steps into a flow DAG, and the multi-frame stop
//! barrier that drains in-flight captures before a recording is finalized.

mod barrier;
mod channel;
mod errors;
mod session;

pub use barrier::BarrierConfig;
pub use channel::{ControlMessage, TabChannel};
pub use errors::SessionError;
pub use session::{CapturedStep, RecordingSession, RecordingState};
