pub mod fault;
pub mod invariants;
pub mod ops;
pub mod oracle;
pub mod recording;
pub mod sim;

pub use fault::{FaultConfig, FaultStats, FaultyGateway};
pub use recording::{ModuleLayout, RecordingPlan, SimRecording};
pub use sim::{Sim, SimSummary};
