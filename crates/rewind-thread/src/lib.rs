//! Thread and pause coordination for the rewind time-travel debugger.
//!
//! [`ThreadFront`] is the entry point: one per replay session. It owns the
//! [`SourceRegistry`] and [`PauseRegistry`] and talks to the backend through
//! a [`rewind_core::Gateway`].

pub mod commands;
pub mod logging;
mod pause;
mod sources;
mod thread;

pub use commands::{
    location_key, BreakpointLocation, BreakpointOptions, ClientCommands, EvaluateOutcome,
    LogGroupId, Logpoints,
};
pub use logging::{filter_directives, init_logging};
pub use pause::{Pause, PauseRegistry};
pub use sources::{ChosenSource, SourceRegistry};
pub use thread::{
    AnnotationCallback, ConsoleMessageCallback, EvaluateRequest, EvaluationEvent,
    LoadedRegionsListener, PausedEvent, SourceLocationInfo, ThreadEvent, ThreadEventKind,
    ThreadFront,
};
