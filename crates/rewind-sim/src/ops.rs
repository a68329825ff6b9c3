use rand::seq::SliceRandom;
use rand::Rng;
use rewind_core::protocol::{Location, SourceId, TargetKind};

use crate::recording::SimRecording;

/// An operation the simulation can perform against a `ThreadFront`.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Resume(TargetKind),
    /// Warp to the step at this index.
    TimeWarp { step: usize },
    SetBreakpoint { location: Location },
    RemoveBreakpoint { location: Location },
    PreferSource { source_id: SourceId, value: bool },
    /// Preferred location of a step's generated location.
    PreferredLocation { location: Location },
    InspectPause,
}

impl Op {
    pub fn summary(&self) -> String {
        match self {
            Op::Resume(kind) => format!("{kind:?}"),
            Op::TimeWarp { step } => format!("TimeWarp(step {step})"),
            Op::SetBreakpoint { location } => format!("SetBreakpoint({})", describe(location)),
            Op::RemoveBreakpoint { location } => format!("RemoveBreakpoint({})", describe(location)),
            Op::PreferSource { source_id, value } => format!("PreferSource({source_id}, {value})"),
            Op::PreferredLocation { location } => format!("PreferredLocation({})", describe(location)),
            Op::InspectPause => "InspectPause".to_string(),
        }
    }

    /// Whether the operation moves the current point.
    pub fn is_resume(&self) -> bool {
        matches!(self, Op::Resume(_))
    }
}

pub fn describe(location: &Location) -> String {
    format!("{}:{}:{}", location.source_id, location.line, location.column)
}

/// Generate a random operation.
///
/// Breakpoint and location operations draw from locations the recording
/// actually executes so resumes have something to stop at.
pub fn generate<R: Rng>(rng: &mut R, recording: &SimRecording, installed: &[Location]) -> Op {
    let steps = &recording.recording.steps;
    let roll = rng.gen_range(0..100);
    match roll {
        0..=39 => Op::Resume(*TargetKind::ALL.choose(rng).unwrap_or(&TargetKind::Resume)),
        40..=49 => Op::TimeWarp {
            step: rng.gen_range(0..steps.len().max(1)),
        },
        50..=64 => Op::SetBreakpoint {
            location: random_location(rng, recording),
        },
        65..=74 => match installed.choose(rng) {
            Some(location) => Op::RemoveBreakpoint {
                location: location.clone(),
            },
            None => Op::RemoveBreakpoint {
                location: random_location(rng, recording),
            },
        },
        75..=82 => {
            let mut ids = recording.all_source_ids();
            ids.sort();
            let source_id = ids
                .choose(rng)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            Op::PreferSource {
                source_id,
                value: rng.gen_bool(0.5),
            }
        }
        83..=91 => match steps.choose(rng).and_then(|step| step.location.first()) {
            Some(location) => Op::PreferredLocation {
                location: location.clone(),
            },
            None => Op::InspectPause,
        },
        _ => Op::InspectPause,
    }
}

fn random_location<R: Rng>(rng: &mut R, recording: &SimRecording) -> Location {
    let steps = &recording.recording.steps;
    let Some(step) = steps.choose(rng) else {
        return Location::new("unknown", 1, 0);
    };
    // Originals are breakable too.
    let index = rng.gen_range(0..step.location.len().max(1));
    step.location
        .get(index)
        .cloned()
        .unwrap_or_else(|| Location::new("unknown", 1, 0))
}
