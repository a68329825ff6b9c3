//! Reference model of what a `ThreadFront` should report after each operation.

use std::collections::HashSet;

use rewind_core::protocol::{Location, MappedLocation, SourceId};
use rewind_core::{ExecutionPoint, MemoryGateway, Step};
use rewind_thread::ThreadFront;

use crate::ops::Op;
use crate::recording::SimRecording;

/// Predicted result of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expected {
    Landed(ExecutionPoint),
    Stayed,
    Done,
    Rejected,
    Location(Location),
    Pause {
        point: ExecutionPoint,
        first_frame: Option<MappedLocation>,
    },
}

pub struct Oracle {
    recording: SimRecording,
    current: ExecutionPoint,
    has_frames: bool,
    breakpoints: Vec<Location>,
    preferred: HashSet<SourceId>,
}

impl Oracle {
    /// A model paused at the recording's endpoint, as after the initial warp.
    pub fn new(recording: SimRecording) -> Self {
        let current = recording.recording.endpoint().point;
        Oracle {
            recording,
            current,
            has_frames: false,
            breakpoints: Vec::new(),
            preferred: HashSet::new(),
        }
    }

    pub fn current_point(&self) -> &ExecutionPoint {
        &self.current
    }

    /// Installed breakpoint locations, deduplicated and sorted.
    pub fn breakpoints(&self) -> Vec<Location> {
        sorted(self.breakpoints.clone())
    }

    pub fn recording(&self) -> &SimRecording {
        &self.recording
    }

    fn step_at(&self, point: &ExecutionPoint) -> Option<&Step> {
        self.recording.recording.steps.iter().find(|s| &s.point == point)
    }

    /// Predict the outcome of `op` without changing the model.
    pub fn predict(&self, op: &Op) -> Expected {
        match op {
            Op::Resume(kind) => match self
                .recording
                .recording
                .target(*kind, &self.current, &self.breakpoints)
            {
                Some(target) => Expected::Landed(target.point),
                None => Expected::Stayed,
            },
            Op::TimeWarp { step } => match self.recording.recording.steps.get(*step) {
                Some(step) => Expected::Landed(step.point.clone()),
                None => Expected::Stayed,
            },
            Op::SetBreakpoint { .. } | Op::RemoveBreakpoint { .. } => Expected::Done,
            Op::PreferSource { source_id, .. } => {
                if self.recording.is_original(source_id) {
                    Expected::Rejected
                } else {
                    Expected::Done
                }
            }
            Op::PreferredLocation { location } => Expected::Location(self.preferred_location(location)),
            Op::InspectPause => Expected::Pause {
                point: self.current.clone(),
                first_frame: if self.has_frames {
                    self.step_at(&self.current).map(|s| s.location.clone())
                } else {
                    None
                },
            },
        }
    }

    /// Apply the state change of `op`, given the outcome that was predicted.
    pub fn commit(&mut self, op: &Op, expected: &Expected) {
        match (op, expected) {
            (Op::Resume(_) | Op::TimeWarp { .. }, Expected::Landed(point)) => {
                self.current = point.clone();
                self.has_frames = self.step_at(point).is_some_and(|s| !s.location.is_empty());
            }
            (Op::SetBreakpoint { location }, _) => {
                for source_id in self.recording.corresponding(&location.source_id) {
                    let variant = Location::new(source_id, location.line, location.column);
                    if !self.breakpoints.contains(&variant) {
                        self.breakpoints.push(variant);
                    }
                }
            }
            (Op::RemoveBreakpoint { location }, _) => {
                let ids = self.recording.corresponding(&location.source_id);
                self.breakpoints.retain(|bp| {
                    !(ids.contains(&bp.source_id)
                        && bp.line == location.line
                        && bp.column == location.column)
                });
            }
            (Op::PreferSource { source_id, value }, Expected::Done) => {
                if *value {
                    self.preferred.insert(source_id.clone());
                } else {
                    self.preferred.remove(source_id);
                }
            }
            _ => {}
        }
    }

    /// Adopt the observed state after a step whose outcome cannot be predicted.
    pub fn resync(&mut self, front: &ThreadFront, gateway: &MemoryGateway) {
        self.adopt_position(front);
        self.adopt_breakpoints(gateway);
    }

    pub fn adopt_position(&mut self, front: &ThreadFront) {
        self.current = front.current_point();
        self.has_frames = front.current_point_has_frames();
    }

    /// Take breakpoints from the backend, which is what resume targets are
    /// computed from.
    pub fn adopt_breakpoints(&mut self, gateway: &MemoryGateway) {
        self.breakpoints = sorted(gateway.breakpoints().into_values().collect());
    }

    /// The location shown for `location`: the original unless its generated
    /// source is preferred, normalised to the first corresponding source.
    fn preferred_location(&self, location: &Location) -> Location {
        let mapped = self
            .recording
            .recording
            .steps
            .iter()
            .find(|s| s.location.contains(location))
            .map(|s| s.location.clone())
            .unwrap_or_else(|| vec![location.clone()]);
        let original = mapped.iter().find(|l| self.recording.is_original(&l.source_id));
        let generated = mapped.iter().find(|l| !self.recording.is_original(&l.source_id));
        let chosen = match (generated, original) {
            (Some(g), Some(_)) if self.preferred.contains(&g.source_id) => g,
            (_, Some(o)) => o,
            (Some(g), None) => g,
            (None, None) => location,
        };
        let canonical = self
            .recording
            .corresponding(&chosen.source_id)
            .into_iter()
            .next()
            .unwrap_or_else(|| chosen.source_id.clone());
        Location::new(canonical, chosen.line, chosen.column)
    }
}

/// Locations ordered by source, line and column, without duplicates.
pub fn sorted(mut locations: Vec<Location>) -> Vec<Location> {
    locations.sort_by(|a, b| {
        (&a.source_id, a.line, a.column).cmp(&(&b.source_id, b.line, b.column))
    });
    locations.dedup();
    locations
}
