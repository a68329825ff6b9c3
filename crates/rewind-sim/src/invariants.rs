use std::sync::Arc;

use rewind_core::MemoryGateway;
use rewind_thread::ThreadFront;

use crate::ops::{describe, Op};
use crate::oracle::{sorted, Oracle};
use crate::recording::SimRecording;

/// A violation detected during simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub step: usize,
    pub invariant: String,
    pub details: String,
}

impl Violation {
    fn new(step: usize, invariant: &str, details: String) -> Self {
        Violation {
            step,
            invariant: invariant.to_string(),
            details,
        }
    }
}

/// Resume/pause events observed during one step.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Resumed,
    Paused(rewind_core::ExecutionPoint),
}

/// Run per-step invariant checks.
///
/// `strict` compares breakpoints against the oracle as well; it is turned
/// off while faults are being injected, since a failed fan-out leaves the
/// oracle resynchronised from the backend instead.
pub fn check_step_invariants(
    step: usize,
    front: &ThreadFront,
    gateway: &MemoryGateway,
    oracle: &Oracle,
    strict: bool,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    // 1. The front and the oracle agree on where execution is.
    if &front.current_point() != oracle.current_point() {
        violations.push(Violation::new(
            step,
            "current-point",
            format!(
                "front is at {} but the oracle expects {}",
                front.current_point(),
                oracle.current_point()
            ),
        ));
    }

    // 2. Every breakpoint the front believes installed exists remotely.
    let remote = gateway.breakpoints();
    for (id, location) in front.breakpoints() {
        match remote.get(&id) {
            Some(installed) if *installed == location => {}
            Some(installed) => violations.push(Violation::new(
                step,
                "breakpoint-installed",
                format!(
                    "breakpoint {id} is {} locally but {} remotely",
                    describe(&location),
                    describe(installed)
                ),
            )),
            None => violations.push(Violation::new(
                step,
                "breakpoint-installed",
                format!("breakpoint {id} at {} is not installed", describe(&location)),
            )),
        }
    }

    // 3. Without faults, the front, the backend and the oracle hold the same set.
    if strict {
        let local = sorted(front.breakpoints().into_values().collect());
        let remote = sorted(remote.into_values().collect());
        let expected = oracle.breakpoints();
        if local != expected || remote != expected {
            violations.push(Violation::new(
                step,
                "breakpoints-match",
                format!(
                    "local {:?}, remote {:?}, expected {:?}",
                    local.iter().map(describe).collect::<Vec<_>>(),
                    remote.iter().map(describe).collect::<Vec<_>>(),
                    expected.iter().map(describe).collect::<Vec<_>>()
                ),
            ));
        }
    }

    // 4. A point has one pause object, and it is the current pause.
    let point = front.current_point();
    if let Some(registered) = front.pauses().get(&point) {
        if !Arc::ptr_eq(&registered, &front.current_pause()) {
            violations.push(Violation::new(
                step,
                "pause-identity",
                format!("current pause at {point} is not the registered pause"),
            ));
        }
    }

    violations
}

/// Check the resume/pause events one operation produced.
///
/// A resume emits exactly `Resumed` then `Paused` at the new current point,
/// a time warp emits only `Paused`, and nothing else moves the point.
pub fn check_events(
    step: usize,
    op: &Op,
    events: &[ObservedEvent],
    current: &rewind_core::ExecutionPoint,
) -> Option<Violation> {
    let paused = ObservedEvent::Paused(current.clone());
    let expected: Vec<ObservedEvent> = match op {
        Op::Resume(_) => vec![ObservedEvent::Resumed, paused],
        Op::TimeWarp { .. } => vec![paused],
        _ => Vec::new(),
    };
    (events != expected.as_slice()).then(|| {
        Violation::new(
            step,
            "event-order",
            format!("{} produced {:?}, expected {:?}", op.summary(), events, expected),
        )
    })
}

/// Final checks over the source registry after a run.
pub fn check_final_consistency(front: &ThreadFront, recording: &SimRecording) -> Vec<Violation> {
    let mut violations = Vec::new();
    let sources = front.sources();
    for source_id in recording.all_source_ids() {
        let group = match sources.corresponding_source_ids(&source_id) {
            Ok(group) => group,
            Err(err) => {
                violations.push(Violation::new(
                    usize::MAX,
                    "corresponding-ready",
                    format!("{source_id}: {err}"),
                ));
                continue;
            }
        };
        if group != recording.corresponding(&source_id) {
            violations.push(Violation::new(
                usize::MAX,
                "corresponding-layout",
                format!(
                    "{source_id} corresponds to {group:?}, expected {:?}",
                    recording.corresponding(&source_id)
                ),
            ));
        }
        for member in &group {
            match sources.corresponding_source_ids(member) {
                Ok(other) if other == group => {}
                other => violations.push(Violation::new(
                    usize::MAX,
                    "corresponding-symmetric",
                    format!("{source_id} -> {group:?} but {member} -> {other:?}"),
                )),
            }
        }
    }
    violations
}
