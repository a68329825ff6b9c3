use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rewind_config::RewindConfig;
use rewind_core::protocol::{LoadedRegions, Location, MappedLocation, TargetKind};
use rewind_core::{CacheStats, ExecutionPoint, Gateway, MemoryGateway, ThreadError, ThreadResult};
use rewind_thread::{ThreadEvent, ThreadEventKind, ThreadFront};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::fault::{FaultConfig, FaultStats, FaultyGateway};
use crate::invariants::{
    check_events, check_final_consistency, check_step_invariants, ObservedEvent, Violation,
};
use crate::ops::{describe, generate, Op};
use crate::oracle::{Expected, Oracle};
use crate::recording::{RecordingPlan, SimRecording};

/// What an operation actually did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Landed(ExecutionPoint),
    Stayed,
    Done,
    Rejected(String),
    Location(Location),
    Pause {
        point: ExecutionPoint,
        first_frame: Option<MappedLocation>,
    },
    Error(String),
}

/// A single operation/result entry captured during simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimTraceEntry {
    pub step: usize,
    pub op: String,
    pub expected: String,
    pub actual: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SimSummary {
    pub seed: u64,
    pub steps: usize,
    pub concurrent_steps: usize,
    pub violations: usize,
    pub breakpoints: usize,
    pub pauses: usize,
    pub faults: FaultStats,
    pub resume_targets: CacheStats,
}

/// The main simulation harness: one `ThreadFront` driven by seeded random
/// operations and checked against an [`Oracle`].
pub struct Sim {
    pub seed: u64,
    pub gateway: Arc<MemoryGateway>,
    pub faults: Option<Arc<FaultyGateway>>,
    pub front: Arc<ThreadFront>,
    pub oracle: Oracle,
    pub rng: ChaCha8Rng,
    pub step: usize,
    pub violations: Vec<Violation>,
    pub trace: Vec<SimTraceEntry>,
    regions: LoadedRegions,
    events: Arc<Mutex<Vec<ObservedEvent>>>,
    concurrent_steps: usize,
}

impl Sim {
    /// Create a new deterministic simulation with the given seed.
    pub async fn new(seed: u64) -> ThreadResult<Self> {
        Self::new_with_config(seed, RecordingPlan::default(), None).await
    }

    /// Create a new deterministic simulation with fault injection.
    pub async fn new_with_faults(seed: u64, fault_config: FaultConfig) -> ThreadResult<Self> {
        Self::new_with_config(seed, RecordingPlan::default(), Some(fault_config)).await
    }

    pub async fn new_with_config(
        seed: u64,
        plan: RecordingPlan,
        fault_config: Option<FaultConfig>,
    ) -> ThreadResult<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let recording = SimRecording::generate(&mut rng, &plan);
        let gateway = Arc::new(MemoryGateway::new(recording.recording.clone()));
        let faults = fault_config.map(|config| {
            let fault_rng = ChaCha8Rng::seed_from_u64(rng.gen());
            Arc::new(FaultyGateway::new(gateway.clone(), fault_rng, config))
        });
        let remote: Arc<dyn Gateway> = match &faults {
            Some(faulty) => faulty.clone(),
            None => gateway.clone(),
        };

        let front = ThreadFront::new(remote, &RewindConfig::default())?;
        front.set_session_id(format!("sim-{seed}")).await?;
        front.find_sources(|_| {}).await?;
        front.warp_to_endpoint().await?;

        let events = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&events);
        front.subscribe(ThreadEventKind::Resumed, move |_| {
            log.lock().push(ObservedEvent::Resumed);
        });
        let log = Arc::clone(&events);
        front.subscribe(ThreadEventKind::Paused, move |event| {
            if let ThreadEvent::Paused(paused) = event {
                log.lock().push(ObservedEvent::Paused(paused.point.clone()));
            }
        });

        info!(
            seed,
            modules = recording.modules.len(),
            steps = recording.recording.steps.len(),
            faults = faults.is_some(),
            "simulation ready"
        );
        Ok(Sim {
            seed,
            regions: LoadedRegions {
                loaded: recording.recording.loaded.clone(),
                ..Default::default()
            },
            gateway,
            faults,
            front,
            oracle: Oracle::new(recording),
            rng,
            step: 0,
            violations: Vec::new(),
            trace: Vec::new(),
            events,
            concurrent_steps: 0,
        })
    }

    /// Run the simulation for the given number of steps.
    pub async fn run(&mut self, steps: usize) -> &[Violation] {
        for _ in 0..steps {
            let op = self.next_op();
            self.step_with(op).await;
        }
        self.finish();
        &self.violations
    }

    /// Run the simulation mixing sequential steps with steps that race a
    /// resume against a breakpoint change.
    pub async fn run_mixed(&mut self, steps: usize, concurrent_ratio: f64) -> &[Violation] {
        let ratio = if concurrent_ratio.is_finite() {
            concurrent_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        for _ in 0..steps {
            if self.rng.gen_bool(ratio) {
                let kind = *TargetKind::ALL
                    .choose(&mut self.rng)
                    .unwrap_or(&TargetKind::Resume);
                let op = match self.next_op() {
                    op @ (Op::SetBreakpoint { .. } | Op::RemoveBreakpoint { .. }) => op,
                    _ => Op::SetBreakpoint {
                        location: self.random_step_location(),
                    },
                };
                self.step_concurrent_with(kind, op).await;
            } else {
                let op = self.next_op();
                self.step_with(op).await;
            }
        }
        self.finish();
        &self.violations
    }

    fn next_op(&mut self) -> Op {
        let installed = self.oracle.breakpoints();
        generate(&mut self.rng, self.oracle.recording(), &installed)
    }

    fn random_step_location(&mut self) -> Location {
        self.oracle
            .recording()
            .recording
            .steps
            .choose(&mut self.rng)
            .and_then(|step| step.location.first().cloned())
            .unwrap_or_else(|| Location::new("unknown", 1, 0))
    }

    fn finish(&mut self) {
        let final_violations = check_final_consistency(&self.front, self.oracle.recording());
        self.violations.extend(final_violations);
        let stats = self.front.resume_target_stats();
        if self.concurrent_steps == 0 && stats.stale_discards > 0 {
            self.violations.push(Violation {
                step: self.step,
                invariant: "no-stale-targets".to_string(),
                details: format!(
                    "{} stale targets discarded in a sequential run",
                    stats.stale_discards
                ),
            });
        }
    }

    fn fault_count(&self) -> usize {
        self.faults.as_ref().map_or(0, |f| f.stats().fault_count)
    }

    fn take_events(&self) -> Vec<ObservedEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Execute a single operation and return any violations found for that step.
    pub async fn step_with(&mut self, op: Op) -> Vec<Violation> {
        let mut new_violations = Vec::new();
        let expected = self.oracle.predict(&op);
        let faults_before = self.fault_count();
        self.take_events();

        let actual = self.execute(&op).await;
        let events = self.take_events();
        let faulted = self.fault_count() > faults_before;

        let note = if faulted {
            debug!(step = self.step, op = %op.summary(), "fault injected, resynchronising oracle");
            self.oracle.resync(&self.front, &self.gateway);
            Some("fault-injected")
        } else {
            self.oracle.commit(&op, &expected);
            if self.faults.is_some() {
                self.oracle.adopt_breakpoints(&self.gateway);
            }
            if let Some(v) = check_outcome(self.step, &op, &expected, &actual) {
                new_violations.push(v);
            }
            None
        };

        new_violations.extend(check_events(
            self.step,
            &op,
            &events,
            &self.front.current_point(),
        ));
        new_violations.extend(check_step_invariants(
            self.step,
            &self.front,
            &self.gateway,
            &self.oracle,
            self.faults.is_none(),
        ));

        self.push_trace(&op, &expected, &actual, note);
        self.violations.extend(new_violations.clone());
        self.step += 1;
        new_violations
    }

    /// Run a resume of `kind` concurrently with a breakpoint operation.
    ///
    /// Where the resume lands depends on how the two interleave, so only
    /// the landing's validity and the usual invariants are checked.
    pub async fn step_concurrent_with(&mut self, kind: TargetKind, breakpoint_op: Op) -> Vec<Violation> {
        let mut new_violations = Vec::new();
        let faults_before = self.fault_count();
        self.take_events();

        let (landed, actual) = tokio::join!(
            self.front.resume_operation(kind, None, &self.regions),
            self.execute(&breakpoint_op)
        );
        let events = self.take_events();
        self.concurrent_steps += 1;

        if self.fault_count() > faults_before {
            self.oracle.resync(&self.front, &self.gateway);
        } else {
            self.oracle.commit(&breakpoint_op, &Expected::Done);
            self.oracle.adopt_position(&self.front);
            if self.faults.is_some() {
                self.oracle.adopt_breakpoints(&self.gateway);
            }
            if actual != Outcome::Done {
                new_violations.push(Violation {
                    step: self.step,
                    invariant: "outcome".to_string(),
                    details: format!("{} failed: {actual:?}", breakpoint_op.summary()),
                });
            }
        }

        if let Some(target) = &landed {
            let recorded = self
                .oracle
                .recording()
                .recording
                .steps
                .iter()
                .any(|s| s.point == target.point);
            if !recorded {
                new_violations.push(Violation {
                    step: self.step,
                    invariant: "concurrent-target".to_string(),
                    details: format!("{kind:?} landed on unrecorded point {}", target.point),
                });
            }
        }

        let resume = Op::Resume(kind);
        new_violations.extend(check_events(
            self.step,
            &resume,
            &events,
            &self.front.current_point(),
        ));
        new_violations.extend(check_step_invariants(
            self.step,
            &self.front,
            &self.gateway,
            &self.oracle,
            self.faults.is_none(),
        ));

        let landed = match landed {
            Some(target) => Outcome::Landed(target.point),
            None => Outcome::Stayed,
        };
        self.trace.push(SimTraceEntry {
            step: self.step,
            op: format!("{} || {}", resume.summary(), breakpoint_op.summary()),
            expected: "any".to_string(),
            actual: format!("{} / {}", outcome_summary(&landed), outcome_summary(&actual)),
            note: Some("concurrent".to_string()),
        });
        self.violations.extend(new_violations.clone());
        self.step += 1;
        new_violations
    }

    async fn execute(&self, op: &Op) -> Outcome {
        match op {
            Op::Resume(kind) => match self.front.resume_operation(*kind, None, &self.regions).await {
                Some(target) => Outcome::Landed(target.point),
                None => Outcome::Stayed,
            },
            Op::TimeWarp { step } => match self.oracle.recording().recording.steps.get(*step) {
                Some(step) => {
                    self.front.time_warp(step.point.clone(), step.time, true, None);
                    Outcome::Landed(self.front.current_point())
                }
                None => Outcome::Stayed,
            },
            Op::SetBreakpoint { location } => done(
                self.front
                    .set_breakpoint(&location.source_id, location.line, location.column, None)
                    .await,
            ),
            Op::RemoveBreakpoint { location } => done(
                self.front
                    .remove_breakpoint(&location.source_id, location.line, location.column)
                    .await,
            ),
            Op::PreferSource { source_id, value } => {
                match self.front.sources().prefer_source(source_id, *value) {
                    Ok(()) => Outcome::Done,
                    Err(ThreadError::InvariantViolation(msg)) => Outcome::Rejected(msg),
                    Err(err) => Outcome::Error(err.to_string()),
                }
            }
            Op::PreferredLocation { location } => {
                match self.front.preferred_mapped_location(location).await {
                    Ok(preferred) => Outcome::Location(preferred),
                    Err(err) => Outcome::Error(err.to_string()),
                }
            }
            Op::InspectPause => {
                let pause = self.front.current_pause();
                match self.front.frames().await {
                    Ok(frames) => Outcome::Pause {
                        point: pause.point().clone(),
                        first_frame: frames.first().map(|f| f.location.clone()),
                    },
                    Err(err) => Outcome::Error(err.to_string()),
                }
            }
        }
    }

    fn push_trace(&mut self, op: &Op, expected: &Expected, actual: &Outcome, note: Option<&str>) {
        self.trace.push(SimTraceEntry {
            step: self.step,
            op: op.summary(),
            expected: expected_summary(expected),
            actual: outcome_summary(actual),
            note: note.map(ToString::to_string),
        });
    }

    pub fn fault_stats(&self) -> FaultStats {
        self.faults.as_ref().map(|f| f.stats()).unwrap_or_default()
    }

    pub fn summary(&self) -> SimSummary {
        SimSummary {
            seed: self.seed,
            steps: self.step,
            concurrent_steps: self.concurrent_steps,
            violations: self.violations.len(),
            breakpoints: self.front.breakpoints().len(),
            pauses: self.front.pauses().len(),
            faults: self.fault_stats(),
            resume_targets: self.front.resume_target_stats(),
        }
    }

    /// Summary, trace and violations as JSON for tooling.
    pub fn report_json(&self) -> Value {
        let summary = self.summary();
        json!({
            "summary": {
                "seed": summary.seed,
                "steps": summary.steps,
                "concurrent_steps": summary.concurrent_steps,
                "violations": summary.violations,
                "breakpoints": summary.breakpoints,
                "pauses": summary.pauses,
                "faults": summary.faults.fault_count,
                "rejections": summary.faults.rejection_count,
                "resume_targets": {
                    "hits": summary.resume_targets.hits,
                    "misses": summary.resume_targets.misses,
                    "stale_discards": summary.resume_targets.stale_discards,
                    "invalidations": summary.resume_targets.invalidations,
                    "hit_rate": summary.resume_targets.hit_rate(),
                },
            },
            "current_point": self.front.current_point().to_string(),
            "trace": self.trace.iter().map(|entry| json!({
                "step": entry.step,
                "op": entry.op,
                "expected": entry.expected,
                "actual": entry.actual,
                "note": entry.note,
            })).collect::<Vec<_>>(),
            "violations": self.violations.iter().map(|v| json!({
                "step": v.step,
                "invariant": v.invariant,
                "details": v.details,
            })).collect::<Vec<_>>(),
        })
    }
}

fn done(result: ThreadResult<()>) -> Outcome {
    match result {
        Ok(()) => Outcome::Done,
        Err(err) => Outcome::Error(err.to_string()),
    }
}

/// Compare an operation's outcome with the oracle's prediction.
pub fn check_outcome(step: usize, op: &Op, expected: &Expected, actual: &Outcome) -> Option<Violation> {
    let matches = match (expected, actual) {
        (Expected::Landed(a), Outcome::Landed(b)) => a == b,
        (Expected::Stayed, Outcome::Stayed) => true,
        (Expected::Done, Outcome::Done) => true,
        (Expected::Rejected, Outcome::Rejected(_)) => true,
        (Expected::Location(a), Outcome::Location(b)) => a == b,
        (
            Expected::Pause {
                point: expected_point,
                first_frame: expected_frame,
            },
            Outcome::Pause { point, first_frame },
        ) => expected_point == point && expected_frame == first_frame,
        _ => false,
    };
    (!matches).then(|| Violation {
        step,
        invariant: "outcome".to_string(),
        details: format!(
            "{}: expected {}, got {}",
            op.summary(),
            expected_summary(expected),
            outcome_summary(actual)
        ),
    })
}

fn expected_summary(expected: &Expected) -> String {
    match expected {
        Expected::Landed(point) => format!("landed at {point}"),
        Expected::Stayed => "stayed".to_string(),
        Expected::Done => "done".to_string(),
        Expected::Rejected => "rejected".to_string(),
        Expected::Location(location) => describe(location),
        Expected::Pause { point, first_frame } => pause_summary(point, first_frame.as_ref()),
    }
}

fn outcome_summary(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Landed(point) => format!("landed at {point}"),
        Outcome::Stayed => "stayed".to_string(),
        Outcome::Done => "done".to_string(),
        Outcome::Rejected(msg) => format!("rejected: {msg}"),
        Outcome::Location(location) => describe(location),
        Outcome::Pause { point, first_frame } => pause_summary(point, first_frame.as_ref()),
        Outcome::Error(msg) => format!("error: {msg}"),
    }
}

fn pause_summary(point: &ExecutionPoint, frame: Option<&MappedLocation>) -> String {
    match frame.and_then(|f| f.first()) {
        Some(location) => format!("pause at {point} in {}", describe(location)),
        None => format!("pause at {point} without frames"),
    }
}
