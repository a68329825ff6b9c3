//! In-memory replay backend for tests and simulation.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rewind_config::ProcessingLevel;
use tokio::sync::watch;
use tracing::trace;

use crate::error::{GatewayError, GatewayResult};
use crate::point::ExecutionPoint;
use crate::protocol::{
    Annotation, BreakpointId, EvaluationResult, FindMessagesResult, Frame, FrameId,
    FunctionMatch, KeyboardEvent, LoadedRegions, Location, MappedLocation, Message,
    MessagesInRange, NamedValue, NavigationEvent, NetworkRequests, NodeBounds, ObjectId,
    PauseCreated, PauseData, PauseDescription, PauseId, PointDescription, PointRange,
    SameLineSourceLocations, Scope, ScopeType, SearchSourceContentsMatch, Source,
    SourceContents, SourceId, SourceRange, TargetKind, TimeRange, TimeStampedPoint,
    TimeStampedPointRange, Value,
};
use crate::traits::{Gateway, ListenerId, Notification, NotificationHandler, NotificationKind};

/// Rejection code for a breakpoint at a position that cannot be broken on.
pub const INVALID_LOCATION_CODE: i64 = 57;
/// Rejection code for a request naming an unknown entity.
pub const UNKNOWN_ENTITY_CODE: i64 = 44;

/// One recorded execution step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub point: ExecutionPoint,
    pub time: f64,
    /// Location of the step in every source that maps it. Empty when no
    /// script frame is on the stack.
    pub location: MappedLocation,
    /// Call-stack depth at the step.
    pub depth: u32,
}

impl Step {
    fn description(&self) -> PauseDescription {
        PauseDescription {
            point: self.point.clone(),
            time: self.time,
            frame: (!self.location.is_empty()).then(|| self.location.clone()),
        }
    }

    fn time_stamped(&self) -> TimeStampedPoint {
        TimeStampedPoint {
            point: self.point.clone(),
            time: self.time,
        }
    }
}

/// A synthetic recording served by [`MemoryGateway`].
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub build_id: String,
    pub sources: Vec<Source>,
    pub contents: HashMap<SourceId, String>,
    /// Breakable positions per source. Sources without an entry accept any position.
    pub breakable: HashMap<SourceId, Vec<SameLineSourceLocations>>,
    /// Steps in point order.
    pub steps: Vec<Step>,
    pub messages: Vec<Message>,
    pub messages_overflow: bool,
    pub annotations: Vec<Annotation>,
    pub keyboard_events: Vec<KeyboardEvent>,
    pub navigation_events: Vec<NavigationEvent>,
    pub network: NetworkRequests,
    pub functions: Vec<FunctionMatch>,
    pub event_handler_counts: HashMap<String, u64>,
    pub evaluations: HashMap<String, EvaluationResult>,
    /// Rendered DOM nodes, topmost first.
    pub dom_nodes: Vec<NodeBounds>,
    pub loaded: Vec<TimeStampedPointRange>,
}

impl Recording {
    pub fn new(build_id: impl Into<String>) -> Self {
        Recording {
            build_id: build_id.into(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_contents(mut self, source_id: &str, contents: &str) -> Self {
        self.contents.insert(source_id.to_string(), contents.to_string());
        self
    }

    /// Append a step. Points must be added in increasing order.
    pub fn with_step(mut self, point: u64, time: f64, location: MappedLocation, depth: u32) -> Self {
        self.steps.push(Step {
            point: point.into(),
            time,
            location,
            depth,
        });
        self
    }

    /// Mark the whole recording as loaded.
    pub fn fully_loaded(mut self) -> Self {
        if let (Some(first), Some(last)) = (self.steps.first(), self.steps.last()) {
            self.loaded = vec![TimeStampedPointRange {
                begin: first.time_stamped(),
                end: last.time_stamped(),
            }];
        }
        self
    }

    pub fn endpoint(&self) -> TimeStampedPoint {
        self.steps
            .last()
            .map(Step::time_stamped)
            .unwrap_or(TimeStampedPoint {
                point: ExecutionPoint::zero(),
                time: 0.0,
            })
    }

    /// Index of the last step at or before `point`.
    fn step_index(&self, point: &ExecutionPoint) -> usize {
        self.steps
            .partition_point(|s| &s.point <= point)
            .saturating_sub(1)
    }

    fn step_at(&self, point: &ExecutionPoint) -> Option<&Step> {
        self.steps.iter().find(|s| &s.point == point)
    }

    /// Where a resume operation of `kind` from `point` stops, given the
    /// installed breakpoint locations.
    pub fn target(
        &self,
        kind: TargetKind,
        point: &ExecutionPoint,
        breakpoints: &[Location],
    ) -> Option<PauseDescription> {
        let first = self.steps.first()?;
        let last = self.steps.last()?;
        let idx = self.step_index(point);
        let depth = self.steps[idx].depth;
        let hits = |step: &Step| {
            step.location.iter().any(|loc| {
                breakpoints.iter().any(|bp| {
                    bp.source_id == loc.source_id && bp.line == loc.line && bp.column == loc.column
                })
            })
        };
        let mut after = self.steps.iter().filter(|s| &s.point > point);
        let mut before = self.steps.iter().rev().filter(|s| &s.point < point);

        let step = match kind {
            TargetKind::Resume => after.find(|&s| hits(s)).unwrap_or(last),
            TargetKind::Rewind => before.find(|&s| hits(s)).unwrap_or(first),
            TargetKind::StepIn => after.next().unwrap_or(last),
            TargetKind::StepOver => after.find(|s| s.depth <= depth).unwrap_or(last),
            TargetKind::StepOut => after.find(|s| s.depth < depth).unwrap_or(last),
            TargetKind::ReverseStepOver => before.find(|s| s.depth <= depth).unwrap_or(first),
        };
        Some(step.description())
    }

    fn is_breakable(&self, location: &Location) -> bool {
        match self.breakable.get(&location.source_id) {
            None => true,
            Some(lines) => lines
                .iter()
                .any(|l| l.line == location.line && l.columns.contains(&location.column)),
        }
    }

    fn has_source(&self, source_id: &str) -> bool {
        self.sources.iter().any(|s| s.source_id == source_id)
    }

    fn nearest(&self, time: f64) -> TimeStampedPoint {
        self.steps
            .iter()
            .min_by(|a, b| {
                (a.time - time)
                    .abs()
                    .partial_cmp(&(b.time - time).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(Step::time_stamped)
            .unwrap_or_else(|| self.endpoint())
    }
}

struct PauseState {
    point: ExecutionPoint,
}

#[derive(Default)]
struct State {
    listeners: HashMap<NotificationKind, Vec<(ListenerId, NotificationHandler)>>,
    calls: HashMap<&'static str, u64>,
    failures: HashMap<&'static str, VecDeque<GatewayError>>,
    breakpoints: HashMap<BreakpointId, Location>,
    pauses: HashMap<PauseId, PauseState>,
    regions: LoadedRegions,
    processed: Option<ProcessingLevel>,
}

/// In-memory [`Gateway`] serving a [`Recording`].
///
/// Counts calls per protocol method, can fail the next call of a method, and
/// can hold target lookups and pause creation in flight until released.
pub struct MemoryGateway {
    recording: Recording,
    state: Mutex<State>,
    next_id: AtomicU64,
    targets_open: watch::Sender<bool>,
    pauses_open: watch::Sender<bool>,
}

impl MemoryGateway {
    pub fn new(recording: Recording) -> Self {
        let regions = LoadedRegions {
            loaded: recording.loaded.clone(),
            indexed: recording.loaded.clone(),
            loading: Vec::new(),
        };
        let (targets_open, _) = watch::channel(true);
        let (pauses_open, _) = watch::channel(true);
        MemoryGateway {
            recording,
            state: Mutex::new(State {
                regions,
                ..Default::default()
            }),
            next_id: AtomicU64::new(1),
            targets_open,
            pauses_open,
        }
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    /// Number of times `method` has been called.
    pub fn call_count(&self, method: &str) -> u64 {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    /// Make the next call of `method` fail with `error`.
    pub fn fail_next(&self, method: &'static str, error: GatewayError) {
        self.state
            .lock()
            .failures
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Hold every `find_target` call until [`release_targets`](Self::release_targets).
    pub fn hold_targets(&self) {
        self.targets_open.send_replace(false);
    }

    pub fn release_targets(&self) {
        self.targets_open.send_replace(true);
    }

    /// Hold every `create_pause` call until [`release_pauses`](Self::release_pauses).
    pub fn hold_pauses(&self) {
        self.pauses_open.send_replace(false);
    }

    pub fn release_pauses(&self) {
        self.pauses_open.send_replace(true);
    }

    /// Breakpoints currently installed, by id.
    pub fn breakpoints(&self) -> HashMap<BreakpointId, Location> {
        self.state.lock().breakpoints.clone()
    }

    pub fn processed_level(&self) -> Option<ProcessingLevel> {
        self.state.lock().processed
    }

    /// Deliver `notification` to every listener registered for its kind.
    pub fn notify(&self, notification: &Notification) {
        let handlers: Vec<NotificationHandler> = self
            .state
            .lock()
            .listeners
            .get(&notification.kind())
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(notification);
        }
    }

    fn enter(&self, method: &'static str) -> GatewayResult<()> {
        let mut state = self.state.lock();
        *state.calls.entry(method).or_insert(0) += 1;
        trace!(method, "memory gateway call");
        match state.failures.get_mut(method).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn pause_point(&self, method: &str, pause_id: &PauseId) -> GatewayResult<ExecutionPoint> {
        self.state
            .lock()
            .pauses
            .get(pause_id)
            .map(|p| p.point.clone())
            .ok_or_else(|| {
                GatewayError::rejected(method, UNKNOWN_ENTITY_CODE, format!("unknown pause {pause_id}"))
            })
    }

    /// Stack frames at `point`, innermost first. Frame `i` sits at depth `depth - i`.
    fn frames_at(&self, point: &ExecutionPoint) -> Vec<Frame> {
        let Some(step) = self.recording.step_at(point) else {
            return Vec::new();
        };
        if step.location.is_empty() {
            return Vec::new();
        }
        let idx = self.recording.step_index(point);
        let mut frames = vec![Frame {
            frame_id: frame_id(point, 0),
            function_name: Some(format!("depth{}", step.depth)),
            location: step.location.clone(),
            scope_chain: vec![scope_id(point, 0)],
        }];
        // Callers are the most recent earlier steps at each shallower depth.
        let mut depth = step.depth;
        for caller in self.recording.steps[..idx].iter().rev() {
            if caller.depth < depth && !caller.location.is_empty() {
                let n = frames.len();
                frames.push(Frame {
                    frame_id: frame_id(point, n),
                    function_name: Some(format!("depth{}", caller.depth)),
                    location: caller.location.clone(),
                    scope_chain: vec![scope_id(point, n)],
                });
                depth = caller.depth;
            }
        }
        frames
    }

    /// Steps executed by the frame `index` levels above the innermost one at `point`.
    fn steps_in_frame(&self, point: &ExecutionPoint, index: usize) -> Vec<PointDescription> {
        let Some(step) = self.recording.step_at(point) else {
            return Vec::new();
        };
        let Some(depth) = step.depth.checked_sub(index as u32) else {
            return Vec::new();
        };
        let idx = self.recording.step_index(point);
        let steps = &self.recording.steps;
        let mut start = idx;
        while start > 0 && steps[start - 1].depth >= depth {
            start -= 1;
        }
        let mut end = idx;
        while end + 1 < steps.len() && steps[end + 1].depth >= depth {
            end += 1;
        }
        steps[start..=end]
            .iter()
            .filter(|s| s.depth == depth)
            .map(Step::description)
            .collect()
    }

    fn set_regions(&self, update: impl FnOnce(&mut LoadedRegions)) {
        let regions = {
            let mut state = self.state.lock();
            update(&mut state.regions);
            state.regions.clone()
        };
        self.notify(&Notification::LoadedRegions(regions));
    }
}

fn frame_id(point: &ExecutionPoint, index: usize) -> FrameId {
    format!("frame-{point}-{index}")
}

fn scope_id(point: &ExecutionPoint, index: usize) -> String {
    format!("scope-{point}-{index}")
}

fn frame_index(frame_id: &FrameId) -> Option<usize> {
    frame_id.rsplit('-').next()?.parse().ok()
}

#[async_trait]
impl Gateway for MemoryGateway {
    fn add_listener(&self, kind: NotificationKind, handler: NotificationHandler) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state
            .lock()
            .listeners
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        for list in self.state.lock().listeners.values_mut() {
            list.retain(|(existing, _)| *existing != id);
        }
    }

    async fn build_id(&self) -> GatewayResult<String> {
        self.enter("getBuildId")?;
        Ok(self.recording.build_id.clone())
    }

    async fn ensure_processed(&self, level: ProcessingLevel) -> GatewayResult<()> {
        self.enter("ensureProcessed")?;
        self.state.lock().processed = Some(level);
        Ok(())
    }

    async fn listen_for_load_changes(&self) -> GatewayResult<()> {
        self.enter("listenForLoadChanges")?;
        self.set_regions(|_| {});
        Ok(())
    }

    async fn load_region(&self, region: TimeRange) -> GatewayResult<()> {
        self.enter("loadRegion")?;
        let range = TimeStampedPointRange {
            begin: self.recording.nearest(region.begin),
            end: self.recording.nearest(region.end),
        };
        self.set_regions(|regions| {
            if !regions.loaded.contains(&range) {
                regions.loaded.push(range);
            }
        });
        Ok(())
    }

    async fn unload_region(&self, region: TimeRange) -> GatewayResult<()> {
        self.enter("unloadRegion")?;
        self.set_regions(|regions| {
            regions
                .loaded
                .retain(|r| !(region.begin <= r.begin.time && r.end.time <= region.end));
        });
        Ok(())
    }

    async fn endpoint(&self) -> GatewayResult<TimeStampedPoint> {
        self.enter("getEndpoint")?;
        Ok(self.recording.endpoint())
    }

    async fn point_near_time(&self, time: f64) -> GatewayResult<TimeStampedPoint> {
        self.enter("getPointNearTime")?;
        Ok(self.recording.nearest(time))
    }

    async fn annotation_kinds(&self) -> GatewayResult<Vec<String>> {
        self.enter("getAnnotationKinds")?;
        let kinds: BTreeSet<&String> = self.recording.annotations.iter().map(|a| &a.kind).collect();
        Ok(kinds.into_iter().cloned().collect())
    }

    async fn find_annotations(&self, kind: Option<&str>) -> GatewayResult<()> {
        self.enter("findAnnotations")?;
        let annotations: Vec<Annotation> = self
            .recording
            .annotations
            .iter()
            .filter(|a| kind.map_or(true, |k| a.kind == k))
            .cloned()
            .collect();
        if !annotations.is_empty() {
            self.notify(&Notification::Annotations(annotations));
        }
        Ok(())
    }

    async fn find_keyboard_events(&self) -> GatewayResult<Vec<KeyboardEvent>> {
        self.enter("findKeyboardEvents")?;
        Ok(self.recording.keyboard_events.clone())
    }

    async fn find_navigation_events(&self) -> GatewayResult<Vec<NavigationEvent>> {
        self.enter("findNavigationEvents")?;
        Ok(self.recording.navigation_events.clone())
    }

    async fn find_network_requests(&self) -> GatewayResult<NetworkRequests> {
        self.enter("findRequests")?;
        Ok(self.recording.network.clone())
    }

    async fn find_messages(&self) -> GatewayResult<FindMessagesResult> {
        self.enter("findMessages")?;
        for message in &self.recording.messages {
            self.notify(&Notification::NewMessage(Box::new(message.clone())));
        }
        Ok(FindMessagesResult {
            overflow: self.recording.messages_overflow,
        })
    }

    async fn find_messages_in_range(&self, range: &PointRange) -> GatewayResult<MessagesInRange> {
        self.enter("findMessagesInRange")?;
        Ok(MessagesInRange {
            messages: self
                .recording
                .messages
                .iter()
                .filter(|m| range.contains(&m.point.point))
                .cloned()
                .collect(),
            overflow: false,
        })
    }

    async fn find_sources(&self) -> GatewayResult<()> {
        self.enter("findSources")?;
        for source in &self.recording.sources {
            self.notify(&Notification::NewSource(source.clone()));
        }
        Ok(())
    }

    async fn source_contents(&self, source_id: &SourceId) -> GatewayResult<SourceContents> {
        self.enter("getSourceContents")?;
        self.recording
            .contents
            .get(source_id)
            .map(|contents| SourceContents {
                contents: contents.clone(),
                content_type: "text/javascript".to_string(),
            })
            .ok_or_else(|| {
                GatewayError::rejected(
                    "getSourceContents",
                    UNKNOWN_ENTITY_CODE,
                    format!("no contents for {source_id}"),
                )
            })
    }

    async fn possible_breakpoints(
        &self,
        source_id: &SourceId,
        range: Option<SourceRange>,
    ) -> GatewayResult<Vec<SameLineSourceLocations>> {
        self.enter("getPossibleBreakpoints")?;
        if !self.recording.has_source(source_id) {
            return Err(GatewayError::rejected(
                "getPossibleBreakpoints",
                UNKNOWN_ENTITY_CODE,
                format!("unknown source {source_id}"),
            ));
        }
        let lines = self.recording.breakable.get(source_id).cloned().unwrap_or_default();
        Ok(match range {
            None => lines,
            Some(range) => lines
                .into_iter()
                .filter_map(|l| {
                    let columns: Vec<u32> = l
                        .columns
                        .into_iter()
                        .filter(|c| range.contains(l.line, *c))
                        .collect();
                    (!columns.is_empty()).then_some(SameLineSourceLocations {
                        line: l.line,
                        columns,
                    })
                })
                .collect(),
        })
    }

    async fn mapped_location(&self, location: &Location) -> GatewayResult<MappedLocation> {
        self.enter("getMappedLocation")?;
        Ok(self
            .recording
            .steps
            .iter()
            .find(|s| s.location.contains(location))
            .map(|s| s.location.clone())
            .unwrap_or_else(|| vec![location.clone()]))
    }

    async fn set_breakpoint(
        &self,
        location: &Location,
        _condition: Option<&str>,
    ) -> GatewayResult<BreakpointId> {
        self.enter("setBreakpoint")?;
        if !self.recording.has_source(&location.source_id) {
            return Err(GatewayError::rejected(
                "setBreakpoint",
                UNKNOWN_ENTITY_CODE,
                format!("unknown source {}", location.source_id),
            ));
        }
        if !self.recording.is_breakable(location) {
            return Err(GatewayError::rejected(
                "setBreakpoint",
                INVALID_LOCATION_CODE,
                format!(
                    "invalid location {}:{}:{}",
                    location.source_id, location.line, location.column
                ),
            ));
        }
        let id = self.next_id("bp");
        self.state.lock().breakpoints.insert(id.clone(), location.clone());
        Ok(id)
    }

    async fn remove_breakpoint(&self, breakpoint_id: &BreakpointId) -> GatewayResult<()> {
        self.enter("removeBreakpoint")?;
        self.state.lock().breakpoints.remove(breakpoint_id);
        Ok(())
    }

    async fn find_target(
        &self,
        kind: TargetKind,
        point: &ExecutionPoint,
    ) -> GatewayResult<PauseDescription> {
        self.enter("findTarget")?;
        let mut open = self.targets_open.subscribe();
        let _ = open.wait_for(|open| *open).await;

        let breakpoints: Vec<Location> = self.state.lock().breakpoints.values().cloned().collect();
        self.recording
            .target(kind, point, &breakpoints)
            .ok_or_else(|| GatewayError::rejected(kind.command(), UNKNOWN_ENTITY_CODE, "empty recording"))
    }

    async fn search_source_contents(
        &self,
        query: &str,
        source_ids: Option<&[SourceId]>,
    ) -> GatewayResult<Vec<SearchSourceContentsMatch>> {
        self.enter("searchSourceContents")?;
        let mut matches = Vec::new();
        let mut ids: Vec<&SourceId> = self.recording.contents.keys().collect();
        ids.sort();
        for source_id in ids {
            if source_ids.is_some_and(|filter| !filter.contains(source_id)) {
                continue;
            }
            let contents = &self.recording.contents[source_id];
            for (n, line) in contents.lines().enumerate() {
                if let Some(column) = line.find(query) {
                    matches.push(SearchSourceContentsMatch {
                        location: Location::new(source_id.clone(), n as u32 + 1, column as u32),
                        context: line.to_string(),
                    });
                }
            }
        }
        Ok(matches)
    }

    async fn search_functions(
        &self,
        query: &str,
        source_ids: Option<&[SourceId]>,
    ) -> GatewayResult<Vec<FunctionMatch>> {
        self.enter("searchFunctions")?;
        Ok(self
            .recording
            .functions
            .iter()
            .filter(|f| f.function_name.contains(query))
            .filter(|f| source_ids.map_or(true, |ids| ids.contains(&f.location.source_id)))
            .cloned()
            .collect())
    }

    async fn event_handler_count(&self, event_type: &str) -> GatewayResult<u64> {
        self.enter("getEventHandlerCount")?;
        Ok(self
            .recording
            .event_handler_counts
            .get(event_type)
            .copied()
            .unwrap_or(0))
    }

    async fn create_pause(&self, point: &ExecutionPoint) -> GatewayResult<PauseCreated> {
        self.enter("createPause")?;
        let mut open = self.pauses_open.subscribe();
        let _ = open.wait_for(|open| *open).await;
        let pause_id = self.next_id("pause");
        let frames = self.frames_at(point);
        self.state.lock().pauses.insert(
            pause_id.clone(),
            PauseState {
                point: point.clone(),
            },
        );
        Ok(PauseCreated {
            pause_id,
            has_frames: !frames.is_empty(),
            data: PauseData::default(),
        })
    }

    async fn frames(&self, pause_id: &PauseId) -> GatewayResult<Vec<Frame>> {
        self.enter("getAllFrames")?;
        let point = self.pause_point("getAllFrames", pause_id)?;
        Ok(self.frames_at(&point))
    }

    async fn scopes(&self, pause_id: &PauseId, frame_id: &FrameId) -> GatewayResult<Vec<Scope>> {
        self.enter("getScopes")?;
        let point = self.pause_point("getScopes", pause_id)?;
        let frame = self
            .frames_at(&point)
            .into_iter()
            .find(|f| &f.frame_id == frame_id)
            .ok_or_else(|| {
                GatewayError::rejected("getScopes", UNKNOWN_ENTITY_CODE, format!("unknown frame {frame_id}"))
            })?;
        Ok(frame
            .scope_chain
            .into_iter()
            .map(|scope_id| Scope {
                scope_id,
                kind: ScopeType::Function,
                bindings: vec![NamedValue {
                    name: "point".to_string(),
                    value: Value::primitive(point.to_string()),
                }],
            })
            .collect())
    }

    async fn frame_steps(
        &self,
        pause_id: &PauseId,
        frame_id: &FrameId,
    ) -> GatewayResult<Vec<PointDescription>> {
        self.enter("getFrameSteps")?;
        let point = self.pause_point("getFrameSteps", pause_id)?;
        let index = frame_index(frame_id).ok_or_else(|| {
            GatewayError::rejected("getFrameSteps", UNKNOWN_ENTITY_CODE, format!("unknown frame {frame_id}"))
        })?;
        Ok(self.steps_in_frame(&point, index))
    }

    async fn evaluate(
        &self,
        pause_id: &PauseId,
        _frame_id: Option<&FrameId>,
        expression: &str,
        _pure: bool,
    ) -> GatewayResult<EvaluationResult> {
        self.enter("evaluate")?;
        self.pause_point("evaluate", pause_id)?;
        Ok(match self.recording.evaluations.get(expression) {
            Some(result) => result.clone(),
            None => EvaluationResult {
                exception: Some(Value::primitive(format!(
                    "ReferenceError: {expression} is not defined"
                ))),
                ..Default::default()
            },
        })
    }

    async fn document(&self, pause_id: &PauseId) -> GatewayResult<ObjectId> {
        self.enter("getDocument")?;
        self.pause_point("getDocument", pause_id)?;
        Ok("document".to_string())
    }

    async fn search_dom(&self, pause_id: &PauseId, query: &str) -> GatewayResult<Vec<ObjectId>> {
        self.enter("searchDOM")?;
        self.pause_point("searchDOM", pause_id)?;
        Ok(self
            .recording
            .dom_nodes
            .iter()
            .filter(|n| n.node.contains(query))
            .map(|n| n.node.clone())
            .collect())
    }

    async fn bounding_client_rects(&self, pause_id: &PauseId) -> GatewayResult<Vec<NodeBounds>> {
        self.enter("getAllBoundingClientRects")?;
        self.pause_point("getAllBoundingClientRects", pause_id)?;
        Ok(self.recording.dom_nodes.clone())
    }
}
