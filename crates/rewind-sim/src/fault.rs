use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rewind_config::ProcessingLevel;
use rewind_core::protocol::{
    BreakpointId, EvaluationResult, FindMessagesResult, Frame, FrameId, FunctionMatch,
    KeyboardEvent, Location, MappedLocation, MessagesInRange, NavigationEvent, NetworkRequests,
    NodeBounds, ObjectId, PauseCreated, PauseDescription, PauseId, PointDescription, PointRange,
    SameLineSourceLocations, Scope, SearchSourceContentsMatch, SourceContents, SourceId,
    SourceRange, TargetKind, TimeRange, TimeStampedPoint,
};
use rewind_core::{
    ExecutionPoint, Gateway, GatewayError, GatewayResult, ListenerId, NotificationHandler,
    NotificationKind,
};
use tokio::sync::Mutex;
use tracing::debug;

/// Prefix used in error messages to distinguish injected faults from real errors.
pub const FAULT_PREFIX: &str = "[fault-injected]";

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of failing a faultable request (0.0-1.0).
    pub error_rate: f64,
    /// Probability that an injected failure is a backend rejection rather
    /// than a transport failure.
    pub rejection_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub fault_count: usize,
    pub rejection_count: usize,
}

/// A gateway wrapper that randomly fails requests made while paused.
///
/// Session setup, source discovery and streaming requests always pass
/// through; breakpoint, target, mapping and pause requests may fail.
pub struct FaultyGateway {
    inner: Arc<dyn Gateway>,
    rng: Mutex<ChaCha8Rng>,
    config: FaultConfig,
    fault_count: AtomicUsize,
    rejection_count: AtomicUsize,
}

impl FaultyGateway {
    pub fn new(inner: Arc<dyn Gateway>, rng: ChaCha8Rng, config: FaultConfig) -> Self {
        FaultyGateway {
            inner,
            rng: Mutex::new(rng),
            config,
            fault_count: AtomicUsize::new(0),
            rejection_count: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> FaultStats {
        FaultStats {
            fault_count: self.fault_count.load(Ordering::Relaxed),
            rejection_count: self.rejection_count.load(Ordering::Relaxed),
        }
    }

    /// Roll the RNG and fail `method` if the roll lands under the error rate.
    async fn roll(&self, method: &str) -> GatewayResult<()> {
        if self.config.error_rate <= 0.0 {
            return Ok(());
        }
        let (fail, reject) = {
            let mut rng = self.rng.lock().await;
            let fail = rng.gen::<f64>() < self.config.error_rate;
            (fail, rng.gen::<f64>() < self.config.rejection_rate)
        };
        if !fail {
            return Ok(());
        }
        self.fault_count.fetch_add(1, Ordering::Relaxed);
        debug!(method, reject, "injecting gateway fault");
        if reject {
            self.rejection_count.fetch_add(1, Ordering::Relaxed);
            Err(GatewayError::rejected(
                method,
                -1,
                format!("{FAULT_PREFIX} {method} refused"),
            ))
        } else {
            Err(GatewayError::transport(
                method,
                format!("{FAULT_PREFIX} connection reset during {method}"),
            ))
        }
    }
}

/// Check if an error was injected by the fault layer.
pub fn is_injected_fault(msg: &str) -> bool {
    msg.contains(FAULT_PREFIX)
}

#[async_trait]
impl Gateway for FaultyGateway {
    fn add_listener(&self, kind: NotificationKind, handler: NotificationHandler) -> ListenerId {
        self.inner.add_listener(kind, handler)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.inner.remove_listener(id)
    }

    async fn build_id(&self) -> GatewayResult<String> {
        self.inner.build_id().await
    }

    async fn ensure_processed(&self, level: ProcessingLevel) -> GatewayResult<()> {
        self.inner.ensure_processed(level).await
    }

    async fn listen_for_load_changes(&self) -> GatewayResult<()> {
        self.inner.listen_for_load_changes().await
    }

    async fn load_region(&self, region: TimeRange) -> GatewayResult<()> {
        self.roll("loadRegion").await?;
        self.inner.load_region(region).await
    }

    async fn unload_region(&self, region: TimeRange) -> GatewayResult<()> {
        self.roll("unloadRegion").await?;
        self.inner.unload_region(region).await
    }

    async fn endpoint(&self) -> GatewayResult<TimeStampedPoint> {
        self.inner.endpoint().await
    }

    async fn point_near_time(&self, time: f64) -> GatewayResult<TimeStampedPoint> {
        self.inner.point_near_time(time).await
    }

    async fn annotation_kinds(&self) -> GatewayResult<Vec<String>> {
        self.inner.annotation_kinds().await
    }

    async fn find_annotations(&self, kind: Option<&str>) -> GatewayResult<()> {
        self.inner.find_annotations(kind).await
    }

    async fn find_keyboard_events(&self) -> GatewayResult<Vec<KeyboardEvent>> {
        self.inner.find_keyboard_events().await
    }

    async fn find_navigation_events(&self) -> GatewayResult<Vec<NavigationEvent>> {
        self.inner.find_navigation_events().await
    }

    async fn find_network_requests(&self) -> GatewayResult<NetworkRequests> {
        self.inner.find_network_requests().await
    }

    async fn find_messages(&self) -> GatewayResult<FindMessagesResult> {
        self.inner.find_messages().await
    }

    async fn find_messages_in_range(&self, range: &PointRange) -> GatewayResult<MessagesInRange> {
        self.inner.find_messages_in_range(range).await
    }

    async fn find_sources(&self) -> GatewayResult<()> {
        self.inner.find_sources().await
    }

    async fn source_contents(&self, source_id: &SourceId) -> GatewayResult<SourceContents> {
        self.roll("getSourceContents").await?;
        self.inner.source_contents(source_id).await
    }

    async fn possible_breakpoints(
        &self,
        source_id: &SourceId,
        range: Option<SourceRange>,
    ) -> GatewayResult<Vec<SameLineSourceLocations>> {
        self.roll("getPossibleBreakpoints").await?;
        self.inner.possible_breakpoints(source_id, range).await
    }

    async fn mapped_location(&self, location: &Location) -> GatewayResult<MappedLocation> {
        self.roll("getMappedLocation").await?;
        self.inner.mapped_location(location).await
    }

    async fn set_breakpoint(
        &self,
        location: &Location,
        condition: Option<&str>,
    ) -> GatewayResult<BreakpointId> {
        self.roll("setBreakpoint").await?;
        self.inner.set_breakpoint(location, condition).await
    }

    async fn remove_breakpoint(&self, breakpoint_id: &BreakpointId) -> GatewayResult<()> {
        self.roll("removeBreakpoint").await?;
        self.inner.remove_breakpoint(breakpoint_id).await
    }

    async fn find_target(
        &self,
        kind: TargetKind,
        point: &ExecutionPoint,
    ) -> GatewayResult<PauseDescription> {
        self.roll(kind.command()).await?;
        self.inner.find_target(kind, point).await
    }

    async fn search_source_contents(
        &self,
        query: &str,
        source_ids: Option<&[SourceId]>,
    ) -> GatewayResult<Vec<SearchSourceContentsMatch>> {
        self.inner.search_source_contents(query, source_ids).await
    }

    async fn search_functions(
        &self,
        query: &str,
        source_ids: Option<&[SourceId]>,
    ) -> GatewayResult<Vec<FunctionMatch>> {
        self.inner.search_functions(query, source_ids).await
    }

    async fn event_handler_count(&self, event_type: &str) -> GatewayResult<u64> {
        self.inner.event_handler_count(event_type).await
    }

    async fn create_pause(&self, point: &ExecutionPoint) -> GatewayResult<PauseCreated> {
        self.roll("createPause").await?;
        self.inner.create_pause(point).await
    }

    async fn frames(&self, pause_id: &PauseId) -> GatewayResult<Vec<Frame>> {
        self.roll("getAllFrames").await?;
        self.inner.frames(pause_id).await
    }

    async fn scopes(&self, pause_id: &PauseId, frame_id: &FrameId) -> GatewayResult<Vec<Scope>> {
        self.roll("getScope").await?;
        self.inner.scopes(pause_id, frame_id).await
    }

    async fn frame_steps(
        &self,
        pause_id: &PauseId,
        frame_id: &FrameId,
    ) -> GatewayResult<Vec<PointDescription>> {
        self.roll("getFrameSteps").await?;
        self.inner.frame_steps(pause_id, frame_id).await
    }

    async fn evaluate(
        &self,
        pause_id: &PauseId,
        frame_id: Option<&FrameId>,
        expression: &str,
        pure: bool,
    ) -> GatewayResult<EvaluationResult> {
        self.roll("evaluateInFrame").await?;
        self.inner.evaluate(pause_id, frame_id, expression, pure).await
    }

    async fn document(&self, pause_id: &PauseId) -> GatewayResult<ObjectId> {
        self.roll("getDocument").await?;
        self.inner.document(pause_id).await
    }

    async fn search_dom(&self, pause_id: &PauseId, query: &str) -> GatewayResult<Vec<ObjectId>> {
        self.roll("searchDOM").await?;
        self.inner.search_dom(pause_id, query).await
    }

    async fn bounding_client_rects(&self, pause_id: &PauseId) -> GatewayResult<Vec<NodeBounds>> {
        self.roll("getAllBoundingClientRects").await?;
        self.inner.bounding_client_rects(pause_id).await
    }
}
