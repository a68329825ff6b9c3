use std::sync::Arc;

use async_trait::async_trait;
use rewind_config::ProcessingLevel;

use crate::error::GatewayResult;
use crate::point::ExecutionPoint;
use crate::protocol::{
    Annotation, BreakpointId, EvaluationResult, FindMessagesResult, Frame, FrameId,
    FunctionMatch, KeyboardEvent, LoadedRegions, Location, MappedLocation, Message,
    MessagesInRange, NavigationEvent, NetworkRequests, NodeBounds, ObjectId, PauseCreated,
    PauseDescription, PauseId, PointDescription, PointRange, SameLineSourceLocations, Scope,
    SearchSourceContentsMatch, Source, SourceContents, SourceId, SourceRange, TargetKind,
    TimeRange, TimeStampedPoint,
};

/// A push notification delivered by the backend outside any request.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    NewSource(Source),
    LoadedRegions(LoadedRegions),
    Annotations(Vec<Annotation>),
    NewMessage(Box<Message>),
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::NewSource(_) => NotificationKind::NewSource,
            Notification::LoadedRegions(_) => NotificationKind::LoadedRegions,
            Notification::Annotations(_) => NotificationKind::Annotations,
            Notification::NewMessage(_) => NotificationKind::NewMessage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    NewSource,
    LoadedRegions,
    Annotations,
    NewMessage,
}

/// Callback for push notifications. Invoked synchronously, in delivery order.
pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle returned by [`Gateway::add_listener`].
pub type ListenerId = u64;

/// Request/response channel to a replay backend, bound to one recording session.
///
/// Every method corresponds to one protocol command. Notifications produced
/// while a request is being served must be delivered to listeners before the
/// request's reply resolves.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// Register a handler for one kind of push notification.
    fn add_listener(&self, kind: NotificationKind, handler: NotificationHandler) -> ListenerId;

    /// Drop a previously registered handler.
    fn remove_listener(&self, id: ListenerId);

    // Session

    async fn build_id(&self) -> GatewayResult<String>;

    async fn ensure_processed(&self, level: ProcessingLevel) -> GatewayResult<()>;

    /// Start streaming loaded-region notifications.
    async fn listen_for_load_changes(&self) -> GatewayResult<()>;

    async fn load_region(&self, region: TimeRange) -> GatewayResult<()>;

    async fn unload_region(&self, region: TimeRange) -> GatewayResult<()>;

    async fn endpoint(&self) -> GatewayResult<TimeStampedPoint>;

    async fn point_near_time(&self, time: f64) -> GatewayResult<TimeStampedPoint>;

    async fn annotation_kinds(&self) -> GatewayResult<Vec<String>>;

    /// Stream annotations of `kind` (all kinds when `None`) as notifications.
    async fn find_annotations(&self, kind: Option<&str>) -> GatewayResult<()>;

    async fn find_keyboard_events(&self) -> GatewayResult<Vec<KeyboardEvent>>;

    async fn find_navigation_events(&self) -> GatewayResult<Vec<NavigationEvent>>;

    async fn find_network_requests(&self) -> GatewayResult<NetworkRequests>;

    // Console

    /// Stream every console message as a notification.
    async fn find_messages(&self) -> GatewayResult<FindMessagesResult>;

    async fn find_messages_in_range(&self, range: &PointRange) -> GatewayResult<MessagesInRange>;

    // Debugger

    /// Stream every source as a notification. Resolves once all are sent.
    async fn find_sources(&self) -> GatewayResult<()>;

    async fn source_contents(&self, source_id: &SourceId) -> GatewayResult<SourceContents>;

    async fn possible_breakpoints(
        &self,
        source_id: &SourceId,
        range: Option<SourceRange>,
    ) -> GatewayResult<Vec<SameLineSourceLocations>>;

    async fn mapped_location(&self, location: &Location) -> GatewayResult<MappedLocation>;

    async fn set_breakpoint(
        &self,
        location: &Location,
        condition: Option<&str>,
    ) -> GatewayResult<BreakpointId>;

    async fn remove_breakpoint(&self, breakpoint_id: &BreakpointId) -> GatewayResult<()>;

    /// Where a resume operation of `kind` starting at `point` would stop.
    async fn find_target(
        &self,
        kind: TargetKind,
        point: &ExecutionPoint,
    ) -> GatewayResult<PauseDescription>;

    async fn search_source_contents(
        &self,
        query: &str,
        source_ids: Option<&[SourceId]>,
    ) -> GatewayResult<Vec<SearchSourceContentsMatch>>;

    async fn search_functions(
        &self,
        query: &str,
        source_ids: Option<&[SourceId]>,
    ) -> GatewayResult<Vec<FunctionMatch>>;

    async fn event_handler_count(&self, event_type: &str) -> GatewayResult<u64>;

    // Pause

    async fn create_pause(&self, point: &ExecutionPoint) -> GatewayResult<PauseCreated>;

    async fn frames(&self, pause_id: &PauseId) -> GatewayResult<Vec<Frame>>;

    async fn scopes(&self, pause_id: &PauseId, frame_id: &FrameId) -> GatewayResult<Vec<Scope>>;

    async fn frame_steps(
        &self,
        pause_id: &PauseId,
        frame_id: &FrameId,
    ) -> GatewayResult<Vec<PointDescription>>;

    async fn evaluate(
        &self,
        pause_id: &PauseId,
        frame_id: Option<&FrameId>,
        expression: &str,
        pure: bool,
    ) -> GatewayResult<EvaluationResult>;

    async fn document(&self, pause_id: &PauseId) -> GatewayResult<ObjectId>;

    async fn search_dom(&self, pause_id: &PauseId, query: &str) -> GatewayResult<Vec<ObjectId>>;

    /// Bounding rectangles of every rendered node, topmost first.
    async fn bounding_client_rects(&self, pause_id: &PauseId) -> GatewayResult<Vec<NodeBounds>>;
}
