//! The per-session coordinator for thread state.
//!
//! A [`ThreadFront`] tracks where execution is paused, moves that position
//! through the resume family of operations, owns the source and pause
//! registries, and fans backend notifications out to interested callers.

mod breakpoints;
mod pauses;
mod resume;
mod streams;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, Shared};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rewind_config::RewindConfig;
use rewind_core::protocol::{
    Annotation, BreakpointId, EvaluationResult, FrameId, LoadedRegions, Location, MappedLocation,
    Message, PauseDescription, RecordingTarget, SameLineSourceLocations, SessionId, SourceId,
    TargetKind,
};
use rewind_core::{
    deferred, invariant, CacheConfig, Epoch, EpochCache, Event, EventEmitter, ExecutionPoint,
    Gateway, ListenerId, Notification, NotificationKind, Resolver, Subscription, ThreadResult,
    Waiter,
};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::pause::{Pause, PauseRegistry};
use crate::sources::SourceRegistry;

pub use pauses::EvaluateRequest;
pub use streams::SourceLocationInfo;

/// Payload of a [`ThreadEvent::Paused`] event.
#[derive(Debug, Clone, PartialEq)]
pub struct PausedEvent {
    pub point: ExecutionPoint,
    pub time: f64,
    pub has_frames: bool,
    pub frame: Option<MappedLocation>,
}

#[derive(Debug, Clone)]
pub struct EvaluationEvent {
    pub async_index: Option<usize>,
    pub frame_id: Option<FrameId>,
    pub text: String,
    pub result: EvaluationResult,
}

/// Events published by a [`ThreadFront`].
#[derive(Debug, Clone)]
pub enum ThreadEvent {
    Paused(PausedEvent),
    Resumed,
    CurrentPause(Option<Arc<Pause>>),
    Evaluation(Box<EvaluationEvent>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadEventKind {
    Paused,
    Resumed,
    CurrentPause,
    Evaluation,
}

impl Event for ThreadEvent {
    type Kind = ThreadEventKind;

    fn kind(&self) -> ThreadEventKind {
        match self {
            ThreadEvent::Paused(_) => ThreadEventKind::Paused,
            ThreadEvent::Resumed => ThreadEventKind::Resumed,
            ThreadEvent::CurrentPause(_) => ThreadEventKind::CurrentPause,
            ThreadEvent::Evaluation(_) => ThreadEventKind::Evaluation,
        }
    }
}

pub type LoadedRegionsListener = Arc<dyn Fn(&LoadedRegions) + Send + Sync>;
pub type AnnotationCallback = Arc<dyn Fn(&[Annotation]) + Send + Sync>;
pub type ConsoleMessageCallback = Arc<dyn Fn(Arc<Pause>, &Message) + Send + Sync>;

type SharedResult<T> = Shared<BoxFuture<'static, ThreadResult<T>>>;

struct ThreadState {
    current_point: ExecutionPoint,
    current_time: f64,
    current_has_frames: bool,
    current_pause: Option<Arc<Pause>>,
    /// Pauses for async parent frames of the current point, innermost last.
    async_pauses: Vec<Arc<Pause>>,
    session_id: Option<SessionId>,
}

#[derive(Default)]
struct LoadState {
    listening: bool,
    listeners: Vec<LoadedRegionsListener>,
    most_recent: Option<LoadedRegions>,
}

#[derive(Default)]
struct AnnotationState {
    callbacks: HashMap<String, Vec<AnnotationCallback>>,
    requests: HashMap<String, SharedResult<()>>,
}

/// Per-session thread coordinator. Construct with [`ThreadFront::new`].
pub struct ThreadFront {
    this: Weak<ThreadFront>,
    gateway: Arc<dyn Gateway>,
    config: RewindConfig,
    sources: SourceRegistry,
    pauses: PauseRegistry,
    targets: EpochCache<(ExecutionPoint, TargetKind), PauseDescription>,
    /// Advanced on every time warp; results computed for an older
    /// generation of the current pause are dropped.
    pause_epoch: Epoch,
    state: Mutex<ThreadState>,
    events: EventEmitter<ThreadEvent>,
    session: Resolver<SessionId>,
    session_waiter: Waiter<SessionId>,
    recording_target: Resolver<RecordingTarget>,
    recording_target_waiter: Waiter<RecordingTarget>,
    initialized: Resolver<()>,
    initialized_waiter: Waiter<()>,
    loading_has_begun: Resolver<()>,
    loading_has_begun_waiter: Waiter<()>,
    breakpoints: Mutex<IndexMap<BreakpointId, Location>>,
    positions: Mutex<HashMap<SourceId, SharedResult<Vec<SameLineSourceLocations>>>>,
    discovery: OnceCell<()>,
    load: Mutex<LoadState>,
    annotations: Mutex<AnnotationState>,
    console: Mutex<Option<ConsoleMessageCallback>>,
    listener_ids: Mutex<Vec<ListenerId>>,
}

impl ThreadFront {
    /// Create the coordinator for one session and subscribe it to the
    /// gateway's notifications.
    pub fn new(gateway: Arc<dyn Gateway>, config: &RewindConfig) -> ThreadResult<Arc<Self>> {
        let config = config.effective();
        config.validate_or_err()?;

        let (session, session_waiter) = deferred();
        let (recording_target, recording_target_waiter) = deferred();
        let (initialized, initialized_waiter) = deferred();
        let (loading_has_begun, loading_has_begun_waiter) = deferred();
        if !config.session.require_initial_warp {
            initialized.resolve(());
        }

        let front = Arc::new_cyclic(|this| ThreadFront {
            this: this.clone(),
            pauses: PauseRegistry::new(Arc::clone(&gateway)),
            targets: EpochCache::new(CacheConfig::from(&config.resume_targets)),
            gateway,
            sources: SourceRegistry::new(),
            pause_epoch: Epoch::new(),
            state: Mutex::new(ThreadState {
                current_point: ExecutionPoint::zero(),
                current_time: 0.0,
                current_has_frames: false,
                current_pause: None,
                async_pauses: Vec::new(),
                session_id: None,
            }),
            events: EventEmitter::new(),
            session,
            session_waiter,
            recording_target,
            recording_target_waiter,
            initialized,
            initialized_waiter,
            loading_has_begun,
            loading_has_begun_waiter,
            breakpoints: Mutex::new(IndexMap::new()),
            positions: Mutex::new(HashMap::new()),
            discovery: OnceCell::new(),
            load: Mutex::new(LoadState::default()),
            annotations: Mutex::new(AnnotationState::default()),
            console: Mutex::new(None),
            listener_ids: Mutex::new(Vec::new()),
            config,
        });
        front.register_listeners();
        debug!(name = ?front.config.name, "thread front created");
        Ok(front)
    }

    fn register_listeners(&self) {
        let kinds = [
            NotificationKind::NewSource,
            NotificationKind::LoadedRegions,
            NotificationKind::Annotations,
            NotificationKind::NewMessage,
        ];
        let mut ids = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let this = self.this.clone();
            ids.push(self.gateway.add_listener(
                kind,
                Arc::new(move |notification: &Notification| {
                    if let Some(front) = this.upgrade() {
                        front.on_notification(notification);
                    }
                }),
            ));
        }
        self.listener_ids.lock().extend(ids);
    }

    fn on_notification(&self, notification: &Notification) {
        match notification {
            Notification::NewSource(source) => self.sources.register_source(source.clone()),
            Notification::LoadedRegions(regions) => self.on_loaded_regions(regions),
            Notification::Annotations(annotations) => self.on_annotations(annotations),
            Notification::NewMessage(message) => self.on_console_message((**message).clone()),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn config(&self) -> &RewindConfig {
        &self.config
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn pauses(&self) -> &PauseRegistry {
        &self.pauses
    }

    // Events

    pub fn subscribe<F>(&self, kind: ThreadEventKind, handler: F) -> Subscription<ThreadEventKind>
    where
        F: Fn(&ThreadEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, subscription: &Subscription<ThreadEventKind>) -> bool {
        self.events.unsubscribe(subscription)
    }

    fn emit(&self, event: ThreadEvent) {
        self.events.emit(&event);
    }

    // Session

    /// Bind the session and classify the recording from its build id.
    pub async fn set_session_id(&self, session_id: SessionId) -> ThreadResult<RecordingTarget> {
        if session_id.is_empty() {
            return Err(invariant("session id must not be empty"));
        }
        self.state.lock().session_id = Some(session_id.clone());
        self.session.resolve(session_id.clone());
        info!(%session_id, "session established");

        let build_id = self.gateway.build_id().await?;
        let target = RecordingTarget::from_build_id(&build_id);
        self.recording_target.resolve(target);
        debug!(%build_id, ?target, "recording target resolved");
        Ok(target)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.state.lock().session_id.clone()
    }

    pub async fn wait_for_session(&self) -> SessionId {
        self.session_waiter.wait().await
    }

    pub async fn recording_target(&self) -> RecordingTarget {
        self.recording_target_waiter.wait().await
    }

    /// Release resume operations held back until the initial warp.
    pub fn mark_initialized(&self) {
        if self.initialized.resolve(()) {
            info!("thread front initialized");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.is_resolved()
    }

    /// Warp to the end of the recording and release the initial-warp barrier.
    pub async fn warp_to_endpoint(&self) -> ThreadResult<PausedEvent> {
        self.wait_for_session().await;
        let endpoint = self.gateway.endpoint().await?;
        self.time_warp(endpoint.point.clone(), endpoint.time, false, None);
        self.mark_initialized();
        Ok(PausedEvent {
            point: endpoint.point,
            time: endpoint.time,
            has_frames: false,
            frame: None,
        })
    }

    // Position

    pub fn current_point(&self) -> ExecutionPoint {
        self.state.lock().current_point.clone()
    }

    pub fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    pub fn current_point_has_frames(&self) -> bool {
        self.state.lock().current_has_frames
    }

    /// Jump to a known point. The current pause is recreated lazily.
    pub fn time_warp(
        &self,
        point: ExecutionPoint,
        time: f64,
        has_frames: bool,
        frame: Option<MappedLocation>,
    ) {
        {
            let mut state = self.state.lock();
            state.current_point = point.clone();
            state.current_time = time;
            state.current_has_frames = has_frames;
            state.current_pause = None;
            state.async_pauses.clear();
        }
        let generation = self.pause_epoch.advance();
        debug!(%point, time, has_frames, generation = generation.value(), "time warp");
        self.emit(ThreadEvent::CurrentPause(None));
        self.emit(ThreadEvent::Paused(PausedEvent {
            point,
            time,
            has_frames,
            frame,
        }));
    }

    /// Jump to the point of an existing pause and make it current.
    pub fn time_warp_to_pause(&self, pause: Arc<Pause>) -> ThreadResult<()> {
        let Some(has_frames) = pause.has_frames() else {
            return Err(invariant(format!(
                "pause at {} has unknown frame state",
                pause.point()
            )));
        };
        let point = pause.point().clone();
        let time = pause.time();
        {
            let mut state = self.state.lock();
            state.current_point = point.clone();
            state.current_time = time;
            state.current_has_frames = has_frames;
            state.current_pause = Some(Arc::clone(&pause));
            state.async_pauses.clear();
        }
        self.pause_epoch.advance();
        debug!(%point, time, has_frames, "time warp to pause");
        self.emit(ThreadEvent::CurrentPause(Some(pause)));
        self.emit(ThreadEvent::Paused(PausedEvent {
            point,
            time,
            has_frames,
            frame: None,
        }));
        Ok(())
    }

    fn emit_paused_at_current(&self) {
        let event = {
            let state = self.state.lock();
            PausedEvent {
                point: state.current_point.clone(),
                time: state.current_time,
                has_frames: state.current_has_frames,
                frame: None,
            }
        };
        self.emit(ThreadEvent::Paused(event));
    }
}

impl Drop for ThreadFront {
    fn drop(&mut self) {
        for id in self.listener_ids.get_mut().drain(..) {
            self.gateway.remove_listener(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::protocol::{Source, SourceKind};
    use rewind_core::{MemoryGateway, Recording};

    fn front() -> (Arc<MemoryGateway>, Arc<ThreadFront>) {
        let gateway = Arc::new(MemoryGateway::new(
            Recording::new("macOS-chromium-103")
                .with_source(Source::new("g", SourceKind::ScriptSource))
                .with_step(1, 1.0, vec![], 0)
                .with_step(2, 2.0, vec![Location::new("g", 1, 0)], 0)
                .fully_loaded(),
        ));
        let front = ThreadFront::new(gateway.clone(), &RewindConfig::default()).unwrap();
        (gateway, front)
    }

    fn record(front: &ThreadFront) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            ThreadEventKind::Paused,
            ThreadEventKind::Resumed,
            ThreadEventKind::CurrentPause,
        ] {
            let log = Arc::clone(&log);
            front.subscribe(kind, move |event| {
                let entry = match event {
                    ThreadEvent::Paused(p) => format!("paused:{}", p.point),
                    ThreadEvent::Resumed => "resumed".to_string(),
                    ThreadEvent::CurrentPause(p) => format!("current:{}", p.is_some()),
                    ThreadEvent::Evaluation(_) => "evaluation".to_string(),
                };
                log.lock().push(entry);
            });
        }
        log
    }

    #[tokio::test]
    async fn test_set_session_resolves_target() {
        let (_gateway, front) = front();
        assert!(front.session_id().is_none());
        let target = front.set_session_id("s1".to_string()).await.unwrap();
        assert_eq!(target, RecordingTarget::Chromium);
        assert_eq!(front.wait_for_session().await, "s1");
        assert_eq!(front.recording_target().await, RecordingTarget::Chromium);
    }

    #[tokio::test]
    async fn test_empty_session_id_rejected() {
        let (_gateway, front) = front();
        assert!(front.set_session_id(String::new()).await.is_err());
    }

    #[test]
    fn test_time_warp_clears_pause_and_emits() {
        let (_gateway, front) = front();
        let log = record(&front);
        front.current_pause();
        front.time_warp(ExecutionPoint::from(2), 2.0, true, None);
        assert_eq!(front.current_point(), ExecutionPoint::from(2));
        assert!(front.current_point_has_frames());
        assert!(front.state.lock().current_pause.is_none());
        assert_eq!(
            *log.lock(),
            vec!["current:true", "current:false", "paused:2"]
        );
    }

    #[test]
    fn test_time_warp_to_pause_requires_frame_state() {
        let (_gateway, front) = front();
        let pause = front.pauses.ensure_pause(&ExecutionPoint::from(2), 2.0);
        assert!(front.time_warp_to_pause(Arc::clone(&pause)).is_err());

        let known = front.pauses.instantiate_pause(
            "p".to_string(),
            &ExecutionPoint::from(1),
            1.0,
            false,
            Default::default(),
        );
        front.time_warp_to_pause(Arc::clone(&known)).unwrap();
        assert!(Arc::ptr_eq(&front.current_pause(), &known));
        assert_eq!(front.current_time(), 1.0);
    }

    #[tokio::test]
    async fn test_warp_to_endpoint_initializes() {
        let (_gateway, front) = front();
        assert!(!front.is_initialized());
        front.set_session_id("s".to_string()).await.unwrap();
        let paused = front.warp_to_endpoint().await.unwrap();
        assert_eq!(paused.point, ExecutionPoint::from(2));
        assert!(front.is_initialized());
    }

    #[test]
    fn test_initial_warp_can_be_disabled() {
        let gateway = Arc::new(MemoryGateway::new(Recording::new("x")));
        let mut config = RewindConfig::default();
        config.session.require_initial_warp = false;
        let front = ThreadFront::new(gateway, &config).unwrap();
        assert!(front.is_initialized());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let gateway = Arc::new(MemoryGateway::new(Recording::new("x")));
        let mut config = RewindConfig::default();
        config.logging.targets.insert("not a module".to_string(), Default::default());
        assert!(ThreadFront::new(gateway, &config).is_err());
    }

    #[test]
    fn test_drop_removes_listeners() {
        let (gateway, front) = front();
        drop(front);
        // A notification after drop reaches nobody and must not panic.
        gateway.notify(&Notification::NewSource(Source::new("x", SourceKind::Other)));
    }
}
