//! Session-wide queries and notification streams: sources, loaded regions,
//! annotations, console messages and recorded events.

use std::sync::Arc;

use futures::future::{join_all, try_join, FutureExt};
use indexmap::IndexMap;
use rewind_config::ProcessingLevel;
use rewind_core::protocol::{
    Annotation, FunctionMatch, KeyboardEvent, LoadedRegions, Location, Message, MessagesInRange,
    NavigationEvent, NetworkRequests, PointRange, SearchSourceContentsMatch, Source,
    SourceContents, SourceId, TimeRange, TimeStampedPoint,
};
use rewind_core::{ThreadError, ThreadResult};
use tracing::{debug, info, trace, warn};

use super::{AnnotationCallback, ConsoleMessageCallback, LoadedRegionsListener, ThreadFront};
use crate::pause::Pause;

const ALL_ANNOTATIONS: &str = "all";

/// Where the current pause is stopped, in the preferred source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocationInfo {
    pub source_url: String,
    pub source_id: SourceId,
    pub line: u32,
    pub column: u32,
}

impl ThreadFront {
    fn require_session(&self) -> ThreadResult<()> {
        self.session_id().map(|_| ()).ok_or(ThreadError::NoSession)
    }

    // Sources

    /// Discover every source, then pass each one to `on_source`.
    ///
    /// Discovery runs once per session. Later calls wait for it and replay
    /// the registry.
    pub async fn find_sources<F>(&self, mut on_source: F) -> ThreadResult<()>
    where
        F: FnMut(&Source),
    {
        self.wait_for_session().await;
        self.discovery
            .get_or_try_init(|| async {
                self.gateway.find_sources().await?;
                if let Err(err) = self.sources.mark_all_sources_found() {
                    warn!(error = %err, "source grouping incomplete");
                }
                Ok::<(), ThreadError>(())
            })
            .await?;
        self.sources.ensure_all_sources().await;
        for source in self.sources.all_sources() {
            on_source(&source);
        }
        Ok(())
    }

    pub async fn source_contents(&self, source_id: &str) -> ThreadResult<SourceContents> {
        self.require_session()?;
        Ok(self.gateway.source_contents(&source_id.to_string()).await?)
    }

    pub async fn search_sources<F>(
        &self,
        query: &str,
        source_ids: Option<&[SourceId]>,
        mut on_matches: F,
    ) -> ThreadResult<()>
    where
        F: FnMut(&[SearchSourceContentsMatch]),
    {
        self.wait_for_session().await;
        let matches = self.gateway.search_source_contents(query, source_ids).await?;
        debug!(query, matches = matches.len(), "source search finished");
        on_matches(&matches);
        Ok(())
    }

    pub async fn search_functions<F>(
        &self,
        query: &str,
        source_ids: Option<&[SourceId]>,
        mut on_matches: F,
    ) -> ThreadResult<()>
    where
        F: FnMut(&[FunctionMatch]),
    {
        self.wait_for_session().await;
        let matches = self.gateway.search_functions(query, source_ids).await?;
        debug!(query, matches = matches.len(), "function search finished");
        on_matches(&matches);
        Ok(())
    }

    pub async fn event_handler_count(&self, event_type: &str) -> ThreadResult<u64> {
        self.wait_for_session().await;
        Ok(self.gateway.event_handler_count(event_type).await?)
    }

    pub async fn event_handler_counts(&self, event_types: &[&str]) -> ThreadResult<IndexMap<String, u64>> {
        let counts = join_all(event_types.iter().map(|t| self.event_handler_count(t))).await;
        event_types
            .iter()
            .zip(counts)
            .map(|(event_type, count)| Ok((event_type.to_string(), count?)))
            .collect()
    }

    /// The preferred location among all sources that map `location`.
    pub async fn preferred_mapped_location(&self, location: &Location) -> ThreadResult<Location> {
        let mapped = self.gateway.mapped_location(location).await?;
        self.sources.preferred_location(&mapped).await
    }

    pub async fn current_pause_source_location(&self) -> ThreadResult<Option<SourceLocationInfo>> {
        let generation = self.pause_epoch.current();
        let Some(pause) = self.state.lock().current_pause.clone() else {
            return Ok(None);
        };
        let frames = pause.frames().await?;
        let Some(frame) = frames.first() else {
            return Ok(None);
        };
        let preferred = self.sources.preferred_location(&frame.location).await?;
        let Some(source_url) = self.sources.source_url(&preferred.source_id).await else {
            return Ok(None);
        };
        if !self.is_current_pause(&pause, generation) {
            debug!(point = %pause.point(), "source location stale after lookup");
            return Ok(None);
        }
        Ok(Some(SourceLocationInfo {
            source_url,
            source_id: preferred.source_id,
            line: preferred.line,
            column: preferred.column,
        }))
    }

    // Session

    /// Ask the backend to process the recording, at the configured level
    /// unless `level` is given.
    pub async fn ensure_processed(&self, level: Option<ProcessingLevel>) -> ThreadResult<()> {
        self.wait_for_session().await;
        let level = level.unwrap_or(self.config.session.processing_level);
        debug!(level = level.as_str(), "ensuring recording is processed");
        Ok(self.gateway.ensure_processed(level).await?)
    }

    /// Register a loaded-regions listener. The first call starts the stream;
    /// later listeners are immediately given the latest regions.
    pub async fn listen_for_load_changes(&self, listener: LoadedRegionsListener) -> ThreadResult<()> {
        let replay = {
            let mut load = self.load.lock();
            load.listeners.push(Arc::clone(&listener));
            if load.listening {
                Some(load.most_recent.clone())
            } else {
                load.listening = true;
                None
            }
        };
        if let Some(recent) = replay {
            if let Some(regions) = recent {
                listener(&regions);
            }
            return Ok(());
        }

        self.wait_for_session().await;
        if let Err(err) = self.gateway.listen_for_load_changes().await {
            self.load.lock().listening = false;
            return Err(err.into());
        }
        info!("listening for load changes");
        Ok(())
    }

    pub(super) fn on_loaded_regions(&self, regions: &LoadedRegions) {
        let listeners = {
            let mut load = self.load.lock();
            load.most_recent = Some(regions.clone());
            load.listeners.clone()
        };
        if self.loading_has_begun.resolve(()) {
            debug!("loading has begun");
        }
        trace!(loaded = regions.loaded.len(), listeners = listeners.len(), "loaded regions");
        for listener in listeners {
            listener(regions);
        }
    }

    /// The most recent loaded regions reported by the backend.
    pub fn loaded_regions(&self) -> Option<LoadedRegions> {
        self.load.lock().most_recent.clone()
    }

    pub async fn wait_for_loading_to_begin(&self) {
        self.loading_has_begun_waiter.wait().await;
    }

    /// Focus loading on `region`, unloading what lies outside it up to `end_time`.
    pub async fn load_region(&self, region: TimeRange, end_time: f64) -> ThreadResult<()> {
        self.require_session()?;
        debug!(begin = region.begin, end = region.end, "loading region");
        try_join(
            self.gateway.unload_region(TimeRange {
                begin: 0.0,
                end: region.begin,
            }),
            self.gateway.unload_region(TimeRange {
                begin: region.end,
                end: end_time,
            }),
        )
        .await?;
        Ok(self.gateway.load_region(region).await?)
    }

    pub async fn endpoint(&self) -> ThreadResult<TimeStampedPoint> {
        self.require_session()?;
        Ok(self.gateway.endpoint().await?)
    }

    pub async fn point_near_time(&self, time: f64) -> ThreadResult<TimeStampedPoint> {
        self.require_session()?;
        Ok(self.gateway.point_near_time(time).await?)
    }

    // Annotations

    pub async fn annotation_kinds(&self) -> ThreadResult<Vec<String>> {
        self.require_session()?;
        Ok(self.gateway.annotation_kinds().await?)
    }

    /// Deliver annotations of `kind` (every kind when `None`) to `callback`.
    ///
    /// One backend request is made per kind. Callers asking for a kind that
    /// is already requested share the request.
    pub async fn annotations(&self, callback: AnnotationCallback, kind: Option<&str>) -> ThreadResult<()> {
        self.wait_for_session().await;
        let key = kind.unwrap_or(ALL_ANNOTATIONS).to_string();
        let request = {
            let mut annotations = self.annotations.lock();
            annotations
                .callbacks
                .entry(key.clone())
                .or_default()
                .push(callback);
            annotations
                .requests
                .entry(key.clone())
                .or_insert_with(|| {
                    let gateway = Arc::clone(&self.gateway);
                    let kind = (key != ALL_ANNOTATIONS).then(|| key.clone());
                    async move {
                        gateway.find_annotations(kind.as_deref()).await?;
                        Ok::<(), ThreadError>(())
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };
        let result = request.clone().await;
        if result.is_err() {
            let mut annotations = self.annotations.lock();
            if annotations.requests.get(&key).is_some_and(|r| r.ptr_eq(&request)) {
                annotations.requests.remove(&key);
            }
        }
        result
    }

    pub(super) fn on_annotations(&self, annotations: &[Annotation]) {
        let mut by_kind: IndexMap<&str, Vec<Annotation>> = IndexMap::new();
        for annotation in annotations {
            by_kind
                .entry(annotation.kind.as_str())
                .or_default()
                .push(annotation.clone());
        }
        for (kind, group) in by_kind {
            let callbacks: Vec<AnnotationCallback> = {
                let state = self.annotations.lock();
                [kind, ALL_ANNOTATIONS]
                    .iter()
                    .filter_map(|k| state.callbacks.get(*k))
                    .flatten()
                    .cloned()
                    .collect()
            };
            trace!(kind, count = group.len(), callbacks = callbacks.len(), "annotations");
            for callback in callbacks {
                callback(&group);
            }
        }
    }

    // Recorded events

    pub async fn find_keyboard_events(&self) -> ThreadResult<Vec<KeyboardEvent>> {
        self.require_session()?;
        Ok(self.gateway.find_keyboard_events().await?)
    }

    pub async fn find_navigation_events(&self) -> ThreadResult<Vec<NavigationEvent>> {
        self.require_session()?;
        Ok(self.gateway.find_navigation_events().await?)
    }

    pub async fn find_network_requests(&self) -> ThreadResult<NetworkRequests> {
        self.wait_for_session().await;
        Ok(self.gateway.find_network_requests().await?)
    }

    // Console

    /// Stream every console message to `on_message` along with the pause it
    /// was logged at. `on_overflow` runs if the backend reports that not all
    /// messages could be returned.
    pub async fn find_console_messages<F>(
        &self,
        on_message: ConsoleMessageCallback,
        on_overflow: F,
    ) -> ThreadResult<()>
    where
        F: FnOnce(),
    {
        self.ensure_processed(Some(ProcessingLevel::Basic)).await?;
        *self.console.lock() = Some(on_message);
        let result = self.gateway.find_messages().await?;
        if result.overflow {
            warn!("too many console messages, not all will be shown");
            on_overflow();
        }
        Ok(())
    }

    pub async fn find_messages_in_range(&self, range: &PointRange) -> ThreadResult<MessagesInRange> {
        self.require_session()?;
        Ok(self.gateway.find_messages_in_range(range).await?)
    }

    pub(super) fn on_console_message(&self, mut message: Message) {
        let Some(callback) = self.console.lock().clone() else {
            trace!(pause_id = %message.pause_id, "console message without a listener");
            return;
        };
        if self.sources.is_complete() {
            self.deliver_message(&callback, &mut message);
            return;
        }

        // Locations can only be normalised once every source is known.
        let Some(front) = self.this.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    front.sources.ensure_all_sources().await;
                    front.deliver_message(&callback, &mut message);
                });
            }
            Err(err) => warn!(error = %err, "dropping console message outside a runtime"),
        }
    }

    fn deliver_message(&self, callback: &ConsoleMessageCallback, message: &mut Message) {
        match self.wire_up_message(message) {
            Ok(pause) => callback(pause, message),
            Err(err) => warn!(pause_id = %message.pause_id, error = %err, "failed to wire up console message"),
        }
    }

    /// Normalise a message's locations and instantiate the pause it carries.
    pub fn wire_up_message(&self, message: &mut Message) -> ThreadResult<Arc<Pause>> {
        if let Some(frame) = message.point.frame.as_mut() {
            self.sources.update_mapped_location(frame)?;
        }
        if let Some(source_id) = message.source_id.as_mut() {
            if let Some(first) = self.sources.corresponding_source_ids(source_id)?.into_iter().next() {
                *source_id = first;
            }
        }
        Ok(self.pauses.instantiate_pause(
            message.pause_id.clone(),
            &message.point.point,
            message.point.time,
            message.point.frame.is_some(),
            message.data.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rewind_config::RewindConfig;
    use rewind_core::protocol::{MessageLevel, PauseDescription, SourceKind};
    use rewind_core::{ExecutionPoint, MemoryGateway, Recording};

    fn annotation(point: u64, kind: &str) -> Annotation {
        Annotation {
            point: ExecutionPoint::from(point),
            time: point as f64,
            kind: kind.to_string(),
            contents: "{}".to_string(),
        }
    }

    fn message(point: u64, source_id: &str) -> Message {
        Message {
            source: "ConsoleAPI".to_string(),
            level: MessageLevel::Info,
            text: format!("log {point}"),
            point: PauseDescription {
                point: ExecutionPoint::from(point),
                time: point as f64,
                frame: Some(vec![Location::new(source_id, 3, 0)]),
            },
            pause_id: format!("msg-{point}"),
            source_id: Some(source_id.to_string()),
            argument_values: Vec::new(),
            data: Default::default(),
        }
    }

    fn recording() -> Recording {
        let mut recording = Recording::new("macOS-gecko-1")
            .with_source(
                Source::new("s1", SourceKind::ScriptSource)
                    .with_url("a.js")
                    .with_hash("h"),
            )
            .with_source(
                Source::new("s2", SourceKind::ScriptSource)
                    .with_url("a.js")
                    .with_hash("h"),
            )
            .with_contents("s1", "let x = 1;")
            .with_step(1, 1.0, vec![Location::new("s1", 1, 0)], 0)
            .with_step(2, 2.0, vec![Location::new("s2", 3, 0)], 0)
            .with_step(3, 3.0, vec![Location::new("s1", 4, 0)], 0)
            .fully_loaded();
        recording.annotations = vec![
            annotation(1, "redux"),
            annotation(2, "react"),
            annotation(3, "redux"),
        ];
        recording.messages = vec![message(2, "s2")];
        recording.messages_overflow = true;
        recording.event_handler_counts.insert("click".to_string(), 3);
        recording
    }

    async fn front() -> (Arc<MemoryGateway>, Arc<ThreadFront>) {
        let gateway = Arc::new(MemoryGateway::new(recording()));
        let front = ThreadFront::new(gateway.clone(), &RewindConfig::default()).unwrap();
        front.set_session_id("s".to_string()).await.unwrap();
        (gateway, front)
    }

    #[tokio::test]
    async fn test_find_sources_replays_registry() {
        let (gateway, front) = front().await;
        let mut seen = Vec::new();
        front.find_sources(|s| seen.push(s.source_id.clone())).await.unwrap();
        assert_eq!(seen, vec!["s1", "s2"]);
        assert!(front.sources().is_complete());

        let mut again = 0;
        front.find_sources(|_| again += 1).await.unwrap();
        assert_eq!(again, 2);
        assert_eq!(gateway.call_count("findSources"), 1);
    }

    #[tokio::test]
    async fn test_requests_without_session_fail() {
        let gateway = Arc::new(MemoryGateway::new(recording()));
        let front = ThreadFront::new(gateway, &RewindConfig::default()).unwrap();
        assert!(matches!(front.source_contents("s1").await, Err(ThreadError::NoSession)));
        assert!(matches!(front.endpoint().await, Err(ThreadError::NoSession)));
    }

    #[tokio::test]
    async fn test_load_changes_replayed_to_late_listeners() {
        let (gateway, front) = front().await;
        let first = Arc::new(Mutex::new(0));
        let f = Arc::clone(&first);
        front
            .listen_for_load_changes(Arc::new(move |_| *f.lock() += 1))
            .await
            .unwrap();
        assert_eq!(*first.lock(), 1);
        front.wait_for_loading_to_begin().await;

        let late = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&late);
        front
            .listen_for_load_changes(Arc::new(move |r: &LoadedRegions| l.lock().push(r.loaded.len())))
            .await
            .unwrap();
        assert_eq!(*late.lock(), vec![1]);
        assert_eq!(gateway.call_count("listenForLoadChanges"), 1);

        front
            .load_region(TimeRange { begin: 1.0, end: 2.0 }, 3.0)
            .await
            .unwrap();
        assert_eq!(gateway.call_count("unloadRegion"), 2);
        assert_eq!(*first.lock(), 4);
        assert!(front.loaded_regions().is_some());
    }

    #[tokio::test]
    async fn test_annotations_fan_out_by_kind() {
        let (gateway, front) = front().await;
        let redux = Arc::new(Mutex::new(Vec::new()));
        let all = Arc::new(Mutex::new(Vec::new()));

        let r = Arc::clone(&redux);
        let callback: AnnotationCallback = Arc::new(move |batch: &[Annotation]| {
            r.lock().extend(batch.iter().map(|a| a.point.to_string()));
        });
        front.annotations(callback, Some("redux")).await.unwrap();
        assert_eq!(*redux.lock(), vec!["1", "3"]);

        let a = Arc::clone(&all);
        let callback: AnnotationCallback = Arc::new(move |batch: &[Annotation]| {
            a.lock().extend(batch.iter().map(|a| a.kind.clone()));
        });
        front.annotations(callback, None).await.unwrap();
        assert_eq!(*all.lock(), vec!["redux", "redux", "react"]);
        assert_eq!(*redux.lock(), vec!["1", "3", "1", "3"]);
        assert_eq!(gateway.call_count("findAnnotations"), 2);

        let noop: AnnotationCallback = Arc::new(|_: &[Annotation]| {});
        front.annotations(noop, Some("redux")).await.unwrap();
        assert_eq!(gateway.call_count("findAnnotations"), 2);
    }

    #[tokio::test]
    async fn test_console_messages_wait_for_sources() {
        let (gateway, front) = front().await;
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let d = Arc::clone(&delivered);
        let on_message: ConsoleMessageCallback = Arc::new(move |pause: Arc<Pause>, message: &Message| {
            d.lock().push((pause.pause_id(), message.source_id.clone()));
        });
        let mut overflowed = false;
        front
            .find_console_messages(on_message, || overflowed = true)
            .await
            .unwrap();
        assert!(overflowed);
        assert!(delivered.lock().is_empty());
        assert_eq!(gateway.processed_level(), Some(ProcessingLevel::Basic));

        front.find_sources(|_| {}).await.unwrap();
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            *delivered.lock(),
            vec![(Some("msg-2".to_string()), Some("s1".to_string()))]
        );
        let pause = front.pauses().get(&ExecutionPoint::from(2)).unwrap();
        assert_eq!(pause.has_frames(), Some(true));
    }

    #[tokio::test]
    async fn test_event_handler_counts() {
        let (_gateway, front) = front().await;
        let counts = front.event_handler_counts(&["click", "keydown"]).await.unwrap();
        assert_eq!(counts.get("click"), Some(&3));
        assert_eq!(counts.get("keydown"), Some(&0));
    }

    #[tokio::test]
    async fn test_source_location_dropped_after_warp() {
        let (_gateway, front) = front().await;
        front.time_warp(ExecutionPoint::from(2), 2.0, true, None);
        front.current_pause();

        let lookup = {
            let front = Arc::clone(&front);
            tokio::spawn(async move { front.current_pause_source_location().await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!lookup.is_finished());

        front.time_warp(ExecutionPoint::from(3), 3.0, true, None);
        front.current_pause();
        front.find_sources(|_| {}).await.unwrap();
        assert!(lookup.await.unwrap().unwrap().is_none());
        assert_eq!(front.current_point(), ExecutionPoint::from(3));

        let info = front.current_pause_source_location().await.unwrap().unwrap();
        assert_eq!(info.line, 4);
    }

    #[tokio::test]
    async fn test_current_pause_source_location() {
        let (_gateway, front) = front().await;
        front.find_sources(|_| {}).await.unwrap();
        assert!(front.current_pause_source_location().await.unwrap().is_none());

        front.time_warp(ExecutionPoint::from(2), 2.0, true, None);
        front.current_pause();
        let info = front.current_pause_source_location().await.unwrap().unwrap();
        assert_eq!(info.source_id, "s1");
        assert_eq!(info.source_url, "a.js");
        assert_eq!(info.line, 3);

        let preferred = front
            .preferred_mapped_location(&Location::new("s2", 3, 0))
            .await
            .unwrap();
        assert_eq!(preferred.source_id, "s1");
    }
}
