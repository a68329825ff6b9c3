//! Access to the pause at the current point and to the pauses of its async
//! parent frames.

use std::sync::Arc;

use rewind_core::protocol::{
    EvaluationResult, Frame, FrameId, NodeBounds, ObjectId, PointDescription, Scope,
};
use rewind_core::{EpochToken, ThreadError, ThreadResult};
use tracing::{debug, trace};

use super::{EvaluationEvent, ThreadEvent, ThreadFront};
use crate::pause::Pause;

/// Arguments for [`ThreadFront::evaluate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluateRequest {
    /// `None` or `Some(0)` evaluates in the current pause; `Some(i)` in the
    /// i-th async parent pause.
    pub async_index: Option<usize>,
    pub frame_id: Option<FrameId>,
    pub text: String,
    pub pure: bool,
}

impl EvaluateRequest {
    pub fn new(text: impl Into<String>) -> Self {
        EvaluateRequest {
            text: text.into(),
            ..Default::default()
        }
    }
}

impl ThreadFront {
    /// The pause at the current point, created on first use.
    pub fn current_pause(&self) -> Arc<Pause> {
        let created = {
            let mut state = self.state.lock();
            if let Some(pause) = &state.current_pause {
                return Arc::clone(pause);
            }
            let pause = self
                .pauses
                .ensure_pause(&state.current_point, state.current_time);
            state.current_pause = Some(Arc::clone(&pause));
            pause
        };
        trace!(point = %created.point(), "current pause set");
        self.emit(ThreadEvent::CurrentPause(Some(Arc::clone(&created))));
        created
    }

    /// The innermost async parent pause, or the current pause if none are loaded.
    pub fn last_async_pause(&self) -> Arc<Pause> {
        if let Some(pause) = self.state.lock().async_pauses.last() {
            return Arc::clone(pause);
        }
        self.current_pause()
    }

    pub fn pause_for_async_index(&self, async_index: Option<usize>) -> ThreadResult<Arc<Pause>> {
        match async_index {
            None | Some(0) => Ok(self.current_pause()),
            Some(index) => self
                .state
                .lock()
                .async_pauses
                .get(index - 1)
                .cloned()
                .ok_or(ThreadError::NoPauseForAsyncIndex(index)),
        }
    }

    /// Frames at the current point, innermost first.
    ///
    /// Empty when the current pause changed while the frames were loading.
    pub async fn frames(&self) -> ThreadResult<Vec<Frame>> {
        if !self.current_point_has_frames() {
            return Ok(Vec::new());
        }
        let generation = self.pause_epoch.current();
        let pause = self.current_pause();
        let frames = pause.frames().await?;
        if !self.is_current_pause(&pause, generation) {
            debug!(point = %pause.point(), "frames stale after load");
            return Ok(Vec::new());
        }
        Ok(frames)
    }

    /// Load the frames of the next async parent of the current stack.
    ///
    /// Returns an empty list when the stack has no further parent or the
    /// current pause changed while loading.
    pub async fn load_async_parent_frames(&self) -> ThreadResult<Vec<Frame>> {
        let generation = self.pause_epoch.current();
        self.current_pause().ensure_loaded().await?;
        let base = self.last_async_pause();
        let base_frames = base.frames().await?;
        let Some(outermost) = base_frames.last() else {
            return Ok(Vec::new());
        };
        let steps = base.frame_steps(&outermost.frame_id).await?;
        if !self.is_last_async_pause(&base, generation) {
            debug!("async parent frames stale after frame steps");
            return Ok(Vec::new());
        }
        let Some(entry) = steps.first() else {
            return Ok(Vec::new());
        };

        let entry_pause = self.pauses.ensure_pause(&entry.point, entry.time);
        self.state.lock().async_pauses.push(Arc::clone(&entry_pause));
        let frames = entry_pause.frames().await?;
        if !self.is_last_async_pause(&entry_pause, generation) {
            debug!("async parent frames stale after entry frames");
            return Ok(Vec::new());
        }
        Ok(frames.into_iter().skip(1).collect())
    }

    pub async fn scopes(&self, async_index: Option<usize>, frame_id: &FrameId) -> ThreadResult<Vec<Scope>> {
        self.pause_for_async_index(async_index)?.scopes(frame_id).await
    }

    pub async fn frame_steps(
        &self,
        async_index: Option<usize>,
        frame_id: &FrameId,
    ) -> ThreadResult<Vec<PointDescription>> {
        self.pause_for_async_index(async_index)?
            .frame_steps(frame_id)
            .await
    }

    /// Evaluate an expression and publish the result as an `Evaluation` event.
    pub async fn evaluate(&self, request: EvaluateRequest) -> ThreadResult<EvaluationResult> {
        let pause = self.pause_for_async_index(request.async_index)?;
        let result = pause
            .evaluate(request.frame_id.as_ref(), &request.text, request.pure)
            .await?;
        self.emit(ThreadEvent::Evaluation(Box::new(EvaluationEvent {
            async_index: request.async_index,
            frame_id: request.frame_id,
            text: request.text,
            result: result.clone(),
        })));
        Ok(result)
    }

    // DOM queries against the current pause. Each returns nothing when there
    // is no session or the current pause changed while the query ran.

    pub async fn root_dom_node(&self) -> ThreadResult<Option<ObjectId>> {
        let Some((pause, generation)) = self.dom_pause() else {
            return Ok(None);
        };
        pause.ensure_loaded().await?;
        let document = pause.load_document().await?;
        Ok(self.is_current_pause(&pause, generation).then_some(document))
    }

    pub async fn search_dom(&self, query: &str) -> ThreadResult<Option<Vec<ObjectId>>> {
        let Some((pause, generation)) = self.dom_pause() else {
            return Ok(None);
        };
        pause.ensure_loaded().await?;
        let nodes = pause.search_dom(query).await?;
        Ok(self.is_current_pause(&pause, generation).then_some(nodes))
    }

    /// Load the bounding boxes used by [`mouse_target`](Self::mouse_target).
    /// Returns whether the loaded pause is still current.
    pub async fn load_mouse_targets(&self) -> ThreadResult<bool> {
        let Some((pause, generation)) = self.dom_pause() else {
            return Ok(false);
        };
        pause.ensure_loaded().await?;
        pause.load_mouse_targets().await?;
        Ok(self.is_current_pause(&pause, generation))
    }

    pub async fn mouse_target(
        &self,
        x: f64,
        y: f64,
        node_ids: Option<&[ObjectId]>,
    ) -> ThreadResult<Option<NodeBounds>> {
        let Some((pause, generation)) = self.dom_pause() else {
            return Ok(None);
        };
        pause.ensure_loaded().await?;
        let bounds = pause.mouse_target(x, y, node_ids).await?;
        Ok(bounds.filter(|_| self.is_current_pause(&pause, generation)))
    }

    fn dom_pause(&self) -> Option<(Arc<Pause>, EpochToken)> {
        self.session_id()?;
        let generation = self.pause_epoch.current();
        Some((self.current_pause(), generation))
    }

    pub(super) fn is_current_pause(&self, pause: &Arc<Pause>, generation: EpochToken) -> bool {
        self.pause_epoch.is_current(generation)
            && self
                .state
                .lock()
                .current_pause
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, pause))
    }

    fn is_last_async_pause(&self, pause: &Arc<Pause>, generation: EpochToken) -> bool {
        if !self.pause_epoch.is_current(generation) {
            return false;
        }
        let state = self.state.lock();
        state
            .async_pauses
            .last()
            .or(state.current_pause.as_ref())
            .is_some_and(|last| Arc::ptr_eq(last, pause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadEventKind;
    use parking_lot::Mutex;
    use rewind_config::RewindConfig;
    use rewind_core::protocol::{Location, Source, SourceKind};
    use rewind_core::{ExecutionPoint, MemoryGateway, Recording};

    fn recording() -> Recording {
        let mut recording = Recording::new("linux-chromium-1")
            .with_source(Source::new("g", SourceKind::ScriptSource).with_url("page.js"))
            .with_step(1, 1.0, vec![Location::new("g", 1, 0)], 0)
            .with_step(2, 2.0, vec![Location::new("g", 2, 0)], 1)
            .with_step(3, 3.0, vec![Location::new("g", 3, 0)], 2)
            .with_step(4, 4.0, vec![], 0)
            .fully_loaded();
        recording.dom_nodes = vec![NodeBounds {
            node: "canvas".to_string(),
            rect: [0.0, 0.0, 50.0, 50.0],
        }];
        recording
    }

    async fn front() -> (Arc<MemoryGateway>, Arc<ThreadFront>) {
        let gateway = Arc::new(MemoryGateway::new(recording()));
        let front = ThreadFront::new(gateway.clone(), &RewindConfig::default()).unwrap();
        front.set_session_id("s".to_string()).await.unwrap();
        (gateway, front)
    }

    #[tokio::test]
    async fn test_current_pause_identity() {
        let (_gateway, front) = front().await;
        front.time_warp(ExecutionPoint::from(2), 2.0, true, None);
        let first = front.current_pause();
        assert!(Arc::ptr_eq(&first, &front.current_pause()));

        front.time_warp(ExecutionPoint::from(3), 3.0, true, None);
        let other = front.current_pause();
        assert!(!Arc::ptr_eq(&first, &other));

        front.time_warp(ExecutionPoint::from(2), 2.0, true, None);
        assert!(Arc::ptr_eq(&first, &front.current_pause()));
    }

    #[tokio::test]
    async fn test_frames_empty_without_frames() {
        let (gateway, front) = front().await;
        front.time_warp(ExecutionPoint::from(4), 4.0, false, None);
        assert!(front.frames().await.unwrap().is_empty());
        assert_eq!(gateway.call_count("createPause"), 0);

        front.time_warp(ExecutionPoint::from(3), 3.0, true, None);
        assert_eq!(front.frames().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_frames_dropped_after_warp() {
        let (gateway, front) = front().await;
        gateway.hold_pauses();
        front.time_warp(ExecutionPoint::from(2), 2.0, true, None);

        let frames = {
            let front = Arc::clone(&front);
            tokio::spawn(async move { front.frames().await })
        };
        while gateway.call_count("createPause") == 0 {
            tokio::task::yield_now().await;
        }
        front.time_warp(ExecutionPoint::from(3), 3.0, true, None);
        gateway.release_pauses();

        assert!(frames.await.unwrap().unwrap().is_empty());
        assert_eq!(front.frames().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_async_parent_pauses() {
        let (_gateway, front) = front().await;
        front.time_warp(ExecutionPoint::from(3), 3.0, true, None);
        let current = front.current_pause();
        assert!(Arc::ptr_eq(&front.last_async_pause(), &current));

        front.load_async_parent_frames().await.unwrap();
        let parent = front.pause_for_async_index(Some(1)).unwrap();
        assert_eq!(parent.point(), &ExecutionPoint::from(1));
        assert!(Arc::ptr_eq(&front.last_async_pause(), &parent));
        assert!(Arc::ptr_eq(&front.pause_for_async_index(None).unwrap(), &current));
        assert!(matches!(
            front.pause_for_async_index(Some(2)),
            Err(ThreadError::NoPauseForAsyncIndex(2))
        ));

        front.time_warp(ExecutionPoint::from(2), 2.0, true, None);
        assert!(front.pause_for_async_index(Some(1)).is_err());
    }

    #[tokio::test]
    async fn test_stale_generation_detected() {
        let (_gateway, front) = front().await;
        front.time_warp(ExecutionPoint::from(2), 2.0, true, None);
        let pause = front.current_pause();
        let generation = front.pause_epoch.current();
        assert!(front.is_current_pause(&pause, generation));

        front.time_warp(ExecutionPoint::from(2), 2.0, true, None);
        let same = front.current_pause();
        assert!(Arc::ptr_eq(&pause, &same));
        assert!(!front.is_current_pause(&pause, generation));
    }

    #[tokio::test]
    async fn test_evaluate_emits_event() {
        let (_gateway, front) = front().await;
        front.time_warp(ExecutionPoint::from(2), 2.0, true, None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        front.subscribe(ThreadEventKind::Evaluation, move |event| {
            if let ThreadEvent::Evaluation(evaluation) = event {
                s.lock().push(evaluation.text.clone());
            }
        });
        let result = front.evaluate(EvaluateRequest::new("missing")).await.unwrap();
        assert!(result.exception.is_some());
        assert_eq!(*seen.lock(), vec!["missing".to_string()]);

        let bad = EvaluateRequest {
            async_index: Some(3),
            ..EvaluateRequest::new("x")
        };
        assert!(front.evaluate(bad).await.is_err());
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_dom_queries() {
        let (gateway, front) = front().await;
        front.time_warp(ExecutionPoint::from(2), 2.0, true, None);
        assert_eq!(front.root_dom_node().await.unwrap().as_deref(), Some("document"));
        assert!(front.load_mouse_targets().await.unwrap());
        let hit = front.mouse_target(10.0, 10.0, None).await.unwrap().unwrap();
        assert_eq!(hit.node, "canvas");
        assert!(front.mouse_target(90.0, 90.0, None).await.unwrap().is_none());
        assert_eq!(gateway.call_count("getAllBoundingClientRects"), 1);
    }

    #[tokio::test]
    async fn test_dom_queries_need_session() {
        let gateway = Arc::new(MemoryGateway::new(recording()));
        let front = ThreadFront::new(gateway.clone(), &RewindConfig::default()).unwrap();
        assert!(front.root_dom_node().await.unwrap().is_none());
        assert!(front.search_dom("div").await.unwrap().is_none());
        assert!(!front.load_mouse_targets().await.unwrap());
        assert_eq!(gateway.call_count("createPause"), 0);
    }
}
