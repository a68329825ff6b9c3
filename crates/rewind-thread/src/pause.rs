//! Program state at one execution point, loaded lazily from the backend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rewind_core::protocol::{
    EvaluationResult, Frame, FrameId, NodeBounds, ObjectId, PauseData, PauseId, PointDescription,
    Scope,
};
use rewind_core::{ExecutionPoint, Gateway, GatewayError, ThreadResult};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

type Lazy<T> = Arc<OnceCell<T>>;

/// A pause at one point of the recording.
///
/// Every loader is idempotent: concurrent and repeated calls share a single
/// remote request once it succeeds. A failed load is retried by the next
/// caller. Loaded state only ever grows.
pub struct Pause {
    gateway: Arc<dyn Gateway>,
    point: ExecutionPoint,
    time: f64,
    pause_id: OnceCell<PauseId>,
    has_frames: Mutex<Option<bool>>,
    data: Mutex<PauseData>,
    frames: OnceCell<Vec<Frame>>,
    scopes: Mutex<HashMap<FrameId, Lazy<Vec<Scope>>>>,
    frame_steps: Mutex<HashMap<FrameId, Lazy<Vec<PointDescription>>>>,
    document: OnceCell<ObjectId>,
    mouse_targets: OnceCell<Vec<NodeBounds>>,
}

impl std::fmt::Debug for Pause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pause")
            .field("point", &self.point)
            .field("time", &self.time)
            .field("pause_id", &self.pause_id.get())
            .field("has_frames", &*self.has_frames.lock())
            .finish()
    }
}

impl Pause {
    /// A pause that still needs a create round trip.
    pub fn created(gateway: Arc<dyn Gateway>, point: ExecutionPoint, time: f64) -> Self {
        Pause {
            gateway,
            point,
            time,
            pause_id: OnceCell::new(),
            has_frames: Mutex::new(None),
            data: Mutex::new(PauseData::default()),
            frames: OnceCell::new(),
            scopes: Mutex::new(HashMap::new()),
            frame_steps: Mutex::new(HashMap::new()),
            document: OnceCell::new(),
            mouse_targets: OnceCell::new(),
        }
    }

    /// A pause pushed by the backend with its id and some data already known.
    pub fn instantiated(
        gateway: Arc<dyn Gateway>,
        pause_id: PauseId,
        point: ExecutionPoint,
        time: f64,
        has_frames: bool,
        data: PauseData,
    ) -> Self {
        let pause = Pause::created(gateway, point, time);
        let _ = pause.pause_id.set(pause_id);
        *pause.has_frames.lock() = Some(has_frames);
        *pause.data.lock() = data;
        pause
    }

    pub fn point(&self) -> &ExecutionPoint {
        &self.point
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Whether the point has script frames, once known.
    pub fn has_frames(&self) -> Option<bool> {
        *self.has_frames.lock()
    }

    pub fn pause_id(&self) -> Option<PauseId> {
        self.pause_id.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.pause_id.initialized()
    }

    /// Snapshot of everything loaded so far.
    pub fn data(&self) -> PauseData {
        self.data.lock().clone()
    }

    pub fn add_data(&self, data: PauseData) {
        if !data.is_empty() {
            self.data.lock().merge(data);
        }
    }

    /// Create the pause on the backend if needed and return its id.
    pub async fn ensure_loaded(&self) -> ThreadResult<PauseId> {
        let id = self
            .pause_id
            .get_or_try_init(|| async {
                debug!(point = %self.point, "creating pause");
                let created = self.gateway.create_pause(&self.point).await?;
                *self.has_frames.lock() = Some(created.has_frames);
                self.add_data(created.data);
                Ok::<_, GatewayError>(created.pause_id)
            })
            .await?;
        Ok(id.clone())
    }

    pub async fn frames(&self) -> ThreadResult<Vec<Frame>> {
        let pause_id = self.ensure_loaded().await?;
        if self.has_frames() == Some(false) {
            return Ok(Vec::new());
        }
        let frames = self
            .frames
            .get_or_try_init(|| async {
                let frames = self.gateway.frames(&pause_id).await?;
                self.add_data(PauseData {
                    frames: frames.clone(),
                    ..Default::default()
                });
                Ok::<_, GatewayError>(frames)
            })
            .await?;
        Ok(frames.clone())
    }

    pub async fn scopes(&self, frame_id: &FrameId) -> ThreadResult<Vec<Scope>> {
        let pause_id = self.ensure_loaded().await?;
        let cell = Arc::clone(self.scopes.lock().entry(frame_id.clone()).or_default());
        let scopes = cell
            .get_or_try_init(|| async {
                let scopes = self.gateway.scopes(&pause_id, frame_id).await?;
                self.add_data(PauseData {
                    scopes: scopes.clone(),
                    ..Default::default()
                });
                Ok::<_, GatewayError>(scopes)
            })
            .await?;
        Ok(scopes.clone())
    }

    pub async fn frame_steps(&self, frame_id: &FrameId) -> ThreadResult<Vec<PointDescription>> {
        let pause_id = self.ensure_loaded().await?;
        let cell = Arc::clone(self.frame_steps.lock().entry(frame_id.clone()).or_default());
        let steps = cell
            .get_or_try_init(|| async {
                Ok::<_, GatewayError>(self.gateway.frame_steps(&pause_id, frame_id).await?)
            })
            .await?;
        Ok(steps.clone())
    }

    /// Evaluate `text` in the given frame, or globally. Never cached.
    pub async fn evaluate(
        &self,
        frame_id: Option<&FrameId>,
        text: &str,
        pure: bool,
    ) -> ThreadResult<EvaluationResult> {
        let pause_id = self.ensure_loaded().await?;
        trace!(point = %self.point, text, "evaluating");
        let result = self.gateway.evaluate(&pause_id, frame_id, text, pure).await?;
        self.add_data(result.data.clone());
        Ok(result)
    }

    pub async fn load_document(&self) -> ThreadResult<ObjectId> {
        let pause_id = self.ensure_loaded().await?;
        let document = self
            .document
            .get_or_try_init(|| async { self.gateway.document(&pause_id).await })
            .await?;
        Ok(document.clone())
    }

    pub fn document_node(&self) -> Option<ObjectId> {
        self.document.get().cloned()
    }

    /// Query the DOM. Never cached.
    pub async fn search_dom(&self, query: &str) -> ThreadResult<Vec<ObjectId>> {
        let pause_id = self.ensure_loaded().await?;
        Ok(self.gateway.search_dom(&pause_id, query).await?)
    }

    pub async fn load_mouse_targets(&self) -> ThreadResult<()> {
        let pause_id = self.ensure_loaded().await?;
        self.mouse_targets
            .get_or_try_init(|| async { self.gateway.bounding_client_rects(&pause_id).await })
            .await?;
        Ok(())
    }

    /// The topmost node under `(x, y)`, optionally restricted to `node_ids`.
    pub async fn mouse_target(
        &self,
        x: f64,
        y: f64,
        node_ids: Option<&[ObjectId]>,
    ) -> ThreadResult<Option<NodeBounds>> {
        self.load_mouse_targets().await?;
        Ok(self.mouse_targets.get().and_then(|targets| {
            targets
                .iter()
                .filter(|b| node_ids.map_or(true, |ids| ids.contains(&b.node)))
                .find(|b| b.contains(x, y))
                .cloned()
        }))
    }
}

/// Exactly one [`Pause`] per execution point for the life of the session.
pub struct PauseRegistry {
    gateway: Arc<dyn Gateway>,
    pauses: Mutex<HashMap<ExecutionPoint, Arc<Pause>>>,
}

impl PauseRegistry {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        PauseRegistry {
            gateway,
            pauses: Mutex::new(HashMap::new()),
        }
    }

    /// The pause for `point`, created unloaded if new.
    pub fn ensure_pause(&self, point: &ExecutionPoint, time: f64) -> Arc<Pause> {
        let mut pauses = self.pauses.lock();
        Arc::clone(pauses.entry(point.clone()).or_insert_with(|| {
            trace!(%point, "new pause");
            Arc::new(Pause::created(Arc::clone(&self.gateway), point.clone(), time))
        }))
    }

    /// The pause for `point`, seeded with backend-provided state if new.
    /// An existing pause is returned unchanged apart from absorbing `data`.
    pub fn instantiate_pause(
        &self,
        pause_id: PauseId,
        point: &ExecutionPoint,
        time: f64,
        has_frames: bool,
        data: PauseData,
    ) -> Arc<Pause> {
        let mut pauses = self.pauses.lock();
        if let Some(existing) = pauses.get(point) {
            existing.add_data(data);
            return Arc::clone(existing);
        }
        let pause = Arc::new(Pause::instantiated(
            Arc::clone(&self.gateway),
            pause_id,
            point.clone(),
            time,
            has_frames,
            data,
        ));
        pauses.insert(point.clone(), Arc::clone(&pause));
        pause
    }

    pub fn get(&self, point: &ExecutionPoint) -> Option<Arc<Pause>> {
        self.pauses.lock().get(point).cloned()
    }

    pub fn len(&self) -> usize {
        self.pauses.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pauses.lock().is_empty()
    }
}
