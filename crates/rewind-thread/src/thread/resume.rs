//! The resume family: operations that move the current point to a target
//! computed by the backend.

use std::sync::Arc;

use parking_lot::Mutex;
use rewind_core::protocol::{LoadedRegions, PauseDescription, TargetKind};
use rewind_core::{ExecutionPoint, ThreadResult};
use tracing::{debug, warn};

use super::{ThreadEvent, ThreadFront};

/// Where an operation leaves the current point.
#[derive(Debug)]
enum Landing {
    Target(PauseDescription),
    /// Re-assert the current point.
    Stay,
}

/// Handoff between the operation and its `Resumed` emission task.
///
/// Whichever side reaches the lock second performs the landing, so
/// `Resumed` is always delivered before the operation's `Paused`.
#[derive(Default)]
struct Handoff {
    emitted: bool,
    landing: Option<Landing>,
}

impl ThreadFront {
    pub async fn resume(
        self: &Arc<Self>,
        point: Option<ExecutionPoint>,
        regions: &LoadedRegions,
    ) -> Option<PauseDescription> {
        self.resume_operation(TargetKind::Resume, point, regions).await
    }

    pub async fn rewind(
        self: &Arc<Self>,
        point: Option<ExecutionPoint>,
        regions: &LoadedRegions,
    ) -> Option<PauseDescription> {
        self.resume_operation(TargetKind::Rewind, point, regions).await
    }

    pub async fn step_over(
        self: &Arc<Self>,
        point: Option<ExecutionPoint>,
        regions: &LoadedRegions,
    ) -> Option<PauseDescription> {
        self.resume_operation(TargetKind::StepOver, point, regions).await
    }

    pub async fn step_in(
        self: &Arc<Self>,
        point: Option<ExecutionPoint>,
        regions: &LoadedRegions,
    ) -> Option<PauseDescription> {
        self.resume_operation(TargetKind::StepIn, point, regions).await
    }

    pub async fn step_out(
        self: &Arc<Self>,
        point: Option<ExecutionPoint>,
        regions: &LoadedRegions,
    ) -> Option<PauseDescription> {
        self.resume_operation(TargetKind::StepOut, point, regions).await
    }

    pub async fn reverse_step_over(
        self: &Arc<Self>,
        point: Option<ExecutionPoint>,
        regions: &LoadedRegions,
    ) -> Option<PauseDescription> {
        self.resume_operation(TargetKind::ReverseStepOver, point, regions)
            .await
    }

    /// Where an operation of `kind` starting at `point` would stop.
    pub async fn resume_target(
        &self,
        kind: TargetKind,
        point: &ExecutionPoint,
    ) -> ThreadResult<PauseDescription> {
        self.find_resume_target(kind, point).await
    }

    /// Move the current point as a resume operation of `kind` would.
    ///
    /// Emits `Resumed` and then `Paused`, either at the target or, when no
    /// usable target was found, at the unchanged current point. Returns once
    /// both events have been delivered.
    pub async fn resume_operation(
        self: &Arc<Self>,
        kind: TargetKind,
        point: Option<ExecutionPoint>,
        regions: &LoadedRegions,
    ) -> Option<PauseDescription> {
        self.initialized_waiter.wait().await;

        let handoff = Arc::new(Mutex::new(Handoff::default()));
        let emitter = {
            let front = Arc::clone(self);
            let handoff = Arc::clone(&handoff);
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                let landing = {
                    let mut handoff = handoff.lock();
                    handoff.emitted = true;
                    front.emit(ThreadEvent::Resumed);
                    handoff.landing.take()
                };
                if let Some(landing) = landing {
                    tokio::task::yield_now().await;
                    front.land(landing);
                }
            })
        };

        let point = point.unwrap_or_else(|| self.current_point());
        let landing = match self.find_resume_target(kind, &point).await {
            Ok(target) if regions.is_time_loaded(target.time) => Landing::Target(target),
            Ok(target) => {
                debug!(?kind, point = %target.point, time = target.time, "target outside loaded regions");
                Landing::Stay
            }
            Err(err) => {
                warn!(?kind, %point, error = %err, "resume target lookup failed");
                Landing::Stay
            }
        };
        let target = match &landing {
            Landing::Target(target) => Some(target.clone()),
            Landing::Stay => None,
        };

        let now = {
            let mut handoff = handoff.lock();
            if handoff.emitted {
                Some(landing)
            } else {
                handoff.landing = Some(landing);
                None
            }
        };
        if let Some(landing) = now {
            self.land(landing);
        }

        if let Err(err) = emitter.await {
            warn!(?kind, error = %err, "resume emission task failed");
        }
        target
    }

    async fn find_resume_target(
        &self,
        kind: TargetKind,
        point: &ExecutionPoint,
    ) -> ThreadResult<PauseDescription> {
        self.sources.ensure_all_sources().await;
        let gateway = Arc::clone(&self.gateway);
        let mut target = self
            .targets
            .get_or_fetch((point.clone(), kind), || {
                let point = point.clone();
                async move { gateway.find_target(kind, &point).await }
            })
            .await?;
        if let Some(frame) = target.frame.as_mut() {
            self.sources.update_mapped_location(frame)?;
        }
        debug!(?kind, from = %point, to = %target.point, "resume target");
        Ok(target)
    }

    fn land(&self, landing: Landing) {
        match landing {
            Landing::Target(target) => {
                let has_frames = target.has_frames();
                self.time_warp(target.point, target.time, has_frames, target.frame);
            }
            Landing::Stay => self.emit_paused_at_current(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadEventKind;
    use rewind_config::RewindConfig;
    use rewind_core::protocol::{Location, Source, SourceKind};
    use rewind_core::{GatewayError, MemoryGateway, Recording};

    fn recording() -> Recording {
        Recording::new("linux-node-1")
            .with_source(Source::new("g", SourceKind::ScriptSource).with_url("app.js"))
            .with_step(1, 1.0, vec![Location::new("g", 1, 0)], 0)
            .with_step(2, 2.0, vec![Location::new("g", 2, 0)], 1)
            .with_step(3, 3.0, vec![Location::new("g", 3, 0)], 1)
            .with_step(4, 4.0, vec![Location::new("g", 4, 0)], 0)
            .fully_loaded()
    }

    async fn ready(recording: Recording) -> (Arc<MemoryGateway>, Arc<ThreadFront>) {
        let gateway = Arc::new(MemoryGateway::new(recording));
        let mut config = RewindConfig::default();
        config.session.require_initial_warp = false;
        let front = ThreadFront::new(gateway.clone(), &config).unwrap();
        front.set_session_id("s".to_string()).await.unwrap();
        front.find_sources(|_| {}).await.unwrap();
        front.time_warp(ExecutionPoint::from(1), 1.0, true, None);
        (gateway, front)
    }

    fn loaded(gateway: &MemoryGateway) -> LoadedRegions {
        LoadedRegions {
            loaded: gateway.recording().loaded.clone(),
            ..Default::default()
        }
    }

    fn order(front: &ThreadFront) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        front.subscribe(ThreadEventKind::Resumed, move |_| l.lock().push("resumed".into()));
        let l = Arc::clone(&log);
        front.subscribe(ThreadEventKind::Paused, move |event| {
            if let ThreadEvent::Paused(p) = event {
                l.lock().push(format!("paused:{}", p.point));
            }
        });
        log
    }

    #[tokio::test]
    async fn test_step_over_lands_on_target() {
        let (gateway, front) = ready(recording()).await;
        let regions = loaded(&gateway);
        let log = order(&front);
        let target = front.step_over(None, &regions).await.unwrap();
        assert_eq!(target.point, ExecutionPoint::from(4));
        assert_eq!(front.current_point(), ExecutionPoint::from(4));
        assert_eq!(*log.lock(), vec!["resumed", "paused:4"]);
    }

    #[tokio::test]
    async fn test_cached_target_still_resumes_first() {
        let (gateway, front) = ready(recording()).await;
        let regions = loaded(&gateway);
        front
            .resume_target(TargetKind::StepIn, &ExecutionPoint::from(1))
            .await
            .unwrap();
        let log = order(&front);
        front.step_in(None, &regions).await;
        assert_eq!(*log.lock(), vec!["resumed", "paused:2"]);
        assert_eq!(gateway.call_count("findTarget"), 1);
    }

    #[tokio::test]
    async fn test_failed_lookup_reasserts_current_point() {
        let (gateway, front) = ready(recording()).await;
        let regions = loaded(&gateway);
        gateway.fail_next("findTarget", GatewayError::transport("findTarget", "reset"));
        let log = order(&front);
        assert!(front.resume(None, &regions).await.is_none());
        assert_eq!(front.current_point(), ExecutionPoint::from(1));
        assert_eq!(*log.lock(), vec!["resumed", "paused:1"]);
    }

    #[tokio::test]
    async fn test_target_outside_loaded_regions_is_discarded() {
        let (_gateway, front) = ready(recording()).await;
        let log = order(&front);
        let nothing_loaded = LoadedRegions::default();
        assert!(front.step_in(None, &nothing_loaded).await.is_none());
        assert_eq!(front.current_point(), ExecutionPoint::from(1));
        assert_eq!(*log.lock(), vec!["resumed", "paused:1"]);
    }

    #[tokio::test]
    async fn test_explicit_start_point() {
        let (gateway, front) = ready(recording()).await;
        let regions = loaded(&gateway);
        let target = front
            .reverse_step_over(Some(ExecutionPoint::from(4)), &regions)
            .await
            .unwrap();
        assert_eq!(target.point, ExecutionPoint::from(1));
        let target = front.rewind(None, &regions).await.unwrap();
        assert_eq!(target.point, ExecutionPoint::from(1));
    }
}
