use std::sync::Arc;

use futures::future::{join_all, FutureExt};
use indexmap::IndexMap;
use rewind_core::protocol::{BreakpointId, Location, SameLineSourceLocations, SourceRange};
use rewind_core::{CacheStats, GatewayError, ThreadError, ThreadResult};
use tracing::{debug, trace};

use super::ThreadFront;

impl ThreadFront {
    /// Install a breakpoint at `line:column` in every source corresponding to
    /// `source_id`. Cached resume targets are invalidated.
    pub async fn set_breakpoint(
        &self,
        source_id: &str,
        line: u32,
        column: u32,
        condition: Option<&str>,
    ) -> ThreadResult<()> {
        self.targets
            .invalidate(async {
                self.sources.ensure_all_sources().await;
                let source_ids = self.sources.corresponding_source_ids(source_id)?;
                debug!(source_id, line, column, variants = source_ids.len(), "setting breakpoint");
                join_all(
                    source_ids
                        .iter()
                        .map(|id| self.set_breakpoint_in(id, line, column, condition)),
                )
                .await
                .into_iter()
                .collect::<ThreadResult<Vec<()>>>()?;
                Ok::<(), ThreadError>(())
            })
            .await
    }

    async fn set_breakpoint_in(
        &self,
        source_id: &str,
        line: u32,
        column: u32,
        condition: Option<&str>,
    ) -> ThreadResult<()> {
        let ignore_rejected = self.config.breakpoints.ignore_invalid_locations;
        if self.config.breakpoints.prefetch_positions {
            match self.breakpoint_positions(source_id, None).await {
                Ok(_) => {}
                Err(ThreadError::Remote(GatewayError::Rejected { .. })) if ignore_rejected => {}
                Err(err) => return Err(err),
            }
        }
        let location = Location::new(source_id, line, column);
        match self.gateway.set_breakpoint(&location, condition).await {
            Ok(breakpoint_id) => {
                trace!(%breakpoint_id, source_id, line, column, "breakpoint installed");
                self.breakpoints.lock().insert(breakpoint_id, location);
                Ok(())
            }
            Err(GatewayError::Rejected { code, message, .. }) if ignore_rejected => {
                debug!(source_id, line, column, code, %message, "breakpoint location rejected");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove every installed breakpoint at `line:column` in the sources
    /// corresponding to `source_id`.
    pub async fn remove_breakpoint(&self, source_id: &str, line: u32, column: u32) -> ThreadResult<()> {
        self.targets
            .invalidate(async {
                self.sources.ensure_all_sources().await;
                let source_ids = self.sources.corresponding_source_ids(source_id)?;
                let removed: Vec<(BreakpointId, Location)> = {
                    let mut breakpoints = self.breakpoints.lock();
                    let ids: Vec<BreakpointId> = breakpoints
                        .iter()
                        .filter(|(_, loc)| {
                            source_ids.contains(&loc.source_id)
                                && loc.line == line
                                && loc.column == column
                        })
                        .map(|(id, _)| id.clone())
                        .collect();
                    ids.into_iter()
                        .filter_map(|id| breakpoints.shift_remove(&id).map(|loc| (id, loc)))
                        .collect()
                };
                debug!(source_id, line, column, removed = removed.len(), "removing breakpoint");
                let results =
                    join_all(removed.iter().map(|(id, _)| self.gateway.remove_breakpoint(id))).await;

                // Breakpoints the backend still holds stay tracked.
                let mut first_error = None;
                for ((id, location), result) in removed.into_iter().zip(results) {
                    if let Err(err) = result {
                        debug!(breakpoint_id = %id, error = %err, "breakpoint removal failed");
                        self.breakpoints.lock().insert(id, location);
                        first_error.get_or_insert(err);
                    }
                }
                match first_error {
                    Some(err) => Err(ThreadError::from(err)),
                    None => Ok::<(), ThreadError>(()),
                }
            })
            .await
    }

    /// Set a breakpoint in one chosen source of every group of sources at `url`.
    pub async fn set_breakpoint_by_url(
        &self,
        url: &str,
        line: u32,
        column: u32,
        condition: Option<&str>,
    ) -> ThreadResult<()> {
        let chosen = self.sources.chosen_source_ids_for_url(url).await?;
        join_all(
            chosen
                .iter()
                .map(|c| self.set_breakpoint(&c.source_id, line, column, condition)),
        )
        .await
        .into_iter()
        .collect::<ThreadResult<Vec<()>>>()?;
        Ok(())
    }

    pub async fn remove_breakpoint_by_url(&self, url: &str, line: u32, column: u32) -> ThreadResult<()> {
        let chosen = self.sources.chosen_source_ids_for_url(url).await?;
        join_all(
            chosen
                .iter()
                .map(|c| self.remove_breakpoint(&c.source_id, line, column)),
        )
        .await
        .into_iter()
        .collect::<ThreadResult<Vec<()>>>()?;
        Ok(())
    }

    /// Positions where a breakpoint can be set in `source_id`.
    ///
    /// Whole-source requests are shared between concurrent callers and kept
    /// for the session. A failed request is forgotten so the next caller
    /// retries.
    pub async fn breakpoint_positions(
        &self,
        source_id: &str,
        range: Option<SourceRange>,
    ) -> ThreadResult<Vec<SameLineSourceLocations>> {
        if range.is_some() {
            return Ok(self
                .gateway
                .possible_breakpoints(&source_id.to_string(), range)
                .await?);
        }

        let request = {
            let mut positions = self.positions.lock();
            positions
                .entry(source_id.to_string())
                .or_insert_with(|| {
                    let gateway = Arc::clone(&self.gateway);
                    let source_id = source_id.to_string();
                    async move {
                        trace!(%source_id, "fetching breakpoint positions");
                        Ok::<_, ThreadError>(gateway.possible_breakpoints(&source_id, None).await?)
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };
        let result = request.clone().await;
        if result.is_err() {
            let mut positions = self.positions.lock();
            if positions.get(source_id).is_some_and(|r| r.ptr_eq(&request)) {
                positions.remove(source_id);
            }
        }
        result
    }

    /// Wait until no breakpoint change is in flight.
    pub async fn wait_for_invalidate_commands(&self) {
        self.targets.wait_for_pending_invalidations().await;
    }

    /// Installed breakpoints in installation order.
    pub fn breakpoints(&self) -> IndexMap<BreakpointId, Location> {
        self.breakpoints.lock().clone()
    }

    pub fn resume_target_stats(&self) -> CacheStats {
        self.targets.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_config::RewindConfig;
    use rewind_core::memory::INVALID_LOCATION_CODE;
    use rewind_core::protocol::{Source, SourceKind, TargetKind};
    use rewind_core::{ExecutionPoint, MemoryGateway, Recording};

    fn recording() -> Recording {
        let mut recording = Recording::new("linux-node-1")
            .with_source(
                Source::new("a1", SourceKind::ScriptSource)
                    .with_url("app.js")
                    .with_hash("h"),
            )
            .with_source(
                Source::new("a2", SourceKind::ScriptSource)
                    .with_url("app.js")
                    .with_hash("h"),
            )
            .with_step(1, 1.0, vec![Location::new("a1", 1, 0)], 0)
            .with_step(2, 2.0, vec![Location::new("a1", 5, 0)], 0)
            .fully_loaded();
        recording.breakable.insert(
            "a2".to_string(),
            vec![SameLineSourceLocations {
                line: 1,
                columns: vec![0],
            }],
        );
        recording
    }

    async fn front_with(config: RewindConfig) -> (Arc<MemoryGateway>, Arc<ThreadFront>) {
        let gateway = Arc::new(MemoryGateway::new(recording()));
        let front = ThreadFront::new(gateway.clone(), &config).unwrap();
        front.set_session_id("s".to_string()).await.unwrap();
        front.find_sources(|_| {}).await.unwrap();
        (gateway, front)
    }

    #[tokio::test]
    async fn test_breakpoint_fans_out_and_ignores_rejections() {
        let (gateway, front) = front_with(RewindConfig::default()).await;
        front.set_breakpoint("a1", 5, 0, None).await.unwrap();
        assert_eq!(gateway.call_count("setBreakpoint"), 2);
        let installed: Vec<Location> = front.breakpoints().into_values().collect();
        assert_eq!(installed, vec![Location::new("a1", 5, 0)]);
        assert_eq!(gateway.breakpoints().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_propagates_when_not_ignored() {
        let mut config = RewindConfig::default();
        config.breakpoints.ignore_invalid_locations = false;
        let (_gateway, front) = front_with(config).await;
        let err = front.set_breakpoint("a2", 5, 0, None).await.unwrap_err();
        assert!(matches!(
            err,
            ThreadError::Remote(GatewayError::Rejected { code, .. }) if code == INVALID_LOCATION_CODE
        ));
    }

    #[tokio::test]
    async fn test_remove_breakpoint_clears_every_variant() {
        let (gateway, front) = front_with(RewindConfig::default()).await;
        front.set_breakpoint("a2", 1, 0, None).await.unwrap();
        assert_eq!(front.breakpoints().len(), 2);
        front.remove_breakpoint("a1", 1, 0).await.unwrap();
        assert!(front.breakpoints().is_empty());
        assert!(gateway.breakpoints().is_empty());
        assert_eq!(gateway.call_count("removeBreakpoint"), 2);
    }

    #[tokio::test]
    async fn test_failed_removal_keeps_breakpoint_tracked() {
        let (gateway, front) = front_with(RewindConfig::default()).await;
        front.set_breakpoint("a2", 1, 0, None).await.unwrap();
        gateway.fail_next(
            "removeBreakpoint",
            GatewayError::transport("removeBreakpoint", "reset"),
        );

        assert!(front.remove_breakpoint("a1", 1, 0).await.is_err());
        let mut local: Vec<BreakpointId> = front.breakpoints().into_keys().collect();
        let mut remote: Vec<BreakpointId> = gateway.breakpoints().into_keys().collect();
        local.sort();
        remote.sort();
        assert_eq!(local.len(), 1);
        assert_eq!(local, remote);

        front.remove_breakpoint("a1", 1, 0).await.unwrap();
        assert!(front.breakpoints().is_empty());
        assert!(gateway.breakpoints().is_empty());
    }

    #[tokio::test]
    async fn test_breakpoint_invalidates_resume_targets() {
        let (gateway, front) = front_with(RewindConfig::default()).await;
        let start = ExecutionPoint::from(1);
        let before = front.resume_target(TargetKind::Resume, &start).await.unwrap();
        front.resume_target(TargetKind::Resume, &start).await.unwrap();
        assert_eq!(gateway.call_count("findTarget"), 1);

        front.set_breakpoint("a1", 5, 0, None).await.unwrap();
        let after = front.resume_target(TargetKind::Resume, &start).await.unwrap();
        assert_eq!(gateway.call_count("findTarget"), 2);
        assert_eq!(before.point, after.point);
        assert_eq!(front.resume_target_stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_positions_shared_and_retried_after_failure() {
        let (gateway, front) = front_with(RewindConfig::default()).await;
        gateway.fail_next(
            "getPossibleBreakpoints",
            GatewayError::transport("getPossibleBreakpoints", "reset"),
        );
        assert!(front.breakpoint_positions("a2", None).await.is_err());
        let (a, b) = tokio::join!(
            front.breakpoint_positions("a2", None),
            front.breakpoint_positions("a2", None)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        front.breakpoint_positions("a2", None).await.unwrap();
        assert_eq!(gateway.call_count("getPossibleBreakpoints"), 2);
    }

    #[tokio::test]
    async fn test_breakpoint_by_url() {
        let (gateway, front) = front_with(RewindConfig::default()).await;
        front.set_breakpoint_by_url("app.js", 1, 0, Some("x > 1")).await.unwrap();
        let installed = gateway.breakpoints();
        assert!(!installed.is_empty());
        assert!(installed.values().all(|loc| loc.line == 1));
        front.remove_breakpoint_by_url("app.js", 1, 0).await.unwrap();
        assert!(gateway.breakpoints().is_empty());
        front.wait_for_invalidate_commands().await;
    }
}
