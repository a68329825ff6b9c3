//! Breakpoint and evaluation commands as issued by a debugger UI.
//!
//! A UI breakpoint may pause, log, or both. Pausing breakpoints go to the
//! [`ThreadFront`]; log actions go to a [`Logpoints`] implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join;
use parking_lot::Mutex;
use rewind_core::protocol::{Frame, FrameId, Location, PointDescription, SourceId, Value};
use rewind_core::{invariant, ThreadResult};
use tracing::{debug, warn};

use crate::thread::{EvaluateRequest, ThreadFront};

pub type LogGroupId = String;

/// Receiver of log actions attached to breakpoints.
#[async_trait]
pub trait Logpoints: Send + Sync {
    fn new_log_group_id(&self) -> LogGroupId;

    async fn set_logpoint(
        &self,
        group: &LogGroupId,
        location: &Location,
        log_value: &str,
        condition: Option<&str>,
    ) -> ThreadResult<()>;

    async fn set_logpoint_by_url(
        &self,
        group: &LogGroupId,
        url: &str,
        line: u32,
        column: u32,
        log_value: &str,
        condition: Option<&str>,
    ) -> ThreadResult<()>;

    async fn remove_logpoint(&self, group: &LogGroupId) -> ThreadResult<()>;

    async fn set_exception_logpoint(&self, group: &LogGroupId) -> ThreadResult<()>;
}

/// A breakpoint position as the UI knows it: by source id when one is
/// selected, otherwise by url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointLocation {
    pub source_url: Option<String>,
    pub source_id: Option<SourceId>,
    pub line: u32,
    pub column: u32,
}

impl BreakpointLocation {
    pub fn in_source(source_id: impl Into<SourceId>, line: u32, column: u32) -> Self {
        BreakpointLocation {
            source_url: None,
            source_id: Some(source_id.into()),
            line,
            column,
        }
    }

    pub fn at_url(url: impl Into<String>, line: u32, column: u32) -> Self {
        BreakpointLocation {
            source_url: Some(url.into()),
            source_id: None,
            line,
            column,
        }
    }
}

/// `"{url}:{sourceId}:{line}:{column}"`, with missing parts left empty.
pub fn location_key(location: &BreakpointLocation) -> String {
    format!(
        "{}:{}:{}:{}",
        location.source_url.as_deref().unwrap_or_default(),
        location.source_id.as_deref().unwrap_or_default(),
        location.line,
        location.column
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointOptions {
    pub condition: Option<String>,
    pub should_pause: bool,
    pub log_value: Option<String>,
    /// Assigned when the breakpoint logs.
    pub log_group_id: Option<LogGroupId>,
}

#[derive(Debug, Clone)]
struct BreakpointDetails {
    location: BreakpointLocation,
    options: BreakpointOptions,
}

/// What an evaluation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluateOutcome {
    Returned(Value),
    Exception(Option<Value>),
}

pub struct ClientCommands {
    thread: Arc<ThreadFront>,
    logpoints: Arc<dyn Logpoints>,
    breakpoints: Mutex<HashMap<String, BreakpointDetails>>,
    exception_group: Mutex<Option<LogGroupId>>,
}

impl ClientCommands {
    pub fn new(thread: Arc<ThreadFront>, logpoints: Arc<dyn Logpoints>) -> Self {
        ClientCommands {
            thread,
            logpoints,
            breakpoints: Mutex::new(HashMap::new()),
            exception_group: Mutex::new(None),
        }
    }

    pub fn thread(&self) -> &Arc<ThreadFront> {
        &self.thread
    }

    pub fn has_breakpoint(&self, location: &BreakpointLocation) -> bool {
        self.breakpoints.lock().contains_key(&location_key(location))
    }

    pub fn breakpoint_options(&self, location: &BreakpointLocation) -> Option<BreakpointOptions> {
        self.breakpoints
            .lock()
            .get(&location_key(location))
            .map(|details| details.options.clone())
    }

    /// Locations of every UI breakpoint.
    pub fn breakpoint_locations(&self) -> Vec<BreakpointLocation> {
        self.breakpoints
            .lock()
            .values()
            .map(|details| details.location.clone())
            .collect()
    }

    fn with_log_group(&self, mut options: BreakpointOptions) -> BreakpointOptions {
        if options.log_value.is_some() {
            options.log_group_id = Some(self.logpoints.new_log_group_id());
        }
        options
    }

    async fn clear_logpoint(&self, key: &str) {
        let group = self
            .breakpoints
            .lock()
            .get(key)
            .and_then(|details| details.options.log_group_id.clone());
        if let Some(group) = group {
            if let Err(err) = self.logpoints.remove_logpoint(&group).await {
                warn!(%group, error = %err, "failed to remove logpoint");
            }
        }
    }

    /// Install a UI breakpoint, replacing whatever was at the same location.
    pub async fn set_breakpoint(
        &self,
        location: BreakpointLocation,
        options: BreakpointOptions,
    ) -> ThreadResult<()> {
        let key = location_key(&location);
        self.clear_logpoint(&key).await;
        let options = self.with_log_group(options);
        self.breakpoints.lock().insert(
            key.clone(),
            BreakpointDetails {
                location: location.clone(),
                options: options.clone(),
            },
        );
        debug!(%key, should_pause = options.should_pause, logs = options.log_value.is_some(), "set breakpoint");

        let condition = options.condition.as_deref();
        let BreakpointLocation { line, column, .. } = location;
        let pause = async {
            if !options.should_pause {
                return Ok(());
            }
            match (&location.source_id, &location.source_url) {
                (Some(source_id), _) => self.thread.set_breakpoint(source_id, line, column, condition).await,
                (None, Some(url)) => self.thread.set_breakpoint_by_url(url, line, column, condition).await,
                (None, None) => Err(invariant("breakpoint location has neither source id nor url")),
            }
        };
        let log = async {
            let (Some(log_value), Some(group)) = (&options.log_value, &options.log_group_id) else {
                return Ok(());
            };
            match (&location.source_id, &location.source_url) {
                (Some(source_id), _) => {
                    let target = Location::new(source_id.clone(), line, column);
                    self.logpoints
                        .set_logpoint(group, &target, log_value, condition)
                        .await
                }
                (None, Some(url)) => {
                    self.logpoints
                        .set_logpoint_by_url(group, url, line, column, log_value, condition)
                        .await
                }
                (None, None) => Err(invariant("logpoint location has neither source id nor url")),
            }
        };
        try_join(pause, log).await?;
        Ok(())
    }

    pub async fn remove_breakpoint(&self, location: &BreakpointLocation) -> ThreadResult<()> {
        let key = location_key(location);
        self.clear_logpoint(&key).await;
        self.breakpoints.lock().remove(&key);
        match (&location.source_id, &location.source_url) {
            (Some(source_id), _) => {
                self.thread
                    .remove_breakpoint(source_id, location.line, location.column)
                    .await
            }
            (None, Some(url)) => {
                self.thread
                    .remove_breakpoint_by_url(url, location.line, location.column)
                    .await
            }
            (None, None) => Err(invariant("breakpoint location has neither source id nor url")),
        }
    }

    /// Log `options.log_value` at `location` without recording a UI
    /// breakpoint. Returns the log group used.
    pub async fn run_analysis(
        &self,
        location: &BreakpointLocation,
        options: BreakpointOptions,
    ) -> ThreadResult<LogGroupId> {
        let options = self.with_log_group(options);
        let (Some(log_value), Some(group)) = (options.log_value, options.log_group_id) else {
            return Err(invariant("analysis requires a log value"));
        };
        let condition = options.condition.as_deref();
        match (&location.source_id, &location.source_url) {
            (Some(source_id), _) => {
                let target = Location::new(source_id.clone(), location.line, location.column);
                self.logpoints
                    .set_logpoint(&group, &target, &log_value, condition)
                    .await?
            }
            (None, Some(url)) => {
                self.logpoints
                    .set_logpoint_by_url(&group, url, location.line, location.column, &log_value, condition)
                    .await?
            }
            (None, None) => return Err(invariant("analysis location has neither source id nor url")),
        }
        Ok(group)
    }

    pub async fn evaluate(
        &self,
        source: &str,
        async_index: Option<usize>,
        frame_id: Option<FrameId>,
    ) -> ThreadResult<EvaluateOutcome> {
        let result = self
            .thread
            .evaluate(EvaluateRequest {
                async_index,
                frame_id,
                text: source.to_string(),
                pure: false,
            })
            .await?;
        if result.failed {
            return Ok(EvaluateOutcome::Exception(Some(Value::primitive(
                "Evaluation failed",
            ))));
        }
        Ok(match result.returned {
            Some(value) => EvaluateOutcome::Returned(value),
            None => EvaluateOutcome::Exception(result.exception),
        })
    }

    pub async fn frames(&self) -> ThreadResult<Vec<Frame>> {
        self.thread.frames().await
    }

    pub async fn load_async_parent_frames(&self) -> ThreadResult<Vec<Frame>> {
        self.thread.load_async_parent_frames().await
    }

    /// Toggle the session-wide exception logpoint.
    pub async fn set_should_log_exceptions(&self, should_log: bool) -> ThreadResult<()> {
        let previous = self.exception_group.lock().take();
        if let Some(group) = previous {
            self.logpoints.remove_logpoint(&group).await?;
        }
        if should_log {
            let group = self.logpoints.new_log_group_id();
            *self.exception_group.lock() = Some(group.clone());
            self.logpoints.set_exception_logpoint(&group).await?;
        }
        Ok(())
    }

    pub async fn fetch_ancestor_frame_positions(
        &self,
        async_index: Option<usize>,
        frame_id: &FrameId,
    ) -> ThreadResult<Vec<PointDescription>> {
        self.thread.frame_steps(async_index, frame_id).await
    }
}
