//! Data shapes exchanged with the replay backend.
//!
//! These mirror the JSON structures of the recording protocol. Identifiers
//! are opaque server-assigned strings.

use serde::{Deserialize, Serialize};

use crate::point::ExecutionPoint;

pub type SessionId = String;
pub type SourceId = String;
pub type PauseId = String;
pub type FrameId = String;
pub type ScopeId = String;
pub type ObjectId = String;
pub type BreakpointId = String;

/// Kind of a source known to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    /// Script as executed by the engine (the generated code).
    #[serde(alias = "generated")]
    ScriptSource,
    /// Original source recovered through a source map.
    SourceMapped,
    /// Pretty-printed rendering of a minified source.
    PrettyPrinted,
    /// Script embedded in an HTML document.
    InlineScript,
    /// HTML document containing inline scripts.
    Html,
    Other,
}

/// Metadata for one source, as announced by a new-source notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub source_id: SourceId,
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated_source_ids: Vec<SourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Source {
    pub fn new(source_id: impl Into<SourceId>, kind: SourceKind) -> Self {
        Source {
            source_id: source_id.into(),
            kind,
            url: None,
            generated_source_ids: Vec::new(),
            content_hash: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_generated(mut self, ids: &[&str]) -> Self {
        self.generated_source_ids = ids.iter().map(|id| id.to_string()).collect();
        self
    }
}

/// A line/column position inside some source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

/// A position inside a specific source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub source_id: SourceId,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(source_id: impl Into<SourceId>, line: u32, column: u32) -> Self {
        Location {
            source_id: source_id.into(),
            line,
            column,
        }
    }
}

/// The same generated location expressed in every source that maps it.
pub type MappedLocation = Vec<Location>;

/// Breakable columns on one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SameLineSourceLocations {
    pub line: u32,
    pub columns: Vec<u32>,
}

/// Inclusive range of positions within a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: SourcePosition,
    pub end: SourcePosition,
}

impl SourceRange {
    pub fn contains(&self, line: u32, column: u32) -> bool {
        let pos = (line, column);
        (self.start.line, self.start.column) <= pos && pos <= (self.end.line, self.end.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContents {
    pub contents: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeStampedPoint {
    pub point: ExecutionPoint,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeStampedPointRange {
    pub begin: TimeStampedPoint,
    pub end: TimeStampedPoint,
}

impl TimeStampedPointRange {
    pub fn contains_time(&self, time: f64) -> bool {
        self.begin.time <= time && time <= self.end.time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub begin: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointRange {
    pub begin: ExecutionPoint,
    pub end: ExecutionPoint,
}

impl PointRange {
    pub fn contains(&self, point: &ExecutionPoint) -> bool {
        &self.begin <= point && point <= &self.end
    }
}

/// Regions of the recording the backend is loading or has loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadedRegions {
    #[serde(default)]
    pub loading: Vec<TimeStampedPointRange>,
    #[serde(default)]
    pub loaded: Vec<TimeStampedPointRange>,
    #[serde(default)]
    pub indexed: Vec<TimeStampedPointRange>,
}

impl LoadedRegions {
    /// Whether `time` falls inside any loaded region.
    pub fn is_time_loaded(&self, time: f64) -> bool {
        self.loaded.iter().any(|region| region.contains_time(time))
    }
}

/// Where execution is (or would be) paused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseDescription {
    pub point: ExecutionPoint,
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<MappedLocation>,
}

impl PauseDescription {
    pub fn has_frames(&self) -> bool {
        self.frame.is_some()
    }
}

pub type PointDescription = PauseDescription;

/// Which way to move from a point when resuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    Resume,
    Rewind,
    StepOver,
    StepIn,
    StepOut,
    ReverseStepOver,
}

impl TargetKind {
    pub const ALL: [TargetKind; 6] = [
        TargetKind::Resume,
        TargetKind::Rewind,
        TargetKind::StepOver,
        TargetKind::StepIn,
        TargetKind::StepOut,
        TargetKind::ReverseStepOver,
    ];

    /// Protocol command used to find this kind of target.
    pub fn command(&self) -> &'static str {
        match self {
            TargetKind::Resume => "findResumeTarget",
            TargetKind::Rewind => "findRewindTarget",
            TargetKind::StepOver => "findStepOverTarget",
            TargetKind::StepIn => "findStepInTarget",
            TargetKind::StepOut => "findStepOutTarget",
            TargetKind::ReverseStepOver => "findReverseStepOverTarget",
        }
    }

    pub fn is_backward(&self) -> bool {
        matches!(self, TargetKind::Rewind | TargetKind::ReverseStepOver)
    }
}

/// Application that produced the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingTarget {
    Gecko,
    Chromium,
    Node,
    Unknown,
}

impl RecordingTarget {
    pub fn from_build_id(build_id: &str) -> Self {
        if build_id.contains("gecko") {
            RecordingTarget::Gecko
        } else if build_id.contains("chromium") {
            RecordingTarget::Chromium
        } else if build_id.contains("node") {
            RecordingTarget::Node
        } else {
            RecordingTarget::Unknown
        }
    }
}

/// A value as reported by the backend. Primitive values are inlined, other
/// values refer to an object snapshot by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Value {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectId>,
    #[serde(default)]
    pub unavailable: bool,
}

impl Value {
    pub fn primitive(value: impl Into<serde_json::Value>) -> Self {
        Value {
            value: Some(value.into()),
            object: None,
            unavailable: false,
        }
    }

    pub fn object(id: impl Into<ObjectId>) -> Self {
        Value {
            value: None,
            object: Some(id.into()),
            unavailable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    #[serde(flatten)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeType {
    Global,
    Function,
    Block,
    With,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub scope_id: ScopeId,
    #[serde(rename = "type")]
    pub kind: ScopeType,
    #[serde(default)]
    pub bindings: Vec<NamedValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub frame_id: FrameId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub location: MappedLocation,
    #[serde(default)]
    pub scope_chain: Vec<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSnapshot {
    pub object_id: ObjectId,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<serde_json::Value>,
}

/// Data describing program state at a pause. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PauseData {
    #[serde(default)]
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub objects: Vec<ObjectSnapshot>,
}

impl PauseData {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.scopes.is_empty() && self.objects.is_empty()
    }

    /// Add everything in `other` that is not already known, by id.
    pub fn merge(&mut self, other: PauseData) {
        for frame in other.frames {
            if !self.frames.iter().any(|f| f.frame_id == frame.frame_id) {
                self.frames.push(frame);
            }
        }
        for scope in other.scopes {
            if !self.scopes.iter().any(|s| s.scope_id == scope.scope_id) {
                self.scopes.push(scope);
            }
        }
        for object in other.objects {
            if !self.objects.iter().any(|o| o.object_id == object.object_id) {
                self.objects.push(object);
            }
        }
    }
}

/// Reply to a create-pause request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseCreated {
    pub pause_id: PauseId,
    pub has_frames: bool,
    #[serde(default)]
    pub data: PauseData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<Value>,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub data: PauseData,
}

/// Bounding rectangle of a DOM node: `[left, top, right, bottom]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBounds {
    pub node: ObjectId,
    pub rect: [f64; 4],
}

impl NodeBounds {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let [left, top, right, bottom] = self.rect;
        left <= x && x <= right && top <= y && y <= bottom
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub point: ExecutionPoint,
    pub time: f64,
    pub kind: String,
    pub contents: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
    Trace,
    Assert,
}

/// Console message. Carries its own pause snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub source: String,
    pub level: MessageLevel,
    pub text: String,
    pub point: PointDescription,
    pub pause_id: PauseId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
    #[serde(default)]
    pub argument_values: Vec<Value>,
    #[serde(default)]
    pub data: PauseData,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMessagesResult {
    pub overflow: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagesInRange {
    pub messages: Vec<Message>,
    pub overflow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyboardEvent {
    pub point: ExecutionPoint,
    pub time: f64,
    pub kind: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub point: ExecutionPoint,
    pub time: f64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub id: String,
    pub point: ExecutionPoint,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEventInfo {
    pub id: String,
    pub time: f64,
    pub event: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkRequests {
    pub requests: Vec<RequestInfo>,
    pub events: Vec<RequestEventInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSourceContentsMatch {
    pub location: Location,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMatch {
    pub location: Location,
    pub function_name: String,
    #[serde(default)]
    pub param_names: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_wire_names() {
        let kind: SourceKind = serde_json::from_str("\"prettyPrinted\"").unwrap();
        assert_eq!(kind, SourceKind::PrettyPrinted);
        let kind: SourceKind = serde_json::from_str("\"generated\"").unwrap();
        assert_eq!(kind, SourceKind::ScriptSource);
        assert_eq!(
            serde_json::to_string(&SourceKind::InlineScript).unwrap(),
            "\"inlineScript\""
        );
    }

    #[test]
    fn test_source_from_json() {
        let json = r#"{"sourceId":"o1","kind":"sourceMapped","url":"a.ts","generatedSourceIds":["g1"]}"#;
        let source: Source = serde_json::from_str(json).unwrap();
        assert_eq!(source.generated_source_ids, vec!["g1"]);
        assert!(source.content_hash.is_none());
    }

    #[test]
    fn test_recording_target_from_build_id() {
        assert_eq!(
            RecordingTarget::from_build_id("linux-gecko-20220101"),
            RecordingTarget::Gecko
        );
        assert_eq!(
            RecordingTarget::from_build_id("macOS-chromium-103"),
            RecordingTarget::Chromium
        );
        assert_eq!(RecordingTarget::from_build_id("linux-node-16"), RecordingTarget::Node);
        assert_eq!(RecordingTarget::from_build_id("mystery"), RecordingTarget::Unknown);
    }

    #[test]
    fn test_loaded_regions_contains_time() {
        let region = TimeStampedPointRange {
            begin: TimeStampedPoint { point: "10".into(), time: 100.0 },
            end: TimeStampedPoint { point: "20".into(), time: 200.0 },
        };
        let regions = LoadedRegions {
            loaded: vec![region],
            ..Default::default()
        };
        assert!(regions.is_time_loaded(100.0));
        assert!(regions.is_time_loaded(200.0));
        assert!(!regions.is_time_loaded(250.0));
        assert!(!LoadedRegions::default().is_time_loaded(0.0));
    }

    #[test]
    fn test_pause_data_merge_dedupes() {
        let scope = Scope {
            scope_id: "s1".to_string(),
            kind: ScopeType::Function,
            bindings: vec![],
        };
        let mut data = PauseData {
            scopes: vec![scope.clone()],
            ..Default::default()
        };
        data.merge(PauseData {
            scopes: vec![
                scope,
                Scope {
                    scope_id: "s2".to_string(),
                    kind: ScopeType::Block,
                    bindings: vec![],
                },
            ],
            ..Default::default()
        });
        assert_eq!(data.scopes.len(), 2);
    }

    #[test]
    fn test_source_range_contains() {
        let range = SourceRange {
            start: SourcePosition { line: 2, column: 4 },
            end: SourcePosition { line: 5, column: 0 },
        };
        assert!(range.contains(2, 4));
        assert!(range.contains(3, 100));
        assert!(!range.contains(2, 3));
        assert!(!range.contains(5, 1));
    }
}
