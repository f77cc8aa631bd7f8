use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Key the script side adds to variable tables so that empty tables still encode as JSON
/// objects. It never names a real variable.
pub const OBJECT_MARKER_KEY: &str = "__isObject";

/// Run state of one execution context, as understood by the backend.
///
/// Encoded on the wire as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ResumeMode {
    Resume,
    Paused,
    StepInto,
    StepOver,
    StepOut,
}

impl ResumeMode {
    pub fn code(self) -> u8 {
        match self {
            Self::Resume => 0,
            Self::Paused => 1,
            Self::StepInto => 2,
            Self::StepOver => 3,
            Self::StepOut => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown resume mode {0}")]
pub struct UnknownResumeMode(pub u8);

impl From<ResumeMode> for u8 {
    fn from(mode: ResumeMode) -> Self {
        mode.code()
    }
}

impl TryFrom<u8> for ResumeMode {
    type Error = UnknownResumeMode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Resume),
            1 => Ok(Self::Paused),
            2 => Ok(Self::StepInto),
            3 => Ok(Self::StepOver),
            4 => Ok(Self::StepOut),
            other => Err(UnknownResumeMode(other)),
        }
    }
}

/// Reply of `get_info`: which resource is being debugged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    #[serde(default)]
    pub resource_name: Option<String>,
    /// Resource directory relative to the server's resources root (e.g. `debug/`).
    #[serde(default)]
    pub resource_path: Option<String>,
}

impl ResourceInfo {
    /// The backend reports an empty info object until the debugged resource has started.
    pub fn is_ready(&self) -> bool {
        let filled = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.is_empty());
        filled(&self.resource_name) && filled(&self.resource_path)
    }
}

/// A variable value captured when execution paused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableValue {
    /// Strings, numbers, booleans and `nil`, already rendered by the script side.
    Scalar(String),
    /// A nested table, rendered as compact JSON.
    Aggregate(String),
}

impl VariableValue {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Scalar(s),
            Value::Null => Self::Scalar("nil".to_owned()),
            Value::Bool(_) | Value::Number(_) => Self::Scalar(value.to_string()),
            Value::Array(_) | Value::Object(_) => Self::Aggregate(value.to_string()),
        }
    }

    pub fn rendered(&self) -> &str {
        match self {
            Self::Scalar(s) | Self::Aggregate(s) => s,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "string",
            Self::Aggregate(_) => "table",
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rendered())
    }
}

pub type VariableMap = BTreeMap<String, VariableValue>;

/// Accepts an object, `null`, or an array (the script side's encoding of an empty table).
fn deserialize_variables<'de, D>(deserializer: D) -> Result<VariableMap, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Object(map)) = value else {
        return Ok(VariableMap::new());
    };

    Ok(map
        .into_iter()
        .filter(|(name, _)| name != OBJECT_MARKER_KEY)
        .map(|(name, value)| (name, VariableValue::from_json(value)))
        .collect())
}

/// Reply of `get_resume_mode`: the run state plus the snapshot taken at the last pause.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResumeState {
    pub resume_mode: ResumeMode,
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub current_line: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub local_variables: VariableMap,
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub upvalue_variables: VariableMap,
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub global_variables: VariableMap,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SetBreakpointBody<'a> {
    pub file: &'a str,
    pub line: i64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SetResumeModeBody {
    pub resume_mode: ResumeMode,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct PendingEvalBody<'a> {
    pub pending_eval: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EvalResultBody {
    #[serde(default)]
    pub eval_result: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CommandBody<'a> {
    pub command: &'a str,
}
