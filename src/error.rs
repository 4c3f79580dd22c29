use parse_display::Display;

/// Why a path was rejected.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum PathErrorReason {
    #[display("path is empty")]
    Empty,
    #[display("path contains an empty segment")]
    EmptySegment,
    #[display("segment `{0}` is forbidden")]
    Forbidden(String),
    #[display("expected numeric index, found `{0}`")]
    ExpectedIndex(String),
    #[display("index `{0}` is too far past the end of the array")]
    IndexTooLarge(String),
}

/// A path was malformed, empty, or addressed a forbidden property name.
///
/// This error always aborts the operation that produced it; the store is left unchanged.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("invalid path `{path}`: {reason}")]
pub struct InvalidPathError {
    pub path: String,
    pub reason: PathErrorReason,
}

impl InvalidPathError {
    pub(crate) fn new(path: &str, reason: PathErrorReason) -> Self {
        Self {
            path: path.to_string(),
            reason,
        }
    }
}

impl std::error::Error for InvalidPathError {}

/// A whole state (initial, replaced or merged into) was not a JSON object.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("state must be an object, found {found}")]
pub struct InvalidStateError {
    pub found: &'static str,
}

impl std::error::Error for InvalidStateError {}

/// A user-supplied computation (computed value or middleware) failed.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("{source_name} failed: {message}")]
pub struct ComputationError {
    pub source_name: String,
    pub message: String,
}

impl ComputationError {
    pub fn new(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

impl std::error::Error for ComputationError {}

/// A storage backend or JSON codec failure during persistence.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[display("storage failure on `{key}`: {message}")]
    Storage { key: String, message: String },
    #[display("cannot encode `{key}`: {message}")]
    Encode { key: String, message: String },
    #[display("cannot decode `{key}`: {message}")]
    Decode { key: String, message: String },
}

impl PersistenceError {
    pub fn storage(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Storage {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

impl std::error::Error for PersistenceError {}

pub(crate) fn value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
