//! Response envelope for control operations
//!
//! Every control operation produces exactly one `ServiceResponse`. The
//! wire shape is fixed: `{"code":<int>,"message":"<string>","data":<optional>}`
//! with code 0 for success and a non-zero code plus descriptive message
//! for failure. The `data` field is omitted when there is no payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;
use crate::state::CanonicalState;

/// Uniform result of a control operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// 0 = success, non-zero = failure
    pub code: i32,
    /// Human-readable outcome description
    pub message: String,
    /// Operation payload, absent on plain acknowledgements and failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ServiceResponse {
    /// Success with no payload
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: "ok".into(),
            data: None,
        }
    }

    /// Success carrying a payload
    pub fn ok_with(data: Value) -> Self {
        Self {
            code: 0,
            message: "ok".into(),
            data: Some(data),
        }
    }

    /// Failure with the given code and message
    pub fn err(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// The single facade-boundary conversion: internal results become
    /// envelopes here and errors never propagate past this point.
    pub fn from_result(result: crate::error::Result<Option<ResponseData>>) -> Self {
        match result {
            Ok(None) => Self::ok(),
            Ok(Some(data)) => Self::ok_with(data.into_value()),
            Err(err) => Self::err(err.code(), err.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Serialize to the wire JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"code":-1,"message":"response serialization failed"}"#.to_string()
        })
    }
}

impl From<Error> for ServiceResponse {
    fn from(err: Error) -> Self {
        Self::err(err.code(), err.to_string())
    }
}

/// Typed payload, one variant per control operation.
///
/// Serializes to the same untyped wire shape the envelope has always
/// carried, so callers parsing `data` see no difference.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    /// Install/Reinstall outcome: whether a profile was created
    Installed { created: bool },
    /// Fallback status resolution: the coarse canonical state
    Fallback { state: CanonicalState },
    /// The extension's rich status payload, passed through verbatim
    Engine(Value),
}

impl ResponseData {
    pub fn into_value(self) -> Value {
        match self {
            ResponseData::Installed { created } => json!({ "created": created }),
            ResponseData::Fallback { state } => json!({ "state": state.as_str() }),
            ResponseData::Engine(value) => value,
        }
    }
}
