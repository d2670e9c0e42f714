//! Server → client response envelope.
//!
//! Wire shape: `{"status": "OK"|"ERROR"|"WRONG", "message": <string>?,
//! "data": [<object>, ...]?}`. Absent fields are omitted, never `null`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Frame, messages,
    errors::{ProtocolError, Result},
};

/// One projected entity as it appears in `data`.
pub type Record = serde_json::Map<String, Value>;

/// Outcome class of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Request succeeded
    Ok,
    /// Request was rejected or failed
    Error,
    /// Request addressed something that does not exist
    Wrong,
}

impl Status {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Wrong => "WRONG",
        }
    }

    /// Whether the status reports success.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response to exactly one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome class
    pub status: Status,
    /// Human-readable explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Records produced by the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Record>>,
}

impl Response {
    /// Bare `OK`.
    #[must_use]
    pub fn ok() -> Self {
        Self { status: Status::Ok, message: None, data: None }
    }

    /// `ERROR` with a message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self { status: Status::Error, message: Some(message.into()), data: None }
    }

    /// `WRONG` with a message.
    #[must_use]
    pub fn wrong(message: impl Into<String>) -> Self {
        Self { status: Status::Wrong, message: Some(message.into()), data: None }
    }

    /// `ERROR "SYNTAX ERROR"`.
    #[must_use]
    pub fn syntax_error() -> Self {
        Self::error(messages::SYNTAX_ERROR)
    }

    /// `ERROR "SERVER ERROR"`.
    #[must_use]
    pub fn server_error() -> Self {
        Self::error(messages::SERVER_ERROR)
    }

    /// Attach records.
    #[must_use]
    pub fn with_data(mut self, data: Vec<Record>) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Serialize into a frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if serialization fails
    pub fn encode(&self) -> Result<Frame> {
        serde_json::to_vec(self)
            .map(Frame::new)
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a response frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidJson` if the body is not a valid response
    pub fn decode(frame: &Frame) -> Result<Self> {
        serde_json::from_slice(frame.body()).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn wire(response: &Response) -> Value {
        serde_json::from_slice(response.encode().unwrap().body()).unwrap()
    }

    #[test]
    fn absent_fields_are_omitted() {
        assert_eq!(wire(&Response::ok()), json!({"status": "OK"}));
        assert_eq!(
            wire(&Response::wrong(messages::NOT_FOUND)),
            json!({"status": "WRONG", "message": "Not Found."})
        );
    }

    #[test]
    fn empty_data_is_an_empty_array() {
        let response = Response::ok().with_data(Vec::new());
        assert_eq!(wire(&response), json!({"status": "OK", "data": []}));
    }

    #[test]
    fn decode_tolerates_missing_optional_fields() {
        let response = Response::decode(&Frame::new(&b"{\"status\":\"ERROR\"}"[..])).unwrap();

        assert_eq!(response.status, Status::Error);
        assert_eq!(response.message, None);
        assert_eq!(response.data, None);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let result = Response::decode(&Frame::new(&b"{\"status\":\"MAYBE\"}"[..]));
        assert!(matches!(result, Err(ProtocolError::InvalidJson(_))));
    }
}
