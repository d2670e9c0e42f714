//! Client → server request envelope.
//!
//! Wire shape: `{"action": <string>, "params": <object>?, "opts": <object>?}`.
//!
//! # Invariants
//!
//! A decoded [`Request`] always satisfies its action's structural contract:
//! every key in [`Action::required_params`] is present in `params`, and
//! `params`/`opts` are objects when present. Handlers can index required keys
//! without re-checking presence (types are still theirs to check).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Frame,
    errors::{ProtocolError, Result},
};

/// Parameter/option mapping carried by a request.
pub type Params = serde_json::Map<String, Value>;

/// The verb selecting a dispatcher handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Create an account
    Register,
    /// Obtain (or refresh) a session token
    Login,
    /// Revoke the current session token
    Logout,
    /// Fetch one post by id, or all posts
    Get,
    /// Create a post
    Create,
    /// Update fields of a post
    Alter,
    /// Delete a post
    Delete,
}

impl Action {
    /// Every recognized action.
    pub const ALL: [Self; 7] = [
        Self::Register,
        Self::Login,
        Self::Logout,
        Self::Get,
        Self::Create,
        Self::Alter,
        Self::Delete,
    ];

    /// Wire name of the action.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Get => "get",
            Self::Create => "create",
            Self::Alter => "alter",
            Self::Delete => "delete",
        }
    }

    /// Parse a wire name. `None` if unrecognized.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == name)
    }

    /// Keys that must be present in `params`.
    pub fn required_params(self) -> &'static [&'static str] {
        match self {
            Self::Register | Self::Login => &["username", "password"],
            Self::Create => &["content", "title"],
            Self::Alter | Self::Delete => &["id"],
            Self::Logout | Self::Get => &[],
        }
    }

    /// Whether the action is gated behind a valid session token.
    pub fn requires_auth(self) -> bool {
        !matches!(self, Self::Register | Self::Login)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structurally valid request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    /// Selected handler
    pub action: Action,
    /// Action arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    /// Free-form options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opts: Option<Params>,
}

impl Request {
    /// Request with no params and no opts.
    #[must_use]
    pub fn new(action: Action) -> Self {
        Self { action, params: None, opts: None }
    }

    /// Set a single parameter, creating the params object if needed.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.get_or_insert_with(Params::new).insert(key.into(), value.into());
        self
    }

    /// Replace all parameters.
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Replace all options.
    #[must_use]
    pub fn with_opts(mut self, opts: Params) -> Self {
        self.opts = Some(opts);
        self
    }

    /// Parameter value by key. `None` if absent.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|params| params.get(key))
    }

    /// Parse and validate a frame body.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidJson` if the body is not JSON
    /// - `ProtocolError::Syntax` for any structural violation: not an object,
    ///   missing/unknown action, non-object params or opts, missing required
    ///   params, unknown top-level keys
    pub fn decode(frame: &Frame) -> Result<Self> {
        let value: Value = serde_json::from_slice(frame.body())
            .map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        Self::from_value(value)
    }

    /// Validate an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Same structural errors as [`Request::decode`].
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(ProtocolError::Syntax("request must be a JSON object".to_string()));
        };

        let action = match object.remove("action") {
            Some(Value::String(name)) => Action::parse(&name)
                .ok_or_else(|| ProtocolError::Syntax(format!("unknown action '{name}'")))?,
            Some(_) => return Err(ProtocolError::Syntax("action must be a string".to_string())),
            None => return Err(ProtocolError::Syntax("missing action".to_string())),
        };

        let params = take_object(&mut object, "params")?;
        let opts = take_object(&mut object, "opts")?;

        if let Some(key) = object.keys().next() {
            return Err(ProtocolError::Syntax(format!("unexpected field '{key}'")));
        }

        let required = action.required_params();
        match &params {
            None if !required.is_empty() => {
                return Err(ProtocolError::Syntax(format!("{action} requires params")));
            },
            Some(params) => {
                if let Some(missing) = required.iter().find(|key| !params.contains_key(**key)) {
                    return Err(ProtocolError::Syntax(format!(
                        "{action} requires param '{missing}'"
                    )));
                }
            },
            None => {},
        }

        Ok(Self { action, params, opts })
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
}

/// Remove `key` from `object`, requiring an object (or null/absence).
fn take_object(object: &mut Params, key: &str) -> Result<Option<Params>> {
    match object.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(inner)) => Ok(Some(inner)),
        Some(_) => Err(ProtocolError::Syntax(format!("{key} must be an object"))),
    }
}
