//! Request Dispatcher
//!
//! Maps each decoded [`Request`] to exactly one [`Response`]. Gated actions
//! pass through the session check before any business logic runs; domain
//! failures become their fixed wire messages and anything unexpected becomes
//! `SERVER ERROR`. Nothing here returns an error to the caller.
//!
//! The dispatcher never touches the connection. It reports what should
//! happen to the connection's session binding through [`SessionChange`].

use proton_core::Environment;
use proton_crypto::{NONCE_SIZE, PasswordCipher};
use proton_proto::{Action, Params, Record, Request, Response, messages};
use serde_json::Value;
use thiserror::Error;

use crate::{
    schema::{SchemaError, parse_params, project},
    session::{SessionError, SessionManager},
    storage::{FieldValue, Fields, Storage, StorageError, StoredRecord, Table, fields},
};

/// What the connection should do with its bound token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// Keep whatever is bound
    Unchanged,
    /// Bind this token (successful login)
    Bind(String),
    /// Drop the bound token (logout, or the token stopped being valid)
    Clear,
}

/// Outcome of one dispatch.
#[derive(Debug)]
pub struct Dispatched {
    /// Response to enqueue
    pub response: Response,
    /// Session binding update
    pub session: SessionChange,
    /// Failure behind a non-OK response, for logging
    pub error: Option<DispatchError>,
}

/// Reasons a request did not succeed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Gated action without a valid token
    #[error("permission denied")]
    Unauthorized,

    /// `register` with a taken username
    #[error("user already exists")]
    DuplicateUser,

    /// `login` with unknown user or wrong password
    #[error("invalid credentials")]
    InvalidCredentials,

    /// No record with the requested id
    #[error("record not found")]
    NotFound,

    /// Parameter of the wrong shape
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Params did not fit the record schema
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Storage error occurred
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DispatchError {
    /// Wire response for this failure.
    pub fn to_response(&self) -> Response {
        match self {
            Self::Unauthorized => Response::error(messages::PERMISSION_DENIED),
            Self::DuplicateUser => Response::error(messages::USER_EXISTS),
            Self::InvalidCredentials => Response::error(messages::INVALID_CREDENTIALS),
            Self::NotFound => Response::wrong(messages::NOT_FOUND),
            Self::Syntax(_) | Self::Schema(_) => Response::syntax_error(),
            Self::Storage(_) => Response::server_error(),
        }
    }

    /// Whether this is a server-side fault rather than a client mistake.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<SessionError> for DispatchError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unauthorized | SessionError::Expired => Self::Unauthorized,
            SessionError::Storage(err) => Self::Storage(err),
        }
    }
}

/// Action table plus the collaborators actions need.
pub struct RequestDispatcher {
    cipher: PasswordCipher,
    sessions: SessionManager,
}

impl RequestDispatcher {
    /// Create a dispatcher.
    pub fn new(cipher: PasswordCipher, sessions: SessionManager) -> Self {
        Self { cipher, sessions }
    }

    /// Session manager in use.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run one request on behalf of a connection holding `token`.
    pub fn dispatch<E: Environment, S: Storage>(
        &self,
        env: &E,
        storage: &S,
        token: Option<&str>,
        request: &Request,
    ) -> Dispatched {
        let user_id = if request.action.requires_auth() {
            match self.authenticate(env, storage, token) {
                Ok(user_id) => Some(user_id),
                Err(err) => {
                    // A token that failed validation is gone from storage
                    let stale = token.is_some() && matches!(err, DispatchError::Unauthorized);
                    let session =
                        if stale { SessionChange::Clear } else { SessionChange::Unchanged };
                    return Dispatched { response: err.to_response(), session, error: Some(err) };
                },
            }
        } else {
            None
        };

        let params = request.params.as_ref();
        let result = match (request.action, user_id) {
            (Action::Register, _) => self.register(env, storage, params),
            (Action::Login, _) => self.login(env, storage, params),
            (Action::Logout, _) => self.logout(storage, token),
            (Action::Get, Some(_)) => get(storage, params),
            (Action::Create, Some(owner)) => create(storage, params, owner),
            (Action::Alter, Some(_)) => alter(storage, params),
            (Action::Delete, Some(_)) => delete(storage, params),
            (_, None) => Err(DispatchError::Unauthorized),
        };

        match result {
            Ok((response, session)) => Dispatched { response, session, error: None },
            Err(err) => Dispatched {
                response: err.to_response(),
                session: SessionChange::Unchanged,
                error: Some(err),
            },
        }
    }

    fn authenticate<E: Environment, S: Storage>(
        &self,
        env: &E,
        storage: &S,
        token: Option<&str>,
    ) -> Result<u64, DispatchError> {
        let token = token.ok_or(DispatchError::Unauthorized)?;
        Ok(self.sessions.validate(env, storage, token)?)
    }

    fn register<E: Environment, S: Storage>(
        &self,
        env: &E,
        storage: &S,
        params: Option<&Params>,
    ) -> Result<(Response, SessionChange), DispatchError> {
        let empty = Params::new();
        let mut user = parse_params(Table::User, params.unwrap_or(&empty), &[])?;

        let username = text_field(&user, "username")?.to_string();
        let password = text_field(&user, "password")?.to_string();

        let predicate = fields([("username", FieldValue::Text(username))]);
        if storage.first(Table::User, &predicate)?.is_some() {
            return Err(DispatchError::DuplicateUser);
        }

        let mut nonce = [0u8; NONCE_SIZE];
        env.random_bytes(&mut nonce);
        let sealed = self.cipher.encrypt(password.as_bytes(), nonce);
        user.insert("password".to_string(), FieldValue::Text(sealed));

        let created = storage.create(Table::User, user)?;
        let record = project(Table::User, &created);
        Ok((Response::ok().with_data(vec![record]), SessionChange::Unchanged))
    }

    fn login<E: Environment, S: Storage>(
        &self,
        env: &E,
        storage: &S,
        params: Option<&Params>,
    ) -> Result<(Response, SessionChange), DispatchError> {
        let username = string_param(params, "username")?;
        let password = string_param(params, "password")?;

        let user = storage
            .first(Table::User, &fields([("username", FieldValue::Text(username.to_string()))]))?
            .ok_or(DispatchError::InvalidCredentials)?;

        let stored = user.get("password").and_then(FieldValue::as_text).unwrap_or_default();
        if !self.cipher.compare(password.as_bytes(), stored) {
            return Err(DispatchError::InvalidCredentials);
        }

        let row = self.sessions.issue_or_refresh(env, storage, user.id)?;
        let token = row
            .get("token")
            .and_then(FieldValue::as_text)
            .ok_or_else(|| StorageError::Serialization("token row without token".to_string()))?
            .to_string();

        Ok((
            Response::ok().with_data(vec![project(Table::AuthToken, &row)]),
            SessionChange::Bind(token),
        ))
    }

    fn logout<S: Storage>(
        &self,
        storage: &S,
        token: Option<&str>,
    ) -> Result<(Response, SessionChange), DispatchError> {
        if let Some(token) = token {
            self.sessions.revoke(storage, token)?;
        }
        Ok((Response::ok(), SessionChange::Clear))
    }
}

fn get<S: Storage>(
    storage: &S,
    params: Option<&Params>,
) -> Result<(Response, SessionChange), DispatchError> {
    // A null id reads the same as no id
    let id = params.and_then(|params| params.get("id")).filter(|id| !id.is_null());
    let records = match id {
        Some(id) => {
            let post = storage.get(Table::Post, parse_id(id)?)?.ok_or(DispatchError::NotFound)?;
            vec![post]
        },
        None => storage.filter(Table::Post, &Fields::new())?,
    };

    Ok((Response::ok().with_data(project_all(&records)), SessionChange::Unchanged))
}

fn create<S: Storage>(
    storage: &S,
    params: Option<&Params>,
    owner: u64,
) -> Result<(Response, SessionChange), DispatchError> {
    let empty = Params::new();
    let mut post = parse_params(Table::Post, params.unwrap_or(&empty), &[])?;
    text_field(&post, "title")?;
    text_field(&post, "content")?;
    post.insert("user_id".to_string(), FieldValue::Integer(owner));

    let created = storage.create(Table::Post, post)?;

    Ok((
        Response::ok()
            .with_message(messages::POST_CREATED)
            .with_data(vec![project(Table::Post, &created)]),
        SessionChange::Unchanged,
    ))
}

fn alter<S: Storage>(
    storage: &S,
    params: Option<&Params>,
) -> Result<(Response, SessionChange), DispatchError> {
    let params =
        params.ok_or_else(|| DispatchError::Syntax("alter requires params".to_string()))?;
    let id = params.get("id").ok_or_else(|| DispatchError::Syntax("missing id".to_string()))?;
    let id = parse_id(id)?;
    let changes = parse_params(Table::Post, params, &["id"])?;

    let updated = if changes.is_empty() {
        storage.get(Table::Post, id)?
    } else {
        storage.update(Table::Post, id, changes)?
    };
    let updated = updated.ok_or(DispatchError::NotFound)?;

    let record = project(Table::Post, &updated);
    Ok((Response::ok().with_data(vec![record]), SessionChange::Unchanged))
}

fn delete<S: Storage>(
    storage: &S,
    params: Option<&Params>,
) -> Result<(Response, SessionChange), DispatchError> {
    let id = params
        .and_then(|params| params.get("id"))
        .ok_or_else(|| DispatchError::Syntax("missing id".to_string()))?;
    let id = parse_id(id)?;

    storage.delete(Table::Post, id)?.ok_or(DispatchError::NotFound)?;

    let mut record = Record::new();
    record.insert("id".to_string(), Value::from(id));
    Ok((Response::ok().with_data(vec![record]), SessionChange::Unchanged))
}

fn project_all(records: &[StoredRecord]) -> Vec<Record> {
    records.iter().map(|record| project(Table::Post, record)).collect()
}

/// Record id from a JSON integer or a string of decimal digits.
fn parse_id(value: &Value) -> Result<u64, DispatchError> {
    let invalid = || DispatchError::Syntax(format!("invalid id {value}"));

    match value {
        Value::Number(number) => number.as_u64().ok_or_else(invalid),
        Value::String(text) if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) => {
            text.parse().map_err(|_| invalid())
        },
        _ => Err(invalid()),
    }
}

fn string_param<'a>(params: Option<&'a Params>, key: &str) -> Result<&'a str, DispatchError> {
    params
        .and_then(|params| params.get(key))
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Syntax(format!("{key} must be a string")))
}

fn text_field<'a>(fields: &'a Fields, key: &str) -> Result<&'a str, DispatchError> {
    fields
        .get(key)
        .and_then(FieldValue::as_text)
        .ok_or_else(|| DispatchError::Syntax(format!("missing {key}")))
}
