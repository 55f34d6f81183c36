//! Request data models.
//!
//! A [`Request`] is what the external dispatcher hands to the gateway: an
//! action name plus its parameters, flattened into one JSON object on the wire
//! (`{"action": "select", "table": "users"}`). Each action's parameters are
//! decoded into a typed descriptor before any connection is touched.

use crate::error::{DbError, DbResult};
use crate::models::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Actions understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Action {
    Select,
    Insert,
    Raw,
    Prepared,
    Transaction,
    Begin,
    Commit,
    Rollback,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Raw => "raw",
            Self::Prepared => "prepared",
            Self::Transaction => "transaction",
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }

    /// Whether this action runs a single statement (usable in batches and sessions).
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            Self::Select | Self::Insert | Self::Raw | Self::Prepared
        )
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "select" => Ok(Self::Select),
            "insert" => Ok(Self::Insert),
            "raw" => Ok(Self::Raw),
            "prepared" => Ok(Self::Prepared),
            "transaction" => Ok(Self::Transaction),
            "begin" => Ok(Self::Begin),
            "commit" => Ok(Self::Commit),
            "rollback" => Ok(Self::Rollback),
            other => Err(format!("Unknown action '{}'", other)),
        }
    }
}

impl TryFrom<String> for Action {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle addressing one transaction session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Generate a fresh, unique handle.
    pub fn generate() -> Self {
        Self(format!("tx_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub action: Action,
    /// Continuation handle of the session this command is addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionHandle>,
    #[serde(flatten)]
    pub params: serde_json::Map<String, JsonValue>,
}

impl Request {
    /// Create a request without parameters.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            session: None,
            params: serde_json::Map::new(),
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Address the request to a session.
    pub fn in_session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    /// Decode this request's parameters into a typed descriptor.
    pub fn descriptor<T: DeserializeOwned>(&self) -> DbResult<T> {
        serde_json::from_value(JsonValue::Object(self.params.clone())).map_err(|e| {
            DbError::invalid_input(format!("Invalid parameters for '{}': {}", self.action, e))
        })
    }
}

/// Parameters of `select`.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectDescriptor {
    pub table: String,
    /// Omitted means every column (`SELECT *`)
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

/// Parameters of `insert`.
#[derive(Debug, Clone, Deserialize)]
pub struct InsertDescriptor {
    pub table: String,
    pub fields: Vec<String>,
    pub values: Vec<Vec<Value>>,
    #[serde(default)]
    pub returning: Option<String>,
}

/// Parameters of `raw`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDescriptor {
    pub command: String,
}

/// Parameters of `prepared`.
#[derive(Debug, Clone, Deserialize)]
pub struct PreparedDescriptor {
    pub statement: String,
    pub values: Vec<Value>,
}

/// Parameters of `transaction`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionDescriptor {
    pub statements: Vec<Request>,
}

/// Parameters of `begin`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeginDescriptor {
    /// Idle timeout override in seconds, clamped to the configured maximum
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}
