//! Request/response envelopes and procedure parsing for the JSON line protocol.
//!
//! One request per line:
//! `{"id": 1, "function": "getTodayHistory", "params": {}, "masterKey": "..."}`
//!
//! One response per line, either `{"id": 1, "result": ...}` or
//! `{"id": 1, "code": 400, "error": "..."}`.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::EngineError;
use crate::model::*;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub function: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub master_key: Option<String>,
}

/// Parsed procedure call.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `updates` stays untyped; items are validated one by one.
    BulkUpdateRackingOccupied {
        updates: Option<Value>,
    },
    GetTodayHistory,
    CreateRacking {
        position: Position,
        active: bool,
        occupied: bool,
        label: Option<String>,
    },
    UpdateRacking {
        position: Position,
        occupied: bool,
    },
    GetRacking {
        position: Position,
    },
    ListRacking,
    CreateHistory {
        action: Action,
        position: Position,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: u16,
    pub message: String,
}

impl RpcError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(401, "unauthorized")
    }

    pub fn unknown_function(name: &str) -> Self {
        Self::new(404, format!("unknown function: {name}"))
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<EngineError> for RpcError {
    fn from(e: EngineError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

#[derive(Deserialize)]
struct PositionParams {
    row: i64,
    col: i64,
}

#[derive(Deserialize)]
struct CreateRackingParams {
    row: i64,
    col: i64,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    occupied: bool,
    #[serde(default)]
    label: Option<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize)]
struct UpdateRackingParams {
    row: i64,
    col: i64,
    occupied: bool,
}

#[derive(Deserialize)]
struct CreateHistoryParams {
    action: String,
    row: i64,
    col: i64,
}

fn typed<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, RpcError> {
    // Absent params behave like `{}` so the error names the missing field.
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| RpcError::bad_request(format!("invalid params: {e}")))
}

pub fn parse_request(line: &str) -> Result<Request, RpcError> {
    serde_json::from_str(line).map_err(|e| RpcError::bad_request(format!("malformed request: {e}")))
}

pub fn parse_command(function: &str, params: Value) -> Result<Command, RpcError> {
    match function {
        "bulkUpdateRackingOccupied" => Ok(Command::BulkUpdateRackingOccupied {
            updates: params.get("updates").cloned(),
        }),
        "getTodayHistory" => Ok(Command::GetTodayHistory),
        "createRacking" => {
            let p: CreateRackingParams = typed(params)?;
            Ok(Command::CreateRacking {
                position: Position::new(p.row, p.col),
                active: p.active,
                occupied: p.occupied,
                label: p.label,
            })
        }
        "updateRacking" => {
            let p: UpdateRackingParams = typed(params)?;
            Ok(Command::UpdateRacking {
                position: Position::new(p.row, p.col),
                occupied: p.occupied,
            })
        }
        "getRacking" => {
            let p: PositionParams = typed(params)?;
            Ok(Command::GetRacking {
                position: Position::new(p.row, p.col),
            })
        }
        "listRacking" => Ok(Command::ListRacking),
        "createHistory" => {
            let p: CreateHistoryParams = typed(params)?;
            let action = p
                .action
                .parse()
                .map_err(|()| RpcError::bad_request("action must be IN or OUT"))?;
            Ok(Command::CreateHistory {
                action,
                position: Position::new(p.row, p.col),
            })
        }
        other => Err(RpcError::unknown_function(other)),
    }
}

pub fn ok_response(id: Value, result: Value) -> Value {
    json!({ "id": id, "result": result })
}

pub fn error_response(id: Value, err: &RpcError) -> Value {
    json!({ "id": id, "code": err.code, "error": err.message })
}
