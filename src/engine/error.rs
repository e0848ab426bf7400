use crate::model::Position;

#[derive(Debug)]
pub enum EngineError {
    BadRequest(String),
    Forbidden(&'static str),
    NotFound(Position),
    AlreadyExists(Position),
    LimitExceeded(&'static str),
    Internal(String),
    WalError(String),
}

impl EngineError {
    /// HTTP-style status code reported to procedure callers.
    pub fn code(&self) -> u16 {
        match self {
            EngineError::BadRequest(_) | EngineError::LimitExceeded(_) => 400,
            EngineError::Forbidden(_) => 403,
            EngineError::NotFound(_) => 404,
            EngineError::AlreadyExists(_) => 409,
            EngineError::Internal(_) | EngineError::WalError(_) => 500,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            EngineError::Forbidden(msg) => write!(f, "{msg}"),
            EngineError::NotFound(pos) => write!(f, "rack not found in database: {pos}"),
            EngineError::AlreadyExists(pos) => write!(f, "rack already exists: {pos}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Internal(msg) => write!(f, "{msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
