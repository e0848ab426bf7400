use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }
}

/// Grid coordinate of a rack slot. Racks are addressed by position, not id,
/// everywhere outside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub row: i64,
    pub col: i64,
}

impl Position {
    pub fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {}, col {}", self.row, self.col)
    }
}

/// Capability token passed into every store mutation.
///
/// Only server-side logic holds a privileged context; it is the sole way to
/// create audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallerContext {
    pub privileged: bool,
}

impl CallerContext {
    pub const fn server() -> Self {
        Self { privileged: true }
    }

    pub const fn client() -> Self {
        Self { privileged: false }
    }
}

/// A rack slot. `active` is operator-controlled; only `occupied` changes
/// through the write paths in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rack {
    #[serde(rename = "objectId")]
    pub id: Ulid,
    pub row: i64,
    pub col: i64,
    pub active: bool,
    pub occupied: bool,
    pub label: Option<String>,
}

impl Rack {
    pub fn new(id: Ulid, position: Position, active: bool, occupied: bool, label: Option<String>) -> Self {
        Self {
            id,
            row: position.row,
            col: position.col,
            active,
            occupied,
            label,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.row, self.col)
    }

    /// Copy of this rack with `occupied` replaced.
    pub fn with_occupied(&self, occupied: bool) -> Self {
        Self {
            occupied,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl Action {
    pub fn for_occupied(occupied: bool) -> Self {
        if occupied { Action::In } else { Action::Out }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::In => "IN",
            Action::Out => "OUT",
        }
    }
}

impl std::str::FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(Action::In),
            "OUT" => Ok(Action::Out),
            _ => Err(()),
        }
    }
}

/// One occupancy transition. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(rename = "objectId")]
    pub id: Ulid,
    pub action: Action,
    pub row: i64,
    pub col: i64,
    pub timestamp: Ms,
}

impl AuditEntry {
    pub fn new(action: Action, position: Position, timestamp: Ms) -> Self {
        Self {
            id: Ulid::new(),
            action,
            row: position.row,
            col: position.col,
            timestamp,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.row, self.col)
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RackCreated {
        id: Ulid,
        row: i64,
        col: i64,
        active: bool,
        occupied: bool,
        label: Option<String>,
    },
    RackUpdated {
        id: Ulid,
        active: bool,
        occupied: bool,
    },
    AuditRecorded {
        entry: AuditEntry,
    },
}

// ── Procedure result types ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryReport {
    pub success: bool,
    pub count: usize,
    pub data: Vec<AuditEntry>,
}
