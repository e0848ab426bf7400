//! Write-path checks for the rack and audit tables.
//!
//! These are plain functions; the engine calls them explicitly around every
//! mutation instead of relying on storage-level triggers.

use crate::model::*;

use super::EngineError;

/// Accept or reject a rack write. `prev` is `None` for a create.
///
/// Updates must come from an active rack and must flip `occupied`.
pub fn validate_rack_write(prev: Option<&Rack>, next: &Rack) -> Result<(), EngineError> {
    let Some(prev) = prev else {
        return Ok(());
    };
    if !prev.active {
        return Err(EngineError::Forbidden("rack unusable"));
    }
    match (prev.occupied, next.occupied) {
        (false, false) => Err(EngineError::Forbidden("rack not yet occupied")),
        (true, true) => Err(EngineError::Forbidden("rack already occupied")),
        _ => Ok(()),
    }
}

/// Only the server context may create audit entries.
pub fn guard_audit_write(ctx: &CallerContext) -> Result<(), EngineError> {
    if ctx.privileged {
        Ok(())
    } else {
        Err(EngineError::Forbidden(
            "audit entries can only be created by the server",
        ))
    }
}

/// The audit entry a completed rack write should produce, if any.
pub fn audit_for_transition(prev: Option<&Rack>, next: &Rack, now: Ms) -> Option<AuditEntry> {
    let prev = prev?;
    if prev.occupied == next.occupied {
        return None;
    }
    Some(AuditEntry::new(
        Action::for_occupied(next.occupied),
        next.position(),
        now,
    ))
}
