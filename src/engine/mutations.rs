use tracing::{debug, error, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::hooks::{audit_for_transition, guard_audit_write, validate_rack_write};
use super::{now_ms, Engine, EngineError};

impl Engine {
    pub async fn create_rack(
        &self,
        ctx: &CallerContext,
        position: Position,
        active: bool,
        occupied: bool,
        label: Option<String>,
    ) -> Result<Rack, EngineError> {
        if let Some(ref l) = label
            && l.len() > MAX_LABEL_LEN {
                return Err(EngineError::LimitExceeded("rack label too long"));
            }

        let _gate = self.commit_gate.read().await;
        let rack = Rack::new(Ulid::new(), position, active, occupied, label);
        validate_rack_write(None, &rack)?;

        // The claim is taken before the WAL await so concurrent creates at
        // one position cannot both pass.
        if !self.store.claim_position(position, rack.id) {
            return Err(EngineError::AlreadyExists(position));
        }
        if self.store.position_count() > MAX_RACKS {
            self.store.release_position(position, rack.id);
            return Err(EngineError::LimitExceeded("too many racks"));
        }

        let appended = self
            .wal_append(vec![Event::RackCreated {
                id: rack.id,
                row: rack.row,
                col: rack.col,
                active,
                occupied,
                label: rack.label.clone(),
            }])
            .await;
        if let Err(e) = appended {
            self.store.release_position(position, rack.id);
            return Err(e);
        }
        self.store.insert_rack(rack.clone());
        debug!(privileged = ctx.privileged, "created rack at {position}");
        // A create has no previous state, so this never emits an entry; kept
        // so every write runs the same pipeline.
        self.after_rack_write(None, &rack).await;
        Ok(rack)
    }

    /// Direct write path: set `occupied` on the rack at `position`.
    ///
    /// Runs the full pipeline: validate, persist, apply, then record the
    /// transition. The rack write stands even if the audit write fails.
    pub async fn update_rack(
        &self,
        ctx: &CallerContext,
        position: Position,
        occupied: bool,
    ) -> Result<Rack, EngineError> {
        let _gate = self.commit_gate.read().await;
        let handle = self
            .store
            .rack_at(position)
            .ok_or(EngineError::NotFound(position))?;
        let mut guard = handle.write().await;

        let next = guard.with_occupied(occupied);
        validate_rack_write(Some(&*guard), &next)?;
        self.wal_append(vec![Event::RackUpdated {
            id: next.id,
            active: next.active,
            occupied: next.occupied,
        }])
        .await?;
        let prev = std::mem::replace(&mut *guard, next.clone());
        debug!(privileged = ctx.privileged, occupied, "updated rack at {position}");

        self.after_rack_write(Some(&prev), &next).await;
        Ok(next)
    }

    /// Post-write hook: persist the audit entry for an occupancy flip.
    ///
    /// On failure the entry is queued for the retry worker and the error is
    /// returned for the caller to log. Expects the commit gate to be held.
    pub(crate) async fn on_rack_written(
        &self,
        prev: Option<&Rack>,
        next: &Rack,
    ) -> Result<Option<AuditEntry>, EngineError> {
        let Some(entry) = audit_for_transition(prev, next, now_ms()) else {
            return Ok(None);
        };
        match self.persist_audit(&CallerContext::server(), entry.clone()).await {
            Ok(()) => {
                info!(
                    action = entry.action.as_str(),
                    "history recorded: row {}, col {}",
                    entry.row,
                    entry.col
                );
                Ok(Some(entry))
            }
            Err(e) => {
                self.queue_audit_retry(entry).await;
                Err(EngineError::Internal(format!("failed to record history: {e}")))
            }
        }
    }

    /// Caller must already hold the commit gate.
    pub(super) async fn after_rack_write(&self, prev: Option<&Rack>, next: &Rack) {
        if let Err(e) = self.on_rack_written(prev, next).await {
            metrics::counter!(crate::observability::AUDIT_WRITE_FAILURES_TOTAL).increment(1);
            error!("{e}; rack write at {} kept, entry queued for retry", next.position());
        }
    }

    /// Guarded audit insert. Caller must already hold the commit gate.
    pub(super) async fn persist_audit(
        &self,
        ctx: &CallerContext,
        entry: AuditEntry,
    ) -> Result<(), EngineError> {
        guard_audit_write(ctx)?;
        #[cfg(test)]
        if self
            .audit_faults
            .fetch_update(
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
                |n| n.checked_sub(1),
            )
            .is_ok()
        {
            return Err(EngineError::WalError("injected audit fault".into()));
        }
        self.wal_append(vec![Event::AuditRecorded { entry: entry.clone() }])
            .await?;
        self.store.insert_audit(entry).await;
        metrics::counter!(crate::observability::AUDIT_ENTRIES_TOTAL).increment(1);
        Ok(())
    }

    /// Create an audit entry directly. Fails with `Forbidden` unless `ctx`
    /// is privileged.
    pub async fn record_audit(
        &self,
        ctx: &CallerContext,
        entry: AuditEntry,
    ) -> Result<AuditEntry, EngineError> {
        guard_audit_write(ctx)?;
        let _gate = self.commit_gate.read().await;
        self.persist_audit(ctx, entry.clone()).await?;
        Ok(entry)
    }

    /// Direct creation stamped with the current instant.
    pub async fn create_history(
        &self,
        ctx: &CallerContext,
        action: Action,
        position: Position,
    ) -> Result<AuditEntry, EngineError> {
        self.record_audit(ctx, AuditEntry::new(action, position, now_ms()))
            .await
    }

    pub(super) async fn queue_audit_retry(&self, entry: AuditEntry) {
        let mut pending = self.pending_audits.lock().await;
        pending.push_back(entry);
        metrics::gauge!(crate::observability::AUDIT_PENDING).set(pending.len() as f64);
    }

    pub async fn pending_audit_count(&self) -> usize {
        self.pending_audits.lock().await.len()
    }

    /// Re-attempt queued audit entries, oldest first, keeping their original
    /// timestamps. Stops at the first failure. Returns how many were written.
    pub async fn retry_pending_audits(&self) -> usize {
        let _gate = self.commit_gate.read().await;
        let mut pending = self.pending_audits.lock().await;
        let mut written = 0;
        while let Some(entry) = pending.pop_front() {
            match self.persist_audit(&CallerContext::server(), entry.clone()).await {
                Ok(()) => written += 1,
                Err(e) => {
                    debug!("audit retry deferred: {e}");
                    pending.push_front(entry);
                    break;
                }
            }
        }
        metrics::gauge!(crate::observability::AUDIT_PENDING).set(pending.len() as f64);
        written
    }
}
