use crate::limits::*;
use crate::model::*;

use super::{now_ms, Engine, EngineError};

/// The UTC span covering the local calendar day that contains `now`, for a
/// local zone `offset` ms ahead of UTC.
///
/// Shift into local time, truncate to midnight, then shift the local
/// `[midnight, midnight + 24h)` back to UTC.
pub fn today_window(now: Ms, offset: Ms) -> Span {
    let local = now + offset;
    let local_midnight = local - local.rem_euclid(DAY_MS);
    let start = local_midnight - offset;
    Span::new(start, start + DAY_MS)
}

impl Engine {
    pub async fn get_rack(&self, position: Position) -> Result<Rack, EngineError> {
        let handle = self
            .store
            .rack_at(position)
            .ok_or(EngineError::NotFound(position))?;
        let rack = handle.read().await;
        Ok(rack.clone())
    }

    /// Every rack, ordered by (row, col).
    pub async fn list_racks(&self) -> Vec<Rack> {
        let mut racks = Vec::with_capacity(self.store.rack_count());
        for handle in self.store.rack_handles() {
            racks.push(handle.read().await.clone());
        }
        racks.sort_by_key(|r| r.position());
        racks
    }

    /// Audit entries with `span.start <= timestamp < span.end`, newest first.
    pub async fn history_between(&self, span: Span) -> Vec<AuditEntry> {
        self.store.audit_in(&span).await
    }

    pub async fn history_for_day(&self, now: Ms) -> HistoryReport {
        let window = today_window(now, LOCAL_UTC_OFFSET_MS);
        tracing::debug!("history window: [{}, {}) UTC ms", window.start, window.end);
        let data = self.history_between(window).await;
        tracing::debug!("history window returned {} entries", data.len());
        HistoryReport {
            success: true,
            count: data.len(),
            data,
        }
    }

    /// Today's audit entries in warehouse local time (UTC+7).
    pub async fn today_history(&self) -> HistoryReport {
        self.history_for_day(now_ms()).await
    }

    pub async fn audit_count(&self) -> usize {
        self.store.audit_count().await
    }
}
