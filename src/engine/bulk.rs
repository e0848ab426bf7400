use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::hooks::validate_rack_write;
use super::{Engine, EngineError};

const NO_CHANGE: &str = "no change";
const CHANGED_CONCURRENTLY: &str = "rack changed concurrently";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkSuccess {
    pub row: i64,
    pub col: i64,
    pub occupied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `row` and `col` echo whatever the caller sent, typed or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkFailure {
    pub row: Value,
    pub col: Value,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BulkDetails {
    pub success: Vec<BulkSuccess>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    pub total_processed: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub details: BulkDetails,
}

enum Outcome {
    Success(BulkSuccess),
    Failed(BulkFailure),
}

/// A flip decided during the read phase, applied at commit only if the rack
/// still shows `observed`.
pub(super) struct Staged {
    pub(super) index: usize,
    pub(super) rack_id: Ulid,
    pub(super) position: Position,
    pub(super) observed: bool,
    pub(super) requested: bool,
}

enum Plan {
    NoChange,
    Flip { rack_id: Ulid, observed: bool },
}

/// JSON numbers with no fractional part, so `3.0` addresses row 3.
fn whole_number(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| {
        v.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn parse_item(raw: &Value) -> Result<(Position, bool), &'static str> {
    let row = raw.get("row").and_then(whole_number);
    let col = raw.get("col").and_then(whole_number);
    let (Some(row), Some(col)) = (row, col) else {
        return Err("row and col must be integers");
    };
    let Some(occupied) = raw.get("occupied").and_then(Value::as_bool) else {
        return Err("occupied must be a boolean");
    };
    Ok((Position::new(row, col), occupied))
}

fn failure(raw: &Value, error: impl Into<String>) -> BulkFailure {
    BulkFailure {
        row: raw.get("row").cloned().unwrap_or(Value::Null),
        col: raw.get("col").cloned().unwrap_or(Value::Null),
        error: error.into(),
    }
}

impl Engine {
    /// Apply a batch of `{row, col, occupied}` requests.
    ///
    /// Items are checked one at a time; bad items land in `failed` without
    /// stopping the batch. Accepted flips are committed together at the end,
    /// each guarded by a compare-and-swap on the `occupied` value read here.
    /// Only a failure of that final write fails the whole call.
    pub async fn bulk_update_occupied(
        &self,
        ctx: &CallerContext,
        updates: Option<&Value>,
    ) -> Result<BulkReport, EngineError> {
        let items = match updates {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => {
                return Err(EngineError::BadRequest(
                    "updates must be a non-empty array".into(),
                ));
            }
        };
        if items.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let mut outcomes = Vec::with_capacity(items.len());
        let mut staged = Vec::new();
        let mut seen = HashSet::new();

        for (index, raw) in items.iter().enumerate() {
            let (position, occupied) = match parse_item(raw) {
                Ok(parsed) => parsed,
                Err(msg) => {
                    outcomes.push(Outcome::Failed(failure(raw, msg)));
                    continue;
                }
            };
            if !seen.insert(position) {
                outcomes.push(Outcome::Failed(failure(raw, "duplicate position in batch")));
                continue;
            }

            let success = BulkSuccess {
                row: position.row,
                col: position.col,
                occupied,
                message: None,
            };
            match self.plan_item(position, occupied).await {
                Ok(Plan::NoChange) => outcomes.push(Outcome::Success(BulkSuccess {
                    message: Some(NO_CHANGE.into()),
                    ..success
                })),
                Ok(Plan::Flip { rack_id, observed }) => {
                    staged.push(Staged {
                        index,
                        rack_id,
                        position,
                        observed,
                        requested: occupied,
                    });
                    outcomes.push(Outcome::Success(success));
                }
                Err(e) => {
                    debug!("bulk item {index} at {position} rejected: {e}");
                    outcomes.push(Outcome::Failed(failure(raw, e.to_string())));
                }
            }
        }

        if !staged.is_empty() {
            let staged_count = staged.len();
            let rejected = self
                .commit_staged(ctx, staged)
                .await
                .map_err(|e| EngineError::Internal(format!("bulk update failed: {e}")))?;
            for (index, error) in &rejected {
                outcomes[*index] = Outcome::Failed(failure(&items[*index], error.clone()));
            }
            info!(
                "bulk update committed: {} racks updated",
                staged_count - rejected.len()
            );
        }

        let mut details = BulkDetails::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Success(s) => details.success.push(s),
                Outcome::Failed(f) => details.failed.push(f),
            }
        }
        metrics::counter!(crate::observability::BULK_ITEMS_TOTAL, "outcome" => "success")
            .increment(details.success.len() as u64);
        metrics::counter!(crate::observability::BULK_ITEMS_TOTAL, "outcome" => "failed")
            .increment(details.failed.len() as u64);

        Ok(BulkReport {
            total_processed: items.len(),
            success_count: details.success.len(),
            failed_count: details.failed.len(),
            details,
        })
    }

    async fn plan_item(&self, position: Position, occupied: bool) -> Result<Plan, EngineError> {
        let handle = self
            .store
            .rack_at(position)
            .ok_or(EngineError::NotFound(position))?;
        let rack = handle.read().await;
        if !rack.active {
            return Err(EngineError::Forbidden("rack not active"));
        }
        if rack.occupied == occupied {
            return Ok(Plan::NoChange);
        }
        Ok(Plan::Flip {
            rack_id: rack.id,
            observed: rack.occupied,
        })
    }

    /// Lock every staged rack, drop the ones that moved since the read phase,
    /// and write the rest as one WAL group. Returns `(item index, reason)`
    /// for each dropped item.
    pub(super) async fn commit_staged(
        &self,
        ctx: &CallerContext,
        staged: Vec<Staged>,
    ) -> Result<Vec<(usize, String)>, EngineError> {
        let _gate = self.commit_gate.read().await;

        // Sorted lock order keeps concurrent batches from deadlocking.
        let mut rack_ids: Vec<Ulid> = staged.iter().map(|s| s.rack_id).collect();
        rack_ids.sort();
        rack_ids.dedup();

        let mut guards = Vec::with_capacity(rack_ids.len());
        let mut slot = HashMap::with_capacity(rack_ids.len());
        for id in &rack_ids {
            if let Some(handle) = self.store.get_rack(id) {
                slot.insert(*id, guards.len());
                guards.push(handle.write_owned().await);
            }
        }

        let mut rejected = Vec::new();
        let mut events = Vec::new();
        let mut applied = Vec::new();
        for s in &staged {
            let Some(&i) = slot.get(&s.rack_id) else {
                rejected.push((s.index, EngineError::NotFound(s.position).to_string()));
                continue;
            };
            let current = &guards[i];
            if current.occupied != s.observed {
                rejected.push((s.index, CHANGED_CONCURRENTLY.to_string()));
                continue;
            }
            let next = current.with_occupied(s.requested);
            if let Err(e) = validate_rack_write(Some(&**current), &next) {
                rejected.push((s.index, e.to_string()));
                continue;
            }
            events.push(Event::RackUpdated {
                id: next.id,
                active: next.active,
                occupied: next.occupied,
            });
            applied.push((i, next));
        }

        if !events.is_empty() {
            self.wal_append(events).await?;
        }
        for (i, next) in applied {
            let prev = std::mem::replace(&mut *guards[i], next.clone());
            self.after_rack_write(Some(&prev), &next).await;
        }
        debug!(privileged = ctx.privileged, rejected = rejected.len(), "bulk commit done");
        Ok(rejected)
    }
}
