use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedRack;

/// In-memory tables: racks by id, a unique (row, col) index, and the audit
/// log kept sorted by timestamp, in recording order among equal timestamps.
pub struct RackStore {
    racks: DashMap<Ulid, SharedRack>,
    by_position: DashMap<Position, Ulid>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl Default for RackStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RackStore {
    pub fn new() -> Self {
        Self::from_parts(Vec::new(), Vec::new())
    }

    /// Build a store from replayed state. `audit` need not be sorted.
    pub fn from_parts(racks: Vec<Rack>, mut audit: Vec<AuditEntry>) -> Self {
        audit.sort_by_key(|e| e.timestamp);
        let store = Self {
            racks: DashMap::new(),
            by_position: DashMap::new(),
            audit: RwLock::new(audit),
        };
        for rack in racks {
            store.insert_rack(rack);
        }
        store
    }

    // ── Racks ────────────────────────────────────────────────

    pub fn rack_count(&self) -> usize {
        self.racks.len()
    }

    pub fn get_rack(&self, id: &Ulid) -> Option<SharedRack> {
        self.racks.get(id).map(|e| e.value().clone())
    }

    pub fn rack_id_at(&self, position: Position) -> Option<Ulid> {
        self.by_position.get(&position).map(|e| *e.value())
    }

    pub fn rack_at(&self, position: Position) -> Option<SharedRack> {
        self.rack_id_at(position).and_then(|id| self.get_rack(&id))
    }

    /// Number of claimed positions, including creates still in flight.
    pub fn position_count(&self) -> usize {
        self.by_position.len()
    }

    /// Reserve `position` for the rack `id` is about to become. Returns false
    /// if another rack already holds it.
    pub fn claim_position(&self, position: Position, id: Ulid) -> bool {
        match self.by_position.entry(position) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    /// Undo a claim made by `id`. A claim held by another rack is left alone.
    pub fn release_position(&self, position: Position, id: Ulid) {
        self.by_position.remove_if(&position, |_, held| *held == id);
    }

    pub fn insert_rack(&self, rack: Rack) {
        self.by_position.insert(rack.position(), rack.id);
        self.racks.insert(rack.id, std::sync::Arc::new(RwLock::new(rack)));
    }

    pub fn rack_handles(&self) -> Vec<SharedRack> {
        self.racks.iter().map(|e| e.value().clone()).collect()
    }

    // ── Audit log ────────────────────────────────────────────

    pub async fn insert_audit(&self, entry: AuditEntry) {
        let mut log = self.audit.write().await;
        let pos = log.partition_point(|e| e.timestamp <= entry.timestamp);
        log.insert(pos, entry);
    }

    pub async fn audit_count(&self) -> usize {
        self.audit.read().await.len()
    }

    /// Entries with `timestamp` inside `span`, newest first.
    pub async fn audit_in(&self, span: &Span) -> Vec<AuditEntry> {
        let log = self.audit.read().await;
        let lo = log.partition_point(|e| e.timestamp < span.start);
        let hi = log.partition_point(|e| e.timestamp < span.end);
        log[lo..hi].iter().rev().cloned().collect()
    }

    pub async fn audit_snapshot(&self) -> Vec<AuditEntry> {
        self.audit.read().await.clone()
    }
}
