mod bulk;
mod error;
pub mod hooks;
mod mutations;
mod queries;
mod store;

pub use bulk::{BulkDetails, BulkFailure, BulkReport, BulkSuccess};
pub use error::EngineError;
pub use queries::today_window;
pub use store::RackStore;

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRack = Arc<RwLock<Rack>>;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// One or more events that must reach disk in the same flush.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Blocks for the first append, drains whatever else is already
/// queued, then does a single fsync for the whole group.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                let event_count: usize = batch.iter().map(|(events, _)| events.len()).sum();
                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(event_count as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    'outer: for (events, _) in batch {
        for event in events {
            if let Err(e) = wal.append_buffered(event) {
                append_err = Some(e);
                break 'outer;
            }
        }
    }
    // Flush even after an append error so half-written bytes don't ride along
    // with the next group.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Rebuild racks and audit entries from a replayed event stream.
fn replay_events(events: Vec<Event>) -> (Vec<Rack>, Vec<AuditEntry>) {
    let mut racks: HashMap<Ulid, Rack> = HashMap::new();
    let mut audit = Vec::new();
    for event in events {
        match event {
            Event::RackCreated { id, row, col, active, occupied, label } => {
                racks.insert(id, Rack::new(id, Position::new(row, col), active, occupied, label));
            }
            Event::RackUpdated { id, active, occupied } => {
                if let Some(rack) = racks.get_mut(&id) {
                    rack.active = active;
                    rack.occupied = occupied;
                }
            }
            Event::AuditRecorded { entry } => audit.push(entry),
        }
    }
    (racks.into_values().collect(), audit)
}

pub struct Engine {
    pub(super) store: RackStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold this shared while they mutate; compaction takes it
    /// exclusively so its snapshot and the log swap see no writes in between.
    /// Always acquired before any rack lock.
    pub(super) commit_gate: RwLock<()>,
    /// Audit entries whose write failed, waiting for the retry worker.
    pub(super) pending_audits: Mutex<VecDeque<AuditEntry>>,
    #[cfg(test)]
    pub(super) audit_faults: std::sync::atomic::AtomicUsize,
    /// Number of upcoming `wal_append` calls to fail.
    #[cfg(test)]
    pub(super) wal_faults: std::sync::atomic::AtomicUsize,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must run inside
    /// a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let replayed = events.len();
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let (racks, audit) = replay_events(events);
        info!(
            events = replayed,
            racks = racks.len(),
            audit_entries = audit.len(),
            "replayed {}",
            wal_path.display()
        );

        Ok(Self {
            store: RackStore::from_parts(racks, audit),
            wal_tx,
            commit_gate: RwLock::new(()),
            pending_audits: Mutex::new(VecDeque::new()),
            #[cfg(test)]
            audit_faults: std::sync::atomic::AtomicUsize::new(0),
            #[cfg(test)]
            wal_faults: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    /// Send events to the group-commit writer and wait until they are durable.
    pub(super) async fn wal_append(&self, events: Vec<Event>) -> Result<(), EngineError> {
        #[cfg(test)]
        if self
            .wal_faults
            .fetch_update(
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
                |n| n.checked_sub(1),
            )
            .is_ok()
        {
            return Err(EngineError::WalError("injected WAL fault".into()));
        }
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the WAL as one `RackCreated` per rack plus every audit entry.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut racks = Vec::with_capacity(self.store.rack_count());
        for handle in self.store.rack_handles() {
            racks.push(handle.read().await.clone());
        }
        racks.sort_by_key(|r| r.position());

        let mut events: Vec<Event> = racks
            .into_iter()
            .map(|r| Event::RackCreated {
                id: r.id,
                row: r.row,
                col: r.col,
                active: r.active,
                occupied: r.occupied,
                label: r.label,
            })
            .collect();
        events.extend(
            self.store
                .audit_snapshot()
                .await
                .into_iter()
                .map(|entry| Event::AuditRecorded { entry }),
        );

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }
}
