mod catalog;
mod mutations;
mod queries;
pub(crate) mod validate;

pub use catalog::default_rooms;

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

const WAL_CHANNEL_CAPACITY: usize = 4096;
/// Upper bound on commits folded into one fsync.
const MAX_GROUP_COMMIT: usize = 512;
/// Attempts to pin a reservation that keeps moving between resources.
const RESOLVE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Bound on every lock acquisition and writer hand-off.
    pub store_timeout: Duration,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Resource name → id. Guarded by the catalog mutex, which every catalog
/// mutation takes before any resource lock.
#[derive(Debug, Default)]
pub(crate) struct CatalogIndex {
    names: HashMap<String, Ulid>,
}

impl CatalogIndex {
    fn holder_of(&self, name: &str) -> Option<Ulid> {
        self.names.get(name).copied()
    }

    fn forget(&mut self, id: Ulid) {
        self.names.retain(|_, holder| *holder != id);
    }
}

/// State shared between the ledger handle and the WAL writer.
pub(crate) struct Index {
    pub(crate) rooms: DashMap<Ulid, SharedResourceState>,
    /// Reservation id → resource id.
    pub(crate) reservations: DashMap<Ulid, Ulid>,
    /// Reservation ids with a create in flight.
    claims: DashMap<Ulid, ()>,
}

/// Exclusive right to create a reservation under one id. Released on drop,
/// which for a handed-off commit happens in the writer after the event is
/// applied, so a later claimant always sees the id in `reservations`.
pub(crate) struct IdClaim {
    index: Arc<Index>,
    id: Ulid,
}

impl Drop for IdClaim {
    fn drop(&mut self) {
        self.index.claims.remove(&self.id);
    }
}

/// Locks a commit keeps until its event is durable and applied.
/// Fields drop in order: the claim goes before the resource locks.
#[derive(Default)]
pub(crate) struct Held {
    claim: Option<IdClaim>,
    catalog: Option<OwnedMutexGuard<CatalogIndex>>,
    rooms: Vec<OwnedRwLockWriteGuard<ResourceState>>,
}

impl Held {
    fn rooms(rooms: Vec<OwnedRwLockWriteGuard<ResourceState>>) -> Self {
        Self {
            rooms,
            ..Self::default()
        }
    }

    fn with_claim(mut self, claim: IdClaim) -> Self {
        self.claim = Some(claim);
        self
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(crate) struct PendingCommit {
    event: Event,
    held: Held,
    response: oneshot::Sender<io::Result<()>>,
}

pub(crate) enum WalCommand {
    Commit(PendingCommit),
    Maintain(Maintenance),
}

pub(crate) enum Maintenance {
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches commits.
/// 1. Block until the first Commit arrives.
/// 2. Drain every immediately available Commit (the batch window).
/// 3. One write + fsync for the whole batch.
/// 4. On success apply each event to memory, then release its locks and answer.
///    On failure the file is rolled back and every commit in the batch fails.
async fn wal_writer_loop(mut wal: Wal, index: Arc<Index>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Commit(first) => {
                let mut batch = vec![first];
                let mut deferred = None;
                while batch.len() < MAX_GROUP_COMMIT {
                    match rx.try_recv() {
                        Ok(WalCommand::Commit(next)) => batch.push(next),
                        Ok(WalCommand::Maintain(m)) => {
                            deferred = Some(m);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                flush_batch(&mut wal, &index, batch);
                if let Some(other) = deferred {
                    handle_maintenance(&mut wal, other);
                }
            }
            WalCommand::Maintain(m) => handle_maintenance(&mut wal, m),
        }
    }
    tracing::debug!("wal writer: channel closed, exiting");
}

fn flush_batch(wal: &mut Wal, index: &Index, batch: Vec<PendingCommit>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = wal.append_batch(batch.iter().map(|p| &p.event));
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(()) => {
            for PendingCommit {
                event,
                mut held,
                response,
            } in batch
            {
                apply_event(index, held.catalog.as_deref_mut(), &mut held.rooms, &event);
                drop(held);
                let _ = response.send(Ok(()));
            }
        }
        Err(e) => {
            tracing::error!(commits = batch.len(), "wal append failed: {e}");
            metrics::counter!(observability::WAL_FLUSH_FAILURES_TOTAL).increment(1);
            for pending in batch {
                drop(pending.held);
                let _ = pending
                    .response
                    .send(Err(io::Error::new(e.kind(), e.to_string())));
            }
        }
    }
}

fn handle_maintenance(wal: &mut Wal, cmd: Maintenance) {
    match cmd {
        Maintenance::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            match &result {
                Ok(()) => {
                    metrics::counter!(observability::COMPACTIONS_TOTAL).increment(1);
                    tracing::info!(events = events.len(), bytes = wal.len_bytes(), "wal compacted");
                }
                Err(e) => tracing::error!("wal compaction failed: {e}"),
            }
            let _ = response.send(result);
        }
        Maintenance::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

/// Resources whose locks an event needs, excluding one it creates.
fn touched_resources(event: &Event) -> Vec<Ulid> {
    match event {
        Event::ResourceCreated { .. } => Vec::new(),
        Event::ResourceUpdated { resource } => vec![resource.id],
        Event::ResourceDeleted { id } => vec![*id],
        Event::ReservationCommitted { reservation } => vec![reservation.resource_id],
        Event::ReservationUpdated {
            previous_resource_id,
            reservation,
        } => {
            if *previous_resource_id == reservation.resource_id {
                vec![reservation.resource_id]
            } else {
                vec![*previous_resource_id, reservation.resource_id]
            }
        }
        Event::ReservationCancelled { resource_id, .. } => vec![*resource_id],
    }
}

/// Apply an event to one resource's state (caller holds its lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event) {
    match event {
        Event::ResourceUpdated { resource } => rs.resource = resource.clone(),
        Event::ReservationCommitted { reservation } => rs.insert(reservation.clone()),
        Event::ReservationUpdated {
            previous_resource_id,
            reservation,
        } => {
            if rs.id() == *previous_resource_id {
                rs.remove(reservation.id);
            }
            if rs.id() == reservation.resource_id {
                rs.insert(reservation.clone());
            }
        }
        Event::ReservationCancelled { id, .. } => {
            rs.remove(*id);
        }
        // Creation and deletion happen at the map level.
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => {}
    }
}

/// Apply a durable event: catalog names, the resource map, the reservation
/// index and every touched resource. The caller holds every lock involved.
fn apply_event(
    index: &Index,
    catalog: Option<&mut CatalogIndex>,
    rooms: &mut [OwnedRwLockWriteGuard<ResourceState>],
    event: &Event,
) {
    for rs in rooms.iter_mut() {
        apply_to_resource(rs, event);
    }

    match event {
        Event::ResourceCreated { resource } => {
            if let Some(catalog) = catalog {
                catalog.names.insert(resource.name.clone(), resource.id);
            }
            index.rooms.insert(
                resource.id,
                Arc::new(RwLock::new(ResourceState::new(resource.clone()))),
            );
            metrics::gauge!(observability::RESOURCES_ACTIVE).set(index.rooms.len() as f64);
        }
        Event::ResourceUpdated { resource } => {
            if let Some(catalog) = catalog {
                catalog.forget(resource.id);
                catalog.names.insert(resource.name.clone(), resource.id);
            }
        }
        Event::ResourceDeleted { id } => {
            if let Some(catalog) = catalog {
                catalog.forget(*id);
            }
            index.rooms.remove(id);
            metrics::gauge!(observability::RESOURCES_ACTIVE).set(index.rooms.len() as f64);
        }
        Event::ReservationCommitted { reservation } | Event::ReservationUpdated { reservation, .. } => {
            index.reservations.insert(reservation.id, reservation.resource_id);
        }
        Event::ReservationCancelled { id, .. } => {
            index.reservations.remove(id);
        }
    }
}

impl Index {
    fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            claims: DashMap::new(),
        }
    }
}

/// The durable reservation ledger: resource catalog plus per-resource
/// reservation sets, backed by the WAL.
pub struct Ledger {
    index: Arc<Index>,
    catalog: Arc<Mutex<CatalogIndex>>,
    wal_tx: mpsc::Sender<WalCommand>,
    store_timeout: Duration,
    path: PathBuf,
}

impl Ledger {
    /// Replay the WAL at `wal_path` and start the writer task.
    /// Must be called from within a tokio runtime.
    pub fn open(wal_path: impl AsRef<Path>, options: LedgerOptions) -> Result<Self> {
        let path = wal_path.as_ref().to_path_buf();
        let events = Wal::replay(&path).map_err(|e| {
            tracing::error!("wal replay failed: {e}");
            Error::Store(e.to_string())
        })?;

        let index = Arc::new(Index::new());
        let mut catalog = CatalogIndex::default();
        for (n, event) in events.iter().enumerate() {
            replay_event(&index, &mut catalog, event).map_err(|e| {
                tracing::warn!(entry = n, "wal replay inconsistent: {e}");
                e
            })?;
        }
        tracing::info!(
            events = events.len(),
            resources = index.rooms.len(),
            reservations = index.reservations.len(),
            "ledger replayed"
        );

        let wal = Wal::open(&path).map_err(|e| Error::Store(e.to_string()))?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, index.clone(), wal_rx));

        Ok(Self {
            index,
            catalog: Arc::new(Mutex::new(catalog)),
            wal_tx,
            store_timeout: options.store_timeout,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a lock acquisition or hand-off under the store timeout.
    async fn within<F: Future>(&self, stage: &'static str, fut: F) -> Result<F::Output> {
        tokio::time::timeout(self.store_timeout, fut).await.map_err(|_| {
            metrics::counter!(observability::STORE_TIMEOUTS_TOTAL, "stage" => stage).increment(1);
            tracing::warn!(stage, "store timeout");
            Error::Timeout(stage)
        })
    }

    fn room(&self, id: Ulid) -> Result<SharedResourceState> {
        self.index
            .rooms
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::resource_not_found(id))
    }

    /// True while `arc` is still the live state for `id`; false once the
    /// resource was deleted while we waited for its lock.
    fn is_live(&self, id: Ulid, arc: &SharedResourceState) -> bool {
        self.index
            .rooms
            .get(&id)
            .is_some_and(|cur| Arc::ptr_eq(cur.value(), arc))
    }

    pub(crate) async fn lock_catalog(&self) -> Result<OwnedMutexGuard<CatalogIndex>> {
        self.within("catalog lock", self.catalog.clone().lock_owned())
            .await
    }

    pub(crate) async fn write_room(&self, id: Ulid) -> Result<OwnedRwLockWriteGuard<ResourceState>> {
        let arc = self.room(id)?;
        let guard = self.within("resource lock", arc.clone().write_owned()).await?;
        if !self.is_live(id, &arc) {
            return Err(Error::resource_not_found(id));
        }
        Ok(guard)
    }

    pub(crate) async fn read_room(
        &self,
        id: Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<ResourceState>> {
        let arc = self.room(id)?;
        let guard = self.within("resource lock", arc.clone().read_owned()).await?;
        if !self.is_live(id, &arc) {
            return Err(Error::resource_not_found(id));
        }
        Ok(guard)
    }

    /// Write-lock several resources in id order.
    pub(crate) async fn write_rooms(
        &self,
        ids: &[Ulid],
    ) -> Result<Vec<OwnedRwLockWriteGuard<ResourceState>>> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.write_room(id).await?);
        }
        Ok(guards)
    }

    pub fn resource_count(&self) -> usize {
        self.index.rooms.len()
    }

    /// Claim `id` for a create. `None` while another create holds it.
    pub(crate) fn claim_id(&self, id: Ulid) -> Option<IdClaim> {
        match self.index.claims.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(IdClaim {
                    index: self.index.clone(),
                    id,
                })
            }
        }
    }

    pub(crate) fn resource_of(&self, reservation_id: Ulid) -> Option<Ulid> {
        self.index.reservations.get(&reservation_id).map(|e| *e.value())
    }

    /// Ids of every live resource, sorted.
    pub(crate) fn resource_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.index.rooms.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Hand the event and its locks to the writer, then wait for the verdict.
    /// A timeout can only fire before hand-off, in which case the locks are
    /// released and nothing was written.
    pub(crate) async fn commit(&self, event: Event, held: Held) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.hand_off(WalCommand::Commit(PendingCommit {
            event,
            held,
            response: tx,
        }))
        .await?;
        rx.await
            .map_err(|_| Error::WriterStopped)?
            .map_err(|e| Error::Store(e.to_string()))
    }

    async fn hand_off(&self, cmd: WalCommand) -> Result<()> {
        let permit = self
            .within("wal hand-off", self.wal_tx.reserve())
            .await?
            .map_err(|_| Error::WriterStopped)?;
        permit.send(cmd);
        Ok(())
    }
}

/// Fold one replayed event into fresh state. Nothing else can see the
/// locks yet, so every acquisition is uncontended.
fn replay_event(index: &Index, catalog: &mut CatalogIndex, event: &Event) -> Result<()> {
    if let Event::ResourceCreated { resource } = event
        && index.rooms.contains_key(&resource.id)
    {
        return Err(Error::Inconsistent(format!(
            "resource {} created twice",
            resource.id
        )));
    }

    let mut rooms = Vec::new();
    for id in touched_resources(event) {
        let arc = index
            .rooms
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::Inconsistent(format!("event references unknown resource {id}")))?;
        let guard = arc
            .try_write_owned()
            .map_err(|_| Error::Inconsistent(format!("resource {id} locked during replay")))?;
        rooms.push(guard);
    }

    if let Event::ResourceDeleted { id } = event
        && rooms.iter().any(|rs| !rs.is_empty())
    {
        return Err(Error::Inconsistent(format!(
            "resource {id} deleted while it still had reservations"
        )));
    }

    apply_event(index, Some(catalog), &mut rooms, event);
    Ok(())
}
