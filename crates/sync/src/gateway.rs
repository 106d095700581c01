//! Two-tier persistence: synchronous local storage in front of a best-effort
//! remote store.
//!
//! Reads prefer the remote tier when it is online and fall back to local
//! storage on any failure. Writes always land locally first; a remote failure
//! is logged and never reaches the caller. Loads are guarded by a cooldown, a
//! per-window call ceiling and in-flight de-duplication.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use foundation::ids::Pnu;
use foundation::time::{Clock, Millis};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parcels::normalize::{ParcelRow, normalize_batch};
use parcels::record::ParcelRecord;
use parking_lot::Mutex;
use remote::{ConnectionStatus, RemoteStore, connect_with_backoff};
use runtime::budget::CallBudget;
use runtime::metrics::{Metrics, MetricsSnapshot};
use storage::ColorState;
use storage::slots::ParcelSlots;

use crate::config::SyncConfig;
use crate::error::SyncError;

pub type LoadResult = Arc<Vec<ParcelRecord>>;

/// A backend load plus the local write version its rows were read at.
#[derive(Clone)]
struct Fetched {
    records: LoadResult,
    version: u64,
}

type InFlight = Shared<BoxFuture<'static, Fetched>>;

struct LoadState {
    budget: CallBudget,
    last_started: Option<Millis>,
    cache: Option<LoadResult>,
    in_flight: Option<(u64, InFlight)>,
    generation: u64,
}

pub struct PersistenceGateway {
    slots: Arc<ParcelSlots>,
    remote: Option<Arc<dyn RemoteStore>>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    status: Mutex<ConnectionStatus>,
    bring_up: tokio::sync::OnceCell<ConnectionStatus>,
    load: Mutex<LoadState>,
    // Serializes writes so each identifier sees them in issuance order.
    writes: Arc<tokio::sync::Mutex<()>>,
    // Bumped under `writes` after every local record write.
    local_version: Arc<AtomicU64>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("remote", &self.remote.as_ref().map(|r| r.name().to_string()))
            .field("status", &*self.status.lock())
            .finish_non_exhaustive()
    }
}

impl PersistenceGateway {
    pub fn new(
        slots: Arc<ParcelSlots>,
        remote: Option<Arc<dyn RemoteStore>>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let status = if remote.is_some() {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Disabled
        };
        Self {
            slots,
            remote,
            clock,
            load: Mutex::new(LoadState {
                budget: CallBudget::new(config.load_ceiling, config.load_window_ms),
                last_started: None,
                cache: None,
                in_flight: None,
                generation: 0,
            }),
            config,
            status: Mutex::new(status),
            bring_up: tokio::sync::OnceCell::new(),
            writes: Arc::new(tokio::sync::Mutex::new(())),
            local_version: Arc::new(AtomicU64::new(0)),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn slots(&self) -> &Arc<ParcelSlots> {
        &self.slots
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.metrics.counter(name)
    }

    fn online_remote(&self) -> Option<Arc<dyn RemoteStore>> {
        if self.status().is_online() {
            self.remote.clone()
        } else {
            None
        }
    }

    /// Brings the remote tier up with exponential backoff.
    ///
    /// Runs at most once per session. Concurrent callers wait for the same
    /// bring-up, and later calls return the settled status without touching
    /// the network.
    pub async fn connect(&self) -> ConnectionStatus {
        let Some(remote) = self.remote.clone() else {
            return ConnectionStatus::Disabled;
        };
        *self
            .bring_up
            .get_or_init(|| async move {
                let status = connect_with_backoff(remote.as_ref(), &self.config.backoff).await;
                *self.status.lock() = status;
                if let ConnectionStatus::Offline { attempts } = status {
                    self.metrics.set_gauge("remote.connect_attempts", attempts as i64);
                }
                status
            })
            .await
    }

    /// Loads every stored record.
    ///
    /// Concurrent callers share one request. Inside the cooldown, or once the
    /// window's call ceiling is spent, the previous result is returned without
    /// touching either tier.
    pub async fn load(&self) -> LoadResult {
        self.metrics.inc_counter("load.calls", 1);
        let (generation, request) = {
            let mut st = self.load.lock();
            if let Some((generation, request)) = &st.in_flight {
                self.metrics.inc_counter("load.deduplicated", 1);
                (*generation, request.clone())
            } else {
                let now = self.clock.now();
                if let Some(cached) = &st.cache {
                    if let Some(last) = st.last_started
                        && now.saturating_since(last) < self.config.load_cooldown_ms
                    {
                        self.metrics.inc_counter("load.cooldown_hits", 1);
                        return cached.clone();
                    }
                    if st.budget.is_exhausted(now) {
                        self.metrics.inc_counter("load.ceiling_hits", 1);
                        tracing::debug!("load ceiling reached, serving cached records");
                        return cached.clone();
                    }
                }
                if !st.budget.try_consume(now) {
                    self.metrics.inc_counter("load.ceiling_hits", 1);
                    return Arc::new(Vec::new());
                }
                st.last_started = Some(now);
                st.generation += 1;
                let request = fetch_records(
                    self.slots.clone(),
                    self.online_remote(),
                    self.writes.clone(),
                    self.local_version.clone(),
                    self.metrics.clone(),
                )
                .boxed()
                .shared();
                st.in_flight = Some((st.generation, request.clone()));
                (st.generation, request)
            }
        };

        let fetched = request.await;

        let mut st = self.load.lock();
        if st.in_flight.as_ref().is_some_and(|(g, _)| *g == generation) {
            st.in_flight = None;
            // A write that landed after the rows were read is missing from them.
            if fetched.version == self.local_version.load(Ordering::Acquire) {
                st.cache = Some(fetched.records.clone());
            } else {
                tracing::debug!("local writes raced the load, not caching its result");
                st.cache = None;
            }
        }
        fetched.records
    }

    /// Drops the cached load result and cooldown so the next load re-queries.
    /// Wired to the remote change feed.
    pub fn invalidate(&self) {
        let mut st = self.load.lock();
        st.cache = None;
        st.last_started = None;
        tracing::debug!("load cache invalidated");
    }

    /// Replaces the full local record set and mirrors it remotely.
    ///
    /// Returns `false` only when the local write failed.
    pub async fn save(&self, records: &[ParcelRecord]) -> bool {
        let _order = self.writes.lock().await;
        if let Err(e) = self.slots.save_records(records) {
            tracing::warn!("saving {} records locally failed: {e}", records.len());
            self.metrics.inc_counter("save.local_failures", 1);
            return false;
        }
        self.local_version.fetch_add(1, Ordering::AcqRel);
        self.replace_cache(records.to_vec());
        if let Some(remote) = self.online_remote() {
            let rows: Vec<ParcelRow> = records.iter().map(ParcelRow::from).collect();
            if let Err(e) = remote.upsert(rows).await {
                tracing::warn!("remote save failed, keeping local copy: {e}");
                self.metrics.inc_counter("remote.failures", 1);
            }
        }
        true
    }

    /// Inserts or replaces one record in both tiers.
    pub async fn upsert_record(&self, record: &ParcelRecord) -> bool {
        let _order = self.writes.lock().await;
        let mut records = self.local_records();
        match records.iter_mut().find(|r| r.pnu == record.pnu) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        if let Err(e) = self.slots.save_records(&records) {
            tracing::warn!("saving parcel {} locally failed: {e}", record.pnu);
            self.metrics.inc_counter("save.local_failures", 1);
            return false;
        }
        self.local_version.fetch_add(1, Ordering::AcqRel);
        self.patch_cache(|cached| match cached.iter_mut().find(|r| r.pnu == record.pnu) {
            Some(existing) => *existing = record.clone(),
            None => cached.push(record.clone()),
        });
        if let Some(remote) = self.online_remote()
            && let Err(e) = remote.upsert(vec![ParcelRow::from(record)]).await
        {
            tracing::warn!("remote upsert of {} failed, keeping local copy: {e}", record.pnu);
            self.metrics.inc_counter("remote.failures", 1);
        }
        true
    }

    /// Removes one record from both tiers. Returns whether it was stored locally.
    pub async fn remove_record(&self, pnu: &Pnu) -> Result<bool, SyncError> {
        let _order = self.writes.lock().await;
        let mut records = self.local_records();
        let before = records.len();
        records.retain(|r| &r.pnu != pnu);
        let existed = records.len() != before;
        if existed {
            self.slots
                .save_records(&records)
                .map_err(|source| SyncError::Persist {
                    what: "parcel records",
                    source,
                })?;
            self.local_version.fetch_add(1, Ordering::AcqRel);
        }
        self.patch_cache(|cached| cached.retain(|r| &r.pnu != pnu));
        if let Some(remote) = self.online_remote()
            && let Err(e) = remote.delete(pnu.clone()).await
        {
            tracing::warn!("remote delete of {pnu} failed: {e}");
            self.metrics.inc_counter("remote.failures", 1);
        }
        Ok(existed)
    }

    /// Writes one color assignment to the local color map.
    pub fn save_color_state(&self, pnu: &Pnu, state: ColorState) -> bool {
        let mut colors = self.slots.load_colors();
        colors.insert(pnu.clone(), state);
        match self.slots.save_colors(&colors) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("saving color of {pnu} failed: {e}");
                self.metrics.inc_counter("save.local_failures", 1);
                false
            }
        }
    }

    pub fn get_color_state(&self, pnu: &Pnu) -> Option<ColorState> {
        self.slots.load_colors().remove(pnu)
    }

    pub fn remove_color_state(&self, pnu: &Pnu) -> bool {
        self.remove_color_states(std::slice::from_ref(pnu))
    }

    pub fn remove_color_states(&self, pnus: &[Pnu]) -> bool {
        let mut colors = self.slots.load_colors();
        let before = colors.len();
        colors.retain(|id, _| !pnus.contains(id));
        if colors.len() == before {
            return true;
        }
        match self.slots.save_colors(&colors) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("removing {} color entries failed: {e}", pnus.len());
                false
            }
        }
    }

    pub fn color_states(&self) -> BTreeMap<Pnu, ColorState> {
        self.slots.load_colors()
    }

    /// Canonical records currently in local storage.
    pub fn local_records(&self) -> Vec<ParcelRecord> {
        let rows = self.slots.load_records();
        normalize_batch(&rows).0
    }

    fn replace_cache(&self, records: Vec<ParcelRecord>) {
        let mut st = self.load.lock();
        if st.cache.is_some() {
            st.cache = Some(Arc::new(records));
        }
    }

    fn patch_cache(&self, f: impl FnOnce(&mut Vec<ParcelRecord>)) {
        let mut st = self.load.lock();
        if let Some(cached) = st.cache.as_mut() {
            f(Arc::make_mut(cached));
        }
    }
}

fn read_local(slots: &ParcelSlots) -> Vec<ParcelRecord> {
    let (local, dropped) = normalize_batch(&slots.load_records());
    if dropped > 0 {
        tracing::warn!("skipped {dropped} unreadable local parcel rows");
    }
    local
}

/// One backend load. Remote rows are merged with local ones (newest
/// `updated_at_ms` wins per identifier) and the merge is mirrored locally.
///
/// Local rows are read while holding the write lock, after the remote
/// answered, so a write issued during the remote round trip is part of the
/// merge instead of being overwritten by it.
async fn fetch_records(
    slots: Arc<ParcelSlots>,
    remote: Option<Arc<dyn RemoteStore>>,
    writes: Arc<tokio::sync::Mutex<()>>,
    local_version: Arc<AtomicU64>,
    metrics: Arc<Metrics>,
) -> Fetched {
    metrics.inc_counter("load.backend", 1);
    let rows = match &remote {
        Some(remote) => match remote.select_all().await {
            Ok(rows) => Some(rows),
            Err(e) => {
                tracing::warn!("remote load from {} failed, using local storage: {e}", remote.name());
                metrics.inc_counter("remote.failures", 1);
                None
            }
        },
        None => None,
    };

    let _order = writes.lock().await;
    let version = local_version.load(Ordering::Acquire);
    let local = read_local(&slots);
    let Some(rows) = rows else {
        return Fetched {
            records: Arc::new(local),
            version,
        };
    };
    let (fetched, dropped) = normalize_batch(&rows);
    if dropped > 0 {
        tracing::warn!("skipped {dropped} unreadable remote parcel rows");
    }

    let mut merged: BTreeMap<Pnu, ParcelRecord> = BTreeMap::new();
    for record in local.into_iter().chain(fetched) {
        match merged.get(&record.pnu) {
            Some(existing) if existing.updated_at_ms > record.updated_at_ms => {}
            _ => {
                merged.insert(record.pnu.clone(), record);
            }
        }
    }
    let merged: Vec<ParcelRecord> = merged.into_values().collect();
    if let Err(e) = slots.save_records(&merged) {
        tracing::warn!("mirroring remote records locally failed: {e}");
    }
    Fetched {
        records: Arc::new(merged),
        version,
    }
}
