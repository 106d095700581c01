use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use foundation::ids::Pnu;
use parcels::normalize::{ParcelRow, RawParcel};
use parking_lot::Mutex;

use crate::{BoxFuture, RemoteError, RemoteStore};

/// In-memory parcel table for tests and offline runs.
///
/// Supports failure injection (`set_offline`, `fail_next_pings`) and an
/// artificial latency so overlapping requests can be observed.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    rows: Mutex<BTreeMap<String, RawParcel>>,
    offline: AtomicBool,
    failing_pings: AtomicU32,
    latency: Mutex<Option<Duration>>,
    pings: AtomicUsize,
    selects: AtomicUsize,
    upserts: AtomicUsize,
    deletes: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCallCounts {
    pub pings: usize,
    pub selects: usize,
    pub upserts: usize,
    pub deletes: usize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: impl IntoIterator<Item = RawParcel>) -> Self {
        let remote = Self::new();
        remote.seed(rows);
        remote
    }

    /// Inserts rows directly, bypassing call accounting.
    pub fn seed(&self, rows: impl IntoIterator<Item = RawParcel>) {
        let mut table = self.rows.lock();
        for row in rows {
            if let Some(id) = row_id(&row) {
                table.insert(id, row);
            }
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_next_pings(&self, n: u32) {
        self.failing_pings.store(n, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn row(&self, pnu: &str) -> Option<RawParcel> {
        self.rows.lock().get(pnu).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> RemoteCallCounts {
        RemoteCallCounts {
            pings: self.pings.load(Ordering::SeqCst),
            selects: self.selects.load(Ordering::SeqCst),
            upserts: self.upserts.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    async fn simulate(&self) -> Result<(), RemoteError> {
        let latency = *self.latency.lock();
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable);
        }
        Ok(())
    }
}

fn row_id(row: &RawParcel) -> Option<String> {
    row.0
        .get("pnu")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl RemoteStore for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), RemoteError>> {
        Box::pin(async move {
            self.pings.fetch_add(1, Ordering::SeqCst);
            let failing = self.failing_pings.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_pings.store(failing - 1, Ordering::SeqCst);
                return Err(RemoteError::Network("injected ping failure".to_string()));
            }
            self.simulate().await
        })
    }

    fn select_all(&self) -> BoxFuture<'_, Result<Vec<RawParcel>, RemoteError>> {
        Box::pin(async move {
            self.selects.fetch_add(1, Ordering::SeqCst);
            self.simulate().await?;
            Ok(self.rows.lock().values().cloned().collect())
        })
    }

    fn upsert(&self, rows: Vec<ParcelRow>) -> BoxFuture<'_, Result<(), RemoteError>> {
        Box::pin(async move {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            self.simulate().await?;
            let mut table = self.rows.lock();
            for row in rows {
                let value = serde_json::to_value(&row)
                    .map_err(|e| RemoteError::Decode(e.to_string()))?;
                if let Some(raw) = RawParcel::from_value(value) {
                    table.insert(row.pnu.clone(), raw);
                }
            }
            Ok(())
        })
    }

    fn delete(&self, pnu: Pnu) -> BoxFuture<'_, Result<(), RemoteError>> {
        Box::pin(async move {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.simulate().await?;
            self.rows.lock().remove(pnu.as_str());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryRemote;
    use crate::{RemoteError, RemoteStore};
    use foundation::ids::Pnu;
    use parcels::normalize::ParcelRow;
    use parcels::record::{Mode, ParcelRecord};

    fn row(id: &str) -> ParcelRow {
        ParcelRow::from(&ParcelRecord::new(Pnu::new(id).unwrap(), Mode::Click))
    }

    #[tokio::test]
    async fn upsert_select_delete() {
        let remote = MemoryRemote::new();
        remote.upsert(vec![row("a"), row("b")]).await.unwrap();
        remote.upsert(vec![row("a")]).await.unwrap();
        assert_eq!(remote.select_all().await.unwrap().len(), 2);
        remote.delete(Pnu::new("a").unwrap()).await.unwrap();
        assert!(remote.row("a").is_none());
        assert_eq!(remote.calls().upserts, 2);
        assert_eq!(remote.calls().deletes, 1);
    }

    #[tokio::test]
    async fn offline_fails_every_call() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        assert_eq!(remote.select_all().await.unwrap_err(), RemoteError::Unavailable);
        assert_eq!(remote.ping().await.unwrap_err(), RemoteError::Unavailable);
    }

    #[tokio::test]
    async fn injected_ping_failures_are_consumed() {
        let remote = MemoryRemote::new();
        remote.fail_next_pings(2);
        assert!(remote.ping().await.is_err());
        assert!(remote.ping().await.is_err());
        assert!(remote.ping().await.is_ok());
        assert_eq!(remote.calls().pings, 3);
    }
}
