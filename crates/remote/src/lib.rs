//! Remote collaborators: the parcel table backend and the cadastral lookup proxy.
//!
//! Both are consumed through object-safe traits returning boxed futures so the
//! sync services can hold them as `Arc<dyn ...>` and swap in the in-memory
//! implementations for offline use and tests.

pub mod connect;
pub mod lookup;
pub mod memory;
pub mod supabase;

use std::future::Future;
use std::pin::Pin;

use foundation::ids::Pnu;
use parcels::normalize::{ParcelRow, RawParcel};

pub use connect::*;
pub use lookup::*;
pub use memory::MemoryRemote;
pub use supabase::{SupabaseConfig, SupabaseStore};

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("remote request failed: {0}")]
    Network(String),
    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("remote response could not be decoded: {0}")]
    Decode(String),
    #[error("remote store unavailable")]
    Unavailable,
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

/// Backend holding the `parcels` table keyed by identifier.
pub trait RemoteStore: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Cheap reachability check used during connection bring-up.
    fn ping(&self) -> BoxFuture<'_, Result<(), RemoteError>>;

    fn select_all(&self) -> BoxFuture<'_, Result<Vec<RawParcel>, RemoteError>>;

    /// Insert-or-update by identifier.
    fn upsert(&self, rows: Vec<ParcelRow>) -> BoxFuture<'_, Result<(), RemoteError>>;

    fn delete(&self, pnu: Pnu) -> BoxFuture<'_, Result<(), RemoteError>>;
}
