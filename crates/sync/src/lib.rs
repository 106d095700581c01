//! Parcel state synchronization: color and marker state, deletion tombstones,
//! the two-tier persistence gateway and the restore cycle, composed behind
//! [`ParcelService`].

pub mod colors;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod restore;
pub mod service;
pub mod tombstones;

pub use colors::{ColorChange, ColorStore};
pub use config::SyncConfig;
pub use error::SyncError;
pub use events::ParcelEvent;
pub use gateway::PersistenceGateway;
pub use restore::{RestoreOutcome, RestoreReport, RestoreState};
pub use service::*;
pub use tombstones::TombstoneSet;
