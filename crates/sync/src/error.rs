use foundation::color::InvalidColorIndex;
use foundation::ids::{EmptyPnu, Pnu};
use storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    InvalidColor(#[from] InvalidColorIndex),
    #[error(transparent)]
    InvalidPnu(#[from] EmptyPnu),
    #[error("parcel {0} is not registered")]
    UnknownParcel(Pnu),
    #[error("failed to persist {what}: {source}")]
    Persist {
        what: &'static str,
        #[source]
        source: StorageError,
    },
}
