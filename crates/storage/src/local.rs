//! Browser `localStorage` backend.
//!
//! Only functional on `wasm32`; elsewhere construction reports
//! [`StorageError::StorageUnavailable`] so callers can fall back to
//! [`crate::MemoryStorage`] or [`crate::FileStorage`].

#[cfg(target_arch = "wasm32")]
mod wasm_storage {
    use crate::{KeyValueStorage, StorageError};

    /// Handle to the window's `localStorage`.
    ///
    /// `web_sys::Storage` is not `Send`; the browser build runs on a single
    /// thread, so the handle is re-fetched per call instead of being stored.
    #[derive(Debug)]
    pub struct LocalStorage {
        _private: (),
    }

    impl LocalStorage {
        pub fn new() -> Result<Self, StorageError> {
            // Check once so an unavailable store is reported at construction.
            window_local_storage()?;
            Ok(Self { _private: () })
        }
    }

    impl KeyValueStorage for LocalStorage {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            window_local_storage()?
                .get_item(key)
                .map_err(|e| StorageError::Io(format!("get_item({key}) failed: {:?}", e)))
        }

        fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            // Browsers report quota exhaustion as a DOMException on set_item.
            window_local_storage()?.set_item(key, value).map_err(|e| {
                let msg = format!("{:?}", e);
                if msg.contains("Quota") {
                    StorageError::QuotaExceeded {
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Io(format!("set_item({key}) failed: {msg}"))
                }
            })
        }

        fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            window_local_storage()?
                .remove_item(key)
                .map_err(|e| StorageError::Io(format!("remove_item({key}) failed: {:?}", e)))
        }

        fn keys(&self) -> Result<Vec<String>, StorageError> {
            let storage = window_local_storage()?;
            let len = storage
                .length()
                .map_err(|e| StorageError::Io(format!("length failed: {:?}", e)))?;
            let mut out = Vec::with_capacity(len as usize);
            for i in 0..len {
                if let Ok(Some(k)) = storage.key(i) {
                    out.push(k);
                }
            }
            out.sort();
            Ok(out)
        }
    }

    fn window_local_storage() -> Result<web_sys::Storage, StorageError> {
        let win = web_sys::window().ok_or(StorageError::StorageUnavailable)?;
        win.local_storage()
            .map_err(|e| StorageError::Io(format!("localStorage error: {:?}", e)))?
            .ok_or(StorageError::StorageUnavailable)
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_storage::LocalStorage;

#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug)]
pub struct LocalStorage;

#[cfg(not(target_arch = "wasm32"))]
impl LocalStorage {
    pub fn new() -> Result<Self, crate::StorageError> {
        Err(crate::StorageError::StorageUnavailable)
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl crate::KeyValueStorage for LocalStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>, crate::StorageError> {
        Err(crate::StorageError::StorageUnavailable)
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<(), crate::StorageError> {
        Err(crate::StorageError::StorageUnavailable)
    }

    fn remove_item(&self, _key: &str) -> Result<(), crate::StorageError> {
        Err(crate::StorageError::StorageUnavailable)
    }

    fn keys(&self) -> Result<Vec<String>, crate::StorageError> {
        Err(crate::StorageError::StorageUnavailable)
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::LocalStorage;
    use crate::StorageError;

    #[test]
    fn unavailable_off_browser() {
        assert_eq!(LocalStorage::new().unwrap_err(), StorageError::StorageUnavailable);
    }

    #[test]
    fn handle_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LocalStorage>();
    }
}
