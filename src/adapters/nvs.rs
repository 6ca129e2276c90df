//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StoragePort`] for the access token and the persisted
//! client configuration.
//!
//! - **`espidf` feature**: ESP-IDF NVS through the raw `nvs_*` API. With
//!   `CONFIG_NVS_ENCRYPTION` set, the token namespace is encrypted
//!   transparently.
//! - **host**: an in-memory map keyed by `namespace::key`, for tests and
//!   simulation.
//!
//! NVS limits namespace and key names to 15 bytes; longer names are
//! truncated.

use log::info;

use crate::client::ports::StoragePort;
use crate::error::StorageError;

#[cfg(not(feature = "espidf"))]
use std::collections::HashMap;

#[cfg(feature = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(feature = "espidf")]
const NAME_MAX: usize = 15;

pub struct NvsStorage {
    #[cfg(not(feature = "espidf"))]
    store: HashMap<String, Vec<u8>>,
}

impl NvsStorage {
    /// Initialise NVS flash. On first boot or after a version mismatch
    /// the partition is erased and re-initialised.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(feature = "espidf")]
        {
            // SAFETY: called once from the main task before any other NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                log::warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK || unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(StorageError::WriteFailed);
                }
            } else if ret != ESP_OK {
                return Err(StorageError::ReadFailed);
            }
            info!("NVS: ESP-IDF backend ready");
            Ok(Self {})
        }

        #[cfg(not(feature = "espidf"))]
        {
            info!("NVS: simulation backend");
            Ok(Self {
                store: HashMap::new(),
            })
        }
    }

    #[cfg(not(feature = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{namespace}::{key}")
    }

    /// NUL-terminated copy of an NVS name.
    #[cfg(feature = "espidf")]
    fn c_name(name: &str) -> [u8; NAME_MAX + 1] {
        let mut buf = [0u8; NAME_MAX + 1];
        let len = name.len().min(NAME_MAX);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        buf
    }

    /// Open a namespace, run `f` with the handle, then close it.
    #[cfg(feature = "espidf")]
    fn with_handle<T>(
        namespace: &str,
        write: bool,
        f: impl FnOnce(nvs_handle_t) -> Result<T, esp_err_t>,
    ) -> Result<T, esp_err_t> {
        let ns = Self::c_name(namespace);
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };
        let mut handle: nvs_handle_t = 0;
        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }
        let result = f(handle);
        unsafe { nvs_close(handle) };
        result
    }

    #[cfg(feature = "espidf")]
    fn commit(handle: nvs_handle_t) -> Result<(), esp_err_t> {
        match unsafe { nvs_commit(handle) } {
            ESP_OK => Ok(()),
            e => Err(e),
        }
    }
}

#[cfg(not(feature = "espidf"))]
impl StoragePort for NvsStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self
            .store
            .get(&Self::composite_key(namespace, key))
            .ok_or(StorageError::NotFound)?;
        let dst = buf.get_mut(..data.len()).ok_or(StorageError::BufferTooSmall)?;
        dst.copy_from_slice(data);
        Ok(data.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.store
            .insert(Self::composite_key(namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store.remove(&Self::composite_key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store.contains_key(&Self::composite_key(namespace, key))
    }
}

#[cfg(feature = "espidf")]
impl StoragePort for NvsStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let key = Self::c_name(key);
        let result = Self::with_handle(namespace, false, |handle| {
            let mut size = buf.len();
            let ret = unsafe {
                nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
            };
            if ret == ESP_OK { Ok(size) } else { Err(ret) }
        });
        match result {
            Ok(size) => Ok(size),
            Err(ESP_ERR_NVS_NOT_FOUND) => Err(StorageError::NotFound),
            Err(ESP_ERR_NVS_INVALID_LENGTH) => Err(StorageError::BufferTooSmall),
            Err(e) => {
                log::warn!("NVS: read {namespace} failed: {e}");
                Err(StorageError::ReadFailed)
            }
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let key = Self::c_name(key);
        Self::with_handle(namespace, true, |handle| {
            let ret = unsafe {
                nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len())
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            Self::commit(handle)
        })
        .map_err(|_| StorageError::WriteFailed)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let key = Self::c_name(key);
        Self::with_handle(namespace, true, |handle| {
            let ret = unsafe { nvs_erase_key(handle, key.as_ptr().cast()) };
            if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                return Err(ret);
            }
            Self::commit(handle)
        })
        .map_err(|_| StorageError::WriteFailed)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        let key = Self::c_name(key);
        Self::with_handle(namespace, false, |handle| {
            let ret = unsafe { nvs_find_key(handle, key.as_ptr().cast(), core::ptr::null_mut()) };
            Ok(ret == ESP_OK)
        })
        .unwrap_or(false)
    }
}
