//! Client configuration.
//!
//! The client takes ownership of a [`ClientConfig`] at construction and
//! never mutates it. Every field has a default so a config can be loaded
//! from a partial JSON document. A config can also be persisted as a
//! postcard blob through any [`StoragePort`].

use log::info;
use serde::{Deserialize, Serialize};

use crate::client::ports::StoragePort;
use crate::coap::RESPONSE_CAPACITY;
use crate::codec::Codec;
use crate::error::{CodecError, Error, Result, StorageError};
use crate::model::FirmwareId;
use crate::provision::TOKEN_CAPACITY;

pub const CONFIG_NAMESPACE: &str = "tbcoap";
pub const CONFIG_KEY: &str = "config";
const CONFIG_BLOB_MAX: usize = 1024;

/// Pre-shared device-provisioning credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningCredentials {
    pub key: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    pub enabled: bool,
    /// Interval between successful syncs.
    pub refresh_interval_secs: u32,
    /// Retry delay when a sync request fails or goes unanswered.
    pub retry_secs: u32,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: 3600,
            retry_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FotaConfig {
    pub enabled: bool,
    /// Bytes requested per firmware chunk.
    pub chunk_size: u32,
    /// Report `fw_progress` every this many chunks (0 disables).
    pub progress_every: u32,
    /// Delay between reporting `UPDATING` and rebooting.
    pub apply_delay_ms: u32,
}

impl Default for FotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: 512,
            progress_every: 10,
            apply_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // --- Identity ---
    pub device_name: String,
    pub current_firmware: FirmwareId,

    // --- Server ---
    pub server_hostname: String,
    pub server_port: u16,
    /// DTLS credential tags, passed through to the transport untouched.
    pub security_tags: Vec<u32>,

    // --- Credentials ---
    /// Fixed access token, used when nothing is stored and no provisioning
    /// credentials are configured.
    pub access_token: Option<String>,
    pub provisioning: Option<ProvisioningCredentials>,

    // --- Behaviour ---
    pub codec: Codec,
    /// Send every telemetry record as a one-entry timeseries stamped with
    /// server time.
    pub telemetry_always_timestamp: bool,
    /// Connect from inside `Client::new`.
    pub connect_on_init: bool,
    pub time: TimeSyncConfig,
    pub fota: FotaConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            current_firmware: FirmwareId::default(),
            server_hostname: String::new(),
            server_port: 5683,
            security_tags: Vec::new(),
            access_token: None,
            provisioning: None,
            codec: Codec::Json,
            telemetry_always_timestamp: false,
            connect_on_init: false,
            time: TimeSyncConfig::default(),
            fota: FotaConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Fail fast on missing or inconsistent fields. `secure` is whether the
    /// transport runs over DTLS.
    pub fn validate(&self, secure: bool) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(Error::Config("device_name must be set"));
        }
        if self.server_hostname.is_empty() {
            return Err(Error::Config("server_hostname must be set"));
        }
        if self.current_firmware.title.is_empty() || self.current_firmware.version.is_empty() {
            return Err(Error::Config("current firmware title and version must be set"));
        }
        if secure && self.security_tags.is_empty() {
            return Err(Error::Config("security_tags required for a secure transport"));
        }
        if !secure && self.access_token.is_none() && self.provisioning.is_none() {
            return Err(Error::Config("access_token or provisioning credentials required"));
        }
        if self
            .access_token
            .as_ref()
            .is_some_and(|t| t.is_empty() || t.len() > TOKEN_CAPACITY)
        {
            return Err(Error::Config("access_token length out of range"));
        }
        if self.fota.chunk_size == 0 || self.fota.chunk_size as usize > RESPONSE_CAPACITY {
            return Err(Error::Config("fota.chunk_size out of range"));
        }
        if self.time.enabled && (self.time.refresh_interval_secs == 0 || self.time.retry_secs == 0) {
            return Err(Error::Config("time sync intervals must be non-zero"));
        }
        Ok(())
    }

    /// Load a config stored with [`save`](Self::save). `Ok(None)` when
    /// nothing is stored.
    pub fn load<S: StoragePort>(storage: &S) -> Result<Option<Self>> {
        let mut buf = [0u8; CONFIG_BLOB_MAX];
        let len = match storage.read(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config =
            postcard::from_bytes(&buf[..len]).map_err(|_| Error::Decode(CodecError::Malformed))?;
        info!("TB: loaded stored config ({len} bytes)");
        Ok(Some(config))
    }

    pub fn save<S: StoragePort>(&self, storage: &mut S) -> Result<()> {
        let bytes =
            postcard::to_allocvec(self).map_err(|_| Error::Encode(CodecError::Malformed))?;
        if bytes.len() > CONFIG_BLOB_MAX {
            return Err(Error::Encode(CodecError::BufferTooSmall));
        }
        storage.write(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)?;
        info!("TB: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}
