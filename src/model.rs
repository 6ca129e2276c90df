//! Payload types exchanged with the server.
//!
//! Attributes and telemetry are closed sets of optional fields. `None`
//! means "not present in this message", never "null". Text encodings omit
//! absent fields; compact encodings keep every slot so positional
//! decoders stay aligned.

use core::fmt;

use heapless::String;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// Capacity of firmware title/version strings.
pub const FW_STRING_CAPACITY: usize = 32;
/// Capacity of the firmware checksum string (hex SHA-256).
pub const CHECKSUM_CAPACITY: usize = 64;
/// Capacity of an RPC method name.
pub const RPC_METHOD_CAPACITY: usize = 32;
/// Capacity of raw RPC params JSON.
pub const RPC_PARAMS_CAPACITY: usize = 128;

pub type FwString = String<FW_STRING_CAPACITY>;

/// Serialises an all-`Option` struct densely for compact formats and
/// sparsely (absent fields skipped) for human-readable ones.
macro_rules! sparse_struct {
    ($ty:ident { $($field:ident),+ $(,)? }) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let dense = !serializer.is_human_readable();
                let len = [$(stringify!($field)),+].len();
                let mut st = serializer.serialize_struct(stringify!($ty), len)?;
                $(
                    if dense || self.$field.is_some() {
                        st.serialize_field(stringify!($field), &self.$field)?;
                    } else {
                        st.skip_field(stringify!($field))?;
                    }
                )+
                st.end()
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Firmware identity and state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareId {
    pub title: FwString,
    pub version: FwString,
}

impl FirmwareId {
    /// Returns `None` if either string exceeds [`FW_STRING_CAPACITY`].
    pub fn new(title: &str, version: &str) -> Option<Self> {
        Some(Self {
            title: String::try_from(title).ok()?,
            version: String::try_from(version).ok()?,
        })
    }

    pub fn matches(&self, title: &str, version: &str) -> bool {
        self.title == title && self.version == version
    }
}

impl fmt::Display for FirmwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.title, self.version)
    }
}

/// Firmware update state as reported in `fw_state` telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FwState {
    Idle,
    Downloading,
    Downloaded,
    Verified,
    Updating,
    Updated,
    Failed,
}

impl FwState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Downloading => "DOWNLOADING",
            Self::Downloaded => "DOWNLOADED",
            Self::Verified => "VERIFIED",
            Self::Updating => "UPDATING",
            Self::Updated => "UPDATED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for FwState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Shared attributes
// ---------------------------------------------------------------------------

/// Shared attributes mirrored from the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Attributes {
    pub fw_title: Option<FwString>,
    pub fw_version: Option<FwString>,
    pub fw_size: Option<u32>,
    pub fw_checksum: Option<String<CHECKSUM_CAPACITY>>,
    pub fw_checksum_algorithm: Option<String<16>>,
    /// Application telemetry period, seconds.
    pub report_interval: Option<u32>,
}

sparse_struct!(Attributes {
    fw_title,
    fw_version,
    fw_size,
    fw_checksum,
    fw_checksum_algorithm,
    report_interval,
});

/// A loosely typed attribute value, as found in update envelopes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttrValue<'a> {
    Str(&'a str),
    Int(i64),
    Bool(bool),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrSetError {
    UnknownKey,
    WrongType,
    TooLong,
}

impl fmt::Display for AttrSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey => write!(f, "unknown key"),
            Self::WrongType => write!(f, "unexpected value type"),
            Self::TooLong => write!(f, "value too long"),
        }
    }
}

fn text<const N: usize>(value: AttrValue<'_>) -> Result<String<N>, AttrSetError> {
    match value {
        AttrValue::Str(s) => String::try_from(s).map_err(|()| AttrSetError::TooLong),
        _ => Err(AttrSetError::WrongType),
    }
}

fn unsigned(value: AttrValue<'_>) -> Result<u32, AttrSetError> {
    match value {
        AttrValue::Int(v) => u32::try_from(v).map_err(|_| AttrSetError::WrongType),
        _ => Err(AttrSetError::WrongType),
    }
}

impl Attributes {
    /// Set one field by its wire key.
    pub fn set(&mut self, key: &str, value: AttrValue<'_>) -> Result<(), AttrSetError> {
        match key {
            "fw_title" => self.fw_title = Some(text(value)?),
            "fw_version" => self.fw_version = Some(text(value)?),
            "fw_size" => self.fw_size = Some(unsigned(value)?),
            "fw_checksum" => self.fw_checksum = Some(text(value)?),
            "fw_checksum_algorithm" => self.fw_checksum_algorithm = Some(text(value)?),
            "report_interval" => self.report_interval = Some(unsigned(value)?),
            _ => return Err(AttrSetError::UnknownKey),
        }
        Ok(())
    }

    /// Merge the present fields of `incoming` into `self`.
    ///
    /// Returns how many fields actually changed value.
    pub fn update(&mut self, incoming: &Attributes) -> usize {
        fn merge<T: Clone + PartialEq>(dst: &mut Option<T>, src: &Option<T>) -> usize {
            match src {
                Some(v) if dst.as_ref() != Some(v) => {
                    *dst = Some(v.clone());
                    1
                }
                _ => 0,
            }
        }

        merge(&mut self.fw_title, &incoming.fw_title)
            + merge(&mut self.fw_version, &incoming.fw_version)
            + merge(&mut self.fw_size, &incoming.fw_size)
            + merge(&mut self.fw_checksum, &incoming.fw_checksum)
            + merge(&mut self.fw_checksum_algorithm, &incoming.fw_checksum_algorithm)
            + merge(&mut self.report_interval, &incoming.report_interval)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// One "now" record of device values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    pub fw_state: Option<FwState>,
    pub fw_progress: Option<u32>,
    pub current_fw_title: Option<FwString>,
    pub current_fw_version: Option<FwString>,
    pub uptime: Option<u64>,
    pub rssi: Option<i32>,
    pub battery_mv: Option<u32>,
    pub temperature: Option<f32>,
}

sparse_struct!(Telemetry {
    fw_state,
    fw_progress,
    current_fw_title,
    current_fw_version,
    uptime,
    rssi,
    battery_mv,
    temperature,
});

impl Telemetry {
    pub fn fw_state(state: FwState) -> Self {
        Self {
            fw_state: Some(state),
            ..Self::default()
        }
    }

    pub fn current_firmware(fw: &FirmwareId) -> Self {
        Self {
            current_fw_title: Some(fw.title.clone()),
            current_fw_version: Some(fw.version.clone()),
            ..Self::default()
        }
    }
}

/// A telemetry record stamped with server time in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesEntry {
    pub ts: i64,
    pub values: Telemetry,
}

// ---------------------------------------------------------------------------
// RPC
// ---------------------------------------------------------------------------

/// Client-side RPC request. `params` holds raw JSON text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String<RPC_METHOD_CAPACITY>,
    pub params: String<RPC_PARAMS_CAPACITY>,
}

impl RpcRequest {
    pub fn new(method: &str, params: &str) -> Option<Self> {
        Some(Self {
            method: String::try_from(method).ok()?,
            params: String::try_from(params).ok()?,
        })
    }
}

/// RPC response; the payload is opaque JSON text for the caller to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse<'a> {
    pub payload: &'a str,
}
