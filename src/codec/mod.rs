//! Wire-format codec.
//!
//! ```text
//!                 ┌─────────────────────────────────────────────┐
//!   Codec::Json ─▶│ serde_json, hand-packed timeseries arrays   │
//! Codec::Binary ─▶│ postcard, length-prefixed timeseries batches│
//!                 └─────────────────────────────────────────────┘
//! ```
//!
//! Both encodings expose the same operations; [`Codec`] picks one at run
//! time from [`ClientConfig::codec`](crate::config::ClientConfig::codec).

pub mod binary;
pub mod json;
pub mod writer;

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::model::{Attributes, RpcRequest, RpcResponse, Telemetry, TimeseriesEntry};

/// CoAP Content-Format option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentFormat(pub u16);

impl ContentFormat {
    pub const OCTET_STREAM: Self = Self(42);
    pub const JSON: Self = Self(50);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    Binary,
}

impl Codec {
    pub const fn content_format(self) -> ContentFormat {
        match self {
            Self::Json => ContentFormat::JSON,
            Self::Binary => ContentFormat::OCTET_STREAM,
        }
    }

    pub fn decode_attributes(self, bytes: &[u8]) -> Result<Attributes, CodecError> {
        match self {
            Self::Json => json::decode_attributes(bytes),
            Self::Binary => binary::decode_attributes(bytes),
        }
    }

    pub fn encode_attributes(self, attrs: &Attributes, buf: &mut [u8]) -> Result<usize, CodecError> {
        match self {
            Self::Json => json::encode_attributes(attrs, buf),
            Self::Binary => binary::encode_attributes(attrs, buf),
        }
    }

    pub fn decode_rpc_response(self, bytes: &[u8]) -> Result<RpcResponse<'_>, CodecError> {
        match self {
            Self::Json => json::decode_rpc_response(bytes),
            Self::Binary => binary::decode_rpc_response(bytes),
        }
    }

    pub fn encode_rpc_request(self, request: &RpcRequest, buf: &mut [u8]) -> Result<usize, CodecError> {
        match self {
            Self::Json => json::encode_rpc_request(request, buf),
            Self::Binary => binary::encode_rpc_request(request, buf),
        }
    }

    pub fn encode_telemetry(self, telemetry: &Telemetry, buf: &mut [u8]) -> Result<usize, CodecError> {
        match self {
            Self::Json => json::encode_telemetry(telemetry, buf),
            Self::Binary => binary::encode_telemetry(telemetry, buf),
        }
    }

    pub fn decode_telemetry(self, bytes: &[u8]) -> Result<Telemetry, CodecError> {
        match self {
            Self::Json => json::decode_telemetry(bytes),
            Self::Binary => binary::decode_telemetry(bytes),
        }
    }

    /// Encode as many leading `entries` as fit into `buf`.
    ///
    /// Returns `(bytes_written, entries_consumed)`. Fails only when not even
    /// the first entry fits; callers re-invoke with the remaining slice.
    pub fn encode_timeseries_batch(
        self,
        entries: &[TimeseriesEntry],
        buf: &mut [u8],
    ) -> Result<(usize, usize), CodecError> {
        match self {
            Self::Json => json::encode_timeseries_batch(entries, buf),
            Self::Binary => binary::encode_timeseries_batch(entries, buf),
        }
    }

    pub fn decode_timeseries_batch(self, bytes: &[u8]) -> Result<Vec<TimeseriesEntry>, CodecError> {
        match self {
            Self::Json => json::decode_timeseries_batch(bytes),
            Self::Binary => binary::decode_timeseries_batch(bytes),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Binary => write!(f, "binary"),
        }
    }
}
