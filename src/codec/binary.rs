//! Compact binary encoding built on `postcard`.
//!
//! Single messages are plain postcard. A timeseries batch is a run of
//! length-prefixed entries, so it can be cut after any whole entry:
//!
//! ```text
//! ┌────────────┬──────────────┬────────────┬──────────────┬───
//! │ varint len │ entry (len B)│ varint len │ entry (len B)│ ...
//! └────────────┴──────────────┴────────────┴──────────────┴───
//! ```

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::model::{AttrValue, Attributes, RpcRequest, RpcResponse, Telemetry, TimeseriesEntry};

/// Longest postcard varint for a `u32`.
const MAX_VARINT_LEN: usize = 5;

/// Typed value of one key in an update notification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum KvValue<'a> {
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(&'a str),
    Json(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyValue<'a> {
    pub key: &'a str,
    #[serde(borrow)]
    pub value: KvValue<'a>,
}

/// Envelope some servers push instead of a bare attribute set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeUpdateNotification<'a> {
    #[serde(borrow)]
    pub shared_updated: Vec<KeyValue<'a>>,
    #[serde(borrow)]
    pub shared_deleted: Vec<&'a str>,
}

#[derive(Serialize)]
struct RpcRequestMsg<'a> {
    method: &'a str,
    params: &'a str,
}

fn map_err(e: postcard::Error) -> CodecError {
    match e {
        postcard::Error::SerializeBufferFull => CodecError::BufferTooSmall,
        _ => CodecError::Malformed,
    }
}

/// Decode `T` and require that it consumes every byte.
fn decode_exact<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CodecError> {
    let (value, rest) = postcard::take_from_bytes::<T>(bytes).map_err(map_err)?;
    if rest.is_empty() {
        Ok(value)
    } else {
        Err(CodecError::Malformed)
    }
}

fn to_buf<T: Serialize>(value: &T, buf: &mut [u8]) -> Result<usize, CodecError> {
    postcard::to_slice(value, buf).map(|out| out.len()).map_err(map_err)
}

// ── Attributes ────────────────────────────────────────────────

pub fn decode_attributes(bytes: &[u8]) -> Result<Attributes, CodecError> {
    if let Ok(attrs) = decode_exact::<Attributes>(bytes) {
        return Ok(attrs);
    }

    let note: AttributeUpdateNotification<'_> = decode_exact(bytes)?;
    let mut attrs = Attributes::default();
    for kv in &note.shared_updated {
        let value = match kv.value {
            KvValue::Bool(b) => AttrValue::Bool(b),
            KvValue::Long(v) => AttrValue::Int(v),
            KvValue::Double(v) => AttrValue::Float(v),
            KvValue::Str(s) | KvValue::Json(s) => AttrValue::Str(s),
        };
        if let Err(e) = attrs.set(kv.key, value) {
            warn!("Ignored attribute {}: {e}", kv.key);
        }
    }
    Ok(attrs)
}

pub fn encode_attributes(attrs: &Attributes, buf: &mut [u8]) -> Result<usize, CodecError> {
    to_buf(attrs, buf)
}

// ── Telemetry ─────────────────────────────────────────────────

pub fn encode_telemetry(telemetry: &Telemetry, buf: &mut [u8]) -> Result<usize, CodecError> {
    to_buf(telemetry, buf)
}

pub fn decode_telemetry(bytes: &[u8]) -> Result<Telemetry, CodecError> {
    decode_exact(bytes)
}

pub fn encode_timeseries_batch(
    entries: &[TimeseriesEntry],
    buf: &mut [u8],
) -> Result<(usize, usize), CodecError> {
    let mut encoded = 0;
    let mut count = 0;

    for entry in entries {
        let tail = &mut buf[encoded..];
        if tail.is_empty() {
            break;
        }
        // Serialise after a one-byte header, then widen the header in place
        // if the body length needs a longer varint.
        let body_len = match postcard::to_slice(entry, &mut tail[1..]) {
            Ok(body) => body.len(),
            Err(postcard::Error::SerializeBufferFull) => break,
            Err(_) => return Err(CodecError::Malformed),
        };
        let mut header = [0u8; MAX_VARINT_LEN];
        let header_len = to_buf(&(body_len as u32), &mut header)?;
        if header_len + body_len > tail.len() {
            break;
        }
        tail.copy_within(1..1 + body_len, header_len);
        tail[..header_len].copy_from_slice(&header[..header_len]);

        encoded += header_len + body_len;
        count += 1;
    }

    if count == 0 && !entries.is_empty() {
        return Err(CodecError::BufferTooSmall);
    }
    Ok((encoded, count))
}

pub fn decode_timeseries_batch(mut bytes: &[u8]) -> Result<Vec<TimeseriesEntry>, CodecError> {
    let mut entries = Vec::new();
    while !bytes.is_empty() {
        let (len, rest) = postcard::take_from_bytes::<u32>(bytes).map_err(map_err)?;
        let len = len as usize;
        if len > rest.len() {
            return Err(CodecError::Malformed);
        }
        entries.push(decode_exact(&rest[..len])?);
        bytes = &rest[len..];
    }
    Ok(entries)
}

// ── RPC ───────────────────────────────────────────────────────

pub fn encode_rpc_request(request: &RpcRequest, buf: &mut [u8]) -> Result<usize, CodecError> {
    let params = if request.params.is_empty() {
        "{}"
    } else {
        request.params.as_str()
    };
    to_buf(
        &RpcRequestMsg {
            method: &request.method,
            params,
        },
        buf,
    )
}

pub fn decode_rpc_response(bytes: &[u8]) -> Result<RpcResponse<'_>, CodecError> {
    decode_exact(bytes)
}
