//! Text (JSON) encoding.
//!
//! Timeseries batches are packed by hand so the array can be cut after
//! any whole entry:
//!
//! ```text
//! [ {"ts":..,"values":{..}} , {"ts":..,"values":{..}} ] \0
//! ^                                                     ^^^ 2 bytes reserved
//! ```
//!
//! The NUL terminator is written for C consumers of the buffer but is not
//! counted in the returned length.

use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;

use super::writer::BoundedWriter;
use crate::error::CodecError;
use crate::model::{AttrValue, Attributes, RpcRequest, RpcResponse, Telemetry, TimeseriesEntry};

/// Closing bracket plus terminator.
const TRAILER_LEN: usize = 2;

fn copy_out(bytes: &[u8], buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut w = BoundedWriter::new(buf);
    w.write(bytes)?;
    Ok(w.position())
}

fn to_buf<T: Serialize + ?Sized>(value: &T, buf: &mut [u8]) -> Result<usize, CodecError> {
    let bytes = serde_json::to_vec(value).map_err(|_| CodecError::Malformed)?;
    copy_out(&bytes, buf)
}

fn map_decode_err(e: &serde_json::Error) -> CodecError {
    if e.is_data() && e.to_string().contains("length") {
        CodecError::FieldTooLong
    } else {
        CodecError::Malformed
    }
}

// ── Attributes ────────────────────────────────────────────────

pub fn decode_attributes(bytes: &[u8]) -> Result<Attributes, CodecError> {
    match serde_json::from_slice::<Attributes>(bytes) {
        Ok(attrs) => Ok(attrs),
        Err(e) => {
            debug!("attributes: flat decode failed ({e}), salvaging");
            salvage_attributes(bytes)
        }
    }
}

/// Accepts `{"shared": {..}}` envelopes and objects carrying unknown or
/// mistyped keys, keeping every key that can be applied.
fn salvage_attributes(bytes: &[u8]) -> Result<Attributes, CodecError> {
    let root: Value = serde_json::from_slice(bytes).map_err(|e| map_decode_err(&e))?;
    let object = match root.get("shared") {
        Some(Value::Object(shared)) => shared,
        _ => root.as_object().ok_or(CodecError::Malformed)?,
    };

    let mut attrs = Attributes::default();
    for (key, value) in object {
        let value = match value {
            Value::String(s) => AttrValue::Str(s),
            Value::Bool(b) => AttrValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AttrValue::Int(i),
                None => AttrValue::Float(n.as_f64().unwrap_or_default()),
            },
            _ => {
                warn!("Ignored attribute {key}: unsupported value");
                continue;
            }
        };
        if let Err(e) = attrs.set(key, value) {
            warn!("Ignored attribute {key}: {e}");
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
    serde_json::from_slice(bytes).map_err(|e| map_decode_err(&e))
}

pub fn encode_timeseries_batch(
    entries: &[TimeseriesEntry],
    buf: &mut [u8],
) -> Result<(usize, usize), CodecError> {
    let mut w = BoundedWriter::new(buf);
    w.reserve(TRAILER_LEN)?;
    w.write(b"[")?;

    let mut count = 0;
    for entry in entries {
        let mark = w.position();
        if count > 0 && w.write(b",").is_err() {
            break;
        }
        let encoded = serde_json::to_vec(entry).map_err(|_| CodecError::Malformed)?;
        if w.write(&encoded).is_err() {
            w.truncate(mark);
            break;
        }
        count += 1;
    }

    if count == 0 && !entries.is_empty() {
        return Err(CodecError::BufferTooSmall);
    }

    w.release(TRAILER_LEN);
    w.write(b"]")?;
    let len = w.position();
    w.write(&[0])?;
    Ok((len, count))
}

pub fn decode_timeseries_batch(bytes: &[u8]) -> Result<Vec<TimeseriesEntry>, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| map_decode_err(&e))
}

// ── RPC ───────────────────────────────────────────────────────

/// `{"method":<method>,"params":<params>}`; params are embedded raw and
/// must themselves be valid JSON (empty means `{}`).
pub fn encode_rpc_request(request: &RpcRequest, buf: &mut [u8]) -> Result<usize, CodecError> {
    let params = if request.params.is_empty() {
        "{}"
    } else {
        request.params.as_str()
    };
    serde_json::from_str::<serde::de::IgnoredAny>(params).map_err(|_| CodecError::Malformed)?;
    let method = serde_json::to_vec(request.method.as_str()).map_err(|_| CodecError::Malformed)?;

    let mut w = BoundedWriter::new(buf);
    w.write(br#"{"method":"#)?;
    w.write(&method)?;
    w.write(br#","params":"#)?;
    w.write(params.as_bytes())?;
    w.write(b"}")?;
    Ok(w.position())
}

/// The payload is passed through untouched.
pub fn decode_rpc_response(bytes: &[u8]) -> Result<RpcResponse<'_>, CodecError> {
    let payload = core::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
    Ok(RpcResponse { payload })
}
