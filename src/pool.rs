//! Fixed-capacity request pool.
//!
//! ```text
//!   slots: [ Slot 0 | Slot 1 | Slot 2 | Slot 3 ]   (path + query + payload each)
//!   free:  [ 3, 1 ]                                 (stack of free indices)
//! ```
//!
//! `try_acquire` pops a free index and bumps the slot generation; the
//! returned [`RequestId`] carries both, so a late completion or a second
//! `release` for a recycled slot is recognised and refused.

use core::fmt::{self, Write};

use heapless::{String, Vec};
use log::warn;

use crate::codec::ContentFormat;
use crate::coap::Method;
use crate::error::{Error, Result};

/// Requests that may be in flight at once.
pub const MAX_REQUESTS: usize = 4;
pub const PATH_CAPACITY: usize = 64;
pub const QUERY_CAPACITY: usize = 96;
pub const PAYLOAD_CAPACITY: usize = 512;

/// What a request is for; selects the completion handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Telemetry,
    Rpc,
    Attributes,
    FirmwareChunk,
    Provision,
    TimeSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    index: u8,
    generation: u16,
}

impl RequestId {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

// ── Request ───────────────────────────────────────────────────

pub struct Request {
    method: Method,
    kind: RequestKind,
    observe: bool,
    content_format: ContentFormat,
    path: String<PATH_CAPACITY>,
    query: String<QUERY_CAPACITY>,
    payload: [u8; PAYLOAD_CAPACITY],
    payload_len: usize,
}

impl Request {
    fn new() -> Self {
        Self {
            method: Method::Get,
            kind: RequestKind::Telemetry,
            observe: false,
            content_format: ContentFormat::JSON,
            path: String::new(),
            query: String::new(),
            payload: [0; PAYLOAD_CAPACITY],
            payload_len: 0,
        }
    }

    fn reset(&mut self, kind: RequestKind) {
        self.method = Method::Get;
        self.kind = kind;
        self.observe = false;
        self.content_format = ContentFormat::JSON;
        self.path.clear();
        self.query.clear();
        self.payload_len = 0;
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Whether the CoAP Observe option is set.
    pub fn observe(&self) -> bool {
        self.observe
    }

    pub fn content_format(&self) -> ContentFormat {
        self.content_format
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len]
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn set_observe(&mut self, observe: bool) {
        self.observe = observe;
    }

    pub fn set_content_format(&mut self, format: ContentFormat) {
        self.content_format = format;
    }

    /// Join `segments` with `/`. Fails with [`Error::NoSpace`] if the
    /// result does not fit.
    pub fn set_path(&mut self, segments: &[&str]) -> Result<()> {
        self.path.clear();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                self.path.push('/').map_err(|_| Error::NoSpace)?;
            }
            self.path.push_str(segment).map_err(|()| Error::NoSpace)?;
        }
        Ok(())
    }

    /// Append `key=value`, `&`-separated.
    pub fn push_query(&mut self, key: &str, value: impl fmt::Display) -> Result<()> {
        let sep = if self.query.is_empty() { "" } else { "&" };
        write!(self.query, "{sep}{key}={value}").map_err(|_| Error::NoSpace)
    }

    pub fn set_payload(&mut self, bytes: &[u8]) -> Result<()> {
        let dst = self.payload.get_mut(..bytes.len()).ok_or(Error::NoSpace)?;
        dst.copy_from_slice(bytes);
        self.payload_len = bytes.len();
        Ok(())
    }

    /// Encode directly into the payload buffer. `encode` returns the
    /// number of bytes it wrote.
    pub fn encode_payload<E>(
        &mut self,
        encode: impl FnOnce(&mut [u8]) -> core::result::Result<usize, E>,
    ) -> core::result::Result<usize, E> {
        let len = encode(&mut self.payload)?;
        self.payload_len = len.min(PAYLOAD_CAPACITY);
        Ok(self.payload_len)
    }
}

// ── Pool ──────────────────────────────────────────────────────

struct Slot {
    request: Request,
    generation: u16,
    in_use: bool,
}

pub struct RequestPool<const N: usize> {
    slots: [Slot; N],
    free: Vec<u8, N>,
}

impl<const N: usize> RequestPool<N> {
    pub fn new() -> Self {
        const { assert!(N > 0 && N <= u8::MAX as usize) };
        let mut free = Vec::new();
        for i in (0..N).rev() {
            // Cannot overflow: `free` has capacity N.
            let _ = free.push(i as u8);
        }
        Self {
            slots: core::array::from_fn(|_| Slot {
                request: Request::new(),
                generation: 0,
                in_use: false,
            }),
            free,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn in_use(&self) -> usize {
        N - self.free.len()
    }

    /// Take a free slot. Never blocks; fails with [`Error::NoSpace`].
    pub fn try_acquire(&mut self, kind: RequestKind) -> Result<RequestId> {
        let index = self.free.pop().ok_or(Error::NoSpace)?;
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.in_use = true;
        slot.request.reset(kind);
        Ok(RequestId {
            index,
            generation: slot.generation,
        })
    }

    /// Return a slot. Returns `false` (and changes nothing) if `id` is not
    /// currently allocated.
    pub fn release(&mut self, id: RequestId) -> bool {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return false;
        };
        if !slot.in_use || slot.generation != id.generation {
            warn!("pool: refusing release of stale request {id}");
            return false;
        }
        slot.in_use = false;
        // Cannot overflow: the slot was taken from `free`.
        let _ = self.free.push(id.index);
        true
    }

    pub fn is_live(&self, id: RequestId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.slots
            .get(id.index())
            .filter(|s| s.in_use && s.generation == id.generation)
            .map(|s| &s.request)
    }

    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.in_use && s.generation == id.generation)
            .map(|s| &mut s.request)
    }

    /// Every currently allocated request.
    pub fn outstanding(&self) -> Vec<RequestId, N> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.in_use)
            .map(|(i, s)| RequestId {
                index: i as u8,
                generation: s.generation,
            })
            .collect()
    }
}

impl<const N: usize> Default for RequestPool<N> {
    fn default() -> Self {
        Self::new()
    }
}
