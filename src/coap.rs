//! CoAP vocabulary shared between the client core and transports.
//!
//! The core never builds datagrams. It hands a [`Request`](crate::pool::Request)
//! to the transport and later receives one [`Completion`] per request,
//! keyed by [`RequestId`].

use core::fmt;

use heapless::Vec;

use crate::error::{Error, TransportError};
use crate::pool::RequestId;

/// Largest response body the core accepts in one completion.
pub const RESPONSE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Response code, `class << 5 | detail`, printed as `c.dd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode(pub u8);

impl ResponseCode {
    pub const fn new(class: u8, detail: u8) -> Self {
        Self((class << 5) | (detail & 0x1f))
    }

    pub const CREATED: Self = Self::new(2, 1);
    pub const CHANGED: Self = Self::new(2, 4);
    pub const CONTENT: Self = Self::new(2, 5);
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    pub const UNAUTHORIZED: Self = Self::new(4, 1);
    pub const NOT_FOUND: Self = Self::new(4, 4);
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);

    pub const fn class(self) -> u8 {
        self.0 >> 5
    }

    pub const fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    pub const fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: ResponseCode,
    pub payload: Vec<u8, RESPONSE_CAPACITY>,
}

impl Response {
    pub fn new(code: ResponseCode, payload: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            code,
            payload: Vec::from_slice(payload).map_err(|()| Error::NoSpace)?,
        })
    }
}

/// Final (or, for the observation, intermediate) outcome of a submitted
/// request.
///
/// `last_block` only matters for the attribute observation: it marks the
/// end of the observation. Every other request completes on its first
/// completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: RequestId,
    pub result: Result<Response, TransportError>,
    pub last_block: bool,
}

impl Completion {
    /// A 2.05 Content response.
    pub fn content(id: RequestId, payload: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            id,
            result: Ok(Response::new(ResponseCode::CONTENT, payload)?),
            last_block: true,
        })
    }

    pub fn failed(id: RequestId, error: TransportError) -> Self {
        Self {
            id,
            result: Err(error),
            last_block: true,
        }
    }

    /// Mark as one notification in a continuing observation.
    #[must_use]
    pub fn more(mut self) -> Self {
        self.last_block = false;
        self
    }
}
