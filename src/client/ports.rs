//! Port traits: the boundary between the protocol core and the outside world.
//!
//! ```text
//!   Transport ─┐                      ┌─▶ ClientHandler (application)
//!   Storage   ─┼─▶ Client (core) ─────┤
//!   ImageTarget┤                      └─▶ log
//!   Clock     ─┘
//! ```
//!
//! The [`Client`](super::Client) owns one implementor of each port via
//! generics. Nothing here is object-safe by requirement; adapters are
//! chosen at compile time.

use super::events::Event;
use crate::config::ClientConfig;
use crate::error::{ImageError, StorageError, TransportError};
use crate::model::Attributes;
use crate::pool::{Request, RequestId};

// ───────────────────────────────────────────────────────────────
// Transport (driven adapter: core → CoAP/UDP or CoAP/DTLS)
// ───────────────────────────────────────────────────────────────

/// Socket ownership, address resolution, DTLS setup and the CoAP
/// retransmission engine all live behind this trait.
///
/// Each submitted request must eventually produce exactly one
/// [`Completion`](crate::coap::Completion) (the attribute observation may
/// produce many, the last with `last_block` set), delivered through
/// [`Client::handle_completion`](super::Client::handle_completion) or
/// [`Client::deliver`](super::Client::deliver). Completions must not be
/// delivered from inside `submit`.
pub trait Transport {
    /// `true` when the session runs over DTLS; the access token then
    /// travels as the DTLS identity and is left out of request paths.
    fn is_secure(&self) -> bool;

    /// Resolve the server and open the socket.
    fn connect(&mut self, config: &ClientConfig) -> Result<(), TransportError>;

    fn close(&mut self);

    /// Enter low-power mode. Implementations may close the socket.
    fn suspend(&mut self) -> Result<(), TransportError>;

    fn resume(&mut self) -> Result<(), TransportError>;

    fn submit(&mut self, id: RequestId, request: &Request) -> Result<(), TransportError>;

    /// Stop an outstanding request: the attribute observation, or a
    /// firmware chunk superseded by a new download. No completion is
    /// expected afterwards; any that arrives is ignored.
    fn cancel(&mut self, id: RequestId);
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: core ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Namespaced persistent key-value storage.
///
/// Holds the provisioned access token; implementations should keep that
/// namespace on encrypted storage where available.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Image target (driven adapter: core → bootloader / flash slot)
// ───────────────────────────────────────────────────────────────

pub trait ImageTarget {
    /// Prepare to receive an image of `size` bytes. Must keep bytes already
    /// written for an interrupted image of the same size.
    fn init(&mut self, size: u32) -> Result<(), ImageError>;

    /// Whether `first_chunk` starts with a recognisable image header.
    fn identify(&self, first_chunk: &[u8]) -> bool;

    /// Append `chunk` at the current offset.
    fn write(&mut self, chunk: &[u8]) -> Result<(), ImageError>;

    /// Bytes of the current image already persisted.
    fn offset(&self) -> u32;

    /// Flush and verify the complete image.
    fn finalize(&mut self) -> Result<(), ImageError>;

    /// Mark the new image as pending for the next boot.
    fn mark_pending(&mut self) -> Result<(), ImageError>;

    fn schedule_update(&mut self) -> Result<(), ImageError>;

    /// Abort and discard any partial image.
    fn reset(&mut self);

    /// Restart into the scheduled image. Does not return on hardware.
    fn reboot(&mut self);

    /// Whether the running image has been confirmed.
    fn is_confirmed(&self) -> bool;

    fn confirm(&mut self) -> Result<(), ImageError>;
}

// ───────────────────────────────────────────────────────────────
// Application handler (driving side: core → application)
// ───────────────────────────────────────────────────────────────

/// Application callbacks. Invoked after the session lock is released, so
/// implementations may call back into the client.
pub trait ClientHandler {
    /// A shared-attribute update arrived (only the fields in this push).
    fn on_attributes_write(&mut self, attributes: &Attributes) {
        let _ = attributes;
    }

    fn on_event(&mut self, event: Event) {
        let _ = event;
    }

    /// Raw reply payload for the client-side RPC submitted as `id`. RPCs
    /// that fail or get an error code produce no call.
    fn on_rpc_response(&mut self, id: RequestId, payload: &str) {
        let _ = (id, payload);
    }
}

/// Handler that ignores everything.
impl ClientHandler for () {}

// ───────────────────────────────────────────────────────────────
// Clock
// ───────────────────────────────────────────────────────────────

/// Monotonic milliseconds since an arbitrary epoch (usually boot).
pub trait Clock {
    fn now_ms(&self) -> u64;
}
