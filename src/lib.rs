//! Device-side client for a ThingsBoard-style IoT platform over CoAP.
//!
//! The crate is the protocol engine only: connection lifecycle, a
//! bounded request pool, the JSON and binary payload codecs, resumable
//! firmware updates, provisioning and server time sync. Sockets, DTLS,
//! flash and the bootloader sit behind the port traits in
//! [`client::ports`].
//!
//! ESP-IDF adapters are behind the `espidf` feature; everything else
//! builds and tests on the host.

#![deny(unused_must_use)]

pub mod adapters;
pub mod client;
pub mod coap;
pub mod codec;
pub mod config;
pub mod fota;
pub mod model;
pub mod pool;
pub mod provision;
pub mod time_sync;

mod error;

pub use client::{Client, ConnectionState, Event, Outcome};
pub use error::{
    CodecError, Error, ImageError, ProvisionError, Result, StorageError, TransportError,
};
