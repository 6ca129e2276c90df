//! Log-based client handler.
//!
//! Implements [`ClientHandler`] by writing lifecycle events, attribute
//! pushes and RPC replies to the logger. Useful as the handler of a headless device or
//! as a starting point for a real one.

use log::info;

use crate::client::events::Event;
use crate::client::ports::ClientHandler;
use crate::model::Attributes;
use crate::pool::RequestId;

/// Handler that logs every event and attribute update.
#[derive(Debug, Default)]
pub struct LogHandler {
    events: u32,
}

impl LogHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events seen so far.
    pub fn events(&self) -> u32 {
        self.events
    }
}

impl ClientHandler for LogHandler {
    fn on_attributes_write(&mut self, attributes: &Attributes) {
        if let (Some(title), Some(version)) = (&attributes.fw_title, &attributes.fw_version) {
            info!("ATTR | firmware announced: {title} {version}");
        }
        if let Some(interval) = attributes.report_interval {
            info!("ATTR | report_interval={interval}");
        }
    }

    fn on_event(&mut self, event: Event) {
        self.events += 1;
        info!("EVENT | {event}");
    }

    fn on_rpc_response(&mut self, id: RequestId, payload: &str) {
        info!("RPC | {id} -> {payload}");
    }
}
