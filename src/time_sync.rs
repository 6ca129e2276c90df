//! Server time synchronisation.
//!
//! Keeps a `(tb_time, own_time)` pair: the server's epoch milliseconds
//! and the local monotonic milliseconds at the moment the answer arrived.
//! Server time is then `now - own_time + tb_time`.
//!
//! The scheduler is deadline-driven. Issuing a request moves the deadline
//! to `now + retry`; a good answer moves it to `now + refresh`. A request
//! still outstanding at its deadline is not duplicated.

use log::{debug, info, warn};

use crate::model::RpcRequest;
use crate::pool::RequestId;

pub const TIME_METHOD: &str = "getCurrentTime";

#[derive(Debug)]
pub struct TimeSync {
    enabled: bool,
    refresh_ms: u64,
    retry_ms: u64,
    running: bool,
    next_due: u64,
    in_flight: Option<RequestId>,
    synced: Option<(i64, u64)>,
}

impl TimeSync {
    pub fn new(enabled: bool, refresh_secs: u32, retry_secs: u32) -> Self {
        Self {
            enabled,
            refresh_ms: u64::from(refresh_secs) * 1000,
            retry_ms: u64::from(retry_secs) * 1000,
            running: false,
            next_due: 0,
            in_flight: None,
            synced: None,
        }
    }

    /// Start (or restart) the schedule with a sync due immediately.
    pub fn start(&mut self, now: u64) {
        if !self.enabled {
            return;
        }
        self.running = true;
        self.next_due = now;
        debug!("TIME: scheduler started");
    }

    /// Stop issuing requests. The last synced pair is kept, so
    /// [`now_ms`](Self::now_ms) keeps working while disconnected.
    pub fn stop(&mut self) {
        self.running = false;
        self.in_flight = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether a new request should be issued at `now`.
    ///
    /// If one is still outstanding at its deadline, the deadline is pushed
    /// back by the retry interval and no new request is due.
    pub fn poll_due(&mut self, now: u64) -> bool {
        if !self.running || now < self.next_due {
            return false;
        }
        if let Some(id) = self.in_flight {
            debug!("TIME: request {id} still in flight");
            self.next_due = now + self.retry_ms;
            return false;
        }
        true
    }

    pub fn on_submitted(&mut self, id: RequestId, now: u64) {
        self.in_flight = Some(id);
        self.next_due = now + self.retry_ms;
    }

    /// Submission failed (no slot, transport refused); retry later.
    pub fn on_submit_failed(&mut self, now: u64) {
        self.in_flight = None;
        self.next_due = now + self.retry_ms;
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.in_flight == Some(id)
    }

    /// Record a server timestamp received at local time `now`.
    pub fn on_synced(&mut self, server_ms: i64, now: u64) {
        self.in_flight = None;
        self.synced = Some((server_ms, now));
        self.next_due = now + self.refresh_ms;
        info!("TIME: synced to {server_ms}");
    }

    /// The outstanding request failed. The deadline set on submit already
    /// points at the retry.
    pub fn on_failure(&mut self) {
        if self.in_flight.take().is_some() {
            warn!("TIME: sync request failed");
        }
    }

    /// Server time in epoch milliseconds, `None` before the first sync.
    pub fn now_ms(&self, mono_now: u64) -> Option<i64> {
        let (tb_time, own_time) = self.synced?;
        let elapsed = mono_now.saturating_sub(own_time);
        Some(tb_time.saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX)))
    }

    pub fn request() -> RpcRequest {
        RpcRequest::new(TIME_METHOD, "{}").unwrap_or_default()
    }
}

/// Parse the `getCurrentTime` response: a bare decimal millisecond count.
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
