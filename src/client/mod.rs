//! The device client: connection lifecycle, request dispatch and
//! completion handling.
//!
//! ```text
//!               ┌──────────────── Client ─────────────────┐
//!  app ───────▶ │ Mutex<Session>                          │ ──▶ Transport
//!  (send_*,     │   state · pool · token · attributes     │
//!   connect..)  │   FotaEngine · TimeSync · notices       │ ──▶ StoragePort
//!               │                                         │
//!  transport ─▶ │ Channel<Completion> ──poll()──▶ Session │ ──▶ ImageTarget
//!  (deliver)    └──────────────┬──────────────────────────┘
//!                              │ notices, after the session lock is released
//!                              ▼
//!                        Mutex<ClientHandler>
//! ```
//!
//! Every public call takes the session lock, does its work, releases the
//! lock, and then hands queued notices (events, attribute pushes, RPC
//! replies) to the application. Handlers may therefore call straight back
//! into the client.

pub mod events;
pub mod ports;
pub mod state;

use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use heapless::Deque;
use log::{debug, error, info, warn};

use crate::adapters::time::MonotonicClock;
use crate::coap::{Completion, Method, Response, ResponseCode};
use crate::codec::ContentFormat;
use crate::config::ClientConfig;
use crate::error::{Error, ProvisionError, Result, TransportError};
use crate::fota::{FotaCommand, FotaEngine};
use crate::model::{Attributes, FwState, RpcRequest, Telemetry, TimeseriesEntry};
use crate::pool::{MAX_REQUESTS, Request, RequestId, RequestKind, RequestPool};
use crate::provision::{self, AccessToken};
use crate::time_sync::{self, TimeSync};

pub use events::Event;
pub use ports::{ClientHandler, Clock, ImageTarget, StoragePort, Transport};
pub use state::{ConnectionState, Outcome};

use state::{Operation, Transition};

/// Completions buffered between [`Client::deliver`] and [`Client::poll`].
pub const COMPLETION_QUEUE_DEPTH: usize = 8;
const NOTICE_DEPTH: usize = 8;
const REPORT_DEPTH: usize = 8;

/// Something to hand to the application once the session lock is free.
enum Notice {
    Event(Event),
    Attributes(Attributes),
    Rpc(RequestId, String),
}

// ───────────────────────────────────────────────────────────────
// Session (everything behind the lock)
// ───────────────────────────────────────────────────────────────

struct Session<T, S, I: ImageTarget> {
    config: ClientConfig,
    state: ConnectionState,
    transport: T,
    storage: S,
    token: Option<AccessToken>,
    pool: RequestPool<MAX_REQUESTS>,
    observation: Option<RequestId>,
    provision_request: Option<RequestId>,
    fota_request: Option<RequestId>,
    attributes: Attributes,
    fota: FotaEngine<I>,
    /// FOTA reports not yet handed to the transport, oldest first.
    reports: Deque<Telemetry, REPORT_DEPTH>,
    time: TimeSync,
    reboot_at: Option<u64>,
    notices: Deque<Notice, NOTICE_DEPTH>,
}

impl<T: Transport, S: StoragePort, I: ImageTarget> Session<T, S, I> {
    fn set_state(&mut self, to: ConnectionState) {
        if self.state == to {
            return;
        }
        info!("TB: {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    fn notify(&mut self, notice: Notice) {
        if self.notices.push_back(notice).is_err() {
            warn!("TB: notice queue full, dropping");
        }
    }

    fn require_connected(&self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    // ── Dispatch ──────────────────────────────────────────────

    /// Allocate, build, and submit one request. The slot is freed again
    /// on any failure.
    fn submit_with(
        &mut self,
        kind: RequestKind,
        build: impl FnOnce(&mut Request, Option<&str>) -> Result<()>,
    ) -> Result<RequestId> {
        let id = self.pool.try_acquire(kind)?;
        // The token travels as the DTLS identity on secure transports.
        let token = if self.transport.is_secure() {
            None
        } else {
            self.token.as_deref()
        };
        let built = match self.pool.get_mut(id) {
            Some(rq) => build(rq, token),
            None => Err(Error::NoSpace),
        };
        if let Err(e) = built {
            self.pool.release(id);
            return Err(e);
        }
        self.submit(id)?;
        Ok(id)
    }

    fn submit(&mut self, id: RequestId) -> Result<()> {
        let Some(rq) = self.pool.get(id) else {
            return Err(Error::NoSpace);
        };
        debug!("TB: submit {id} {:?} {}", rq.kind(), rq.path());
        if let Err(e) = self.transport.submit(id, rq) {
            warn!("TB: submit {id} failed: {e}");
            self.pool.release(id);
            return Err(Error::Transport(e));
        }
        Ok(())
    }

    fn post_telemetry(&mut self, telemetry: &Telemetry) -> Result<()> {
        let codec = self.config.codec;
        self.submit_with(RequestKind::Telemetry, |rq, token| {
            rq.set_method(Method::Post);
            rq.set_content_format(codec.content_format());
            set_api_path(rq, token, "telemetry")?;
            rq.encode_payload(|buf| codec.encode_telemetry(telemetry, buf))
                .map_err(Error::Encode)?;
            Ok(())
        })
        .map(|_| ())
    }

    fn post_rpc(&mut self, request: &RpcRequest, kind: RequestKind) -> Result<RequestId> {
        let codec = self.config.codec;
        self.submit_with(kind, |rq, token| {
            rq.set_method(Method::Post);
            rq.set_content_format(codec.content_format());
            set_api_path(rq, token, "rpc")?;
            rq.encode_payload(|buf| codec.encode_rpc_request(request, buf))
                .map_err(Error::Encode)?;
            Ok(())
        })
    }

    fn send_timeseries(&mut self, entries: &[TimeseriesEntry]) -> Result<usize> {
        let codec = self.config.codec;
        let secure = self.transport.is_secure();
        let mut ids: heapless::Vec<RequestId, MAX_REQUESTS> = heapless::Vec::new();

        // Allocate and encode every batch before submitting any of them.
        let mut rest = entries;
        let mut prepared = Ok(());
        while !rest.is_empty() {
            let id = match self.pool.try_acquire(RequestKind::Telemetry) {
                Ok(id) => id,
                Err(e) => {
                    prepared = Err(e);
                    break;
                }
            };
            // Cannot overflow: at most MAX_REQUESTS slots exist.
            let _ = ids.push(id);
            let token = if secure { None } else { self.token.as_deref() };
            let Some(rq) = self.pool.get_mut(id) else {
                prepared = Err(Error::NoSpace);
                break;
            };
            rq.set_method(Method::Post);
            rq.set_content_format(codec.content_format());
            if let Err(e) = set_api_path(rq, token, "telemetry") {
                prepared = Err(e);
                break;
            }
            let mut consumed = 0;
            let encoded = rq.encode_payload(|buf| {
                codec.encode_timeseries_batch(rest, buf).map(|(len, count)| {
                    consumed = count;
                    len
                })
            });
            if let Err(e) = encoded {
                prepared = Err(Error::Encode(e));
                break;
            }
            rest = &rest[consumed..];
        }
        if let Err(e) = prepared {
            for id in &ids {
                self.pool.release(*id);
            }
            warn!("TB: timeseries of {} entries not sent: {e}", entries.len());
            return Err(e);
        }

        for (i, id) in ids.iter().enumerate() {
            if let Err(e) = self.submit(*id) {
                for rest in &ids[i + 1..] {
                    self.pool.release(*rest);
                }
                return Err(e);
            }
        }
        debug!("TB: {} entries in {} requests", entries.len(), ids.len());
        Ok(ids.len())
    }

    fn subscribe_attributes(&mut self) -> Result<()> {
        if self.observation.is_some() {
            return Ok(());
        }
        let codec = self.config.codec;
        let id = self.submit_with(RequestKind::Attributes, |rq, token| {
            rq.set_method(Method::Get);
            rq.set_observe(true);
            rq.set_content_format(codec.content_format());
            set_api_path(rq, token, "attributes")
        })?;
        self.observation = Some(id);
        debug!("TB: observing attributes as {id}");
        Ok(())
    }

    fn cancel_observation(&mut self) {
        if let Some(id) = self.observation.take() {
            self.transport.cancel(id);
            self.pool.release(id);
            debug!("TB: observation {id} cancelled");
        }
    }

    /// Drop every outstanding request. Each is freed exactly once.
    fn abandon_in_flight(&mut self, now: u64) {
        for id in self.pool.outstanding() {
            if self.fota_request == Some(id) {
                self.fota.on_chunk_failed();
            }
            if self.time.is_pending(id) {
                self.time.on_failure();
            }
            self.pool.release(id);
        }
        self.observation = None;
        self.provision_request = None;
        self.fota_request = None;
        self.run_fota_commands(now);
    }

    // ── Lifecycle ─────────────────────────────────────────────

    fn connect(&mut self, now: u64) -> Result<Outcome> {
        match state::check(self.state, Operation::Connect) {
            Transition::Already => return Ok(Outcome::Already),
            Transition::Invalid => return Err(Error::InvalidState),
            Transition::Proceed => {}
        }
        if let Err(e) = self.transport.connect(&self.config) {
            error!(
                "TB: cannot reach {}:{}: {e}",
                self.config.server_hostname, self.config.server_port
            );
            return Err(Error::NotConnected);
        }
        self.set_state(ConnectionState::Connecting);

        if let Err(e) = self.start(now) {
            warn!("TB: start failed: {e}");
            self.teardown(now);
            return Err(e);
        }
        Ok(Outcome::Done)
    }

    /// Resolve an access token, provisioning one if needed, then finish
    /// startup. Provisioning leaves the session in `Connecting` until its
    /// response arrives.
    fn start(&mut self, now: u64) -> Result<()> {
        if self.token.is_none() {
            let token = match self.config.access_token.as_deref() {
                Some(t) => AccessToken::try_from(t).ok(),
                None => provision::load_token(&self.storage),
            };
            if let Some(token) = token {
                self.token = Some(token);
                self.notify(Notice::Event(Event::Provisioned));
            }
        }
        if self.token.is_none() && !self.transport.is_secure() {
            return self.request_provisioning();
        }
        self.finish_start(now)
    }

    fn request_provisioning(&mut self) -> Result<()> {
        let Some(creds) = self.config.provisioning.clone() else {
            return Err(Error::Provision(ProvisionError::MissingToken));
        };
        let device_name = self.config.device_name.clone();
        let id = self.submit_with(RequestKind::Provision, |rq, _| {
            rq.set_method(Method::Post);
            rq.set_content_format(ContentFormat::JSON);
            rq.set_path(&provision::PROVISION_PATH)?;
            rq.encode_payload(|buf| {
                provision::encode_request(&device_name, &creds.key, &creds.secret, buf)
            })
            .map_err(Error::Encode)?;
            Ok(())
        })?;
        self.provision_request = Some(id);
        info!("PROV: requesting access token for {device_name}");
        Ok(())
    }

    /// Attributes first, then the FOTA identity report and image
    /// confirmation, then time sync.
    fn finish_start(&mut self, now: u64) -> Result<()> {
        self.subscribe_attributes()?;
        if self.config.fota.enabled {
            self.fota.report_current();
            self.fota.confirm();
            self.run_fota_commands(now);
        }
        self.time.start(now);
        self.set_state(ConnectionState::Connected);
        self.notify(Notice::Event(Event::Active));
        self.service_time(now);
        Ok(())
    }

    fn teardown(&mut self, now: u64) {
        self.cancel_observation();
        self.time.stop();
        self.transport.close();
        let was = self.state;
        // Offline before abandoning, so FOTA failure reports are not posted.
        self.set_state(ConnectionState::Disconnected);
        self.abandon_in_flight(now);
        if !self.reports.is_empty() {
            debug!("FOTA: {} unsent reports dropped", self.reports.len());
            self.reports.clear();
        }
        if was != ConnectionState::Disconnected {
            self.notify(Notice::Event(Event::Disconnected));
        }
    }

    fn disconnect(&mut self, now: u64) -> Result<Outcome> {
        match state::check(self.state, Operation::Disconnect) {
            Transition::Already => Ok(Outcome::Already),
            Transition::Invalid => Err(Error::InvalidState),
            Transition::Proceed => {
                self.teardown(now);
                Ok(Outcome::Done)
            }
        }
    }

    fn suspend(&mut self, now: u64) -> Result<Outcome> {
        match state::check(self.state, Operation::Suspend) {
            Transition::Already => return Ok(Outcome::Already),
            Transition::Invalid => return Err(Error::InvalidState),
            Transition::Proceed => {}
        }
        self.cancel_observation();
        self.time.stop();
        if let Err(e) = self.transport.suspend() {
            warn!("TB: suspend refused: {e}");
            if let Err(e) = self.subscribe_attributes() {
                warn!("TB: re-subscribe failed: {e}");
            }
            self.time.start(now);
            return Err(Error::Transport(e));
        }
        self.set_state(ConnectionState::Suspended);
        self.notify(Notice::Event(Event::Suspended));
        Ok(Outcome::Done)
    }

    fn resume(&mut self, now: u64) -> Result<Outcome> {
        match state::check(self.state, Operation::Resume) {
            Transition::Already => return Ok(Outcome::Already),
            Transition::Invalid => return Err(Error::InvalidState),
            Transition::Proceed => {}
        }
        if let Err(e) = self.transport.resume() {
            warn!("TB: resume failed: {e}");
            self.teardown(now);
            return Err(Error::Transport(e));
        }
        if let Err(e) = self.subscribe_attributes() {
            warn!("TB: re-subscribe failed: {e}");
            self.teardown(now);
            return Err(e);
        }
        self.time.start(now);
        self.set_state(ConnectionState::Connected);
        self.notify(Notice::Event(Event::Active));
        self.flush_reports();
        self.service_time(now);
        Ok(Outcome::Done)
    }

    // ── Completions ───────────────────────────────────────────

    fn on_completion(&mut self, completion: Completion, now: u64) {
        let id = completion.id;
        let Some(kind) = self.pool.get(id).map(Request::kind) else {
            debug!("TB: stale completion {id} ignored");
            return;
        };
        let observing = self.observation == Some(id);
        if !observing || completion.last_block {
            self.pool.release(id);
            if observing {
                self.observation = None;
                debug!("TB: attribute observation ended");
            }
        }

        match kind {
            RequestKind::Telemetry => match completion.result {
                Ok(rsp) if rsp.code.is_success() => {}
                Ok(rsp) => warn!("TB: telemetry got {}", rsp.code),
                Err(e) => warn!("TB: telemetry failed: {e}"),
            },
            RequestKind::Rpc => self.on_rpc_response(id, completion.result),
            RequestKind::Attributes => self.on_attributes_response(completion.result, now),
            RequestKind::FirmwareChunk => {
                if self.fota_request == Some(id) {
                    self.fota_request = None;
                    self.on_chunk_response(completion.result, now);
                }
            }
            RequestKind::Provision => {
                if self.provision_request == Some(id) {
                    self.provision_request = None;
                    self.on_provision_response(completion.result, now);
                }
            }
            RequestKind::TimeSync => {
                if self.time.is_pending(id) {
                    self.on_time_response(completion.result, now);
                }
            }
        }
        self.flush_reports();
    }

    fn on_rpc_response(
        &mut self,
        id: RequestId,
        result: core::result::Result<Response, TransportError>,
    ) {
        let rsp = match result {
            Ok(rsp) if rsp.code == ResponseCode::CONTENT => rsp,
            Ok(rsp) => {
                warn!("TB: rpc got {}, expected 2.05", rsp.code);
                return;
            }
            Err(e) => {
                warn!("TB: rpc failed: {e}");
                return;
            }
        };
        match self.config.codec.decode_rpc_response(&rsp.payload) {
            Ok(decoded) => self.notify(Notice::Rpc(id, decoded.payload.to_owned())),
            Err(e) => warn!("TB: rpc response: {e}"),
        }
    }

    fn on_attributes_response(
        &mut self,
        result: core::result::Result<Response, TransportError>,
        now: u64,
    ) {
        let rsp = match result {
            Ok(rsp) if rsp.code == ResponseCode::CONTENT => rsp,
            Ok(rsp) => {
                warn!("TB: attributes got {}, expected 2.05", rsp.code);
                return;
            }
            Err(TransportError::Cancelled) => {
                debug!("TB: attribute observation cancelled by transport");
                return;
            }
            Err(e) => {
                warn!("TB: attribute observation failed: {e}");
                return;
            }
        };
        let attrs = match self.config.codec.decode_attributes(&rsp.payload) {
            Ok(attrs) => attrs,
            Err(e) => {
                warn!("TB: attribute update dropped: {e}");
                return;
            }
        };
        let changed = self.attributes.update(&attrs);
        debug!("TB: attribute update, {changed} changed");
        if self.config.fota.enabled {
            self.fota.on_attributes(&attrs);
            self.run_fota_commands(now);
        }
        self.notify(Notice::Attributes(attrs));
    }

    fn on_chunk_response(&mut self, result: core::result::Result<Response, TransportError>, now: u64) {
        match result {
            Ok(rsp) if rsp.code == ResponseCode::CONTENT => self.fota.on_chunk(&rsp.payload),
            Ok(rsp) => {
                warn!("FOTA: got {}, expected 2.05", rsp.code);
                self.fota.on_chunk_failed();
            }
            Err(e) => {
                warn!("FOTA: chunk request failed: {e}");
                self.fota.on_chunk_failed();
            }
        }
        self.run_fota_commands(now);
    }

    fn on_provision_response(
        &mut self,
        result: core::result::Result<Response, TransportError>,
        now: u64,
    ) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        let token = match result {
            Ok(rsp) if rsp.code == ResponseCode::CONTENT => provision::parse_response(&rsp.payload),
            Ok(rsp) => {
                warn!("PROV: got {}, expected 2.05", rsp.code);
                Err(ProvisionError::UnexpectedResponse)
            }
            Err(e) => {
                warn!("PROV: request failed: {e}");
                Err(ProvisionError::UnexpectedResponse)
            }
        };
        match token {
            Ok(token) => {
                provision::store_token(&mut self.storage, &token);
                self.token = Some(token);
                info!("PROV: device provisioned");
                self.notify(Notice::Event(Event::Provisioned));
                if let Err(e) = self.finish_start(now) {
                    warn!("TB: start failed: {e}");
                    self.teardown(now);
                }
            }
            Err(e) => {
                error!("PROV: {e}");
                self.teardown(now);
            }
        }
    }

    fn on_time_response(&mut self, result: core::result::Result<Response, TransportError>, now: u64) {
        let rsp = match result {
            Ok(rsp) if rsp.code == ResponseCode::CONTENT => rsp,
            Ok(rsp) => {
                warn!("TIME: got {}, expected 2.05", rsp.code);
                return self.time.on_failure();
            }
            Err(e) => {
                warn!("TIME: request failed: {e}");
                return self.time.on_failure();
            }
        };
        let ts = self
            .config
            .codec
            .decode_rpc_response(&rsp.payload)
            .ok()
            .and_then(|r| time_sync::parse_timestamp(r.payload));
        match ts {
            Some(ts) => {
                self.time.on_synced(ts, now);
                self.notify(Notice::Event(Event::TimeUpdate));
            }
            None => {
                warn!("TIME: unparsable response");
                self.time.on_failure();
            }
        }
    }

    // ── Timers and FOTA side effects ──────────────────────────

    fn on_tick(&mut self, now: u64) {
        self.flush_reports();
        self.service_time(now);
        // The final state report must reach the transport before the restart.
        if self.reports.is_empty() && self.reboot_at.is_some_and(|at| now >= at) {
            self.reboot_at = None;
            info!("FOTA: rebooting into new image");
            self.fota.target_mut().reboot();
        }
    }

    fn service_time(&mut self, now: u64) {
        if self.state != ConnectionState::Connected || !self.time.poll_due(now) {
            return;
        }
        match self.post_rpc(&TimeSync::request(), RequestKind::TimeSync) {
            Ok(id) => self.time.on_submitted(id, now),
            Err(e) => {
                warn!("TIME: sync request not sent: {e}");
                self.time.on_submit_failed(now);
            }
        }
    }

    fn run_fota_commands(&mut self, now: u64) {
        while let Some(cmd) = self.fota.next_command() {
            let offline = matches!(
                self.state,
                ConnectionState::Init | ConnectionState::Disconnected
            );
            match cmd {
                FotaCommand::Report(report) => {
                    if offline {
                        debug!("FOTA: report dropped while offline");
                    } else if self.reports.push_back(report).is_err() {
                        warn!("FOTA: report queue full, dropping");
                    } else {
                        self.flush_reports();
                    }
                }
                FotaCommand::FetchChunk {
                    title,
                    version,
                    chunk,
                    size,
                } => {
                    if offline {
                        self.fota.on_chunk_failed();
                        continue;
                    }
                    if let Some(old) = self.fota_request.take() {
                        self.transport.cancel(old);
                        self.pool.release(old);
                    }
                    let fetched = self.submit_with(RequestKind::FirmwareChunk, |rq, token| {
                        rq.set_method(Method::Get);
                        rq.set_content_format(ContentFormat::OCTET_STREAM);
                        match token {
                            Some(token) => rq.set_path(&["fw", token])?,
                            None => rq.set_path(&["fw"])?,
                        }
                        rq.push_query("title", &title)?;
                        rq.push_query("version", &version)?;
                        rq.push_query("chunk", chunk)?;
                        rq.push_query("size", size)
                    });
                    match fetched {
                        Ok(id) => self.fota_request = Some(id),
                        Err(e) => {
                            warn!("FOTA: chunk {chunk} not requested: {e}");
                            self.fota.on_chunk_failed();
                        }
                    }
                }
                FotaCommand::Reboot => {
                    self.reboot_at = Some(now + u64::from(self.config.fota.apply_delay_ms));
                }
            }
        }
    }

    /// Post queued FOTA reports in order. A report that finds the pool
    /// full stays at the head of the queue until a slot frees up.
    fn flush_reports(&mut self) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return;
        }
        while let Some(report) = self.reports.pop_front() {
            match self.post_telemetry(&report) {
                Ok(()) => {}
                Err(Error::NoSpace) => {
                    debug!("FOTA: no free slot, {} reports deferred", self.reports.len() + 1);
                    // Just popped, so there is room.
                    let _ = self.reports.push_front(report);
                    return;
                }
                Err(e) => warn!("FOTA: report not sent: {e}"),
            }
        }
    }
}

fn set_api_path(rq: &mut Request, token: Option<&str>, leaf: &str) -> Result<()> {
    match token {
        Some(token) => rq.set_path(&["api", "v1", token, leaf]),
        None => rq.set_path(&["api", "v1", leaf]),
    }
}

// ───────────────────────────────────────────────────────────────
// Client
// ───────────────────────────────────────────────────────────────

/// A device session against one server.
///
/// All methods take `&self`; the client can be shared between the
/// application thread and the transport's receive thread.
pub struct Client<T, S, I, H, C = MonotonicClock>
where
    T: Transport,
    S: StoragePort,
    I: ImageTarget,
    H: ClientHandler,
    C: Clock,
{
    session: Mutex<Session<T, S, I>>,
    handler: Mutex<H>,
    completions: Channel<CriticalSectionRawMutex, Completion, COMPLETION_QUEUE_DEPTH>,
    clock: C,
}

impl<T, S, I, H> Client<T, S, I, H, MonotonicClock>
where
    T: Transport,
    S: StoragePort,
    I: ImageTarget,
    H: ClientHandler,
{
    pub fn new(config: ClientConfig, transport: T, storage: S, image: I, handler: H) -> Result<Self> {
        Self::with_clock(config, transport, storage, image, handler, MonotonicClock::new())
    }
}

impl<T, S, I, H, C> Client<T, S, I, H, C>
where
    T: Transport,
    S: StoragePort,
    I: ImageTarget,
    H: ClientHandler,
    C: Clock,
{
    /// Validate `config` and build a disconnected client. Connects right
    /// away when `config.connect_on_init` is set.
    pub fn with_clock(
        config: ClientConfig,
        transport: T,
        storage: S,
        image: I,
        handler: H,
        clock: C,
    ) -> Result<Self> {
        config.validate(transport.is_secure())?;

        let fota = FotaEngine::new(image, config.current_firmware.clone(), &config.fota);
        let time = TimeSync::new(
            config.time.enabled,
            config.time.refresh_interval_secs,
            config.time.retry_secs,
        );
        let connect_on_init = config.connect_on_init;
        let mut session = Session {
            config,
            state: ConnectionState::Init,
            transport,
            storage,
            token: None,
            pool: RequestPool::new(),
            observation: None,
            provision_request: None,
            fota_request: None,
            attributes: Attributes::default(),
            fota,
            reports: Deque::new(),
            time,
            reboot_at: None,
            notices: Deque::new(),
        };
        session.set_state(ConnectionState::Disconnected);

        let client = Self {
            session: Mutex::new(session),
            handler: Mutex::new(handler),
            completions: Channel::new(),
            clock,
        };
        if connect_on_init {
            client.connect()?;
        }
        Ok(client)
    }

    fn lock(&self) -> MutexGuard<'_, Session<T, S, I>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the session lock, then deliver queued notices.
    fn with_session<R>(&self, f: impl FnOnce(&mut Session<T, S, I>, u64) -> R) -> R {
        let now = self.clock.now_ms();
        let result = f(&mut *self.lock(), now);
        self.dispatch();
        result
    }

    /// Hand queued notices to the handler. A caller that finds the
    /// handler busy (a re-entrant call from inside a callback) leaves the
    /// notices for the outer dispatcher.
    fn dispatch(&self) {
        loop {
            let mut handler = match self.handler.try_lock() {
                Ok(handler) => handler,
                Err(TryLockError::Poisoned(p)) => p.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            loop {
                let notice = self.lock().notices.pop_front();
                match notice {
                    Some(Notice::Event(event)) => handler.on_event(event),
                    Some(Notice::Attributes(attrs)) => handler.on_attributes_write(&attrs),
                    Some(Notice::Rpc(id, payload)) => handler.on_rpc_response(id, &payload),
                    None => break,
                }
            }
            drop(handler);
            if self.lock().notices.is_empty() {
                return;
            }
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Open the transport and start the session. Provisioning, if
    /// needed, completes asynchronously; watch for [`Event::Active`].
    pub fn connect(&self) -> Result<Outcome> {
        self.with_session(|s, now| s.connect(now))
    }

    /// Cancel the attribute observation, stop time sync, close the
    /// transport, and abandon everything in flight.
    pub fn disconnect(&self) -> Result<Outcome> {
        self.with_session(|s, now| s.disconnect(now))
    }

    pub fn suspend(&self) -> Result<Outcome> {
        self.with_session(|s, now| s.suspend(now))
    }

    pub fn resume(&self) -> Result<Outcome> {
        self.with_session(|s, now| s.resume(now))
    }

    // ── Outbound ──────────────────────────────────────────────

    pub fn send_telemetry(&self, telemetry: &Telemetry) -> Result<()> {
        self.with_session(|s, now| {
            s.require_connected()?;
            if s.config.telemetry_always_timestamp {
                let entry = TimeseriesEntry {
                    ts: s.time.now_ms(now).unwrap_or(0),
                    values: telemetry.clone(),
                };
                return s.send_timeseries(core::slice::from_ref(&entry)).map(|_| ());
            }
            s.post_telemetry(telemetry)
        })
    }

    /// Post a payload already encoded in the session's codec.
    pub fn send_telemetry_raw(&self, payload: &[u8]) -> Result<()> {
        self.with_session(|s, _| {
            s.require_connected()?;
            let format = s.config.codec.content_format();
            s.submit_with(RequestKind::Telemetry, |rq, token| {
                rq.set_method(Method::Post);
                rq.set_content_format(format);
                set_api_path(rq, token, "telemetry")?;
                rq.set_payload(payload)
            })
            .map(|_| ())
        })
    }

    /// Send `entries` split over as many requests as needed. Every
    /// request is allocated before any is submitted; if the pool cannot
    /// hold them all, nothing is sent. Returns the number of requests.
    pub fn send_timeseries(&self, entries: &[TimeseriesEntry]) -> Result<usize> {
        self.with_session(|s, _| {
            s.require_connected()?;
            s.send_timeseries(entries)
        })
    }

    /// Post a client-side RPC. The reply reaches
    /// [`ClientHandler::on_rpc_response`] under the returned id.
    pub fn send_rpc_request(&self, request: &RpcRequest) -> Result<RequestId> {
        self.with_session(|s, _| {
            s.require_connected()?;
            s.post_rpc(request, RequestKind::Rpc)
        })
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Process a completion now. Must not be called from inside
    /// [`Transport::submit`].
    pub fn handle_completion(&self, completion: Completion) {
        self.with_session(|s, now| s.on_completion(completion, now));
    }

    /// Queue a completion for the next [`poll`](Self::poll). Never blocks;
    /// hands the completion back if the queue is full.
    pub fn deliver(&self, completion: Completion) -> core::result::Result<(), Completion> {
        self.completions
            .try_send(completion)
            .map_err(|TrySendError::Full(c)| c)
    }

    /// Drain queued completions and run timers (time sync refresh and the
    /// deferred reboot after a firmware update).
    pub fn poll(&self) {
        while let Ok(completion) = self.completions.try_receive() {
            self.handle_completion(completion);
        }
        self.with_session(|s, now| s.on_tick(now));
    }

    // ── Queries ───────────────────────────────────────────────

    /// Server time in epoch milliseconds, `None` before the first sync.
    pub fn time_ms(&self) -> Option<i64> {
        let now = self.clock.now_ms();
        self.lock().time.now_ms(now)
    }

    pub fn time_secs(&self) -> Option<i64> {
        self.time_ms().map(|ms| ms / 1000)
    }

    /// Merged snapshot of every shared attribute received so far.
    pub fn shared_attributes(&self) -> Attributes {
        self.lock().attributes.clone()
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.lock().token.clone()
    }

    pub fn fota_state(&self) -> FwState {
        self.lock().fota.state()
    }

    pub fn requests_in_flight(&self) -> usize {
        self.lock().pool.in_use()
    }

    /// Delete the stored access token so the next connect provisions
    /// again. Only allowed while disconnected.
    pub fn forget_token(&self) -> Result<()> {
        let mut s = self.lock();
        if s.state != ConnectionState::Disconnected {
            return Err(Error::InvalidState);
        }
        s.token = None;
        provision::forget_token(&mut s.storage)?;
        info!("PROV: stored token deleted");
        Ok(())
    }
}
