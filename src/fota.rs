//! Chunked, resumable firmware-over-the-air update.
//!
//! Flow: shared attributes announce `{fw_title, fw_version, fw_size}` →
//! N × chunk GET → finalize → mark pending → reboot.
//!
//! ```text
//!   IDLE ─attrs─▶ DOWNLOADING ─last chunk─▶ DOWNLOADED ─verify─▶ VERIFIED
//!                   │    ▲                                          │
//!                   ▼    │ attrs (resume at offset)                 ▼
//!                 FAILED ┘                                      UPDATING ─▶ reboot
//! ```
//!
//! The engine is sans-IO. It never talks to the network; it queues
//! [`FotaCommand`]s which the client drains after every call and turns
//! into telemetry posts, chunk requests, and the deferred reboot. The
//! flash side goes through the [`ImageTarget`] port.

use heapless::Deque;
use log::{debug, info, warn};

use crate::client::ports::ImageTarget;
use crate::config::FotaConfig;
use crate::model::{Attributes, FirmwareId, FwState, FwString, Telemetry};

const COMMAND_QUEUE: usize = 8;

/// Side effects requested by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum FotaCommand {
    /// Post this telemetry record.
    Report(Telemetry),
    /// GET `fw?title=..&version=..&chunk=..&size=..`.
    FetchChunk {
        title: FwString,
        version: FwString,
        chunk: u32,
        size: u32,
    },
    /// Restart into the scheduled image once the reports are flushed.
    Reboot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Download {
    firmware: FirmwareId,
    size: u32,
}

pub struct FotaEngine<I: ImageTarget> {
    target: I,
    current: FirmwareId,
    enabled: bool,
    chunk_size: u32,
    progress_every: u32,

    state: FwState,
    reported: Option<FwState>,

    // Latched shared attributes.
    title: Option<FwString>,
    version: Option<FwString>,
    size: Option<u32>,

    download: Option<Download>,
    offset: u32,
    chunks_received: u32,
    awaiting_chunk: bool,

    commands: Deque<FotaCommand, COMMAND_QUEUE>,
}

impl<I: ImageTarget> FotaEngine<I> {
    pub fn new(target: I, current: FirmwareId, config: &FotaConfig) -> Self {
        Self {
            target,
            current,
            enabled: config.enabled,
            chunk_size: config.chunk_size.max(1),
            progress_every: config.progress_every,
            state: FwState::Idle,
            reported: None,
            title: None,
            version: None,
            size: None,
            download: None,
            offset: 0,
            chunks_received: 0,
            awaiting_chunk: false,
            commands: Deque::new(),
        }
    }

    pub fn state(&self) -> FwState {
        self.state
    }

    /// Bytes of the current download already written.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn is_awaiting_chunk(&self) -> bool {
        self.awaiting_chunk
    }

    pub fn target(&self) -> &I {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut I {
        &mut self.target
    }

    pub fn next_command(&mut self) -> Option<FotaCommand> {
        self.commands.pop_front()
    }

    // ── Inputs ────────────────────────────────────────────────

    /// Report the running firmware identity. Sent on every session start.
    pub fn report_current(&mut self) {
        self.push(FotaCommand::Report(Telemetry::current_firmware(&self.current)));
    }

    /// Confirm the running image if the bootloader still has it on trial.
    pub fn confirm(&mut self) {
        if self.target.is_confirmed() {
            return;
        }
        match self.target.confirm() {
            Ok(()) => {
                info!("FOTA: confirmed {}", self.current);
                let mut report = Telemetry::current_firmware(&self.current);
                report.fw_state = Some(FwState::Updated);
                self.reported = Some(FwState::Updated);
                self.push(FotaCommand::Report(report));
            }
            Err(e) => warn!("FOTA: confirm failed: {e}"),
        }
    }

    /// Latch firmware attributes and start or resume a download when the
    /// announced image differs from the running one.
    pub fn on_attributes(&mut self, attrs: &Attributes) {
        if !self.enabled {
            return;
        }
        if let Some(title) = &attrs.fw_title {
            self.title = Some(title.clone());
        }
        if let Some(version) = &attrs.fw_version {
            self.version = Some(version.clone());
        }
        if let Some(size) = attrs.fw_size {
            self.size = Some(size);
        }

        let (Some(title), Some(version), Some(size)) = (&self.title, &self.version, self.size)
        else {
            return;
        };
        if size == 0 {
            warn!("FOTA: announced size is 0");
            return;
        }
        if self.current.matches(title, version) {
            debug!("FOTA: {title} {version} already running");
            return;
        }
        let wanted = Download {
            firmware: FirmwareId {
                title: title.clone(),
                version: version.clone(),
            },
            size,
        };

        match (&self.download, self.state) {
            (_, FwState::Downloaded | FwState::Verified | FwState::Updating) => {
                debug!("FOTA: update already being applied");
                return;
            }
            (Some(active), FwState::Downloading) if *active == wanted => {
                debug!("FOTA: {} already downloading", active.firmware);
                return;
            }
            (Some(active), _) if *active != wanted => {
                info!("FOTA: target changed from {} to {}", active.firmware, wanted.firmware);
                self.target.reset();
                self.offset = 0;
            }
            _ => {}
        }

        self.download = Some(wanted);
        self.begin();
    }

    /// A chunk response (2.05) arrived.
    pub fn on_chunk(&mut self, data: &[u8]) {
        if !self.awaiting_chunk {
            warn!("FOTA: unexpected chunk ignored");
            return;
        }
        self.awaiting_chunk = false;
        let Some(size) = self.download.as_ref().map(|d| d.size) else {
            return;
        };

        if data.is_empty() {
            warn!("FOTA: empty chunk at offset {}", self.offset);
            self.fail_resumable();
            return;
        }
        let expected = (size - self.offset).min(self.chunk_size);
        if data.len() != expected as usize {
            warn!("FOTA: chunk of {} bytes, expected {expected}", data.len());
            self.fail_reset();
            return;
        }
        if self.offset == 0 && !self.target.identify(data) {
            warn!("FOTA: image header not recognised");
            self.fail_reset();
            return;
        }
        if let Err(e) = self.target.write(data) {
            warn!("FOTA: write failed at offset {}: {e}", self.offset);
            self.fail_reset();
            return;
        }

        self.offset += expected;
        self.chunks_received += 1;
        if self.progress_every != 0 && self.chunks_received % self.progress_every == 0 {
            self.push(FotaCommand::Report(Telemetry {
                fw_progress: Some(self.offset),
                ..Telemetry::default()
            }));
        }

        if self.offset >= size {
            self.finish();
        } else {
            self.fetch_next();
        }
    }

    /// The chunk request failed in transport, was answered with something
    /// other than 2.05, or could not be submitted. Written bytes are kept.
    pub fn on_chunk_failed(&mut self) {
        if !self.awaiting_chunk {
            return;
        }
        self.awaiting_chunk = false;
        self.fail_resumable();
    }

    // ── Internals ─────────────────────────────────────────────

    fn begin(&mut self) {
        let Some(size) = self.download.as_ref().map(|d| d.size) else {
            return;
        };
        if let Err(e) = self.target.init(size) {
            warn!("FOTA: init failed: {e}");
            self.fail_reset();
            return;
        }

        let offset = self.target.offset();
        self.offset = if offset > size || (offset != size && offset % self.chunk_size != 0) {
            warn!("FOTA: stale offset {offset}, restarting");
            self.target.reset();
            if let Err(e) = self.target.init(size) {
                warn!("FOTA: init failed: {e}");
                self.fail_reset();
                return;
            }
            0
        } else {
            offset
        };
        self.chunks_received = 0;

        if let Some(d) = &self.download {
            info!("FOTA: downloading {} ({size} bytes) from {}", d.firmware, self.offset);
        }
        self.set_state(FwState::Downloading);

        if self.offset == size {
            self.finish();
        } else {
            self.fetch_next();
        }
    }

    fn fetch_next(&mut self) {
        let Some(d) = &self.download else {
            return;
        };
        let cmd = FotaCommand::FetchChunk {
            title: d.firmware.title.clone(),
            version: d.firmware.version.clone(),
            chunk: self.offset / self.chunk_size,
            size: self.chunk_size,
        };
        self.awaiting_chunk = true;
        self.push(cmd);
    }

    fn finish(&mut self) {
        self.set_state(FwState::Downloaded);
        if let Err(e) = self.target.finalize() {
            warn!("FOTA: verification failed: {e}");
            self.fail_reset();
            return;
        }
        self.set_state(FwState::Verified);

        if let Err(e) = self.target.mark_pending() {
            warn!("FOTA: could not mark image pending: {e}");
            self.fail_reset();
            return;
        }
        self.set_state(FwState::Updating);
        if let Err(e) = self.target.schedule_update() {
            warn!("FOTA: could not schedule update: {e}");
            self.fail_reset();
            return;
        }
        info!("FOTA: update scheduled, rebooting");
        self.push(FotaCommand::Reboot);
    }

    fn fail_resumable(&mut self) {
        self.set_state(FwState::Failed);
    }

    fn fail_reset(&mut self) {
        self.target.reset();
        self.offset = 0;
        self.download = None;
        self.awaiting_chunk = false;
        self.set_state(FwState::Failed);
    }

    fn set_state(&mut self, state: FwState) {
        if self.state != state {
            debug!("FOTA: {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        if self.reported != Some(state) {
            self.reported = Some(state);
            self.push(FotaCommand::Report(Telemetry::fw_state(state)));
        }
    }

    fn push(&mut self, cmd: FotaCommand) {
        if self.commands.push_back(cmd).is_err() {
            warn!("FOTA: command queue full, dropping");
        }
    }
}
