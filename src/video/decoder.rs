// =============================================================================
// DECODER - PRODUCER SIDE OF THE FRAME RING
// =============================================================================
//
// Owns the frame source. Decodes frames for the subscribed range, writes them
// into free slots of the shared region and announces each batch with a
// `FramesDelivered` status. Never writes a slot the consumer has not
// acknowledged; any cursor protocol violation ends the loop with an error.
//
// =============================================================================

use crate::core::{advance_frame, DecoderConfig, VideoMetaData};
use crate::video::{
    DecoderCommand, DecoderStatus, FrameRegion, FrameSource, RingCursors, RingError, SessionId,
    SourceOpener,
};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No video open
    Closed,
    /// `OpenAck` sent, waiting for the consumer to confirm
    Opening,
    /// Delivering frames
    Ready,
    /// `Close` received, loop is ending
    Closing,
}

pub struct Decoder {
    opener: Box<dyn SourceOpener>,
    source: Option<Box<dyn FrameSource>>,
    region_bytes: usize,
    read_batch: usize,
    poll_interval: Duration,

    cmd_rx: mpsc::Receiver<DecoderCommand>,
    status_tx: mpsc::Sender<DecoderStatus>,

    state: DecoderState,
    session: SessionId,
    total_frames: usize,

    // Subscribed range: deliver from `frame_cur` through `frame_end` (inclusive)
    frame_end: Option<usize>,
    frame_cur: usize,
    // Index of the frame the source returns next
    frame_rd: usize,
    sample_rate: usize,
    // Set by a failed read, cleared by the next read request
    stalled: bool,

    region: Option<Arc<FrameRegion>>,
    cursors: RingCursors,
}

impl Decoder {
    pub fn new(
        opener: Box<dyn SourceOpener>,
        config: &DecoderConfig,
        cmd_rx: mpsc::Receiver<DecoderCommand>,
        status_tx: mpsc::Sender<DecoderStatus>,
    ) -> Self {
        Self {
            opener,
            source: None,
            region_bytes: config.ring_buffer_bytes,
            read_batch: config.read_batch.max(1),
            poll_interval: Duration::from_micros(config.poll_interval_us),
            cmd_rx,
            status_tx,
            state: DecoderState::Closed,
            session: 0,
            total_frames: 0,
            frame_end: None,
            frame_cur: 0,
            frame_rd: 0,
            sample_rate: 1,
            stalled: false,
            region: None,
            cursors: RingCursors::new(1),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn cursors(&self) -> &RingCursors {
        &self.cursors
    }

    fn send(&mut self, status: DecoderStatus) {
        if self.status_tx.send(status).is_err() {
            log::debug!("Status channel disconnected, closing decoder");
            self.state = DecoderState::Closing;
        }
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    pub fn execute(&mut self, cmd: DecoderCommand) -> Result<(), RingError> {
        match cmd.session() {
            Some(session) if session != self.session => {
                if !matches!(cmd, DecoderCommand::Close { .. }) {
                    log::trace!("Ignoring stale command for session {}: {:?}", session, cmd);
                    return Ok(());
                }
            }
            _ => {}
        }

        match cmd {
            DecoderCommand::Open(path) => self.open(&path),
            DecoderCommand::Read {
                start,
                length,
                sample_rate,
                ..
            } => self.read(start, length, sample_rate),
            DecoderCommand::Seek {
                frame_id,
                sample_rate,
                ..
            } => {
                self.sample_rate = sample_rate.max(1);
                if self.total_frames > 0 {
                    self.restart_at(frame_id, frame_id);
                }
            }
            DecoderCommand::PlayRate { sample_rate, .. } => {
                self.sample_rate = sample_rate.max(1);
            }
            DecoderCommand::FrameAck { slot, count, .. } => {
                self.cursors.acknowledge(slot, count)?;
            }
            DecoderCommand::OpenAckConfirm { .. } => {
                if self.state == DecoderState::Opening {
                    self.state = DecoderState::Ready;
                    log::debug!("Session {} confirmed, delivery enabled", self.session);
                }
            }
            DecoderCommand::Close { .. } => {
                log::info!("Decoder closing");
                self.state = DecoderState::Closing;
            }
        }
        Ok(())
    }

    fn open(&mut self, path: &Path) {
        log::info!("Opening {}", path.display());
        match self.try_open(path) {
            Ok(status) => self.send(status),
            Err(e) => {
                log::warn!("Failed to open {}: {:#}", path.display(), e);
                self.send(DecoderStatus::OpenFailed {
                    path: path.to_path_buf(),
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    fn try_open(&mut self, path: &Path) -> anyhow::Result<DecoderStatus> {
        let mut source = self.opener.open(path)?;
        let shape = source.shape();
        let first = source
            .read_frame()
            .ok_or_else(|| anyhow::anyhow!("cannot read the first frame"))?;
        if first.len() != shape.frame_bytes() {
            return Err(anyhow::anyhow!(
                "first frame has {} bytes, expected {}",
                first.len(),
                shape.frame_bytes()
            ));
        }
        source.seek(0)?;

        let region = Arc::new(FrameRegion::new(self.region_bytes, shape)?);
        let meta = VideoMetaData::new(path, source.total_frames(), source.fps());

        self.session += 1;
        self.total_frames = source.total_frames();
        self.source = Some(source);
        self.frame_end = None;
        self.frame_cur = 0;
        self.frame_rd = 0;
        self.sample_rate = 1;
        self.stalled = false;
        self.cursors = RingCursors::new(region.capacity());
        self.region = Some(region.clone());
        self.state = DecoderState::Opening;

        log::info!(
            "Session {}: {} slots of {} bytes, {} frames",
            self.session,
            region.capacity(),
            region.frame_bytes(),
            self.total_frames
        );

        Ok(DecoderStatus::OpenAck {
            session: self.session,
            capacity: region.capacity(),
            frame_bytes: region.frame_bytes(),
            shape,
            region,
            meta,
        })
    }

    fn read(&mut self, start: usize, length: usize, sample_rate: usize) {
        self.sample_rate = sample_rate.max(1);
        if length == 0 || self.total_frames == 0 {
            return;
        }
        let end = (start + length - 1).min(self.total_frames - 1);
        if self.frame_end.is_some_and(|e| start == e + 1) {
            self.frame_end = Some(end);
            self.stalled = false;
        } else {
            self.restart_at(start, end);
        }
    }

    fn restart_at(&mut self, start: usize, end: usize) {
        if let Some(source) = self.source.as_mut() {
            if let Err(e) = source.seek(start) {
                log::warn!("Seek to frame {} failed: {:#}", start, e);
            }
        }
        self.frame_cur = start;
        self.frame_rd = start;
        self.frame_end = Some(end.min(self.total_frames.saturating_sub(1)));
        self.stalled = false;
    }

    fn drain_commands(&mut self) -> Result<(), RingError> {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(cmd) => {
                    self.execute(cmd)?;
                    if self.state == DecoderState::Closing {
                        return Ok(());
                    }
                }
                Err(mpsc::TryRecvError::Empty) => return Ok(()),
                Err(mpsc::TryRecvError::Disconnected) => {
                    log::info!("Command channel disconnected, shutting down");
                    self.state = DecoderState::Closing;
                    return Ok(());
                }
            }
        }
    }

    // =========================================================================
    // FRAME DELIVERY
    // =========================================================================

    /// Decode up to one batch and publish it; returns the number of frames delivered.
    pub fn read_frames(&mut self) -> Result<usize, RingError> {
        if self.state != DecoderState::Ready || self.stalled {
            return Ok(0);
        }
        let Some(frame_end) = self.frame_end else {
            return Ok(0);
        };
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };

        let init_id = self.frame_cur;
        let mut results = Vec::new();
        while self.frame_cur <= frame_end && results.len() < self.read_batch {
            if !self.cursors.has_room_for(results.len() + 1) {
                break;
            }
            match source.read_frame() {
                Some(frame) => {
                    // always include the terminal frame
                    if self.frame_rd == self.frame_cur {
                        results.push(frame);
                        self.frame_cur = advance_frame(self.frame_cur, self.sample_rate, self.total_frames);
                    }
                    self.frame_rd += 1;
                }
                None => {
                    log::debug!("Read stopped at frame {}", self.frame_rd);
                    self.stalled = true;
                    break;
                }
            }
        }

        let delivered = results.len();
        if delivered > 0 {
            self.send_frames(init_id, &results)?;
        }
        Ok(delivered)
    }

    fn send_frames(&mut self, frame_id: usize, frames: &[Vec<u8>]) -> Result<(), RingError> {
        let Some(region) = self.region.clone() else {
            return Ok(());
        };
        let start_slot = self.cursors.write_cursor();
        for frame in frames {
            let slot = self.cursors.advance_write()?;
            region.write_slot(slot, frame);
        }
        log::trace!(
            "Delivered {} frames from {} into slot {}",
            frames.len(),
            frame_id,
            start_slot
        );
        self.send(DecoderStatus::FramesDelivered {
            session: self.session,
            start_frame: frame_id,
            sample_rate: self.sample_rate,
            slot: start_slot,
            count: frames.len(),
            shape: region.shape(),
        });
        Ok(())
    }

    // =========================================================================
    // LOOP
    // =========================================================================

    pub fn run(mut self) -> Result<(), RingError> {
        log::debug!("Decoder loop started");
        while self.state != DecoderState::Closing {
            self.drain_commands()?;
            if self.state == DecoderState::Closing {
                break;
            }
            if self.read_frames()? == 0 {
                match self.cmd_rx.recv_timeout(self.poll_interval) {
                    Ok(cmd) => self.execute(cmd)?,
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        log::info!("Command channel disconnected, shutting down");
                        self.state = DecoderState::Closing;
                    }
                }
            }
        }
        self.source = None;
        log::info!("Decoder loop exited");
        Ok(())
    }
}

/// Run a decoder on its own thread.
pub fn spawn_decoder(
    opener: Box<dyn SourceOpener>,
    config: &DecoderConfig,
    cmd_rx: mpsc::Receiver<DecoderCommand>,
    status_tx: mpsc::Sender<DecoderStatus>,
) -> std::io::Result<JoinHandle<Result<(), RingError>>> {
    let decoder = Decoder::new(opener, config, cmd_rx, status_tx);
    thread::Builder::new()
        .name("decoder".to_string())
        .spawn(move || {
            let result = decoder.run();
            if let Err(e) = &result {
                log::error!("Decoder stopped on protocol violation: {}", e);
            }
            result
        })
}
