use crate::core::VideoMetaData;
use crate::video::{FrameRegion, FrameShape};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;

/// Identifies one `Open` of the decoder. Increases with every successful open.
pub type SessionId = u64;

/// Commands sent from the playback controller to the decoder thread.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderCommand {
    /// Open a new video, superseding the current session
    Open(PathBuf),
    /// Deliver `length` frames from `start`, keeping every `sample_rate`-th frame
    Read {
        session: SessionId,
        start: usize,
        length: usize,
        sample_rate: usize,
    },
    /// Reposition the source and deliver the single frame at `frame_id`,
    /// dropping whatever was left of the previous range
    Seek {
        session: SessionId,
        frame_id: usize,
        sample_rate: usize,
    },
    /// Change the decimation stride for subsequent deliveries
    PlayRate { session: SessionId, sample_rate: usize },
    /// Return `count` slots starting at `slot` to the decoder
    FrameAck {
        session: SessionId,
        slot: usize,
        count: usize,
    },
    /// The consumer holds the region from `OpenAck`; delivery may start
    OpenAckConfirm { session: SessionId },
    /// Stop the decode loop
    Close { session: SessionId },
}

impl DecoderCommand {
    /// Session the command applies to; `Open` starts a new one.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            DecoderCommand::Open(_) => None,
            DecoderCommand::Read { session, .. }
            | DecoderCommand::Seek { session, .. }
            | DecoderCommand::PlayRate { session, .. }
            | DecoderCommand::FrameAck { session, .. }
            | DecoderCommand::OpenAckConfirm { session }
            | DecoderCommand::Close { session } => Some(*session),
        }
    }
}

/// Status messages sent from the decoder thread to the playback controller.
#[derive(Debug, Clone)]
pub enum DecoderStatus {
    OpenAck {
        session: SessionId,
        capacity: usize,
        frame_bytes: usize,
        shape: FrameShape,
        region: Arc<FrameRegion>,
        meta: VideoMetaData,
    },
    FramesDelivered {
        session: SessionId,
        start_frame: usize,
        sample_rate: usize,
        slot: usize,
        count: usize,
        shape: FrameShape,
    },
    OpenFailed { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Back,
    Forward,
}

/// Requests from the user interface to the playback controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewIntent {
    Open(PathBuf),
    Pause { show_current: bool },
    Play,
    Toggle,
    Seek(usize),
    PlayRate(f64),
    Navigate(Direction),
    Stop,
}

/// What the playback controller reports back to the user interface.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Opened(VideoMetaData),
    OpenFailed { path: PathBuf, reason: String },
    Frame { frame_id: usize, image: RgbImage },
    /// Playback started (`true`) or paused (`false`)
    PlayingChanged(bool),
    Stopped,
}
