pub mod ring_buffer;
pub mod messages;
pub mod frame_source;
pub mod decoder;
pub mod playback;
pub mod player;

pub use ring_buffer::*;
pub use messages::*;
pub use frame_source::{probe_video, FfmpegOpener, FfmpegSource, FrameSource, SourceOpener, VideoProbe};
pub use decoder::{spawn_decoder, Decoder, DecoderState};
pub use playback::{spawn_controller, PlaybackController};
pub use player::MediaPlayer;
