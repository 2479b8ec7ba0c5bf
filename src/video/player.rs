use crate::core::{AppConfig, DecoderConfig, PlaybackConfig, VideoMetaData};
use crate::video::{
    spawn_controller, spawn_decoder, Direction, FfmpegOpener, PlaybackController, PlaybackEvent,
    RingError, SourceOpener, ViewIntent,
};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Owns the decoder and playback threads and forwards view intents to them.
pub struct MediaPlayer {
    intent_tx: mpsc::Sender<ViewIntent>,
    event_rx: mpsc::Receiver<PlaybackEvent>,
    decoder_handle: Option<JoinHandle<Result<(), RingError>>>,
    controller_handle: Option<JoinHandle<()>>,

    // Mirrors of the controller state, updated only from events
    meta: Option<VideoMetaData>,
    current_frame: Option<usize>,
    is_playing: bool,
}

impl MediaPlayer {
    /// Player decoding through ffmpeg, configured from `config`.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let opener = FfmpegOpener {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
        };
        Self::with_opener(Box::new(opener), &config.decoder, config.playback.clone())
    }

    pub fn with_opener(
        opener: Box<dyn SourceOpener>,
        decoder: &DecoderConfig,
        playback: PlaybackConfig,
    ) -> anyhow::Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (status_tx, status_rx) = mpsc::channel();
        let (intent_tx, intent_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        let decoder_handle = spawn_decoder(opener, decoder, cmd_rx, status_tx)?;
        let controller = PlaybackController::new(playback, cmd_tx, event_tx);
        let controller_handle = spawn_controller(controller, intent_rx, status_rx)?;

        Ok(Self {
            intent_tx,
            event_rx,
            decoder_handle: Some(decoder_handle),
            controller_handle: Some(controller_handle),
            meta: None,
            current_frame: None,
            is_playing: false,
        })
    }

    fn send(&self, intent: ViewIntent) {
        if self.intent_tx.send(intent).is_err() {
            log::warn!("Playback thread is gone");
        }
    }

    pub fn open(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        log::info!("MediaPlayer: open {}", path.display());
        self.send(ViewIntent::Open(path));
    }

    pub fn play(&mut self) {
        self.send(ViewIntent::Play);
    }

    pub fn pause(&mut self, show_current: bool) {
        self.send(ViewIntent::Pause { show_current });
    }

    pub fn toggle(&mut self) {
        self.send(ViewIntent::Toggle);
    }

    pub fn seek(&mut self, frame_id: usize) {
        self.send(ViewIntent::Seek(frame_id));
    }

    pub fn set_play_rate(&mut self, rate: f64) {
        self.send(ViewIntent::PlayRate(rate));
    }

    pub fn navigate(&mut self, direction: Direction) {
        self.send(ViewIntent::Navigate(direction));
    }

    pub fn stop(&mut self) {
        self.send(ViewIntent::Stop);
    }

    fn observe(&mut self, event: &PlaybackEvent) {
        match event {
            PlaybackEvent::Opened(meta) => {
                self.meta = Some(meta.clone());
                self.current_frame = None;
            }
            PlaybackEvent::Frame { frame_id, .. } => self.current_frame = Some(*frame_id),
            PlaybackEvent::PlayingChanged(playing) => self.is_playing = *playing,
            PlaybackEvent::OpenFailed { .. } | PlaybackEvent::Stopped => self.is_playing = false,
        }
    }

    /// Drain pending events without blocking.
    pub fn try_events(&mut self) -> Vec<PlaybackEvent> {
        let events: Vec<_> = self.event_rx.try_iter().collect();
        for event in &events {
            self.observe(event);
        }
        events
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_event_timeout(&mut self, timeout: Duration) -> Option<PlaybackEvent> {
        let event = self.event_rx.recv_timeout(timeout).ok()?;
        self.observe(&event);
        Some(event)
    }

    pub fn meta(&self) -> Option<&VideoMetaData> {
        self.meta.as_ref()
    }

    pub fn current_frame(&self) -> Option<usize> {
        self.current_frame
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        log::debug!("MediaPlayer dropping");
        let _ = self.intent_tx.send(ViewIntent::Stop);

        if let Some(handle) = self.controller_handle.take() {
            wait_for("Playback", handle);
        }
        if let Some(handle) = self.decoder_handle.take() {
            wait_for("Decoder", handle);
        }
    }
}

fn wait_for<T>(name: &str, handle: JoinHandle<T>) {
    // Wait briefly for clean shutdown
    for _ in 0..10 {
        if handle.is_finished() {
            let _ = handle.join();
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    log::warn!("{} thread did not shut down cleanly", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::frame_source::testing::synthetic_opener;
    use crate::video::FrameShape;
    use std::time::Instant;

    fn player(total_frames: usize) -> MediaPlayer {
        let decoder = DecoderConfig {
            ring_buffer_bytes: FrameShape::rgb(4, 2).frame_bytes() * 16,
            read_batch: 3,
            poll_interval_us: 100,
        };
        let playback = PlaybackConfig {
            target_fps: 1000.0,
            poll_interval_us: 100,
            ..PlaybackConfig::default()
        };
        MediaPlayer::with_opener(Box::new(synthetic_opener(total_frames)), &decoder, playback).unwrap()
    }

    fn wait_opened(player: &mut MediaPlayer) -> VideoMetaData {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(PlaybackEvent::Opened(meta)) = player.recv_event_timeout(Duration::from_millis(50)) {
                return meta;
            }
        }
        panic!("video did not open");
    }

    /// Collect presented frame ids until `last` shows up.
    fn frames_until(player: &mut MediaPlayer, last: usize) -> Vec<usize> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut frames = Vec::new();
        while Instant::now() < deadline {
            if let Some(PlaybackEvent::Frame { frame_id, image }) =
                player.recv_event_timeout(Duration::from_millis(50))
            {
                assert_eq!(image.dimensions(), (4, 2));
                frames.push(frame_id);
                if frame_id == last {
                    break;
                }
            }
        }
        frames
    }

    #[test]
    fn test_plays_every_frame_in_order() {
        let mut player = player(30);
        player.open("clip.mp4");
        let meta = wait_opened(&mut player);
        assert_eq!(meta.total_frames, 30);
        assert_eq!(frames_until(&mut player, 0), vec![0]);

        player.play();
        let frames = frames_until(&mut player, 29);
        assert_eq!(frames, (1..30).collect::<Vec<_>>());
        assert_eq!(player.current_frame(), Some(29));
    }

    #[test]
    fn test_fast_forward_reaches_terminal_frame() {
        let mut player = player(10);
        player.set_play_rate(4.0);
        player.open("clip.mp4");
        wait_opened(&mut player);
        assert_eq!(frames_until(&mut player, 0), vec![0]);

        player.play();
        assert_eq!(frames_until(&mut player, 9), vec![4, 8, 9]);
    }

    #[test]
    fn test_seek_while_paused_shows_target() {
        let mut player = player(100);
        player.open("clip.mp4");
        wait_opened(&mut player);
        frames_until(&mut player, 0);

        player.seek(42);
        assert_eq!(frames_until(&mut player, 42), vec![42]);
        player.navigate(Direction::Back);
        assert_eq!(frames_until(&mut player, 37), vec![37]);
    }

    #[test]
    fn test_is_playing_follows_controller() {
        let mut player = player(100);
        player.toggle();
        thread::sleep(Duration::from_millis(100));
        player.try_events();
        assert!(!player.is_playing());

        player.open("clip.mp4");
        wait_opened(&mut player);
        player.toggle();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !player.is_playing() && Instant::now() < deadline {
            player.recv_event_timeout(Duration::from_millis(50));
        }
        assert!(player.is_playing());

        player.pause(true);
        let deadline = Instant::now() + Duration::from_secs(5);
        while player.is_playing() && Instant::now() < deadline {
            player.recv_event_timeout(Duration::from_millis(50));
        }
        assert!(!player.is_playing());
    }

    #[test]
    fn test_open_failure_is_reported() {
        let mut player = player(10);
        player.open("missing.mp4");
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut failed = false;
        while Instant::now() < deadline && !failed {
            failed = matches!(
                player.recv_event_timeout(Duration::from_millis(50)),
                Some(PlaybackEvent::OpenFailed { .. })
            );
        }
        assert!(failed);
        assert!(player.meta().is_none());
    }
}
