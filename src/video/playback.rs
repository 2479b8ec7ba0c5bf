// =============================================================================
// PLAYBACK CONTROLLER - CONSUMER SIDE OF THE FRAME RING
// =============================================================================
//
// Tracks which frames the view wants, requests a bounded horizon of them from
// the decoder, queues the batches it is told about and presents one frame per
// tick. Every slot it receives is handed back with a frame-ack, in slot order,
// whether it was presented, dropped by a seek or rejected as stale.
//
// =============================================================================

use crate::core::{advance_frame, PlaybackConfig, StepSize, VideoMetaData};
use crate::video::{
    DecoderCommand, DecoderStatus, Direction, FrameRegion, PlaybackEvent, SessionId, ViewIntent,
};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Presses closer together than this keep growing an exponential step.
const NAVIGATION_REPEAT: Duration = Duration::from_millis(500);

/// One delivered batch, consumed slot by slot.
#[derive(Debug, Clone)]
struct BufferItem {
    start_frame: usize,
    sample_rate: usize,
    slot: usize,
    count: usize,
    /// Slots of this batch already presented
    cursor: usize,
    /// Frame id at `cursor`
    current_frame: usize,
    /// Rejected batch waiting for its turn to be released
    discarded: bool,
}

impl BufferItem {
    fn new(start_frame: usize, sample_rate: usize, slot: usize, count: usize) -> Self {
        Self {
            start_frame,
            sample_rate,
            slot,
            count,
            cursor: 0,
            current_frame: start_frame,
            discarded: false,
        }
    }

    /// Frame id the batch after this one has to start with.
    fn expected_next(&self, total_frames: usize) -> usize {
        (0..self.count).fold(self.start_frame, |frame, _| {
            advance_frame(frame, self.sample_rate, total_frames)
        })
    }

    fn remaining(&self) -> usize {
        self.count - self.cursor
    }
}

#[derive(Debug, Clone, Copy)]
struct NavigationStep {
    direction: Direction,
    frames: usize,
    at: Instant,
}

pub struct PlaybackController {
    config: PlaybackConfig,
    cmd_tx: mpsc::Sender<DecoderCommand>,
    event_tx: mpsc::Sender<PlaybackEvent>,

    session: SessionId,
    region: Option<Arc<FrameRegion>>,
    meta: Option<VideoMetaData>,

    view_next_id: usize,
    // Frames below this id may be presented; `view_last_to_show + 1`
    view_show_until: usize,
    view_subscribed: usize,
    view_current: Option<usize>,
    play_rate: f64,
    paused: bool,
    buffer: VecDeque<BufferItem>,

    last_update: Option<Instant>,
    last_navigation: Option<NavigationStep>,
    stopped: bool,
}

impl PlaybackController {
    pub fn new(
        config: PlaybackConfig,
        cmd_tx: mpsc::Sender<DecoderCommand>,
        event_tx: mpsc::Sender<PlaybackEvent>,
    ) -> Self {
        Self {
            config,
            cmd_tx,
            event_tx,
            session: 0,
            region: None,
            meta: None,
            view_next_id: 0,
            view_show_until: 0,
            view_subscribed: 0,
            view_current: None,
            play_rate: 1.0,
            paused: true,
            buffer: VecDeque::new(),
            last_update: None,
            last_navigation: None,
            stopped: false,
        }
    }

    pub fn view_next_id(&self) -> usize {
        self.view_next_id
    }

    pub fn view_last_to_show(&self) -> Option<usize> {
        self.view_show_until.checked_sub(1)
    }

    pub fn view_subscribed(&self) -> usize {
        self.view_subscribed
    }

    /// Frame the view is positioned at: the last one presented or sought.
    pub fn current_frame(&self) -> Option<usize> {
        self.view_current
    }

    pub fn play_rate(&self) -> f64 {
        self.play_rate
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn meta(&self) -> Option<&VideoMetaData> {
        self.meta.as_ref()
    }

    /// Decimation stride for the current play rate.
    pub fn sample_rate(&self) -> usize {
        if self.play_rate >= 1.0 {
            (self.play_rate as usize).max(1)
        } else {
            1
        }
    }

    /// Wall time between two presented frames.
    pub fn frame_interval(&self) -> Duration {
        let base = 1.0 / self.config.target_fps.max(f64::EPSILON);
        if self.play_rate < 1.0 {
            Duration::from_secs_f64(base / self.play_rate)
        } else {
            Duration::from_secs_f64(base)
        }
    }

    fn total_frames(&self) -> usize {
        self.meta.as_ref().map(|m| m.total_frames).unwrap_or(0)
    }

    fn send(&self, cmd: DecoderCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            log::debug!("Decoder channel closed");
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.event_tx.send(event);
    }

    // =========================================================================
    // VIEW OPERATIONS
    // =========================================================================

    pub fn pause(&mut self, show_current: bool) {
        self.view_show_until = if show_current {
            self.view_next_id + 1
        } else {
            self.view_next_id
        };
        self.set_paused(true);
    }

    pub fn play(&mut self) {
        if self.meta.is_none() {
            log::debug!("Play ignored, no video open");
            return;
        }
        let sample_rate = self.sample_rate();
        let least_subscribed = (self.view_next_id + self.config.base_extent_pace * sample_rate)
            .min(self.total_frames());
        if self.view_subscribed < least_subscribed {
            self.send(DecoderCommand::Read {
                session: self.session,
                start: self.view_subscribed,
                length: least_subscribed - self.view_subscribed,
                sample_rate,
            });
            self.view_subscribed = least_subscribed;
        }
        self.view_show_until = self.view_subscribed;
        self.set_paused(false);
    }

    fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            self.paused = paused;
            self.emit(PlaybackEvent::PlayingChanged(!paused));
        }
    }

    pub fn toggle(&mut self) {
        if self.paused {
            self.play();
        } else {
            self.pause(false);
        }
    }

    pub fn seek(&mut self, frame_id: usize) {
        let Some(meta) = self.meta.as_ref() else {
            log::debug!("Seek ignored, no video open");
            return;
        };
        let frame_id = meta.clamp_frame(frame_id as i64);

        self.view_next_id = frame_id;
        self.view_current = Some(frame_id);
        self.view_show_until = frame_id + 1;
        self.view_subscribed = frame_id + 1;
        self.release_all();
        // an explicit seek so the decoder never treats it as a range extension
        self.send(DecoderCommand::Seek {
            session: self.session,
            frame_id,
            sample_rate: self.sample_rate(),
        });
    }

    pub fn change_play_rate(&mut self, rate: f64) {
        if !rate.is_finite() || rate <= 0.0 {
            log::warn!("Ignoring invalid play rate {}", rate);
            return;
        }
        if rate == self.play_rate {
            return;
        }
        log::info!("Play rate {} -> {}", self.play_rate, rate);
        self.play_rate = rate;
        if self.meta.is_none() {
            return;
        }
        self.send(DecoderCommand::PlayRate {
            session: self.session,
            sample_rate: self.sample_rate(),
        });
        self.seek(self.view_current.unwrap_or(self.view_next_id));
        if !self.paused {
            self.play();
        }
    }

    pub fn navigate(&mut self, direction: Direction) {
        self.navigate_at(direction, Instant::now());
    }

    /// Step back or forward from the current frame; exponential steps double
    /// while presses in the same direction keep coming.
    pub fn navigate_at(&mut self, direction: Direction, now: Instant) {
        let Some(meta) = self.meta.as_ref() else {
            return;
        };
        let mode = match direction {
            Direction::Back => self.config.step_back,
            Direction::Forward => self.config.step_forward,
        };
        let frames = match mode {
            StepSize::Fixed(n) => n,
            StepSize::Exp => match self.last_navigation {
                Some(last)
                    if last.direction == direction
                        && now.duration_since(last.at) < NAVIGATION_REPEAT =>
                {
                    (last.frames * 2).min(self.config.step_max.max(1))
                }
                _ => 1,
            },
        };
        self.last_navigation = Some(NavigationStep {
            direction,
            frames,
            at: now,
        });

        let base = self.view_current.unwrap_or(self.view_next_id) as i64;
        let target = match direction {
            Direction::Back => base - frames as i64,
            Direction::Forward => base + frames as i64,
        };
        let target = meta.clamp_frame(target);
        log::debug!("Navigate {:?} by {} to {}", direction, frames, target);
        self.seek(target);
    }

    pub fn open(&mut self, path: std::path::PathBuf) {
        self.pause(false);
        self.send(DecoderCommand::Open(path));
    }

    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.send(DecoderCommand::Close {
            session: self.session,
        });
        self.emit(PlaybackEvent::Stopped);
    }

    pub fn handle_intent(&mut self, intent: ViewIntent) {
        match intent {
            ViewIntent::Open(path) => self.open(path),
            ViewIntent::Pause { show_current } => self.pause(show_current),
            ViewIntent::Play => self.play(),
            ViewIntent::Toggle => self.toggle(),
            ViewIntent::Seek(frame_id) => self.seek(frame_id),
            ViewIntent::PlayRate(rate) => self.change_play_rate(rate),
            ViewIntent::Navigate(direction) => self.navigate(direction),
            ViewIntent::Stop => self.stop(),
        }
    }

    // =========================================================================
    // DECODER STATUS
    // =========================================================================

    pub fn handle_status(&mut self, status: DecoderStatus) {
        match status {
            DecoderStatus::OpenAck {
                session,
                capacity,
                region,
                meta,
                ..
            } => {
                log::info!(
                    "Opened {} ({} frames, {:.2} fps, {} slots)",
                    meta.name,
                    meta.total_frames,
                    meta.fps,
                    capacity
                );
                self.session = session;
                self.region = Some(region);
                self.meta = Some(meta.clone());
                self.buffer.clear();
                self.view_current = None;
                self.view_next_id = 0;
                self.view_subscribed = 0;
                self.last_update = None;
                self.last_navigation = None;
                self.set_paused(true);
                self.send(DecoderCommand::OpenAckConfirm { session });
                self.emit(PlaybackEvent::Opened(meta));
                self.seek(0);
            }
            DecoderStatus::OpenFailed { path, reason } => {
                log::warn!("Decoder could not open {}: {}", path.display(), reason);
                self.emit(PlaybackEvent::OpenFailed { path, reason });
            }
            DecoderStatus::FramesDelivered {
                session,
                start_frame,
                sample_rate,
                slot,
                count,
                ..
            } => self.accept_frames(session, start_frame, sample_rate, slot, count),
        }
    }

    fn accept_frames(
        &mut self,
        session: SessionId,
        start_frame: usize,
        sample_rate: usize,
        slot: usize,
        count: usize,
    ) {
        if count == 0 {
            return;
        }
        let expected = self
            .buffer
            .iter()
            .rev()
            .find(|item| !item.discarded)
            .map(|item| item.expected_next(self.total_frames()))
            .unwrap_or(self.view_next_id);
        let rate_ok =
            sample_rate == self.sample_rate() || (self.paused && sample_rate == 1);

        let mut item = BufferItem::new(start_frame, sample_rate, slot, count);
        if session == self.session && start_frame == expected && rate_ok {
            log::trace!("Accepted {} frames from {}", count, start_frame);
            self.buffer.push_back(item);
            return;
        }

        log::trace!(
            "Dropping batch of {} from {} (rate {}, expected {} at rate {})",
            count,
            start_frame,
            sample_rate,
            expected,
            self.sample_rate()
        );
        if session != self.session || self.buffer.is_empty() {
            self.send(DecoderCommand::FrameAck {
                session,
                slot,
                count,
            });
        } else {
            // slots must come back in order; release behind the queued batches
            item.discarded = true;
            self.buffer.push_back(item);
        }
    }

    /// Hand every unconsumed slot back to the decoder.
    fn release_all(&mut self) {
        let Some(capacity) = self.region.as_ref().map(|r| r.capacity()) else {
            self.buffer.clear();
            return;
        };
        while let Some(item) = self.buffer.pop_front() {
            self.send(DecoderCommand::FrameAck {
                session: self.session,
                slot: (item.slot + item.cursor) % capacity,
                count: item.remaining(),
            });
        }
    }

    fn release_discarded(&mut self, capacity: usize) {
        while self.buffer.front().is_some_and(|item| item.discarded) {
            if let Some(item) = self.buffer.pop_front() {
                self.send(DecoderCommand::FrameAck {
                    session: self.session,
                    slot: (item.slot + item.cursor) % capacity,
                    count: item.remaining(),
                });
            }
        }
    }

    // =========================================================================
    // PRESENTATION
    // =========================================================================

    /// Present the next frame if one is due; returns whether a frame was shown.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(region) = self.region.clone() else {
            return false;
        };
        let capacity = region.capacity();
        self.release_discarded(capacity);

        if self.buffer.is_empty() || self.view_next_id >= self.view_show_until {
            return false;
        }
        if let Some(last) = self.last_update {
            if now.duration_since(last) < self.frame_interval() {
                return false;
            }
        }

        let total_frames = self.total_frames();
        let Some(head) = self.buffer.front_mut() else {
            return false;
        };
        let frame_id = head.current_frame;
        let slot = (head.slot + head.cursor) % capacity;
        let sample_rate = head.sample_rate;
        head.cursor += 1;
        head.current_frame = advance_frame(frame_id, sample_rate, total_frames);
        if head.remaining() == 0 {
            self.buffer.pop_front();
        }

        let shape = region.shape();
        match region
            .read_slot(slot)
            .and_then(|data| RgbImage::from_raw(shape.width, shape.height, data))
        {
            Some(image) => self.emit(PlaybackEvent::Frame { frame_id, image }),
            None => log::warn!("Slot {} does not hold a {}x{} frame", slot, shape.width, shape.height),
        }
        self.send(DecoderCommand::FrameAck {
            session: self.session,
            slot,
            count: 1,
        });

        self.view_current = Some(frame_id);
        self.view_next_id = advance_frame(frame_id, sample_rate, total_frames);
        self.last_update = Some(now);

        let margin = self.config.base_extent_pace * self.sample_rate() / 2;
        if !self.paused && self.view_subscribed.saturating_sub(self.view_next_id) < margin {
            self.play();
        }
        true
    }

    // =========================================================================
    // LOOP
    // =========================================================================

    pub fn run(
        mut self,
        intents: mpsc::Receiver<ViewIntent>,
        statuses: mpsc::Receiver<DecoderStatus>,
    ) {
        log::debug!("Playback loop started");
        let poll = Duration::from_micros(self.config.poll_interval_us);
        while !self.stopped {
            loop {
                match intents.try_recv() {
                    Ok(intent) => self.handle_intent(intent),
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        self.stop();
                        break;
                    }
                }
            }
            if self.stopped {
                break;
            }
            loop {
                match statuses.try_recv() {
                    Ok(status) => self.handle_status(status),
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        log::warn!("Decoder exited, stopping playback");
                        self.stop();
                        break;
                    }
                }
            }
            self.tick(Instant::now());
            thread::sleep(poll);
        }
        log::debug!("Playback loop exited");
    }
}

/// Run a playback controller on its own thread.
pub fn spawn_controller(
    controller: PlaybackController,
    intents: mpsc::Receiver<ViewIntent>,
    statuses: mpsc::Receiver<DecoderStatus>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("playback".to_string())
        .spawn(move || controller.run(intents, statuses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DecoderConfig;
    use crate::video::frame_source::testing::{synthetic_opener, SyntheticSource};
    use crate::video::{Decoder, FrameShape};
    use std::path::PathBuf;

    struct Harness {
        controller: PlaybackController,
        region: Arc<FrameRegion>,
        cmd_rx: mpsc::Receiver<DecoderCommand>,
        event_rx: mpsc::Receiver<PlaybackEvent>,
    }

    fn config() -> PlaybackConfig {
        PlaybackConfig {
            target_fps: 1000.0,
            ..PlaybackConfig::default()
        }
    }

    fn opened(total_frames: usize) -> Harness {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let mut controller = PlaybackController::new(config(), cmd_tx, event_tx);
        let shape = FrameShape::rgb(4, 2);
        let region = Arc::new(FrameRegion::new(shape.frame_bytes() * 16, shape).unwrap());
        controller.handle_status(DecoderStatus::OpenAck {
            session: 1,
            capacity: region.capacity(),
            frame_bytes: region.frame_bytes(),
            shape,
            region: region.clone(),
            meta: VideoMetaData::new("game.mp4", total_frames, 25.0),
        });
        Harness {
            controller,
            region,
            cmd_rx,
            event_rx,
        }
    }

    fn commands(h: &Harness) -> Vec<DecoderCommand> {
        h.cmd_rx.try_iter().collect()
    }

    fn frames(h: &Harness) -> Vec<usize> {
        h.event_rx
            .try_iter()
            .filter_map(|e| match e {
                PlaybackEvent::Frame { frame_id, .. } => Some(frame_id),
                _ => None,
            })
            .collect()
    }

    fn deliver(h: &mut Harness, start_frame: usize, sample_rate: usize, slot: usize, ids: &[usize]) {
        for (i, id) in ids.iter().enumerate() {
            h.region
                .write_slot(slot + i, &SyntheticSource::frame_bytes(h.region.shape(), *id));
        }
        h.controller.handle_status(DecoderStatus::FramesDelivered {
            session: 1,
            start_frame,
            sample_rate,
            slot,
            count: ids.len(),
            shape: h.region.shape(),
        });
    }

    fn tick_all(h: &mut Harness) {
        let mut now = Instant::now();
        for _ in 0..64 {
            now += Duration::from_millis(10);
            h.controller.tick(now);
        }
    }

    #[test]
    fn test_open_ack_confirms_and_seeks_to_start() {
        let h = opened(100);
        assert_eq!(
            commands(&h),
            vec![
                DecoderCommand::OpenAckConfirm { session: 1 },
                DecoderCommand::Seek {
                    session: 1,
                    frame_id: 0,
                    sample_rate: 1
                },
            ]
        );
        assert!(matches!(h.event_rx.try_recv(), Ok(PlaybackEvent::Opened(_))));
        assert!(h.controller.is_paused());
        assert_eq!(h.controller.view_last_to_show(), Some(0));
        assert_eq!(h.controller.view_subscribed(), 1);
    }

    #[test]
    fn test_presented_frame_is_acknowledged() {
        let mut h = opened(100);
        commands(&h);
        deliver(&mut h, 0, 1, 0, &[0]);
        assert!(h.controller.tick(Instant::now()));
        assert_eq!(frames(&h), vec![0]);
        assert_eq!(
            commands(&h),
            vec![DecoderCommand::FrameAck { session: 1, slot: 0, count: 1 }]
        );
        assert_eq!(h.controller.current_frame(), Some(0));
        assert_eq!(h.controller.view_next_id(), 1);
        // paused: nothing more is authorized
        deliver(&mut h, 1, 1, 1, &[1]);
        assert!(!h.controller.tick(Instant::now() + Duration::from_secs(1)));
    }

    #[test]
    fn test_discontinuous_delivery_is_released_immediately() {
        let mut h = opened(100);
        commands(&h);
        deliver(&mut h, 7, 1, 0, &[7, 8]);
        assert_eq!(
            commands(&h),
            vec![DecoderCommand::FrameAck { session: 1, slot: 0, count: 2 }]
        );
        h.controller.handle_status(DecoderStatus::FramesDelivered {
            session: 9,
            start_frame: 0,
            sample_rate: 1,
            slot: 2,
            count: 1,
            shape: h.region.shape(),
        });
        assert_eq!(
            commands(&h),
            vec![DecoderCommand::FrameAck { session: 9, slot: 2, count: 1 }]
        );
        tick_all(&mut h);
        assert!(frames(&h).is_empty());
    }

    #[test]
    fn test_rejected_batch_behind_queue_is_released_in_order() {
        let mut h = opened(100);
        h.controller.play();
        commands(&h);
        deliver(&mut h, 0, 1, 0, &[0, 1]);
        deliver(&mut h, 9, 1, 2, &[9]);
        assert!(commands(&h).is_empty());
        deliver(&mut h, 2, 1, 3, &[2, 3]);
        tick_all(&mut h);
        assert_eq!(frames(&h), vec![0, 1, 2, 3]);
        let acks: Vec<_> = commands(&h)
            .into_iter()
            .filter_map(|c| match c {
                DecoderCommand::FrameAck { slot, count, .. } => Some((slot, count)),
                _ => None,
            })
            .collect();
        assert_eq!(acks, vec![(0, 1), (1, 1), (2, 1), (3, 1), (4, 1)]);
    }

    #[test]
    fn test_play_requests_bounded_horizon() {
        let mut h = opened(100);
        commands(&h);
        h.controller.play();
        assert_eq!(
            commands(&h),
            vec![DecoderCommand::Read {
                session: 1,
                start: 1,
                length: 5,
                sample_rate: 1
            }]
        );
        assert_eq!(h.controller.view_subscribed(), 6);
        assert_eq!(h.controller.view_last_to_show(), Some(5));
        assert!(!h.controller.is_paused());

        // subscription never reaches past the last frame
        let mut h = opened(4);
        commands(&h);
        h.controller.play();
        assert_eq!(h.controller.view_subscribed(), 4);
    }

    #[test]
    fn test_playback_extends_subscription_on_demand() {
        let mut h = opened(100);
        h.controller.play();
        commands(&h);
        deliver(&mut h, 0, 1, 0, &[0, 1, 2, 3, 4, 5]);
        let now = Instant::now();
        for i in 0..4u64 {
            h.controller.tick(now + Duration::from_millis(10 * i));
        }
        assert_eq!(frames(&h), vec![0, 1, 2, 3]);
        let reads: Vec<_> = commands(&h)
            .into_iter()
            .filter(|c| matches!(c, DecoderCommand::Read { .. }))
            .collect();
        assert_eq!(
            reads,
            vec![DecoderCommand::Read {
                session: 1,
                start: 6,
                length: 4,
                sample_rate: 1
            }]
        );
    }

    #[test]
    fn test_seek_releases_unconsumed_slots() {
        let mut h = opened(100);
        h.controller.play();
        deliver(&mut h, 0, 1, 0, &[0, 1, 2, 3]);
        h.controller.tick(Instant::now());
        commands(&h);

        h.controller.seek(50);
        assert_eq!(
            commands(&h),
            vec![
                DecoderCommand::FrameAck { session: 1, slot: 1, count: 3 },
                DecoderCommand::Seek {
                    session: 1,
                    frame_id: 50,
                    sample_rate: 1
                },
            ]
        );
        assert_eq!(h.controller.view_next_id(), 50);
        assert_eq!(h.controller.view_subscribed(), 51);

        // in-flight batch from before the seek is stale
        deliver(&mut h, 4, 1, 4, &[4, 5]);
        assert_eq!(
            commands(&h),
            vec![DecoderCommand::FrameAck { session: 1, slot: 4, count: 2 }]
        );
        deliver(&mut h, 50, 1, 6, &[50]);
        h.controller.tick(Instant::now() + Duration::from_secs(1));
        assert_eq!(frames(&h), vec![0, 50]);
    }

    #[test]
    fn test_seek_clamps_to_last_frame() {
        let mut h = opened(30);
        commands(&h);
        h.controller.seek(500);
        assert_eq!(h.controller.view_next_id(), 29);
    }

    #[test]
    fn test_rate_change_resubscribes_and_filters_old_rate() {
        let mut h = opened(100);
        commands(&h);
        h.controller.change_play_rate(1.0);
        assert!(commands(&h).is_empty());

        h.controller.play();
        commands(&h);
        h.controller.change_play_rate(4.0);
        let cmds = commands(&h);
        assert_eq!(cmds[0], DecoderCommand::PlayRate { session: 1, sample_rate: 4 });
        assert_eq!(
            cmds[1],
            DecoderCommand::Seek {
                session: 1,
                frame_id: 0,
                sample_rate: 4
            }
        );
        assert!(!h.controller.is_paused());

        deliver(&mut h, 0, 1, 0, &[0]);
        assert_eq!(
            commands(&h),
            vec![DecoderCommand::FrameAck { session: 1, slot: 0, count: 1 }]
        );
        deliver(&mut h, 0, 4, 1, &[0, 4, 8]);
        tick_all(&mut h);
        assert_eq!(frames(&h), vec![0, 4, 8]);
    }

    #[test]
    fn test_slow_motion_stretches_interval() {
        let mut h = opened(100);
        h.controller.change_play_rate(0.5);
        assert_eq!(h.controller.sample_rate(), 1);
        assert_eq!(h.controller.frame_interval(), Duration::from_millis(2));
        h.controller.change_play_rate(3.7);
        assert_eq!(h.controller.sample_rate(), 3);
        assert_eq!(h.controller.frame_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_pause_stops_presentation() {
        let mut h = opened(100);
        h.controller.play();
        deliver(&mut h, 0, 1, 0, &[0, 1, 2, 3]);
        let now = Instant::now();
        h.controller.tick(now);
        h.controller.pause(true);
        assert_eq!(h.controller.view_last_to_show(), Some(1));
        tick_all(&mut h);
        assert_eq!(frames(&h), vec![0, 1]);

        h.controller.toggle();
        assert!(!h.controller.is_paused());
        h.controller.toggle();
        assert!(h.controller.is_paused());
        assert_eq!(h.controller.view_last_to_show(), Some(1));
    }

    #[test]
    fn test_playing_state_changes_are_reported() {
        let playing = |h: &Harness| -> Vec<bool> {
            h.event_rx
                .try_iter()
                .filter_map(|e| match e {
                    PlaybackEvent::PlayingChanged(playing) => Some(playing),
                    _ => None,
                })
                .collect()
        };

        // nothing open: play is ignored and nothing is reported
        let (cmd_tx, _cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let mut controller = PlaybackController::new(config(), cmd_tx, event_tx);
        controller.toggle();
        assert!(controller.is_paused());
        assert!(event_rx.try_iter().all(|e| !matches!(e, PlaybackEvent::PlayingChanged(_))));

        let mut h = opened(100);
        playing(&h);
        h.controller.toggle();
        h.controller.play();
        h.controller.toggle();
        h.controller.pause(true);
        assert_eq!(playing(&h), vec![true, false]);
    }

    #[test]
    fn test_forward_navigation_doubles_while_repeating() {
        let mut h = opened(1000);
        commands(&h);
        let start = Instant::now();
        let mut targets = Vec::new();
        for i in 0..6u64 {
            h.controller
                .navigate_at(Direction::Forward, start + Duration::from_millis(100 * i));
            targets.push(h.controller.view_next_id());
        }
        assert_eq!(targets, vec![1, 3, 7, 15, 31, 47]);

        // a pause longer than the repeat window resets the step
        h.controller
            .navigate_at(Direction::Forward, start + Duration::from_secs(5));
        assert_eq!(h.controller.view_next_id(), 48);
    }

    #[test]
    fn test_back_navigation_uses_fixed_step() {
        let mut h = opened(1000);
        h.controller.seek(12);
        let now = Instant::now();
        h.controller.navigate_at(Direction::Back, now);
        assert_eq!(h.controller.view_next_id(), 7);
        h.controller.navigate_at(Direction::Back, now);
        assert_eq!(h.controller.view_next_id(), 2);
        h.controller.navigate_at(Direction::Back, now);
        assert_eq!(h.controller.view_next_id(), 0);
    }

    #[test]
    fn test_stop_sends_close() {
        let mut h = opened(10);
        commands(&h);
        h.controller.handle_intent(ViewIntent::Stop);
        assert!(h.controller.is_stopped());
        assert_eq!(commands(&h), vec![DecoderCommand::Close { session: 1 }]);
        assert!(h
            .event_rx
            .try_iter()
            .any(|e| matches!(e, PlaybackEvent::Stopped)));
    }

    #[test]
    fn test_open_intent_forwards_path() {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, _event_rx) = mpsc::channel();
        let mut controller = PlaybackController::new(config(), cmd_tx, event_tx);
        controller.handle_intent(ViewIntent::Open(PathBuf::from("a.mp4")));
        assert_eq!(
            cmd_rx.try_recv().unwrap(),
            DecoderCommand::Open(PathBuf::from("a.mp4"))
        );
        controller.play();
        assert!(controller.is_paused());
    }

    /// Controller and decoder wired together and stepped by hand.
    struct Pipeline {
        controller: PlaybackController,
        decoder: Decoder,
        cmd_rx: mpsc::Receiver<DecoderCommand>,
        status_rx: mpsc::Receiver<DecoderStatus>,
        event_rx: mpsc::Receiver<PlaybackEvent>,
        _decoder_cmd_tx: mpsc::Sender<DecoderCommand>,
        now: Instant,
    }

    fn pipeline(total_frames: usize) -> Pipeline {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let (status_tx, status_rx) = mpsc::channel();
        let (decoder_cmd_tx, decoder_cmd_rx) = mpsc::channel();
        let decoder = Decoder::new(
            Box::new(synthetic_opener(total_frames)),
            &DecoderConfig {
                ring_buffer_bytes: FrameShape::rgb(4, 2).frame_bytes() * 16,
                read_batch: 3,
                poll_interval_us: 10,
            },
            decoder_cmd_rx,
            status_tx,
        );
        let mut p = Pipeline {
            controller: PlaybackController::new(config(), cmd_tx, event_tx),
            decoder,
            cmd_rx,
            status_rx,
            event_rx,
            _decoder_cmd_tx: decoder_cmd_tx,
            now: Instant::now(),
        };
        p.controller.open(PathBuf::from("v_pipeline.mp4"));
        assert_eq!(pump(&mut p, 4), vec![0]);
        p
    }

    /// Run both sides for `rounds` steps; returns the frame ids decoded from
    /// the presented images.
    fn pump(p: &mut Pipeline, rounds: usize) -> Vec<usize> {
        for _ in 0..rounds {
            while let Ok(cmd) = p.cmd_rx.try_recv() {
                p.decoder.execute(cmd).unwrap();
            }
            p.decoder.read_frames().unwrap();
            while let Ok(status) = p.status_rx.try_recv() {
                p.controller.handle_status(status);
            }
            p.now += Duration::from_millis(10);
            p.controller.tick(p.now);
        }
        p.event_rx
            .try_iter()
            .filter_map(|e| match e {
                PlaybackEvent::Frame { frame_id, image } => {
                    assert_eq!(SyntheticSource::frame_index(image.as_raw()), frame_id);
                    Some(frame_id)
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_back_to_back_seeks_present_the_last_target() {
        let mut p = pipeline(100);
        p.controller.seek(50);
        p.controller.seek(51);
        assert_eq!(pump(&mut p, 50), vec![51]);
        assert!(p.controller.is_paused());
        assert_eq!(p.controller.current_frame(), Some(51));

        // stepping forward one frame at a time while paused
        for target in 52..56 {
            p.controller.seek(target);
        }
        assert_eq!(pump(&mut p, 20), vec![55]);
    }

    #[test]
    fn test_seek_while_playing_continues_from_target() {
        let mut p = pipeline(300);
        p.controller.play();
        let before = pump(&mut p, 10);
        assert!(before.len() >= 5);
        assert!(before.windows(2).all(|w| w[1] == w[0] + 1));

        p.controller.seek(70);
        let after = pump(&mut p, 20);
        assert_eq!(after.first(), Some(&70));
        assert!(after.len() >= 10);
        assert!(after.windows(2).all(|w| w[1] == w[0] + 1));

        // a rate change re-presents the current frame, then strides
        let current = *after.last().unwrap();
        p.controller.change_play_rate(4.0);
        let fast = pump(&mut p, 30);
        assert_eq!(fast.first(), Some(&current));
        assert!(fast.len() >= 10);
        assert!(fast.windows(2).all(|w| w[1] == w[0] + 4));
    }
}
