use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Wall-clock position inside a video, whole seconds only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeStamp {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl TimeStamp {
    pub fn new(hour: u32, minute: u32, second: u32) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    pub fn from_seconds(total: u64) -> Self {
        Self {
            hour: (total / 3600) as u32,
            minute: ((total % 3600) / 60) as u32,
            second: (total % 60) as u32,
        }
    }

    pub fn to_seconds(&self) -> u64 {
        self.hour as u64 * 3600 + self.minute as u64 * 60 + self.second as u64
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

impl FromStr for TimeStamp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 {
            return Err(anyhow::anyhow!("Timestamp must be HH:MM:SS, got {:?}", s));
        }
        let hour = parts[0].parse()?;
        let minute = parts[1].parse()?;
        let second = parts[2].parse()?;
        Ok(Self::new(hour, minute, second))
    }
}

/// Static facts about the currently opened video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetaData {
    pub path: PathBuf,
    pub name: String,
    pub total_frames: usize,
    pub fps: f64,
}

impl VideoMetaData {
    pub fn new(path: impl Into<PathBuf>, total_frames: usize, fps: f64) -> Self {
        let path = path.into();
        let name = video_name(&path);
        Self {
            path,
            name,
            total_frames,
            fps,
        }
    }

    /// Probe a video file with ffprobe.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let probe = crate::video::probe_video(path, None)?;
        Ok(Self::new(path, probe.total_frames, probe.fps))
    }

    /// Time at which frame `frame_id` has finished showing.
    ///
    /// Uses `(frame_id + 1) / fps`, rounded to the nearest second.
    pub fn frame_to_time(&self, frame_id: usize) -> TimeStamp {
        let seconds = ((frame_id as f64 + 1.0) / self.fps).round();
        TimeStamp::from_seconds(seconds.max(0.0) as u64)
    }

    pub fn time_to_frame(&self, ts: TimeStamp) -> usize {
        (ts.to_seconds() as f64 * self.fps).round() as usize
    }

    pub fn last_frame(&self) -> Option<usize> {
        self.total_frames.checked_sub(1)
    }

    pub fn clamp_frame(&self, frame_id: i64) -> usize {
        let last = self.last_frame().unwrap_or(0) as i64;
        frame_id.clamp(0, last) as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.fps > 0.0 {
            self.total_frames as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Logical name of a video: its file stem.
pub fn video_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Frame delivered after `frame_id` when sampling every `stride` frames.
///
/// The terminal frame is never skipped: a stride that would jump past it lands
/// on it instead. Stepping from the terminal frame leaves the video.
pub fn advance_frame(frame_id: usize, stride: usize, total_frames: usize) -> usize {
    let last = total_frames.saturating_sub(1);
    if frame_id >= last {
        frame_id + stride
    } else {
        (frame_id + stride).min(last)
    }
}
