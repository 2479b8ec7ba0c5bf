use crate::video::FrameShape;
use anyhow::Context;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

/// Stream facts read with ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub total_frames: usize,
    pub fps: f64,
}

/// Sequential frame reader the decoder pulls from.
pub trait FrameSource: Send {
    fn shape(&self) -> FrameShape;

    fn total_frames(&self) -> usize;

    fn fps(&self) -> f64;

    /// Position the source so the next `read_frame` returns `frame_id`.
    fn seek(&mut self, frame_id: usize) -> anyhow::Result<()>;

    /// Next frame's bytes, or `None` at end of stream or on a read failure.
    fn read_frame(&mut self) -> Option<Vec<u8>>;
}

/// Opens a [`FrameSource`] for a path; the decoder calls this on every `Open`.
pub trait SourceOpener: Send {
    fn open(&self, path: &Path) -> anyhow::Result<Box<dyn FrameSource>>;
}

impl<F> SourceOpener for F
where
    F: Fn(&Path) -> anyhow::Result<Box<dyn FrameSource>> + Send,
{
    fn open(&self, path: &Path) -> anyhow::Result<Box<dyn FrameSource>> {
        self(path)
    }
}

fn parse_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den != 0.0 {
                Some(num / den)
            } else {
                None
            }
        }
        None => rate.trim().parse().ok(),
    }
}

/// Read width, height, frame count and frame rate of the first video stream.
pub fn probe_video(path: &Path, ffprobe: Option<&Path>) -> anyhow::Result<VideoProbe> {
    let output = Command::new(ffprobe.unwrap_or(Path::new("ffprobe")))
        .arg("-v").arg("quiet")
        .arg("-print_format").arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg("-select_streams").arg("v:0")
        .arg(path)
        .output()
        .context("failed to run ffprobe")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
    }

    let json_str = String::from_utf8(output.stdout)?;
    let info: serde_json::Value = serde_json::from_str(&json_str)?;
    let stream = &info["streams"][0];

    let width = stream["width"].as_u64().unwrap_or(0) as u32;
    let height = stream["height"].as_u64().unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(anyhow::anyhow!("No video stream in {}", path.display()));
    }

    let fps = stream["r_frame_rate"]
        .as_str()
        .and_then(parse_rate)
        .or_else(|| stream["avg_frame_rate"].as_str().and_then(parse_rate))
        .filter(|fps| *fps > 0.0)
        .ok_or_else(|| anyhow::anyhow!("Unknown frame rate for {}", path.display()))?;

    let total_frames = match stream["nb_frames"].as_str().and_then(|s| s.parse::<usize>().ok()) {
        Some(n) => n,
        None => {
            let duration = stream["duration"]
                .as_str()
                .or_else(|| info["format"]["duration"].as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0);
            (duration * fps).round() as usize
        }
    };

    Ok(VideoProbe {
        width,
        height,
        total_frames,
        fps,
    })
}

/// Decodes raw RGB frames from an ffmpeg child process.
pub struct FfmpegSource {
    path: PathBuf,
    ffmpeg: PathBuf,
    probe: VideoProbe,
    process: Option<Child>,
    stdout: Option<ChildStdout>,
}

impl FfmpegSource {
    pub fn open(path: &Path, ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> anyhow::Result<Self> {
        let probe = probe_video(path, ffprobe)?;
        log::info!(
            "Probed {}: {}x{}, {} frames at {:.3} fps",
            path.display(),
            probe.width,
            probe.height,
            probe.total_frames,
            probe.fps
        );
        let mut source = Self {
            path: path.to_path_buf(),
            ffmpeg: ffmpeg.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("ffmpeg")),
            probe,
            process: None,
            stdout: None,
        };
        source.spawn_at(0)?;
        Ok(source)
    }

    fn spawn_at(&mut self, frame_id: usize) -> anyhow::Result<()> {
        self.kill();

        let start_time = frame_id as f64 / self.probe.fps;
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-ss").arg(format!("{:.3}", start_time));
        cmd.arg("-i").arg(&self.path);
        cmd.arg("-map").arg("0:v:0");
        cmd.arg("-f").arg("rawvideo");
        cmd.arg("-pix_fmt").arg("rgb24");
        cmd.arg("-loglevel").arg("error");
        cmd.arg("-nostdin");
        cmd.arg("pipe:1");
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        let mut process = cmd.spawn().context("failed to spawn ffmpeg")?;
        self.stdout = process.stdout.take();
        self.process = Some(process);
        log::debug!("Spawned ffmpeg for {} at frame {}", self.path.display(), frame_id);
        Ok(())
    }

    fn kill(&mut self) {
        self.stdout = None;
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

impl FrameSource for FfmpegSource {
    fn shape(&self) -> FrameShape {
        FrameShape::rgb(self.probe.width, self.probe.height)
    }

    fn total_frames(&self) -> usize {
        self.probe.total_frames
    }

    fn fps(&self) -> f64 {
        self.probe.fps
    }

    fn seek(&mut self, frame_id: usize) -> anyhow::Result<()> {
        self.spawn_at(frame_id)
    }

    fn read_frame(&mut self) -> Option<Vec<u8>> {
        let mut buffer = vec![0u8; self.shape().frame_bytes()];
        let stdout = self.stdout.as_mut()?;
        match stdout.read_exact(&mut buffer) {
            Ok(()) => Some(buffer),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    log::debug!("Video reader error: {}", e);
                }
                None
            }
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Opens every path through ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct FfmpegOpener {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
}

impl SourceOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> anyhow::Result<Box<dyn FrameSource>> {
        let source = FfmpegSource::open(path, self.ffmpeg.as_deref(), self.ffprobe.as_deref())?;
        Ok(Box::new(source))
    }
}
