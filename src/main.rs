use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use match_annotator::checker::{self, collect_annotation_files, resolve_video};
use match_annotator::cli::{parse_cli, CliArgs, Command};
use match_annotator::core::{video_name, AppConfig, EventConfig, TimeStamp, VideoMetaData};
use match_annotator::video::{probe_video, MediaPlayer, PlaybackEvent};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_cli();
    let config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    match &args.command {
        Command::Check {
            annotations,
            videos,
        } => run_check(&args, &config, annotations, videos).await,
        Command::Play {
            video,
            rate,
            frames,
            start,
        } => {
            let video = video.clone();
            let (rate, frames, start) = (*rate, *frames, *start);
            tokio::task::spawn_blocking(move || run_play(&config, video, rate, frames, start))
                .await
                .context("playback task panicked")?
        }
        Command::Info { video } => run_info(&config, video),
    }
}

fn event_config(args: &CliArgs, config: &AppConfig) -> anyhow::Result<EventConfig> {
    let path = args.events.as_ref().or(config.event_config.as_ref());
    Ok(EventConfig::load(path.map(PathBuf::as_path))?)
}

async fn run_check(
    args: &CliArgs,
    config: &AppConfig,
    annotations: &[PathBuf],
    videos: &[PathBuf],
) -> anyhow::Result<()> {
    let events = event_config(args, config)?;
    let files = collect_annotation_files(annotations);
    if files.is_empty() {
        return Err(anyhow::anyhow!("No annotation files found"));
    }

    // Probe every matched video in the background before checking
    let mut probes = Vec::with_capacity(files.len());
    for file in &files {
        let video = resolve_video(&video_name(file), videos);
        let ffprobe = config.ffprobe_path.clone();
        probes.push(tokio::task::spawn_blocking(move || {
            let path = video?;
            log::debug!("Loading video info for: {}", path.display());
            match probe_video(&path, ffprobe.as_deref()) {
                Ok(probe) => Some(VideoMetaData::new(&path, probe.total_frames, probe.fps)),
                Err(e) => {
                    log::warn!("Failed to probe {}: {:#}", path.display(), e);
                    None
                }
            }
        }));
    }

    for (file, probe) in files.iter().zip(probes) {
        let meta = probe.await.context("probe task panicked")?;
        println!("{}", file.display());
        match checker::check_from_file(file, meta.as_ref(), events.clone(), &config.checker) {
            Ok(errs) if errs.is_empty() => println!("No problem"),
            Ok(errs) => {
                for err in errs {
                    println!("{}", err);
                }
            }
            Err(e) => {
                log::error!("Failed to load {}: {}", file.display(), e);
                println!("Cannot load annotations: {}", e);
            }
        }
    }
    Ok(())
}

fn run_play(
    config: &AppConfig,
    video: PathBuf,
    rate: f64,
    frames: Option<usize>,
    start: usize,
) -> anyhow::Result<()> {
    let mut player = MediaPlayer::new(config)?;
    player.set_play_rate(rate);
    player.open(video.clone());

    let meta = loop {
        match player.recv_event_timeout(Duration::from_secs(10)) {
            Some(PlaybackEvent::Opened(meta)) => break meta,
            Some(PlaybackEvent::OpenFailed { reason, .. }) => {
                return Err(anyhow::anyhow!("Failed to open {}: {}", video.display(), reason));
            }
            Some(_) => {}
            None => return Err(anyhow::anyhow!("Timed out opening {}", video.display())),
        }
    };
    log::info!(
        "{}: {} frames at {:.3} fps, playing at {}x",
        meta.name,
        meta.total_frames,
        meta.fps,
        rate
    );

    if start > 0 {
        player.seek(start);
    }
    player.play();

    let last_frame = meta.last_frame().unwrap_or(0);
    let mut presented = 0usize;
    while let Some(event) = player.recv_event_timeout(Duration::from_secs(5)) {
        match event {
            PlaybackEvent::Frame { frame_id, image } => {
                presented += 1;
                log::info!(
                    "frame {} ({}x{}) at {}",
                    frame_id,
                    image.width(),
                    image.height(),
                    meta.frame_to_time(frame_id)
                );
                if frame_id >= last_frame || frames.is_some_and(|n| presented >= n) {
                    break;
                }
            }
            PlaybackEvent::Stopped => break,
            _ => {}
        }
    }
    player.stop();
    println!("Presented {} frames", presented);
    Ok(())
}

fn run_info(config: &AppConfig, video: &Path) -> anyhow::Result<()> {
    let probe = probe_video(video, config.ffprobe_path.as_deref())?;
    let meta = VideoMetaData::new(video, probe.total_frames, probe.fps);
    println!("name:     {}", meta.name);
    println!("size:     {}x{}", probe.width, probe.height);
    println!("frames:   {}", meta.total_frames);
    println!("fps:      {:.3}", meta.fps);
    println!(
        "duration: {}",
        TimeStamp::from_seconds(meta.duration_seconds().round() as u64)
    );
    println!("annotations: {}", config.annotation_path(video).display());
    Ok(())
}
