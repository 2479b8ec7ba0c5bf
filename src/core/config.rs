use crate::checker::CheckerVocabulary;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How far one navigation press moves the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "frames")]
pub enum StepSize {
    /// Always the same number of frames.
    Fixed(usize),
    /// Doubles on every repeated press, up to `step_max`.
    Exp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Size of the shared frame region in bytes.
    pub ring_buffer_bytes: usize,
    /// Frames decoded per loop iteration.
    pub read_batch: usize,
    pub poll_interval_us: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ring_buffer_bytes: 256 * 1024 * 1024,
            read_batch: 3,
            poll_interval_us: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub target_fps: f64,
    /// Frames (times the sample rate) requested ahead of the view.
    pub base_extent_pace: usize,
    pub poll_interval_us: u64,
    pub step_back: StepSize,
    pub step_forward: StepSize,
    pub step_max: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            target_fps: 25.0,
            base_extent_pace: 6,
            poll_interval_us: 1000,
            step_back: StepSize::Fixed(5),
            step_forward: StepSize::Exp,
            step_max: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Event configuration file; the built-in set is used when absent.
    pub event_config: Option<PathBuf>,
    pub annotation_directory: PathBuf,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub decoder: DecoderConfig,
    pub playback: PlaybackConfig,
    /// Names the consistency rules look for.
    pub checker: CheckerVocabulary,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            event_config: None,
            annotation_directory: PathBuf::from("./dataset/annotate"),
            ffmpeg_path: None,
            ffprobe_path: None,
            decoder: DecoderConfig::default(),
            playback: PlaybackConfig::default(),
            checker: CheckerVocabulary::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path).map_err(|e| {
                anyhow::anyhow!("Failed to read config file at {}: {}", config_path.display(), e)
            })?;

            match serde_json::from_str::<Self>(&content) {
                Ok(config) => {
                    log::info!("Loaded existing config from {}", config_path.display());
                    Ok(config)
                }
                Err(e) => {
                    log::warn!("Config file exists but has issues ({}), creating new one with defaults", e);
                    let new_config = Self::default();
                    new_config
                        .save_to(config_path)
                        .map_err(|save_err| anyhow::anyhow!("Failed to save new config: {}", save_err))?;
                    Ok(new_config)
                }
            }
        } else {
            log::info!("No config file found, creating default config");
            let config = Self::default();
            config
                .save_to(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to save default config: {}", e))?;
            log::info!("Created new config file at {}", config_path.display());
            Ok(config)
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("match-annotator")
            .join("config.json")
    }

    /// Annotation file belonging to `video`: `<annotation_directory>/<stem>.txt`.
    pub fn annotation_path(&self, video: &Path) -> PathBuf {
        let name = crate::core::video_name(video);
        self.annotation_directory.join(format!("{}.txt", name))
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Err(e) = std::fs::create_dir_all(&self.annotation_directory) {
            log::error!(
                "Failed to create annotation directory {}: {}",
                self.annotation_directory.display(),
                e
            );
            return Err(anyhow::anyhow!(
                "Failed to create annotation directory {}: {}",
                self.annotation_directory.display(),
                e
            ));
        }
        log::debug!("Annotation directory ensured: {}", self.annotation_directory.display());
        Ok(())
    }
}
