use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "match-annotator",
    about = "Annotate and check event timelines of match videos",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Override the configuration file path
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Override the event configuration file
    #[arg(long = "events", global = true)]
    pub events: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check annotation files for consistency problems
    Check {
        /// Annotation files or directories of them
        #[arg(short = 'a', long = "annotation", required = true, num_args = 1..)]
        annotations: Vec<PathBuf>,

        /// Videos or directories searched for the video of each annotation file
        #[arg(short = 'p', long = "path", num_args = 1..)]
        videos: Vec<PathBuf>,
    },

    /// Play a video headless and log the presented frames
    Play {
        /// Input video path
        video: PathBuf,

        /// Play rate; below 1 slows down, 2 or more skips frames
        #[arg(long = "rate", default_value_t = 1.0, value_parser = parse_positive_rate)]
        rate: f64,

        /// Stop after this many presented frames
        #[arg(long = "frames")]
        frames: Option<usize>,

        /// Frame to start from
        #[arg(long = "start", default_value_t = 0)]
        start: usize,
    },

    /// Print probed metadata of a video
    Info {
        /// Input video path
        video: PathBuf,
    },
}

pub fn parse_cli() -> CliArgs {
    CliArgs::parse()
}

fn parse_positive_rate(value: &str) -> Result<f64, String> {
    let parsed = value
        .parse::<f64>()
        .map_err(|_| format!("'{value}' is not a valid number"))?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return Err("rate must be greater than 0".into());
    }
    Ok(parsed)
}
