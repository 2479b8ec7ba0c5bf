// =============================================================================
// CONSISTENCY CHECKER
// =============================================================================
//
// Offline validation of a finished annotation set. Every rule runs and adds
// its own messages; nothing here fails the run.
//
// =============================================================================

pub mod vocabulary;

pub use vocabulary::CheckerVocabulary;

use crate::core::{sorted_annotations, Annotation, AnnotationError, AnnotationManager, EventConfig, VideoMetaData};
use std::path::{Path, PathBuf};

/// Frame rate the dataset is recorded at.
pub const EXPECTED_FPS: f64 = 25.0;

/// File extensions considered when looking up the video of an annotation file.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "flv", "webm", "ts"];

/// Run every rule with the built-in vocabulary.
pub fn check(manager: &AnnotationManager, video_meta: Option<&VideoMetaData>) -> Vec<String> {
    check_with(&CheckerVocabulary::default(), manager, video_meta)
}

pub fn check_with(
    vocab: &CheckerVocabulary,
    manager: &AnnotationManager,
    video_meta: Option<&VideoMetaData>,
) -> Vec<String> {
    let mut errs = Vec::new();

    if let Some(meta) = video_meta {
        if meta.fps != EXPECTED_FPS {
            errs.push(format!("Warning: video is {:.3} fps, not {}", meta.fps, EXPECTED_FPS));
        }
    }
    let total_frames = video_meta.map(|m| m.total_frames);

    let change = sorted_annotations(manager.annotations(&vocab.change_group));
    let replay = sorted_annotations(manager.annotations(&vocab.replay_group));
    let camera = sorted_annotations(manager.annotations(&vocab.camera_group));

    errs.extend(check_partition(&vocab.change_group, &change, total_frames));

    for (group_name, annotations) in [(&vocab.replay_group, &replay), (&vocab.camera_group, &camera)] {
        for event_name in event_names(manager, group_name, annotations) {
            let same: Vec<Annotation> = annotations
                .iter()
                .filter(|a| a.event_name == event_name)
                .cloned()
                .collect();
            errs.extend(check_non_overlap(group_name, &same));
        }
    }

    let zoom_in = named(&camera, &vocab.zoom_in);
    let zoom_out = named(&camera, &vocab.zoom_out);
    let viewpoints = named(&camera, &vocab.viewpoint_switch);
    let switches = named(&change, &vocab.switch);

    errs.extend(check_mutual_exclusion(&zoom_in, &zoom_out));
    errs.extend(check_viewpoint_switches(&viewpoints, &change, &camera));
    errs.extend(check_replay_containment(&replay, &switches));

    errs.extend(check_switch_camera(&switches, &camera, &change));
    errs.extend(check_adjacent_switches(&switches));

    errs
}

fn named(annotations: &[Annotation], name: &str) -> Vec<Annotation> {
    annotations
        .iter()
        .filter(|a| a.event_name == name)
        .cloned()
        .collect()
}

/// Declared event names of a group, falling back to the names present.
fn event_names(manager: &AnnotationManager, group_name: &str, annotations: &[Annotation]) -> Vec<String> {
    match manager.group(group_name) {
        Some(group) => group.event_names.clone(),
        None => {
            let mut names: Vec<String> = Vec::new();
            for a in annotations {
                if !names.contains(&a.event_name) {
                    names.push(a.event_name.clone());
                }
            }
            names
        }
    }
}

// =============================================================================
// RULES
// =============================================================================

/// Sorted intervals must start at 0, follow each other without gaps or
/// overlaps and end on the last frame.
pub fn check_partition(group_name: &str, annotations: &[Annotation], total_frames: Option<usize>) -> Vec<String> {
    let mut errs = Vec::new();
    let Some(first) = annotations.first() else {
        if total_frames.is_some_and(|n| n > 0) {
            errs.push(format!("{}: annotations do not cover the whole video", group_name));
        }
        return errs;
    };
    if first.f0 != 0 {
        errs.push(format!("{}: {} should start at frame 0", group_name, first));
        return errs;
    }
    for pair in annotations.windows(2) {
        if pair[0].f1.checked_add(1) != Some(pair[1].f0) {
            errs.push(format!("{}: {} and {} are not contiguous", group_name, pair[0], pair[1]));
            return errs;
        }
    }
    if let (Some(total), Some(last)) = (total_frames, annotations.last()) {
        if last.f1.checked_add(1) != Some(total) {
            errs.push(format!(
                "{}: annotations do not cover the whole video ({} ends at {}, video has {} frames)",
                group_name, last, last.f1, total
            ));
        }
    }
    errs
}

/// Sorted intervals of one event must each start after the previous one ends.
pub fn check_non_overlap(group_name: &str, annotations: &[Annotation]) -> Vec<String> {
    annotations
        .windows(2)
        .filter(|pair| pair[1].f0 <= pair[0].f1)
        .map(|pair| format!("{}: {} and {} overlap", group_name, pair[0], pair[1]))
        .collect()
}

/// Reports the first conflicting partner of every annotation in `first`.
pub fn check_mutual_exclusion(first: &[Annotation], second: &[Annotation]) -> Vec<String> {
    first
        .iter()
        .filter_map(|a| {
            second
                .iter()
                .find(|b| a.overlap(b))
                .map(|b| format!("{} and {} overlap", a, b))
        })
        .collect()
}

pub fn check_viewpoint_switches(
    viewpoints: &[Annotation],
    change: &[Annotation],
    camera: &[Annotation],
) -> Vec<String> {
    let mut errs = Vec::new();
    for vp in viewpoints {
        if vp.f0 != vp.f1 {
            errs.push(format!("{} is longer than one frame", vp));
            continue;
        }
        for ann in change.iter().chain(camera.iter()) {
            if ann.f0 == vp.f0 {
                continue;
            }
            if ann.f0 < vp.f0 && vp.f0 <= ann.f1 {
                errs.push(format!("{} cuts {}", vp, ann));
            }
        }
    }
    errs
}

/// A replay either holds a switch completely or stays clear of it.
pub fn check_replay_containment(replays: &[Annotation], switches: &[Annotation]) -> Vec<String> {
    let mut errs = Vec::new();
    for r in replays {
        for s in switches {
            if r.overlap(s) && !r.contain(s) {
                errs.push(format!("{} partially overlaps {}", r, s));
            }
        }
    }
    errs
}

/// A switch may only overlap a camera annotation that lines up with it.
///
/// A boundary of the switch may be pushed out by one frame when a zero-length
/// change event sits right next to it on that side.
pub fn check_switch_camera(switches: &[Annotation], camera: &[Annotation], change: &[Annotation]) -> Vec<String> {
    let single_frame_at = |frame: usize| change.iter().any(|a| a.f0 == a.f1 && a.f0 == frame);

    let mut errs = Vec::new();
    for s in switches {
        let extended_start = s.f0.checked_sub(1).filter(|&f| single_frame_at(f));
        let extended_end = s.f1.checked_add(1).filter(|&f| single_frame_at(f));
        for c in camera {
            if !s.overlap(c) || s.equal(c) {
                continue;
            }
            let start_aligned = c.f0 == s.f0 || Some(c.f0) == extended_start;
            let end_aligned = c.f1 == s.f1 || Some(c.f1) == extended_end;
            if !(start_aligned && end_aligned) {
                errs.push(format!("{} overlaps {}", s, c));
            }
        }
    }
    errs
}

pub fn check_adjacent_switches(switches: &[Annotation]) -> Vec<String> {
    let mut errs = Vec::new();
    for (i, a) in switches.iter().enumerate() {
        for (j, b) in switches.iter().enumerate() {
            if i != j && a.f1.checked_add(1) == Some(b.f0) {
                errs.push(format!("{} and {} are adjacent switches", a, b));
            }
        }
    }
    errs
}

// =============================================================================
// FILES
// =============================================================================

/// Load `annotation_path` against `events` and check it.
pub fn check_from_file(
    annotation_path: &Path,
    video_meta: Option<&VideoMetaData>,
    events: EventConfig,
    vocab: &CheckerVocabulary,
) -> Result<Vec<String>, AnnotationError> {
    let mut manager = AnnotationManager::new(events);
    manager.load(annotation_path)?;
    Ok(check_with(vocab, &manager, video_meta))
}

/// Expand directories into the `.txt` annotation files they hold.
pub fn collect_annotation_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            match std::fs::read_dir(path) {
                Ok(entries) => {
                    let mut found: Vec<PathBuf> = entries
                        .filter_map(|e| e.ok().map(|e| e.path()))
                        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "txt"))
                        .collect();
                    found.sort();
                    files.extend(found);
                }
                Err(e) => log::warn!("Cannot read directory {}: {}", path.display(), e),
            }
        } else {
            files.push(path.clone());
        }
    }
    files
}

/// Find the video named `name` among files and directories in `search`.
pub fn resolve_video(name: &str, search: &[PathBuf]) -> Option<PathBuf> {
    let is_match = |p: &Path| {
        crate::core::video_name(p) == name
            && p
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
    };
    for path in search {
        if path.is_dir() {
            let Ok(entries) = std::fs::read_dir(path) else {
                continue;
            };
            let mut found: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_match(p))
                .collect();
            found.sort();
            if let Some(video) = found.into_iter().next() {
                return Some(video);
            }
        } else if is_match(path) {
            return Some(path.clone());
        }
    }
    None
}
