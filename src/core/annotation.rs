use crate::core::{AnnotationError, EventConfig, EventGroup, EventType};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// One marked event over the inclusive frame range `[f0, f1]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Annotation {
    pub event_name: String,
    pub event_type: EventType,
    pub f0: usize,
    pub f1: usize,
}

impl Annotation {
    pub fn new(event_name: impl Into<String>, event_type: EventType, f0: usize, f1: usize) -> Self {
        Self {
            event_name: event_name.into(),
            event_type,
            f0,
            f1,
        }
    }

    /// True when either range's end frame lies inside the other range.
    pub fn overlap(&self, other: &Annotation) -> bool {
        (self.f1 >= other.f0 && self.f1 <= other.f1) || (other.f1 >= self.f0 && other.f1 <= self.f1)
    }

    pub fn contain(&self, other: &Annotation) -> bool {
        self.f0 <= other.f0 && self.f1 >= other.f1
    }

    pub fn equal(&self, other: &Annotation) -> bool {
        self.contain(other) && other.contain(self)
    }

    pub fn spans(&self, frame_id: usize) -> bool {
        self.f0 <= frame_id && frame_id <= self.f1
    }

    pub fn as_tuple(&self) -> (String, usize, usize) {
        (self.event_name.clone(), self.f0, self.f1)
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.event_name, self.f0, self.f1)
    }
}

/// Stable sort by `(f0, f1)` ascending.
pub fn sort_annotations(annotations: &mut [Annotation]) {
    annotations.sort_by_key(|a| (a.f0, a.f1));
}

pub fn sorted_annotations(annotations: &[Annotation]) -> Vec<Annotation> {
    let mut sorted = annotations.to_vec();
    sort_annotations(&mut sorted);
    sorted
}

/// Button state of a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Idle,
    Pending(usize),
}

/// What an activation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// An interval was opened at this frame.
    Pending(usize),
    /// A new annotation was appended at `index` of `group`.
    Created { group: String, index: usize },
    /// The interval would end before it started; still pending.
    Rejected,
}

/// Owns every annotation of the open video, grouped by event group.
#[derive(Debug, Clone)]
pub struct AnnotationManager {
    event_groups: Vec<EventGroup>,
    annotations: HashMap<String, Vec<Annotation>>,
    comments: BTreeMap<String, String>,
    pending: HashMap<String, usize>,
    dirty: bool,
}

impl AnnotationManager {
    pub fn new(config: EventConfig) -> Self {
        let annotations = config
            .groups
            .iter()
            .map(|g| (g.group_name.clone(), Vec::new()))
            .collect();
        Self {
            event_groups: config.groups,
            annotations,
            comments: BTreeMap::new(),
            pending: HashMap::new(),
            dirty: false,
        }
    }

    // =========================================================================
    // LOOKUPS
    // =========================================================================

    pub fn event_groups(&self) -> &[EventGroup] {
        &self.event_groups
    }

    pub fn group(&self, group_name: &str) -> Option<&EventGroup> {
        self.event_groups.iter().find(|g| g.group_name == group_name)
    }

    pub fn annotations(&self, group_name: &str) -> &[Annotation] {
        self.annotations
            .get(group_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_events(&self) -> Vec<&str> {
        self.event_groups
            .iter()
            .flat_map(|g| g.event_names.iter().map(String::as_str))
            .collect()
    }

    pub fn event_group_of(&self, event_name: &str) -> Result<&EventGroup, AnnotationError> {
        self.event_groups
            .iter()
            .find(|g| g.has(event_name))
            .ok_or_else(|| AnnotationError::UnknownEvent(event_name.to_string()))
    }

    pub fn event_type(&self, event_name: &str) -> Result<EventType, AnnotationError> {
        let group = self.event_group_of(event_name)?;
        group
            .get_type(event_name)
            .ok_or_else(|| AnnotationError::UnknownEvent(event_name.to_string()))
    }

    pub fn event_allow_overlap(&self, event_name: &str) -> Result<bool, AnnotationError> {
        Ok(self.event_group_of(event_name)?.allow_overlap)
    }

    /// Group names bucketed by display table, both in declaration order.
    pub fn tables(&self) -> Vec<(i64, Vec<&str>)> {
        let mut tables: Vec<(i64, Vec<&str>)> = Vec::new();
        for group in &self.event_groups {
            match tables.iter_mut().find(|(id, _)| *id == group.table_id) {
                Some((_, names)) => names.push(&group.group_name),
                None => tables.push((group.table_id, vec![&group.group_name])),
            }
        }
        tables
    }

    pub fn comments(&self) -> &BTreeMap<String, String> {
        &self.comments
    }

    pub fn set_comment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.comments.insert(key.into(), value.into());
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// `(event_name, f0, f1)` per group, in group declaration order.
    pub fn tuples(&self) -> Vec<(String, Vec<(String, usize, usize)>)> {
        self.event_groups
            .iter()
            .map(|g| {
                let list = self
                    .annotations(&g.group_name)
                    .iter()
                    .map(Annotation::as_tuple)
                    .collect();
                (g.group_name.clone(), list)
            })
            .collect()
    }

    // =========================================================================
    // EDITING
    // =========================================================================

    /// Append an annotation; returns its group and row index.
    pub fn add(
        &mut self,
        event_name: &str,
        f0: usize,
        f1: usize,
    ) -> Result<(String, usize), AnnotationError> {
        let group = self.event_group_of(event_name)?;
        let group_name = group.group_name.clone();
        let event_type = group
            .get_type(event_name)
            .ok_or_else(|| AnnotationError::UnknownEvent(event_name.to_string()))?;
        if !event_type.accepts(f0, f1) {
            return Err(AnnotationError::InvalidBounds {
                event: event_name.to_string(),
                f0,
                f1,
            });
        }

        let list = self.annotations.entry(group_name.clone()).or_default();
        list.push(Annotation::new(event_name, event_type, f0, f1));
        self.dirty = true;
        Ok((group_name, list.len() - 1))
    }

    /// Change the bounds of row `index`.
    ///
    /// The row must still hold `event_name`, otherwise the caller is working from a
    /// stale view. Bounds that do not fit the event type are dropped silently and
    /// `Ok(false)` is returned.
    pub fn modify(
        &mut self,
        group_name: &str,
        index: usize,
        event_name: &str,
        f0: usize,
        f1: usize,
    ) -> Result<bool, AnnotationError> {
        let list = self
            .annotations
            .get_mut(group_name)
            .ok_or_else(|| AnnotationError::UnknownGroup(group_name.to_string()))?;
        let stale = || AnnotationError::StaleReference {
            group: group_name.to_string(),
            index,
            expected: event_name.to_string(),
        };
        let ann = list.get_mut(index).ok_or_else(stale)?;
        if ann.event_name != event_name {
            return Err(stale());
        }

        if !ann.event_type.accepts(f0, f1) {
            log::debug!("Ignoring edit of {} to {}..={}", ann, f0, f1);
            return Ok(false);
        }
        ann.f0 = f0;
        ann.f1 = f1;
        self.dirty = true;
        Ok(true)
    }

    /// Remove the given rows of one group; returns how many were removed.
    pub fn remove(&mut self, group_name: &str, indices: &[usize]) -> Result<usize, AnnotationError> {
        let list = self
            .annotations
            .get_mut(group_name)
            .ok_or_else(|| AnnotationError::UnknownGroup(group_name.to_string()))?;
        let to_remove: HashSet<usize> = indices.iter().copied().collect();
        let before = list.len();
        let mut i = 0;
        list.retain(|_| {
            let keep = !to_remove.contains(&i);
            i += 1;
            keep
        });
        let removed = before - list.len();
        if removed > 0 {
            self.dirty = true;
        }
        Ok(removed)
    }

    pub fn sort(&mut self) {
        for list in self.annotations.values_mut() {
            sort_annotations(list);
        }
    }

    /// Forget every annotation, comment and pending interval.
    pub fn clear(&mut self) {
        for list in self.annotations.values_mut() {
            list.clear();
        }
        self.comments.clear();
        self.pending.clear();
        self.dirty = false;
    }

    // =========================================================================
    // ACTIVATION STATE MACHINE
    // =========================================================================

    pub fn action_state(&self, event_name: &str) -> ActionState {
        match self.pending.get(event_name) {
            Some(start) => ActionState::Pending(*start),
            None => ActionState::Idle,
        }
    }

    /// Press the button of `event_name` while `frame_id` is shown.
    pub fn activate(&mut self, event_name: &str, frame_id: usize) -> Result<Activation, AnnotationError> {
        match self.event_type(event_name)? {
            EventType::Shot => {
                let (group, index) = self.add(event_name, frame_id, frame_id)?;
                Ok(Activation::Created { group, index })
            }
            EventType::Interval => match self.pending.get(event_name).copied() {
                None => {
                    self.pending.insert(event_name.to_string(), frame_id);
                    Ok(Activation::Pending(frame_id))
                }
                Some(start) if start <= frame_id => {
                    self.pending.remove(event_name);
                    let (group, index) = self.add(event_name, start, frame_id)?;
                    Ok(Activation::Created { group, index })
                }
                Some(start) => {
                    log::debug!(
                        "Rejecting {} ending at {} before its start {}",
                        event_name,
                        frame_id,
                        start
                    );
                    Ok(Activation::Rejected)
                }
            },
        }
    }

    /// Drop a pending interval; returns whether one was pending.
    pub fn cancel(&mut self, event_name: &str) -> bool {
        self.pending.remove(event_name).is_some()
    }

    /// Events that must not be activated while `frame_id` is shown.
    ///
    /// An event is disabled when one of its own annotations spans the frame, or
    /// when its group forbids overlap and a sibling event spans the frame or is
    /// pending.
    pub fn disabled_events(&self, frame_id: usize) -> HashSet<String> {
        let mut disabled = HashSet::new();
        for group in &self.event_groups {
            let spanning: HashSet<&str> = self
                .annotations(&group.group_name)
                .iter()
                .filter(|a| a.spans(frame_id))
                .map(|a| a.event_name.as_str())
                .collect();
            disabled.extend(spanning.iter().map(|s| s.to_string()));

            if group.allow_overlap {
                continue;
            }
            let pending: Vec<&str> = group
                .event_names
                .iter()
                .filter(|n| self.pending.contains_key(n.as_str()))
                .map(String::as_str)
                .collect();
            for name in &group.event_names {
                let blocked_by_sibling = spanning
                    .iter()
                    .chain(pending.iter())
                    .any(|other| *other != name.as_str());
                if blocked_by_sibling {
                    disabled.insert(name.clone());
                }
            }
        }
        disabled
    }

    // =========================================================================
    // VALIDATION AND PERSISTENCE
    // =========================================================================

    /// Whether any non-overlapping group holds two overlapping annotations.
    pub fn check_overlap_conflict(&self) -> bool {
        self.event_groups
            .iter()
            .filter(|g| !g.allow_overlap)
            .any(|g| {
                let anns = self.annotations(&g.group_name);
                anns.iter()
                    .enumerate()
                    .any(|(i, a)| anns[i + 1..].iter().any(|b| a.overlap(b)))
            })
    }

    /// Render the file contents: comment block, then one line per annotation.
    pub fn to_file_string(&self) -> String {
        let mut content = String::new();
        for (key, value) in &self.comments {
            content.push_str(&format!("# {}: {}\n", key, value));
        }
        for group in &self.event_groups {
            for ann in self.annotations(&group.group_name) {
                content.push_str(&format!("{}\n", ann));
            }
        }
        content
    }

    /// Replace all state with the contents of an annotation file.
    ///
    /// Lines naming unknown events or carrying malformed bounds are skipped.
    pub fn parse_annotations(&mut self, content: &str) {
        self.clear();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix('#') {
                match comment.split_once(':') {
                    Some((key, value)) => {
                        self.comments
                            .insert(key.trim().to_string(), value.trim().to_string());
                    }
                    None => log::warn!("Skipping comment without key on line {}", line_no + 1),
                }
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let parsed = match fields.as_slice() {
                [name, f0, f1] => match (f0.parse::<usize>(), f1.parse::<usize>()) {
                    (Ok(f0), Ok(f1)) => Some((*name, f0, f1)),
                    _ => None,
                },
                _ => None,
            };
            match parsed {
                Some((name, f0, f1)) => {
                    if let Err(e) = self.add(name, f0, f1) {
                        log::warn!("Skipping line {}: {}", line_no + 1, e);
                    }
                }
                None => log::warn!("Skipping malformed line {}: {:?}", line_no + 1, line),
            }
        }
        self.dirty = false;
    }

    pub fn load(&mut self, path: &Path) -> Result<(), AnnotationError> {
        let content = std::fs::read_to_string(path).map_err(|e| AnnotationError::io(path, e))?;
        self.parse_annotations(&content);
        log::info!(
            "Loaded {} annotations from {}",
            self.annotations.values().map(Vec::len).sum::<usize>(),
            path.display()
        );
        Ok(())
    }

    /// Sort and write every annotation to `path`.
    ///
    /// Refused while a non-overlapping group holds overlapping annotations.
    pub fn save(&mut self, path: &Path) -> Result<(), AnnotationError> {
        if self.check_overlap_conflict() {
            log::error!("Refusing to save {}: overlapping annotations", path.display());
            return Err(AnnotationError::OverlapConflict);
        }
        self.sort();
        self.comments
            .insert("saved_at".to_string(), chrono::Local::now().to_rfc3339());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| AnnotationError::io(parent, e))?;
            }
        }
        std::fs::write(path, self.to_file_string()).map_err(|e| AnnotationError::io(path, e))?;
        self.dirty = false;
        log::info!("Saved annotations to {}", path.display());
        Ok(())
    }
}
