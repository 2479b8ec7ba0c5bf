use crate::core::AnnotationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

const DEFAULT_EVENTS: &str = include_str!("../../assets/events.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Spans a frame range, start <= end.
    Interval,
    /// Instantaneous, start == end.
    Shot,
}

impl EventType {
    /// Whether `[f0, f1]` is a legal extent for this kind of event.
    pub fn accepts(self, f0: usize, f1: usize) -> bool {
        match self {
            EventType::Interval => f0 <= f1,
            EventType::Shot => f0 == f1,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "interval" => Some(EventType::Interval),
            "shot" => Some(EventType::Shot),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Interval => write!(f, "interval"),
            EventType::Shot => write!(f, "shot"),
        }
    }
}

/// A named set of related events sharing one overlap policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventGroup {
    pub group_name: String,
    pub allow_overlap: bool,
    pub table_id: i64,
    pub event_names: Vec<String>,
    pub event_types: Vec<EventType>,
}

impl EventGroup {
    /// Build a group from its configuration record. Keys starting with `_` are
    /// group settings, every other key declares an event.
    pub fn from_meta(group_name: &str, meta: &Map<String, Value>) -> Result<Self, AnnotationError> {
        let allow_overlap = meta
            .get("_overlap")
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                AnnotationError::InvalidConfig(format!("{}: missing boolean _overlap", group_name))
            })?;
        let table_id = meta
            .get("_table")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                AnnotationError::InvalidConfig(format!("{}: missing integer _table", group_name))
            })?;

        let mut event_names = Vec::new();
        let mut event_types = Vec::new();
        for (name, value) in meta.iter().filter(|(k, _)| !k.starts_with('_')) {
            let event_type = value.as_str().and_then(EventType::parse).ok_or_else(|| {
                AnnotationError::InvalidConfig(format!(
                    "{}: event {} must be \"interval\" or \"shot\"",
                    group_name, name
                ))
            })?;
            event_names.push(name.clone());
            event_types.push(event_type);
        }

        Ok(Self {
            group_name: group_name.to_string(),
            allow_overlap,
            table_id,
            event_names,
            event_types,
        })
    }

    pub fn get_type(&self, name: &str) -> Option<EventType> {
        self.event_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.event_types[i])
    }

    pub fn has(&self, name: &str) -> bool {
        self.event_names.iter().any(|n| n == name)
    }
}

/// All event groups, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConfig {
    pub groups: Vec<EventGroup>,
}

impl EventConfig {
    pub fn from_json_str(content: &str) -> Result<Self, AnnotationError> {
        let root: Value = serde_json::from_str(content)
            .map_err(|e| AnnotationError::InvalidConfig(e.to_string()))?;
        let root = root.as_object().ok_or_else(|| {
            AnnotationError::InvalidConfig("top level must be an object of groups".to_string())
        })?;

        let mut groups: Vec<EventGroup> = Vec::with_capacity(root.len());
        for (group_name, meta) in root {
            let meta = meta.as_object().ok_or_else(|| {
                AnnotationError::InvalidConfig(format!("{}: group must be an object", group_name))
            })?;
            let group = EventGroup::from_meta(group_name, meta)?;
            for name in &group.event_names {
                if let Some(other) = groups.iter().find(|g| g.has(name)) {
                    return Err(AnnotationError::InvalidConfig(format!(
                        "event {} declared in both {} and {}",
                        name, other.group_name, group.group_name
                    )));
                }
            }
            groups.push(group);
        }

        Ok(Self { groups })
    }

    pub fn from_file(path: &Path) -> Result<Self, AnnotationError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| AnnotationError::io(path, e))?;
        let config = Self::from_json_str(&content)?;
        log::info!(
            "Loaded {} event groups from {}",
            config.groups.len(),
            path.display()
        );
        Ok(config)
    }

    /// Either the configured file or the built-in football event set.
    pub fn load(path: Option<&Path>) -> Result<Self, AnnotationError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_json_str(DEFAULT_EVENTS),
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        match Self::from_json_str(DEFAULT_EVENTS) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Built-in event configuration is invalid: {}", e);
                Self { groups: Vec::new() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_groups() {
        let config = EventConfig::default();
        let names: Vec<&str> = config.groups.iter().map(|g| g.group_name.as_str()).collect();
        assert_eq!(names, vec!["变化事件", "回放", "镜头情况"]);

        let change = &config.groups[0];
        assert!(!change.allow_overlap);
        assert_eq!(change.table_id, 0);
        assert_eq!(change.event_names[1], "切换");

        let camera = &config.groups[2];
        assert_eq!(camera.get_type("视角切换"), Some(EventType::Shot));
        assert_eq!(camera.get_type("镜头拉近"), Some(EventType::Interval));
        assert_eq!(camera.get_type("切换"), None);
    }

    #[test]
    fn test_declaration_order_is_preserved() {
        let config = EventConfig::from_json_str(
            r#"{"g": {"_overlap": true, "_table": 3, "zeta": "shot", "alpha": "interval"}}"#,
        )
        .unwrap();
        assert_eq!(config.groups[0].event_names, vec!["zeta", "alpha"]);
        assert_eq!(
            config.groups[0].event_types,
            vec![EventType::Shot, EventType::Interval]
        );
    }

    #[test]
    fn test_rejects_malformed_groups() {
        assert!(EventConfig::from_json_str(r#"{"g": {"_table": 0, "a": "shot"}}"#).is_err());
        assert!(
            EventConfig::from_json_str(r#"{"g": {"_overlap": true, "_table": 0, "a": "point"}}"#)
                .is_err()
        );
        assert!(EventConfig::from_json_str(
            r#"{"g": {"_overlap": true, "_table": 0, "a": "shot"},
                "h": {"_overlap": true, "_table": 1, "a": "shot"}}"#
        )
        .is_err());
    }

    #[test]
    fn test_event_type_accepts() {
        assert!(EventType::Interval.accepts(3, 3));
        assert!(EventType::Interval.accepts(3, 9));
        assert!(!EventType::Interval.accepts(9, 3));
        assert!(EventType::Shot.accepts(4, 4));
        assert!(!EventType::Shot.accepts(4, 5));
    }
}
