use serde::{Deserialize, Serialize};

/// Group and event names the consistency rules refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerVocabulary {
    /// Group whose intervals must partition the video
    pub change_group: String,
    pub replay_group: String,
    pub camera_group: String,
    /// Change event that marks a switch between scenes
    pub switch: String,
    pub zoom_in: String,
    pub zoom_out: String,
    /// Single-frame camera event
    pub viewpoint_switch: String,
}

impl Default for CheckerVocabulary {
    fn default() -> Self {
        Self {
            change_group: "变化事件".to_string(),
            replay_group: "回放".to_string(),
            camera_group: "镜头情况".to_string(),
            switch: "切换".to_string(),
            zoom_in: "镜头拉近".to_string(),
            zoom_out: "镜头拉远".to_string(),
            viewpoint_switch: "视角切换".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventConfig;

    #[test]
    fn test_default_vocabulary_matches_builtin_events() {
        let vocab = CheckerVocabulary::default();
        let config = EventConfig::default();
        let group = |name: &str| config.groups.iter().find(|g| g.group_name == name).unwrap();

        assert!(group(&vocab.change_group).has(&vocab.switch));
        assert!(group(&vocab.camera_group).has(&vocab.zoom_in));
        assert!(group(&vocab.camera_group).has(&vocab.zoom_out));
        assert!(group(&vocab.camera_group).has(&vocab.viewpoint_switch));
        assert!(config.groups.iter().any(|g| g.group_name == vocab.replay_group));
    }

    #[test]
    fn test_partial_vocabulary_keeps_defaults() {
        let vocab: CheckerVocabulary = serde_json::from_str(r#"{ "switch": "cut" }"#).unwrap();
        assert_eq!(vocab.switch, "cut");
        assert_eq!(vocab.change_group, "变化事件");
    }
}
