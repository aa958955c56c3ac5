use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::Entity;

/// Event attributes stored on its versioned record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Object key of the certificate background image.
    #[serde(default)]
    pub certificate_template: Option<String>,
}

/// Partial update of an [`Event`]. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_template: Option<String>,
}

impl Entity for Event {
    const ENTITY_TYPE: &'static str = "Event";
    type Patch = EventPatch;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::model::fields_to_map;

    #[test]
    fn test_patch_omits_unset_fields() {
        let patch = EventPatch {
            venue: Some("Hall A".to_string()),
            ..Default::default()
        };
        let map = fields_to_map(&patch).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["venue"], "Hall A");
    }

    #[test]
    fn test_event_uses_camel_case_attributes() {
        let json = serde_json::json!({
            "name": "RustConf",
            "certificateTemplate": "templates/rustconf.png"
        });
        let event: Event = serde_json::from_value(json).unwrap();
        assert_eq!(event.certificate_template.as_deref(), Some("templates/rustconf.png"));
        assert!(event.venue.is_none());
    }
}
