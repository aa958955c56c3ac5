use serde::{Deserialize, Serialize};

use crate::records::Entity;

/// A registrant of one event. Stored in the event-scoped `Registration#<eventId>` partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub event_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub certificate_img_object_key: Option<String>,
    #[serde(default)]
    pub certificate_pdf_object_key: Option<String>,
}

impl Registration {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_img_object_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_pdf_object_key: Option<String>,
}

impl Entity for Registration {
    const ENTITY_TYPE: &'static str = "Registration";
    type Patch = RegistrationPatch;
}
