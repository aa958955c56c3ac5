use serde::Deserialize;

use crate::storage::file_name_of;

/// Artifact kinds written per registrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Pdf,
    Png,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "pdf",
            ArtifactKind::Png => "png",
        }
    }
}

/// `{eventId}_{registrantName}.{ext}`
pub fn certificate_file_name(event_id: &str, registrant_name: &str, kind: ArtifactKind) -> String {
    format!("{event_id}_{registrant_name}.{}", kind.extension())
}

/// `certificates/{eventId}/{registrantName}/{eventId}_{registrantName}.{ext}`
pub fn certificate_key(event_id: &str, registrant_name: &str, kind: ArtifactKind) -> String {
    format!(
        "certificates/{event_id}/{registrant_name}/{}",
        certificate_file_name(event_id, registrant_name, kind)
    )
}

/// Key of the zip bundling every certificate PDF of an event.
pub fn certificate_bundle_key(event_id: &str) -> String {
    format!("certificates/{event_id}/{event_id}_certificates.zip")
}

/// `templates/{eventId}/{fileName}`, the background image of an event's certificates.
pub fn template_key(event_id: &str, file_name: &str) -> String {
    format!("templates/{event_id}/{}", file_name_of(file_name))
}
