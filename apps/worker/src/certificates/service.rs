use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::errors::{AppError, Result};
use crate::models::{Event, Registration, RegistrationPatch};
use crate::records::{RecordStore, UpdateOutcome, VersionedRecord};
use crate::render::{CertificateFields, PageOptions, Renderer};
use crate::storage::keys::{certificate_bundle_key, certificate_key, ArtifactKind};
use crate::storage::{file_name_of, ObjectStore};

/// Attempts per registrant when the write-back loses a race with another writer.
const MAX_WRITE_ATTEMPTS: usize = 2;

/// Rendering parameters shared by every certificate of a run.
#[derive(Debug, Clone)]
pub struct CertificateSettings {
    pub page: PageOptions,
    pub zoom: f32,
    pub html_template: String,
}

/// Outcome of one event run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub event_id: String,
    /// Registrants whose record gained new certificate keys.
    pub generated: usize,
    /// Registrants whose record already carried the same keys (redelivery).
    pub unchanged: usize,
    /// Names of registrants whose certificate could not be produced or attached.
    pub failed: Vec<String>,
    pub bundle_key: Option<String>,
}

/// Object keys of one registrant's artifacts.
#[derive(Debug, Clone, PartialEq)]
struct Artifacts {
    pdf_key: String,
    png_key: String,
}

/// Certificate generation for one event at a time: read the event, read its
/// registrations, then per registrant render, upload and attach the artifact keys.
pub struct CertificateService {
    events: RecordStore<Event>,
    renderer: Arc<dyn Renderer>,
    objects: Arc<dyn ObjectStore>,
    settings: CertificateSettings,
}

impl CertificateService {
    pub fn new(
        events: RecordStore<Event>,
        renderer: Arc<dyn Renderer>,
        objects: Arc<dyn ObjectStore>,
        settings: CertificateSettings,
    ) -> Self {
        Self {
            events,
            renderer,
            objects,
            settings,
        }
    }

    pub fn registrations(&self, event_id: &str) -> RecordStore<Registration> {
        self.events.rescoped(event_id)
    }

    /// Generates certificates for every active registration of `event_id`.
    ///
    /// Event or registration lookup failures abort the whole run. A failure for one
    /// registrant is logged and recorded in the report; the run carries on.
    pub async fn generate_for_event(&self, event_id: &str, bundle: bool) -> Result<GenerationReport> {
        let event = self.events.query_one(event_id).await.map_err(|e| {
            error!("[Event={event_id}] Aborting certificate generation: {e}");
            e
        })?;

        let template_key = event.fields.certificate_template.clone().ok_or_else(|| {
            let message = format!("Event with ID={event_id} has no certificate template");
            error!("[Event={event_id}] {message}");
            AppError::Validation(message)
        })?;

        let registrations = self.registrations(event_id);
        let entries = registrations.query_all(true).await.map_err(|e| {
            error!("[Event={event_id}] Aborting certificate generation: {e}");
            e
        })?;

        let workdir = tempfile::tempdir().map_err(|e| anyhow::anyhow!("Failed to create temp dir: {e}"))?;
        let template_path = workdir.path().join(file_name_of(&template_key));
        self.objects.download(&template_key, &template_path).await.map_err(|e| {
            error!("[Event={event_id}] Failed to fetch certificate template {template_key}: {e}");
            e
        })?;

        info!(
            "[Event={event_id}] Generating certificates for {} registrants",
            entries.len()
        );

        let mut report = GenerationReport {
            event_id: event_id.to_string(),
            ..Default::default()
        };
        let mut pdf_keys = Vec::new();

        for entry in &entries {
            let name = entry.fields.full_name();
            match self
                .generate_for_registrant(&registrations, event_id, &template_path, entry)
                .await
            {
                Ok((outcome, artifacts)) => {
                    if outcome.is_noop() {
                        report.unchanged += 1;
                    } else {
                        report.generated += 1;
                    }
                    // Namesakes share one key, so the bundle lists it once.
                    if !pdf_keys.contains(&artifacts.pdf_key) {
                        pdf_keys.push(artifacts.pdf_key);
                    }
                }
                Err(e) => {
                    error!(
                        "[{}] Failed to generate certificate for {name}: {e}",
                        entry.sort_key
                    );
                    report.failed.push(name);
                }
            }
        }

        if bundle && !pdf_keys.is_empty() {
            let bundle_key = certificate_bundle_key(event_id);
            match self.objects.zip_and_upload(&pdf_keys, &bundle_key).await {
                Ok(()) => report.bundle_key = Some(bundle_key),
                Err(e) => warn!("[Event={event_id}] Failed to bundle certificates: {e}"),
            }
        }

        info!(
            "[Event={event_id}] Certificates done: {} generated, {} unchanged, {} failed",
            report.generated,
            report.unchanged,
            report.failed.len()
        );
        Ok(report)
    }

    async fn generate_for_registrant(
        &self,
        registrations: &RecordStore<Registration>,
        event_id: &str,
        template_path: &Path,
        entry: &VersionedRecord<Registration>,
    ) -> Result<(UpdateOutcome<Registration>, Artifacts)> {
        let name = entry.fields.full_name();
        if name.is_empty() {
            return Err(AppError::Validation(format!(
                "Registration {} has no name",
                entry.entity_id
            )));
        }

        let artifacts = self.render_and_store(event_id, &name, template_path).await?;
        let patch = RegistrationPatch {
            certificate_img_object_key: Some(artifacts.png_key.clone()),
            certificate_pdf_object_key: Some(artifacts.pdf_key.clone()),
            ..Default::default()
        };

        let mut current = entry.clone();
        let mut attempt = 1;
        loop {
            match registrations.update_silent(&current, &patch).await {
                Ok(outcome) => return Ok((outcome, artifacts)),
                Err(AppError::Conflict(reason)) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!("[{}] Write-back conflicted ({reason}), re-reading", entry.sort_key);
                    current = registrations.query_one(&entry.entity_id).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn render_and_store(
        &self,
        event_id: &str,
        name: &str,
        template_path: &Path,
    ) -> Result<Artifacts> {
        let workdir = tempfile::tempdir().map_err(|e| anyhow::anyhow!("Failed to create temp dir: {e}"))?;

        let html = self.renderer.render_html(
            &self.settings.html_template,
            &CertificateFields {
                template_img: format!("file://{}", template_path.display()),
                name: name.to_string(),
            },
        )?;

        let full_pdf = workdir.path().join("certificate.pdf");
        self.renderer
            .html_to_pdf(&html, &self.settings.page, &full_pdf)
            .await?;

        let pdf_key = certificate_key(event_id, name, ArtifactKind::Pdf);
        let png_key = certificate_key(event_id, name, ArtifactKind::Png);
        let pdf_path = workdir.path().join(file_name_of(&pdf_key));
        let png_path = workdir.path().join(file_name_of(&png_key));

        self.renderer.extract_first_page(&full_pdf, &pdf_path).await?;
        self.renderer
            .rasterize_first_page(&pdf_path, &png_path, self.settings.zoom)
            .await?;

        self.objects.upload(&pdf_path, &pdf_key).await?;
        self.objects.upload(&png_path, &png_key).await?;

        Ok(Artifacts { pdf_key, png_key })
    }
}
