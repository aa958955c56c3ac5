//! Test doubles for the renderer, object store and queue collaborators.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::{AppError, Result};
use crate::queue::{MessageQueue, QueueMessage};
use crate::render::{CertificateFields, PageOptions, Renderer};
use crate::storage::{file_name_of, zip_entries, ObjectStore, PresignMethod};

/// Writes placeholder artifacts instead of invoking real tools.
#[derive(Default)]
pub struct FakeRenderer {
    rendered: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeRenderer {
    pub fn fail_for(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn rendered_names(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    fn render_html(&self, template: &str, fields: &CertificateFields) -> Result<String> {
        if self.failing.lock().unwrap().contains(&fields.name) {
            return Err(AppError::Render(format!("cannot render {}", fields.name)));
        }
        self.rendered.lock().unwrap().push(fields.name.clone());
        Ok(template
            .replace("{{name}}", &fields.name)
            .replace("{{template_img}}", &fields.template_img))
    }

    async fn html_to_pdf(&self, html: &str, _options: &PageOptions, output: &Path) -> Result<()> {
        tokio::fs::write(output, format!("%PDF-1.4 {html}"))
            .await
            .map_err(|e| AppError::Render(e.to_string()))
    }

    async fn extract_first_page(&self, pdf: &Path, output: &Path) -> Result<()> {
        tokio::fs::copy(pdf, output)
            .await
            .map(|_| ())
            .map_err(|e| AppError::Render(e.to_string()))
    }

    async fn rasterize_first_page(&self, _pdf: &Path, output: &Path, _zoom: f32) -> Result<()> {
        tokio::fs::write(output, b"\x89PNG")
            .await
            .map_err(|e| AppError::Render(e.to_string()))
    }
}

/// Bucket held in memory.
#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    fail_uploads: AtomicBool,
}

impl FakeObjectStore {
    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::from(data));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(AppError::Storage(format!("upload of {key} refused")));
        }
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        self.insert(key, data);
        Ok(())
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        let data = self
            .get(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Object {key} not found")))?;
        tokio::fs::write(local_path, &data)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.contains(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn presigned_url(
        &self,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
        _content_type: Option<&str>,
    ) -> Result<String> {
        Ok(format!(
            "https://fake.local/{key}?method={method:?}&expires={}",
            ttl.as_secs()
        ))
    }

    async fn zip_and_upload(&self, keys: &[String], output_key: &str) -> Result<()> {
        let mut entries = Vec::new();
        for key in keys {
            let data = self
                .get(key)
                .await?
                .ok_or_else(|| AppError::Storage(format!("{key} missing")))?;
            entries.push((file_name_of(key).to_string(), data));
        }
        self.insert(output_key, zip_entries(&entries)?);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn copy(&self, _src_bucket: &str, src_key: &str, dest_key: &str) -> Result<()> {
        let data = self
            .get(src_key)
            .await?
            .ok_or_else(|| AppError::Storage(format!("{src_key} missing")))?;
        self.objects.lock().unwrap().insert(dest_key.to_string(), data);
        Ok(())
    }
}

/// Queue with visible and in-flight lists, mirroring the Redis layout.
#[derive(Default)]
pub struct FakeQueue {
    pending: Mutex<VecDeque<String>>,
    in_flight: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeQueue {
    pub fn push(&self, body: &str) {
        self.pending.lock().unwrap().push_back(body.to_string());
    }

    pub fn pending(&self) -> Vec<String> {
        self.pending.lock().unwrap().iter().cloned().collect()
    }

    pub fn in_flight(&self) -> Vec<String> {
        self.in_flight.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageQueue for FakeQueue {
    async fn send(&self, body: &str) -> Result<()> {
        self.push(body);
        Ok(())
    }

    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>> {
        let batch = {
            let mut pending = self.pending.lock().unwrap();
            let mut in_flight = self.in_flight.lock().unwrap();
            let mut batch = Vec::new();
            while batch.len() < max_messages {
                let Some(body) = pending.pop_front() else { break };
                in_flight.push(body.clone());
                batch.push(QueueMessage {
                    receipt_handle: body.clone(),
                    body,
                });
            }
            batch
        };
        if batch.is_empty() {
            // Empty poll blocks like a real long poll.
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
        Ok(batch)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(pos) = in_flight.iter().position(|b| b == receipt_handle) {
            in_flight.remove(pos);
            self.deleted.lock().unwrap().push(receipt_handle.to_string());
        }
        Ok(())
    }

    async fn release(&self, receipt_handle: &str) -> Result<()> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(pos) = in_flight.iter().position(|b| b == receipt_handle) {
            let body = in_flight.remove(pos);
            self.pending.lock().unwrap().push_back(body);
        }
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize> {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.len();
        self.pending.lock().unwrap().extend(in_flight.drain(..));
        Ok(count)
    }
}
