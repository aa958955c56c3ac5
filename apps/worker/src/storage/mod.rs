// Object store collaborator: where rendered certificates and template images live.

pub mod keys;
pub mod s3;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use crate::errors::{AppError, Result};

pub use s3::S3ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    Get,
    Put,
}

/// Object storage used by the certificate pipeline.
///
/// Every operation returns `Result`; a missing object is `Ok(None)` / `Ok(false)`,
/// never an error.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()>;

    async fn download(&self, key: &str, local_path: &Path) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// `content_type` is only meaningful for `PresignMethod::Put`.
    async fn presigned_url(
        &self,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
        content_type: Option<&str>,
    ) -> Result<String>;

    /// Bundles `keys` (by file name) into one deflated zip stored at `output_key`.
    async fn zip_and_upload(&self, keys: &[String], output_key: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Copies `src_bucket/src_key` into this store at `dest_key`.
    async fn copy(&self, src_bucket: &str, src_key: &str, dest_key: &str) -> Result<()>;
}

/// Builds an in-memory zip archive of `(file name, contents)` entries.
/// A repeated file name keeps its first entry.
pub fn zip_entries(entries: &[(String, Bytes)]) -> Result<Vec<u8>> {
    use std::collections::HashSet;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut seen = HashSet::new();
    for (name, contents) in entries {
        if !seen.insert(name.as_str()) {
            warn!("Skipping duplicate zip entry {name}");
            continue;
        }
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| AppError::Storage(format!("Failed to zip {name}: {e}")))?;
        writer
            .write_all(contents)
            .map_err(|e| AppError::Storage(format!("Failed to zip {name}: {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| AppError::Storage(format!("Failed to finish zip: {e}")))?;
    Ok(cursor.into_inner())
}

/// Last path segment of an object key.
pub fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_file_name_of_takes_last_segment() {
        assert_eq!(file_name_of("certificates/E1/Ana Cruz/E1_Ana Cruz.pdf"), "E1_Ana Cruz.pdf");
        assert_eq!(file_name_of("flat.png"), "flat.png");
    }

    #[test]
    fn test_zip_entries_contains_every_file() {
        let entries = vec![
            ("a.pdf".to_string(), Bytes::from_static(b"%PDF-1.4")),
            ("a.png".to_string(), Bytes::from_static(b"\x89PNG")),
        ];
        let data = zip_entries(&entries).unwrap();

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut contents = Vec::new();
        archive
            .by_name("a.pdf")
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"%PDF-1.4");
    }

    #[test]
    fn test_zip_entries_keeps_first_of_duplicate_names() {
        let entries = vec![
            ("E1_Ana Cruz.pdf".to_string(), Bytes::from_static(b"first")),
            ("E1_Ana Cruz.pdf".to_string(), Bytes::from_static(b"second")),
            ("E1_Ben Ode.pdf".to_string(), Bytes::from_static(b"other")),
        ];
        let data = zip_entries(&entries).unwrap();

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut contents = Vec::new();
        archive
            .by_name("E1_Ana Cruz.pdf")
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"first");
    }
}
