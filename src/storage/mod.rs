//! Disk storage for permit attachments.
//!
//! Names never collide: a taken name gets a numeric suffix (`scan.pdf`,
//! `scan_1.pdf`, ...). Files are created with `create_new`, so two uploads
//! racing for the same name cannot overwrite each other.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::errors::AppError;

/// MIME types accepted as permit attachments.
pub const ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "application/pdf"];

/// Name used when an upload arrives without a usable file name.
const FALLBACK_NAME: &str = "attachment";

pub fn is_mime_type_allowed(content_type: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&content_type)
}

/// An uploaded file waiting to be stored.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Attachment store rooted at a single directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the store, creating the directory if needed.
    pub fn open(root: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(root).map_err(|e| {
            AppError::Connectivity(format!("Failed to create upload directory: {}", e))
        })?;

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` under a name derived from `suggested_name`. Returns the stored name.
    pub async fn save_file(&self, bytes: &[u8], suggested_name: &str) -> Result<String, AppError> {
        let clean = sanitize_file_name(suggested_name);
        let (stem, extension) = split_extension(&clean);

        let mut counter: u32 = 0;
        loop {
            let candidate = match (counter, extension) {
                (0, _) => clean.clone(),
                (n, Some(ext)) => format!("{}_{}.{}", stem, n, ext),
                (n, None) => format!("{}_{}", stem, n),
            };
            let path = self.root.join(&candidate);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let written = async {
                        file.write_all(bytes).await?;
                        file.flush().await
                    }
                    .await;

                    if let Err(e) = written {
                        drop(file);
                        if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                            tracing::warn!(
                                "Failed to remove partial file {}: {}",
                                path.display(),
                                cleanup
                            );
                        }
                        return Err(e.into());
                    }

                    tracing::info!("Stored attachment {} ({} bytes)", candidate, bytes.len());
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => counter += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Remove a stored file.
    pub async fn delete_file(&self, stored_name: &str) -> Result<(), AppError> {
        let path = self.root.join(sanitize_file_name(stored_name));
        tokio::fs::remove_file(&path).await?;
        tracing::info!("Deleted attachment {}", stored_name);
        Ok(())
    }

    /// Whether a stored name currently resolves to a file.
    #[cfg(test)]
    pub async fn exists(&self, stored_name: &str) -> bool {
        let path = self.root.join(sanitize_file_name(stored_name));
        tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }
}

/// Files written during one operation, deleted again if the operation fails.
#[derive(Debug, Default)]
pub struct CompensationLog {
    stored: Vec<String>,
}

impl CompensationLog {
    pub fn record(&mut self, stored_name: String) {
        self.stored.push(stored_name);
    }

    pub fn stored_names(&self) -> &[String] {
        &self.stored
    }

    /// Delete every recorded file, newest first. Cleanup failures are logged
    /// and swallowed so they never mask the error that triggered the rollback.
    pub async fn run(self, files: &FileStore) {
        for name in self.stored.into_iter().rev() {
            if let Err(e) = files.delete_file(&name).await {
                tracing::error!("Failed to clean up attachment {}: {}", name, e);
            }
        }
    }
}

/// Keep only the final path component, restricted to a safe character set.
fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}
