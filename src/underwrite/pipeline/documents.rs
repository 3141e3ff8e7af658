// SPDX-License-Identifier: MIT

//! Discovery of the page images to underwrite

use std::path::{Path, PathBuf};
use tokio::fs;

/// Image formats the OCR collaborator accepts
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tiff", "bmp", "gif"];

/// Result of scanning a document folder
#[derive(Debug, Default, PartialEq)]
pub struct DocumentScan {
    /// Supported images, sorted by path
    pub images: Vec<PathBuf>,
    /// PDFs found in the folder; they must be converted to images first
    pub skipped_pdfs: Vec<PathBuf>,
}

impl DocumentScan {
    /// Image paths as strings, the form the `document_paths` field takes
    pub fn image_paths(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// List the supported images directly inside `dir`. Subfolders are ignored.
pub async fn scan_folder(dir: &Path) -> std::io::Result<DocumentScan> {
    let mut scan = DocumentScan::default();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        match extension_of(&path).as_deref() {
            Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext) => scan.images.push(path),
            Some("pdf") => {
                log::warn!(
                    "Skipping PDF {}: convert it to images first",
                    path.display()
                );
                scan.skipped_pdfs.push(path);
            }
            _ => log::debug!("Ignoring unsupported file {}", path.display()),
        }
    }

    scan.images.sort();
    scan.skipped_pdfs.sort();
    log::info!(
        "Found {} image(s) in {}",
        scan.images.len(),
        dir.display()
    );
    Ok(scan)
}
