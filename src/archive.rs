use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::downloader::{AssetEntry, AssetState, AssetTable};
use crate::error::Result;
use crate::naming::{placeholder_name, ASSETS_DIR};

pub const INDEX_FILE: &str = "index.html";

/// Collects named blobs and writes them into one zip stream.
///
/// Entries are written in name order with a fixed timestamp and mode, so the
/// same inputs always give the same bytes.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    files: BTreeMap<String, Vec<u8>>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one member. Paths are unique per archive; the registry reserves
    /// every name together with its placeholder path.
    pub fn add_file(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        let path = path.into();
        let previous = self.files.insert(path.clone(), content.into());
        debug_assert!(previous.is_none(), "duplicate archive member {path}");
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);

        for (path, content) in self.files {
            zip.start_file(path, options)?;
            zip.write_all(&content)?;
        }

        Ok(zip.finish()?.into_inner())
    }
}

/// Archive path and content for one registry entry. Failed (or never settled)
/// downloads become a text placeholder next to where the asset would be.
pub fn archive_member(entry: &AssetEntry) -> (String, Vec<u8>) {
    let reason = match &entry.state {
        AssetState::Succeeded { bytes, .. } => {
            return (format!("{ASSETS_DIR}/{}", entry.local_name), bytes.clone());
        }
        AssetState::Failed { reason } => reason.as_str(),
        AssetState::Pending => "download never completed",
    };

    let placeholder = format!("Failed to download: {}\nReason: {}\n", entry.source, reason);
    (
        format!("{ASSETS_DIR}/{}", placeholder_name(&entry.local_name)),
        placeholder.into_bytes(),
    )
}

/// Packaging pass: `index.html` at the root plus one member per registry entry.
pub fn package(page_html: &str, assets: &AssetTable) -> Result<Vec<u8>> {
    let mut archive = ArchiveBuilder::new();
    archive.add_file(INDEX_FILE, page_html);
    for entry in assets.entries() {
        let (path, content) = archive_member(entry);
        archive.add_file(path, content);
    }
    tracing::debug!(files = archive.files.len(), "writing archive");
    archive.finish()
}
