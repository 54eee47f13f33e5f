//! Component bundles: a zip archive holding an app manifest plus its files.
//!
//! A [`Bundle`] is kept as an ordered path -> entry map so it can be diffed,
//! pruned and re-serialized deterministically.

pub mod listing;
pub mod manifest;
pub mod partial;

use crate::error::{BridgeError, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

pub use listing::{content_hash, ContentListing};
pub use manifest::{AppManifest, ManifestVersion};
pub use partial::{apply_partial_bundle, diff_bundle, make_partial_bundle, PartialManifest};

/// App manifest at the bundle root
pub const MANIFEST_PATH: &str = "manifest.json";
/// Sentinel carried by partial bundles only
pub const PARTIAL_MANIFEST_PATH: &str = ".partial.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleEntry {
    File(Bytes),
    Directory,
}

impl BundleEntry {
    pub fn is_dir(&self) -> bool {
        matches!(self, BundleEntry::Directory)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    entries: BTreeMap<String, BundleEntry>,
}

/// Check that an archive path stays inside the bundle root.
///
/// Returns the path without a trailing directory slash.
fn validate_path(path: &str) -> Result<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(BridgeError::InvalidBundle("empty entry path".to_string()));
    }
    if trimmed.starts_with('/') || trimmed.contains('\\') {
        return Err(BridgeError::InvalidBundle(format!(
            "absolute entry path: {}",
            path
        )));
    }
    for component in trimmed.split('/') {
        match component {
            ".." => {
                return Err(BridgeError::InvalidBundle(format!(
                    "path traversal in entry: {}",
                    path
                )))
            }
            "" | "." => {
                return Err(BridgeError::InvalidBundle(format!(
                    "non-canonical entry path: {}",
                    path
                )))
            }
            c if c.contains(':') => {
                return Err(BridgeError::InvalidBundle(format!(
                    "prefixed entry path: {}",
                    path
                )))
            }
            _ => {}
        }
    }
    Ok(trimmed)
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a bundle from zip bytes.
    pub fn from_zip(data: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(data))?;
        let mut bundle = Bundle::new();

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let name = file.name().to_string();
            if file.is_dir() {
                bundle.insert_dir(&name)?;
            } else {
                let mut contents = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut contents)?;
                bundle.insert_file(&name, contents)?;
            }
        }

        tracing::debug!("Read bundle with {} entries", bundle.len());
        Ok(bundle)
    }

    /// Serialize as a deflated zip. Entries are written in path order with a
    /// fixed timestamp, so equal bundles give equal bytes.
    pub fn to_zip(&self) -> Result<Bytes> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default());

        for (path, entry) in &self.entries {
            match entry {
                BundleEntry::Directory => writer.add_directory(path.as_str(), options)?,
                BundleEntry::File(data) => {
                    writer.start_file(path.as_str(), options)?;
                    writer.write_all(data)?;
                }
            }
        }

        let cursor = writer.finish()?;
        Ok(Bytes::from(cursor.into_inner()))
    }

    pub fn insert_file(&mut self, path: &str, data: impl Into<Bytes>) -> Result<()> {
        let path = validate_path(path)?;
        self.entries
            .insert(path.to_string(), BundleEntry::File(data.into()));
        Ok(())
    }

    pub fn insert_dir(&mut self, path: &str) -> Result<()> {
        let path = validate_path(path)?;
        self.entries.insert(path.to_string(), BundleEntry::Directory);
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Option<BundleEntry> {
        self.entries.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&BundleEntry> {
        self.entries.get(path)
    }

    /// File contents at `path`; `None` for directories and missing entries.
    pub fn get_file(&self, path: &str) -> Option<&Bytes> {
        match self.entries.get(path) {
            Some(BundleEntry::File(data)) => Some(data),
            _ => None,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn is_partial(&self) -> bool {
        self.contains(PARTIAL_MANIFEST_PATH)
    }

    /// Parse the embedded app manifest.
    pub fn manifest(&self) -> Result<AppManifest> {
        let data = self
            .get_file(MANIFEST_PATH)
            .ok_or_else(|| BridgeError::InvalidManifest(format!("{} is missing", MANIFEST_PATH)))?;
        AppManifest::parse(data)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BundleEntry)> {
        self.entries.iter().map(|(p, e)| (p.as_str(), e))
    }

    /// Paths of file entries, in order.
    pub fn files(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().filter_map(|(p, e)| match e {
            BundleEntry::File(data) => Some((p.as_str(), data)),
            BundleEntry::Directory => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
