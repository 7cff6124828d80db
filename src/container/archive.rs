//! In-memory gzip tar payloads for container uploads.

use std::fs;
use std::path::{Component, Path};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::{Error, Result};

/// A gzip-compressed tar archive held in memory.
///
/// Built once and consumed by a single upload.
#[derive(Debug, Clone)]
pub struct ArchivePayload {
    entry: String,
    bytes: Vec<u8>,
}

impl ArchivePayload {
    /// Archive `base/relative`, naming the top-level entry `relative`.
    ///
    /// Directories are added recursively with their structure preserved
    /// below `relative`.
    pub fn build(base: &Path, relative: &Path) -> Result<Self> {
        let source = base.join(relative);
        let packaging_error = |reason: String| Error::Packaging {
            path: source.display().to_string(),
            reason,
        };

        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(packaging_error(
                "archive entry must be a relative path without '..'".to_string(),
            ));
        }

        let metadata = fs::metadata(&source).map_err(|e| packaging_error(e.to_string()))?;

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let appended = if metadata.is_dir() {
            builder.append_dir_all(relative, &source)
        } else {
            builder.append_path_with_name(&source, relative)
        };
        appended.map_err(|e| packaging_error(e.to_string()))?;

        let bytes = builder
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(|e| packaging_error(e.to_string()))?;

        Ok(Self {
            entry: relative.display().to_string(),
            bytes,
        })
    }

    /// Archive a single path under its final component name.
    pub fn from_path(source: &Path) -> Result<Self> {
        let name = source.file_name().ok_or_else(|| Error::Packaging {
            path: source.display().to_string(),
            reason: "path has no file name".to_string(),
        })?;
        let base = source.parent().unwrap_or_else(|| Path::new(""));
        Self::build(base, Path::new(name))
    }

    /// Top-level entry name inside the archive.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
