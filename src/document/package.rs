//! In-memory document packages.
//!
//! Both supported families are zip containers. The whole package is held
//! in memory; rewriting copies every untouched entry into a fresh archive
//! and applies the overrides on the way.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use thiserror::Error;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("reading container: {0}")]
    Io(#[from] std::io::Error),

    #[error("container archive: {0}")]
    Archive(#[from] ZipError),

    #[error("container part {0:?} not found")]
    MissingPart(String),

    #[error("manifest: {0}")]
    Manifest(String),

    #[error("the mimetype part cannot be deleted")]
    MimetypeDelete,
}

/// A part override: replacement data, or deletion of the part.
#[derive(Debug, Clone, Default)]
pub struct Override {
    pub data: Vec<u8>,
    pub delete: bool,
}

impl Override {
    pub fn data(data: impl Into<Vec<u8>>) -> Override {
        Override { data: data.into(), delete: false }
    }

    pub fn delete() -> Override {
        Override { data: Vec::new(), delete: true }
    }
}

/// Overrides applied while rewriting a package, keyed by part name.
pub type Overrides = BTreeMap<String, Override>;

/// A zip package loaded into memory.
pub struct Package {
    archive: RefCell<ZipArchive<Cursor<Vec<u8>>>>,
}

impl Package {
    pub fn from_path(path: &Path) -> Result<Package, ArchiveError> {
        Package::from_bytes(fs::read(path)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Package, ArchiveError> {
        let archive = ZipArchive::new(Cursor::new(bytes))?;
        Ok(Package { archive: RefCell::new(archive) })
    }

    /// Reads a whole part into memory.
    pub fn read_part(&self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut archive = self.archive.borrow_mut();
        let mut part = archive.by_name(name).map_err(|err| match err {
            ZipError::FileNotFound => ArchiveError::MissingPart(name.to_string()),
            other => ArchiveError::Archive(other),
        })?;
        let mut data = Vec::with_capacity(part.size() as usize);
        part.read_to_end(&mut data)?;
        Ok(data)
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.archive.borrow().file_names().any(|entry| entry == name)
    }

    pub fn part_names(&self) -> Vec<String> {
        self.archive.borrow().file_names().map(str::to_string).collect()
    }

    /// Rewrites the package applying `overrides`. `stored_first` pins a
    /// part as the first entry of the archive, uncompressed (the ODF
    /// `mimetype` rule). Untouched parts are copied verbatim.
    pub fn rewrite(
        &self,
        overrides: &Overrides,
        stored_first: Option<(&str, &[u8])>,
    ) -> Result<Vec<u8>, ArchiveError> {
        let mut out = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut out);
            let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);
            let mut written: Vec<String> = Vec::new();

            if let Some((name, data)) = stored_first {
                let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
                writer.start_file(name, stored)?;
                writer.write_all(data)?;
                written.push(name.to_string());
            }

            for (name, entry) in overrides {
                if written.iter().any(|seen| seen == name) {
                    continue;
                }
                written.push(name.clone());
                if entry.delete {
                    continue;
                }
                writer.start_file(name.as_str(), deflated)?;
                writer.write_all(&entry.data)?;
            }

            let mut archive = self.archive.borrow_mut();
            for index in 0..archive.len() {
                let mut part = archive.by_index(index)?;
                let name = part.name().to_string();
                if written.iter().any(|seen| seen == &name) {
                    continue;
                }
                let mut data = Vec::with_capacity(part.size() as usize);
                part.read_to_end(&mut data)?;
                drop(part);
                writer.start_file(name.as_str(), deflated)?;
                writer.write_all(&data)?;
            }

            writer.finish()?;
        }
        Ok(out.into_inner())
    }
}
