//! Office Open XML word-processing containers.
//!
//! An OOXML package declares its part types in `[Content_Types].xml` at
//! the archive root; the document body lives in `word/document.xml`.

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::package::{ArchiveError, Override, Overrides, Package};
use super::TemplateContainer;
use crate::error::RenderError;

pub const MAIN_DOCUMENT_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml";
const CONTENT_TYPES_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const DOCUMENT_PART: &str = "word/document.xml";

const INIT_SCRIPT: &str = "-- WordprocessingML init script\nSetIterationNodes({\"tr\"})\n";

/// An OOXML word-processing document.
pub struct Ooxml {
    package: Package,
}

impl Ooxml {
    pub fn from_path(path: &Path) -> Result<Ooxml, RenderError> {
        Ooxml::new(Package::from_path(path)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Ooxml, RenderError> {
        Ooxml::new(Package::from_bytes(bytes)?)
    }

    fn new(package: Package) -> Result<Ooxml, RenderError> {
        let content_types = package.read_part(CONTENT_TYPES_PART)?;
        validate_content_types(&content_types)?;
        if !package.has_part(DOCUMENT_PART) {
            return Err(RenderError::Archive(ArchiveError::MissingPart(
                DOCUMENT_PART.to_string(),
            )));
        }
        Ok(Ooxml { package })
    }
}

impl TemplateContainer for Ooxml {
    fn mime_type(&self) -> &str {
        MAIN_DOCUMENT_CONTENT_TYPE
    }

    fn content_name(&self) -> &str {
        DOCUMENT_PART
    }

    fn init_script(&self) -> &str {
        INIT_SCRIPT
    }

    fn open_part(&self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        self.package.read_part(name)
    }

    fn result_overrides(&self, rendered: Vec<u8>) -> Overrides {
        let mut overrides = Overrides::new();
        overrides.insert(DOCUMENT_PART.to_string(), Override::data(rendered));
        overrides
    }

    fn write(&self, overrides: &Overrides) -> Result<Vec<u8>, ArchiveError> {
        self.package.rewrite(overrides, None)
    }
}

/// Checks that `[Content_Types].xml` declares the content-types namespace
/// and registers `word/document.xml` as a main document part.
fn validate_content_types(content_types: &[u8]) -> Result<(), RenderError> {
    let mut reader = Reader::from_reader(content_types);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut has_types_root = false;
    let mut has_document_override = false;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|err| {
            RenderError::Archive(ArchiveError::Manifest(format!(
                "reading {CONTENT_TYPES_PART}: {err}"
            )))
        })?;
        match event {
            Event::Eof => break,
            Event::Start(element) | Event::Empty(element) => {
                if element.local_name().as_ref() == b"Types" && has_content_types_ns(&element)? {
                    has_types_root = true;
                } else if element.local_name().as_ref() == b"Override"
                    && is_main_document_override(&element)?
                {
                    has_document_override = true;
                }
                if has_types_root && has_document_override {
                    return Ok(());
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Err(RenderError::MimeType(format!(
        "{CONTENT_TYPES_PART} does not declare a main word-processing document"
    )))
}

fn has_content_types_ns(element: &BytesStart<'_>) -> Result<bool, RenderError> {
    for attr in element.attributes() {
        let attr = attr.map_err(content_types_err)?;
        if attr.key.as_ref() == b"xmlns" && attr.value.as_ref() == CONTENT_TYPES_NS.as_bytes() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_main_document_override(element: &BytesStart<'_>) -> Result<bool, RenderError> {
    let mut names_document = false;
    let mut has_main_type = false;
    for attr in element.attributes() {
        let attr = attr.map_err(content_types_err)?;
        match attr.key.local_name().as_ref() {
            b"PartName" if attr.value.as_ref() == b"/word/document.xml" => names_document = true,
            b"ContentType" if attr.value.as_ref() == MAIN_DOCUMENT_CONTENT_TYPE.as_bytes() => {
                has_main_type = true
            }
            _ => {}
        }
    }
    Ok(names_document && has_main_type)
}

fn content_types_err(err: impl std::fmt::Display) -> RenderError {
    RenderError::Archive(ArchiveError::Manifest(format!("reading {CONTENT_TYPES_PART}: {err}")))
}
