//! OpenDocument text containers.
//!
//! Package rules from OASIS OpenDocument v1.3 part 2: the `mimetype` part
//! identifies the document class and must be the first, uncompressed entry
//! of the archive; `META-INF/manifest.xml` lists every part and carries
//! the package media type on its root file entry.

use std::io::Cursor;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use super::package::{ArchiveError, Override, Overrides, Package};
use super::TemplateContainer;
use crate::error::RenderError;

pub const TEXT_MIME: &str = "application/vnd.oasis.opendocument.text";
pub const TEMPLATE_MIME: &str = "application/vnd.oasis.opendocument.text-template";
const MIME_FAMILY: &str = "application/vnd.oasis.opendocument.";

const MIMETYPE_PART: &str = "mimetype";
const MANIFEST_PART: &str = "META-INF/manifest.xml";
const CONTENT_PART: &str = "content.xml";

const INIT_SCRIPT: &str =
    "-- OpenDocument init script\nSetIterationNodes({\"list-item\", \"table-row\"})\n";

/// An OpenDocument text document or text template.
pub struct Odf {
    package: Package,
    mimetype: String,
}

impl Odf {
    pub fn from_path(path: &Path) -> Result<Odf, RenderError> {
        Odf::new(Package::from_path(path)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Odf, RenderError> {
        Odf::new(Package::from_bytes(bytes)?)
    }

    /// Validates the package shape: a well-formed manifest with a root
    /// file entry, and a `mimetype` part of the OpenDocument family. No
    /// content is processed.
    fn new(package: Package) -> Result<Odf, RenderError> {
        let manifest = package.read_part(MANIFEST_PART)?;
        retype_manifest(&manifest, "application/octet-stream")?;

        let mimetype = String::from_utf8_lossy(&package.read_part(MIMETYPE_PART)?).into_owned();
        if !mimetype.starts_with(MIME_FAMILY) {
            return Err(RenderError::MimeType(format!(
                "{mimetype:?} is not an OpenDocument media type"
            )));
        }

        Ok(Odf { package, mimetype })
    }
}

impl TemplateContainer for Odf {
    fn mime_type(&self) -> &str {
        &self.mimetype
    }

    fn content_name(&self) -> &str {
        CONTENT_PART
    }

    fn init_script(&self) -> &str {
        INIT_SCRIPT
    }

    fn open_part(&self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        self.package.read_part(name)
    }

    fn result_overrides(&self, rendered: Vec<u8>) -> Overrides {
        // A rendered template is a plain text document.
        let mut overrides = Overrides::new();
        overrides.insert(MIMETYPE_PART.to_string(), Override::data(TEXT_MIME.as_bytes()));
        overrides.insert(CONTENT_PART.to_string(), Override::data(rendered));
        overrides
    }

    fn write(&self, overrides: &Overrides) -> Result<Vec<u8>, ArchiveError> {
        let mut overrides = overrides.clone();

        let mimetype = match overrides.remove(MIMETYPE_PART) {
            Some(entry) if entry.delete => return Err(ArchiveError::MimetypeDelete),
            Some(entry) => entry.data,
            None => self.mimetype.clone().into_bytes(),
        };

        // The manifest must advertise the same media type as the mimetype
        // part, whether it was overridden or comes from the template.
        let manifest = match overrides.remove(MANIFEST_PART) {
            Some(entry) if !entry.delete => entry.data,
            _ => self.package.read_part(MANIFEST_PART)?,
        };
        let retyped = retype_manifest(&manifest, &String::from_utf8_lossy(&mimetype))?;
        overrides.insert(MANIFEST_PART.to_string(), Override::data(retyped));

        self.package.rewrite(&overrides, Some((MIMETYPE_PART, &mimetype)))
    }
}

/// Rewrites the manifest's root file entry (`full-path="/"`) to carry
/// `media_type`. Fails when the manifest has no such entry, which also
/// makes this the manifest validation used when opening a package.
pub(crate) fn retype_manifest(manifest: &[u8], media_type: &str) -> Result<Vec<u8>, ArchiveError> {
    let mut reader = Reader::from_reader(manifest);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();
    let mut updated = false;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| ArchiveError::Manifest(format!("reading manifest: {err}")))?;
        match event {
            Event::Eof => break,
            Event::Start(element) if is_root_file_entry(&element)? => {
                let (rewritten, changed) = set_media_type(&element, media_type)?;
                updated = updated || changed;
                writer.write_event(Event::Start(rewritten)).map_err(write_err)?;
            }
            Event::Empty(element) if is_root_file_entry(&element)? => {
                let (rewritten, changed) = set_media_type(&element, media_type)?;
                updated = updated || changed;
                writer.write_event(Event::Empty(rewritten)).map_err(write_err)?;
            }
            other => writer.write_event(other).map_err(write_err)?,
        }
        buf.clear();
    }

    if !updated {
        return Err(ArchiveError::Manifest(
            "no root file-entry with a media-type attribute".to_string(),
        ));
    }

    Ok(writer.into_inner().into_inner())
}

fn write_err(err: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Manifest(format!("rewriting manifest: {err}"))
}

fn is_root_file_entry(element: &BytesStart<'_>) -> Result<bool, ArchiveError> {
    if element.local_name().as_ref() != b"file-entry" {
        return Ok(false);
    }
    for attr in element.attributes() {
        let attr = attr.map_err(|err| ArchiveError::Manifest(err.to_string()))?;
        if attr.key.local_name().as_ref() == b"full-path" && attr.value.as_ref() == b"/" {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Returns the element with its `media-type` attribute replaced, and
/// whether a replacement happened.
fn set_media_type(
    element: &BytesStart<'_>,
    media_type: &str,
) -> Result<(BytesStart<'static>, bool), ArchiveError> {
    let tag = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut rewritten = BytesStart::new(tag);
    let mut updated = false;

    for attr in element.attributes() {
        let attr = attr.map_err(|err| ArchiveError::Manifest(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if attr.key.local_name().as_ref() == b"media-type" {
            rewritten.push_attribute((key.as_str(), media_type));
            updated = true;
        } else {
            let value = attr
                .unescape_value()
                .map_err(|err| ArchiveError::Manifest(err.to_string()))?;
            rewritten.push_attribute((key.as_str(), value.as_ref()));
        }
    }

    Ok((rewritten, updated))
}
