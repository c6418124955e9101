//! Packaged documents and the rendering pipeline.
//!
//! A packaged document is a zip container of XML parts. Rendering extracts
//! the single content part, compiles it, executes it against the model and
//! writes a new package with the content and MIME-type parts overridden.

pub mod odf;
pub mod ooxml;
pub mod package;

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::Path;
use std::rc::Rc;

use serde::Deserialize;

use self::odf::Odf;
use self::ooxml::Ooxml;
use self::package::{ArchiveError, Overrides};
use crate::compiler::Program;
use crate::engine::Engine;
use crate::error::RenderError;
use crate::xmltree;

/// Data handed to the template. Each `data` entry becomes a script global
/// of the same name; `metadata` is bound under the `metadata` global. The
/// model is only read during rendering.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Model {
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// The seam between the rendering core and a concrete package family.
pub trait TemplateContainer {
    /// Media type of the opened package.
    fn mime_type(&self) -> &str;

    /// Name of the content part (`content.xml` or `word/document.xml`).
    fn content_name(&self) -> &str;

    /// Family-specific prelude executed before the template program,
    /// typically declaring the iteration roots.
    fn init_script(&self) -> &str;

    fn open_part(&self, name: &str) -> Result<Vec<u8>, ArchiveError>;

    /// The override set that turns this package into the rendered output.
    fn result_overrides(&self, rendered: Vec<u8>) -> Overrides;

    /// Rewrites the package with the given overrides.
    fn write(&self, overrides: &Overrides) -> Result<Vec<u8>, ArchiveError>;
}

/// Media types the renderer accepts as template input.
const ACCEPTED_MIME_TYPES: &[&str] =
    &[odf::TEXT_MIME, odf::TEMPLATE_MIME, ooxml::MAIN_DOCUMENT_CONTENT_TYPE];

/// Artifacts accumulated during rendering, for diagnostics and debug
/// bundles. Filled as far as rendering progressed, also when an error is
/// returned.
#[derive(Debug, Default)]
pub struct RenderReport {
    pub template_mime_type: Option<String>,
    pub init_script: Option<String>,
    /// The compiled Lua program.
    pub program: Option<String>,
    /// Registered nodes, including synthetic fragments.
    pub node_count: usize,
    /// The content part as read from the template.
    pub content_xml: Option<String>,
    /// One line per executed callback.
    pub trace: Vec<String>,
    /// The serialized output stream.
    pub result_xml: Option<String>,
}

/// A template document of one of the supported families.
pub struct PackagedDocument {
    container: Box<dyn TemplateContainer>,
}

impl std::fmt::Debug for PackagedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackagedDocument")
            .field("mime_type", &self.container.mime_type())
            .finish()
    }
}

impl PackagedDocument {
    /// Opens a template, selecting the family by file extension.
    pub fn open_path(path: &Path) -> Result<PackagedDocument, RenderError> {
        let extension = path
            .extension()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "odt" | "ott" => Ok(PackagedDocument::new(Box::new(Odf::from_path(path)?))),
            "docx" => Ok(PackagedDocument::new(Box::new(Ooxml::from_path(path)?))),
            other => Err(RenderError::UnsupportedContainer(format!(
                "unrecognized file extension {other:?}"
            ))),
        }
    }

    pub fn new(container: Box<dyn TemplateContainer>) -> PackagedDocument {
        PackagedDocument { container }
    }

    pub fn mime_type(&self) -> &str {
        self.container.mime_type()
    }

    /// Renders the template with `model`, returning the bytes of the
    /// output package. `report` is filled with the intermediate artifacts
    /// as they are produced, so diagnostics survive a failed run.
    pub fn render(&self, model: &Model, report: &mut RenderReport) -> Result<Vec<u8>, RenderError> {
        let mime_type = self.container.mime_type().to_string();
        report.template_mime_type = Some(mime_type.clone());
        if !ACCEPTED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(RenderError::MimeType(format!(
                "{mime_type:?} is not a renderable template type"
            )));
        }

        let content_name = self.container.content_name();
        let content = self.container.open_part(content_name)?;
        log::debug!("parsing content part {content_name:?} ({} bytes)", content.len());
        report.content_xml = Some(String::from_utf8_lossy(&content).into_owned());

        let tree = xmltree::parse(&content)?;
        let program = Rc::new(Program::compile(&tree)?);
        log::debug!(
            "compiled {content_name:?}: {} program bytes, {} nodes",
            program.text().len(),
            program.len()
        );
        report.program = Some(program.text().to_string());
        report.node_count = program.len();

        let init_script = self.container.init_script().to_string();
        report.init_script = Some(init_script.clone());

        let engine = Engine::new(Rc::clone(&program), Some(model))?;
        let outcome = engine.exec(&init_script);
        report.trace = engine.trace();
        outcome?;

        let mut rendered = Vec::new();
        engine.write_xml(&mut rendered)?;
        report.result_xml = Some(String::from_utf8_lossy(&rendered).into_owned());

        let overrides = self.container.result_overrides(rendered);
        log::debug!("writing output package with {} overridden part(s)", overrides.len());
        Ok(self.container.write(&overrides)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_deserializes_with_defaults() {
        let model: Model = serde_json::from_str("{}").unwrap();
        assert!(model.data.is_empty());
        assert!(model.metadata.is_empty());

        let model: Model = serde_json::from_str(
            r#"{"data": {"name": "Ada", "n": 3}, "metadata": {"author": "me"}}"#,
        )
        .unwrap();
        assert_eq!(model.data["name"], serde_json::json!("Ada"));
        assert_eq!(model.metadata["author"], "me");
    }

    #[test]
    fn unknown_extensions_are_unsupported() {
        let err = PackagedDocument::open_path(Path::new("template.pdf")).unwrap_err();
        assert!(matches!(err, RenderError::UnsupportedContainer(_)));
    }
}
