use thiserror::Error;

use crate::compiler::CompileError;
use crate::document::package::ArchiveError;
use crate::engine::{ExecError, RebalanceError, ScriptError};
use crate::xmltree::writer::SerializeError;
use crate::xmltree::ParseError;

/// A comprehensive error type for the entire rendering pipeline.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("container archive: {0}")]
    Archive(#[from] ArchiveError),

    #[error("container MIME type: {0}")]
    MimeType(String),

    #[error("parsing content XML: {0}")]
    XmlParse(#[from] ParseError),

    #[error("compiling template: {0}")]
    Compile(#[from] CompileError),

    #[error("executing template script: {0}")]
    Script(#[from] ScriptError),

    #[error("rebalancing output tree: {0}")]
    Rebalance(#[from] RebalanceError),

    #[error("serializing output XML: {0}")]
    Serialize(#[from] SerializeError),

    #[error("reading data model: {0}")]
    Model(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ExecError> for RenderError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Script(err) => RenderError::Script(err),
            ExecError::Rebalance(err) => RenderError::Rebalance(err),
        }
    }
}
