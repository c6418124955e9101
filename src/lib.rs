//! # folio
//!
//! Office-document template renderer. A packaged document (`.odt`, `.ott`
//! or `.docx`) is opened, its content part is compiled into a Lua program,
//! the program is executed against a caller-supplied data model, and the
//! resulting token stream is written back into the package with the content
//! and MIME-type parts overridden.
//!
//! ## Module structure
//!
//! - `xmltree`: content-part parsing into a parent-linked token tree, plus
//!   the prefix-preserving serializer
//! - `compiler`: tree-to-Lua-program compilation and the node registry
//! - `engine`: the embedded Lua interpreter, host callbacks and the
//!   open-stack rebalancer
//! - `document`: package families (ODF, OOXML), the factory and the
//!   rendering pipeline
//! - `bundle`: diagnostic bundle writer
//!
//! ## Template syntax
//!
//! Script fragments live inside XML character data, delimited by two
//! sentinel pairs: `[[ ... ]]` runs Lua statements for their side effects,
//! `[# ... #]` prints an expression into the document. Sentinels may cross
//! element boundaries; elements opened inside a block are re-emitted after
//! the block ends.
//!
//! ## Usage
//!
//! ```ignore
//! use folio::{Model, PackagedDocument, RenderReport};
//!
//! let document = PackagedDocument::open_path("letter.ott".as_ref())?;
//! let model: Model = serde_json::from_str(r#"{"data": {"name": "Ada"}}"#)?;
//! let mut report = RenderReport::default();
//! let rendered = document.render(&model, &mut report)?;
//! std::fs::write("letter.odt", rendered)?;
//! ```

pub mod bundle;
pub mod compiler;
pub mod document;
pub mod engine;
mod error;
pub mod xmltree;

pub use crate::compiler::{CompileError, Program};
pub use crate::document::package::{ArchiveError, Override, Overrides};
pub use crate::document::{Model, PackagedDocument, RenderReport, TemplateContainer};
pub use crate::engine::{Engine, ExecError, RebalanceError, ScriptError};
pub use crate::error::RenderError;
pub use crate::xmltree::writer::SerializeError;
pub use crate::xmltree::{parse, Name, Node, ParseError, Token};
