//! XML token-stream serialization.
//!
//! Namespace prefixes are treated as opaque syntax: a generic writer that
//! synthesizes namespace declarations would break the bit-stability that
//! office suites expect from a rewritten content part. Elements are always
//! emitted as paired tags, never self-closed.

use std::io::Write;
use std::rc::Rc;

use quick_xml::escape::{escape, partial_escape};
use thiserror::Error;

use super::{Name, Node, Token};

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("writing XML output: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes the tokens of `nodes` in sequence. Nodes without a token (the
/// document root) are skipped.
pub fn write_nodes<W: Write>(nodes: &[Rc<Node>], out: &mut W) -> Result<(), SerializeError> {
    for node in nodes {
        if let Some(token) = node.token() {
            write_token(token, out)?;
        }
    }
    Ok(())
}

pub fn write_token<W: Write>(token: &Token, out: &mut W) -> Result<(), SerializeError> {
    match token {
        Token::StartElement { name, attrs } => {
            out.write_all(b"<")?;
            write_name(name, out)?;
            for attr in attrs {
                if attr.name.local.is_empty() {
                    continue;
                }
                out.write_all(b" ")?;
                write_name(&attr.name, out)?;
                out.write_all(b"=\"")?;
                out.write_all(escape(attr.value.as_str()).as_bytes())?;
                out.write_all(b"\"")?;
            }
            out.write_all(b">")?;
        }
        Token::EndElement { name } => {
            out.write_all(b"</")?;
            write_name(name, out)?;
            out.write_all(b">")?;
        }
        Token::CharData(text) => {
            out.write_all(partial_escape(text.as_str()).as_bytes())?;
        }
        Token::Comment(text) => {
            write!(out, "<!--{text}-->")?;
        }
        Token::ProcInst(text) => {
            write!(out, "<?{text}?>")?;
        }
        Token::Directive(text) => {
            write!(out, "<!DOCTYPE {text}>")?;
        }
    }
    Ok(())
}

fn write_name<W: Write>(name: &Name, out: &mut W) -> Result<(), SerializeError> {
    if let Some(prefix) = &name.prefix {
        out.write_all(prefix.as_bytes())?;
        out.write_all(b":")?;
    }
    out.write_all(name.local.as_bytes())?;
    Ok(())
}
