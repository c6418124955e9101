//! Parsed XML token trees.
//!
//! The content part of a document package is parsed into a tree of
//! [`Node`]s whose pre-order traversal yields exactly the original token
//! sequence. Character data, comments and processing instructions between
//! elements are kept as sibling nodes; an element's closing tag is its own
//! last child. Parent links are weak back-references, so walking upward
//! never creates an ownership cycle.
//!
//! No namespace resolution is performed: prefixes are carried as literal
//! strings and re-emitted exactly as written (see [`writer`]).

pub mod writer;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// A possibly prefixed XML name. The prefix is the literal form from the
/// source; `None` means the name was written without a colon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub prefix: Option<String>,
    pub local: String,
}

impl Name {
    pub fn local(local: impl Into<String>) -> Self {
        Name { prefix: None, local: local.into() }
    }

    fn from_qname(qname: quick_xml::name::QName<'_>) -> Self {
        Name {
            prefix: qname
                .prefix()
                .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned()),
            local: String::from_utf8_lossy(qname.local_name().as_ref()).into_owned(),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// An attribute as written in the source, in document order on its element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: Name,
    pub value: String,
}

/// One XML token. Character data is stored with entities resolved; the
/// writer re-escapes on output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    StartElement { name: Name, attrs: Vec<Attr> },
    EndElement { name: Name },
    CharData(String),
    Comment(String),
    ProcInst(String),
    Directive(String),
}

/// One token of the parsed tree.
///
/// The synthetic document root carries no token. For every start-element
/// node, `children` ends with exactly one end-element node of the same
/// name. Character data, comments, processing instructions and directives
/// have no children.
#[derive(Debug)]
pub struct Node {
    token: Option<Token>,
    parent: Weak<Node>,
    children: RefCell<Vec<Rc<Node>>>,
}

impl Node {
    /// Creates the synthetic document root.
    pub fn document() -> Rc<Node> {
        Rc::new(Node {
            token: None,
            parent: Weak::new(),
            children: RefCell::new(Vec::new()),
        })
    }

    /// Creates a node that belongs to `parent` logically but is not linked
    /// into its child list. Used for fragment nodes minted by the compiler
    /// and for synthetic tokens minted by the rebalancer.
    pub fn detached(token: Token, parent: Option<&Rc<Node>>) -> Rc<Node> {
        Rc::new(Node {
            token: Some(token),
            parent: parent.map(Rc::downgrade).unwrap_or_default(),
            children: RefCell::new(Vec::new()),
        })
    }

    /// Appends a child carrying `token`, returning it.
    pub fn append(self: &Rc<Self>, token: Token) -> Rc<Node> {
        let child = Rc::new(Node {
            token: Some(token),
            parent: Rc::downgrade(self),
            children: RefCell::new(Vec::new()),
        });
        self.children.borrow_mut().push(Rc::clone(&child));
        child
    }

    /// The node's token; `None` only for the document root.
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn parent(&self) -> Option<Rc<Node>> {
        self.parent.upgrade()
    }

    /// The local name if this node is a start element.
    pub fn start_local(&self) -> Option<&str> {
        match &self.token {
            Some(Token::StartElement { name, .. }) => Some(&name.local),
            _ => None,
        }
    }
}

/// Traverses the tree depth-first in pre-order, calling `visit` with each
/// node and its depth (the root is depth 0). Traversal stops at the first
/// error, which is passed through.
pub fn walk<E>(
    root: &Rc<Node>,
    visit: &mut impl FnMut(&Rc<Node>, usize) -> Result<(), E>,
) -> Result<(), E> {
    walk_at(root, 0, visit)
}

fn walk_at<E>(
    node: &Rc<Node>,
    depth: usize,
    visit: &mut impl FnMut(&Rc<Node>, usize) -> Result<(), E>,
) -> Result<(), E> {
    visit(node, depth)?;
    for child in node.children.borrow().iter() {
        walk_at(child, depth + 1, visit)?;
    }
    Ok(())
}

/// Errors raised while parsing a content part.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed XML at byte {offset}: {source}")]
    Malformed {
        offset: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("unresolvable entity reference '&{name};' at byte {offset}")]
    UnknownEntity { name: String, offset: u64 },

    #[error("unexpected document structure at byte {offset}: {message}")]
    Structure { message: String, offset: u64 },
}

/// Parses a content part into its token tree.
///
/// Self-closing elements are expanded into start/end pairs; CDATA sections
/// and entity references are folded into the surrounding character data.
/// Everything else round-trips byte-exactly through [`writer`].
pub fn parse(data: &[u8]) -> Result<Rc<Node>, ParseError> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(false);
    reader.config_mut().expand_empty_elements = true;

    let root = Node::document();
    let mut stack = vec![Rc::clone(&root)];
    // Adjacent text, CDATA and resolved entity references coalesce into a
    // single character-data node, matching what the compiler expects.
    let mut pending = String::new();
    let mut buf = Vec::new();

    loop {
        let offset = reader.buffer_position() as u64;
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|source| ParseError::Malformed { offset, source })?;

        match event {
            Event::Text(text) => {
                let text = text
                    .decode()
                    .map_err(|source| ParseError::Malformed { offset, source: source.into() })?;
                pending.push_str(&text);
            }
            Event::CData(cdata) => {
                pending.push_str(&String::from_utf8_lossy(&cdata.into_inner()));
            }
            Event::GeneralRef(entity) => {
                let name = String::from_utf8_lossy(entity.as_ref()).into_owned();
                match resolve_reference(&name) {
                    Some(resolved) => pending.push_str(&resolved),
                    None => return Err(ParseError::UnknownEntity { name, offset }),
                }
            }
            Event::Start(start) => {
                flush_chardata(&mut pending, &stack);
                let token = Token::StartElement {
                    name: Name::from_qname(start.name()),
                    attrs: read_attrs(&start, offset)?,
                };
                let node = top(&stack, offset)?.append(token);
                stack.push(node);
            }
            // Not emitted while expand_empty_elements is set.
            Event::Empty(start) => {
                flush_chardata(&mut pending, &stack);
                let name = Name::from_qname(start.name());
                let token = Token::StartElement {
                    name: name.clone(),
                    attrs: read_attrs(&start, offset)?,
                };
                let node = top(&stack, offset)?.append(token);
                node.append(Token::EndElement { name });
            }
            Event::End(end) => {
                flush_chardata(&mut pending, &stack);
                if stack.len() < 2 {
                    return Err(ParseError::Structure {
                        message: format!(
                            "closing tag </{}> without a matching open element",
                            String::from_utf8_lossy(end.name().as_ref())
                        ),
                        offset,
                    });
                }
                let token = Token::EndElement { name: Name::from_qname(end.name()) };
                top(&stack, offset)?.append(token);
                stack.pop();
            }
            Event::Comment(text) => {
                flush_chardata(&mut pending, &stack);
                let text = String::from_utf8_lossy(text.as_ref()).into_owned();
                top(&stack, offset)?.append(Token::Comment(text));
            }
            Event::Decl(decl) => {
                flush_chardata(&mut pending, &stack);
                let text = String::from_utf8_lossy(&decl).into_owned();
                top(&stack, offset)?.append(Token::ProcInst(text));
            }
            Event::PI(pi) => {
                flush_chardata(&mut pending, &stack);
                let text = String::from_utf8_lossy(&pi).into_owned();
                top(&stack, offset)?.append(Token::ProcInst(text));
            }
            Event::DocType(text) => {
                flush_chardata(&mut pending, &stack);
                let text = String::from_utf8_lossy(text.as_ref()).trim_start().to_string();
                top(&stack, offset)?.append(Token::Directive(text));
            }
            Event::Eof => break,
        }

        buf.clear();
    }

    flush_chardata(&mut pending, &stack);

    if stack.len() != 1 {
        return Err(ParseError::Structure {
            message: format!("{} element(s) left open at end of input", stack.len() - 1),
            offset: reader.buffer_position() as u64,
        });
    }

    Ok(root)
}

fn top<'a>(stack: &'a [Rc<Node>], offset: u64) -> Result<&'a Rc<Node>, ParseError> {
    stack.last().ok_or_else(|| ParseError::Structure {
        message: "empty element stack".to_string(),
        offset,
    })
}

fn flush_chardata(pending: &mut String, stack: &[Rc<Node>]) {
    if pending.is_empty() {
        return;
    }
    if let Some(parent) = stack.last() {
        parent.append(Token::CharData(std::mem::take(pending)));
    }
}

fn read_attrs(start: &quick_xml::events::BytesStart<'_>, offset: u64) -> Result<Vec<Attr>, ParseError> {
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|source| ParseError::Malformed {
            offset,
            source: source.into(),
        })?;
        let value = attr
            .unescape_value()
            .map_err(|source| ParseError::Malformed { offset, source: source.into() })?;
        attrs.push(Attr {
            name: Name::from_qname(attr.key),
            value: value.into_owned(),
        });
    }
    Ok(attrs)
}

fn resolve_reference(name: &str) -> Option<String> {
    if let Some(code) = name.strip_prefix('#') {
        let code = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => code.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    resolve_predefined_entity(name).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
        "<p1>\n",
        "  <p2 no=\"1\">Inside P2</p2>\n",
        "  <p2 no=\"4\" be=\"5\">Before P3 <p3>Inside P3</p3> after P3</p2>\n",
        "  <!-- my comment :) -->\n",
        "</p1>"
    );

    fn serialize(root: &Rc<Node>) -> String {
        let mut tokens = Vec::new();
        walk(root, &mut |node, _| {
            tokens.push(Rc::clone(node));
            Ok::<(), ()>(())
        })
        .unwrap();
        let mut out = Vec::new();
        writer::write_nodes(&tokens, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn round_trip_is_byte_equal() {
        let root = parse(DOC.as_bytes()).unwrap();
        assert_eq!(serialize(&root), DOC);
    }

    #[test]
    fn self_closing_tags_are_expanded() {
        let root = parse(b"<a><b/></a>").unwrap();
        assert_eq!(serialize(&root), "<a><b></b></a>");
    }

    #[test]
    fn entities_fold_into_adjacent_chardata() {
        let root = parse(b"<a>x &amp; y &#33;</a>").unwrap();
        let children = root.children.borrow();
        let element = &children[0];
        let inner = element.children.borrow();
        // One coalesced character-data node plus the closing tag.
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[0].token(), Some(&Token::CharData("x & y !".to_string())));
        assert_eq!(serialize(&root), "<a>x &amp; y !</a>");
    }

    #[test]
    fn prefixes_are_preserved_literally() {
        let doc = "<text:p xmlns:text=\"urn:text\" text:style-name=\"P2\">A</text:p>";
        let root = parse(doc.as_bytes()).unwrap();
        let children = root.children.borrow();
        match children[0].token().unwrap() {
            Token::StartElement { name, attrs } => {
                assert_eq!(name.prefix.as_deref(), Some("text"));
                assert_eq!(name.local, "p");
                assert_eq!(attrs[0].name.prefix.as_deref(), Some("xmlns"));
                assert_eq!(attrs[1].name.prefix.as_deref(), Some("text"));
                assert_eq!(attrs[1].name.local, "style-name");
            }
            other => panic!("expected start element, got {other:?}"),
        }
        assert_eq!(serialize(&root), doc);
    }

    #[test]
    fn parent_links_point_upward() {
        let root = parse(b"<a><b>x</b></a>").unwrap();
        let a = Rc::clone(&root.children.borrow()[0]);
        let b = Rc::clone(&a.children.borrow()[0]);
        let x = Rc::clone(&b.children.borrow()[0]);
        assert_eq!(x.token(), Some(&Token::CharData("x".to_string())));
        assert!(Rc::ptr_eq(&x.parent().unwrap(), &b));
        assert!(Rc::ptr_eq(&b.parent().unwrap(), &a));
        assert!(Rc::ptr_eq(&a.parent().unwrap(), &root));
        assert!(root.parent().is_none());
    }

    #[test]
    fn end_element_is_last_child_of_its_start() {
        let root = parse(b"<a>x<b>y</b></a>").unwrap();
        let a = Rc::clone(&root.children.borrow()[0]);
        let children = a.children.borrow();
        match children.last().unwrap().token().unwrap() {
            Token::EndElement { name } => assert_eq!(name.local, "a"),
            other => panic!("expected end element, got {other:?}"),
        }
    }

    #[test]
    fn malformed_input_reports_offset() {
        let err = parse(b"<a><b></a>").unwrap_err();
        match err {
            ParseError::Malformed { offset, .. } => assert!(offset > 0),
            ParseError::Structure { offset, .. } => assert!(offset > 0),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn walk_yields_pre_order_token_sequence() {
        let root = parse(b"<a>x<b>y</b>z</a>").unwrap();
        let mut kinds = Vec::new();
        walk(&root, &mut |node, depth| {
            if let Some(token) = node.token() {
                let kind = match token {
                    Token::StartElement { name, .. } => format!("<{name}>@{depth}"),
                    Token::EndElement { name } => format!("</{name}>@{depth}"),
                    Token::CharData(text) => format!("{text}@{depth}"),
                    _ => String::new(),
                };
                kinds.push(kind);
            }
            Ok::<(), ()>(())
        })
        .unwrap();
        assert_eq!(
            kinds,
            vec!["<a>@1", "x@2", "<b>@2", "y@3", "</b>@3", "z@2", "</a>@2"]
        );
    }
}
