//! Template compilation: XML tree → Lua program plus node registry.
//!
//! A pre-order walk over the content tree emits one host-callback
//! statement per node, so executing the program replays the document.
//! Character data is scanned for template sentinels; script fragments are
//! copied into the program verbatim, and fragments of ordinary text that
//! share a node with sentinels are re-registered as synthetic nodes of
//! their own. The scanner state carries across node boundaries, which is
//! what lets a template block start in one element and end in another.

pub mod sentinel;

use std::rc::Rc;

use thiserror::Error;

use self::sentinel::{scan, Piece, Sentinel};
use crate::xmltree::{walk, Node, Token};

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("sentinel {found:?} {context} (node {node})")]
    InvalidSentinel {
        found: &'static str,
        context: &'static str,
        node: u32,
    },

    #[error("unterminated {0} block at end of document")]
    UnterminatedBlock(&'static str),
}

/// A compiled template: the program text and the registry that resolves
/// node ids back to tree nodes. The program references nodes only by id;
/// ids are assigned monotonically during compilation and never change.
pub struct Program {
    text: String,
    nodes: Vec<Rc<Node>>,
}

impl Program {
    pub fn compile(root: &Rc<Node>) -> Result<Program, CompileError> {
        let mut compiler = Compiler::new();
        walk(root, &mut |node, depth| compiler.step(node, depth))?;
        compiler.finish()
    }

    /// The Lua program encoding the tree.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Resolves a node id from the program back to its node.
    pub fn node(&self, id: u32) -> Option<&Rc<Node>> {
        self.nodes.get(id as usize)
    }

    /// Number of registered nodes, including synthetic fragment nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Char,
    Code,
    Print,
}

struct Compiler {
    out: String,
    nodes: Vec<Rc<Node>>,
    state: BlockState,
    /// Statements for elements encountered inside a code or print block.
    /// They are replayed once the block returns to character state, so the
    /// element structure survives a block that crosses its boundaries.
    inhibited: Vec<String>,
    indent: String,
}

impl Compiler {
    fn new() -> Self {
        Compiler {
            out: String::new(),
            nodes: Vec::new(),
            state: BlockState::Char,
            inhibited: Vec::new(),
            indent: String::new(),
        }
    }

    fn register(&mut self, node: &Rc<Node>) -> u32 {
        self.nodes.push(Rc::clone(node));
        (self.nodes.len() - 1) as u32
    }

    fn step(&mut self, node: &Rc<Node>, depth: usize) -> Result<(), CompileError> {
        let id = self.register(node);
        self.indent = " ".repeat(depth);

        match node.token() {
            // The document root is registered but has nothing to emit.
            None => Ok(()),
            Some(Token::StartElement { name, .. }) => {
                self.statement(format_args!("StartNode({id}) --  {}", name.local));
                Ok(())
            }
            Some(Token::EndElement { name }) => {
                self.statement(format_args!("EndNode({id}) --  {}", name.local));
                Ok(())
            }
            Some(Token::CharData(text)) => {
                let text = text.clone();
                self.char_data(id, node, &text)
            }
            Some(Token::Comment(_)) => {
                self.statement(format_args!("SetToken({id}) -- Type: Comment"));
                Ok(())
            }
            Some(Token::ProcInst(_)) => {
                self.statement(format_args!("SetToken({id}) -- Type: ProcInst"));
                Ok(())
            }
            Some(Token::Directive(_)) => {
                self.statement(format_args!("SetToken({id}) -- Type: Directive"));
                Ok(())
            }
        }
    }

    /// Emits one statement line, or queues it while inside a block.
    fn statement(&mut self, body: std::fmt::Arguments<'_>) {
        let line = format!("{}{}\n", self.indent, body);
        match self.state {
            BlockState::Char => self.out.push_str(&line),
            BlockState::Code | BlockState::Print => self.inhibited.push(line),
        }
    }

    fn flush_inhibited(&mut self) {
        for line in self.inhibited.drain(..) {
            self.out.push_str(&line);
        }
    }

    fn char_data(&mut self, id: u32, node: &Rc<Node>, text: &str) -> Result<(), CompileError> {
        let pieces = scan(text);
        let single = pieces.len() == 1;

        for piece in pieces {
            match piece {
                Piece::Marker(Sentinel::StartCode) => match self.state {
                    BlockState::Char => {
                        self.out.push_str(&self.indent);
                        self.state = BlockState::Code;
                    }
                    _ => {
                        return Err(CompileError::InvalidSentinel {
                            found: Sentinel::StartCode.as_str(),
                            context: "inside a code or print block",
                            node: id,
                        })
                    }
                },
                Piece::Marker(Sentinel::EndCode) => match self.state {
                    BlockState::Code => {
                        self.out.push_str(" -- CodeBlock\n");
                        self.state = BlockState::Char;
                        self.flush_inhibited();
                    }
                    _ => {
                        return Err(CompileError::InvalidSentinel {
                            found: Sentinel::EndCode.as_str(),
                            context: "outside a code block",
                            node: id,
                        })
                    }
                },
                Piece::Marker(Sentinel::StartPrint) => match self.state {
                    BlockState::Char => {
                        self.out.push_str(&self.indent);
                        self.out.push_str("Print(");
                        self.state = BlockState::Print;
                    }
                    _ => {
                        return Err(CompileError::InvalidSentinel {
                            found: Sentinel::StartPrint.as_str(),
                            context: "inside a code or print block",
                            node: id,
                        })
                    }
                },
                Piece::Marker(Sentinel::EndPrint) => match self.state {
                    BlockState::Print => {
                        self.out.push_str(") -- PrintBlock\n");
                        self.state = BlockState::Char;
                        self.flush_inhibited();
                    }
                    _ => {
                        return Err(CompileError::InvalidSentinel {
                            found: Sentinel::EndPrint.as_str(),
                            context: "outside a print block",
                            node: id,
                        })
                    }
                },
                Piece::Fragment("") => continue,
                Piece::Fragment(fragment) => match self.state {
                    // Inside a block the fragment is Lua source.
                    BlockState::Code | BlockState::Print => self.out.push_str(fragment),
                    BlockState::Char => {
                        if single {
                            self.statement(format_args!(
                                "SetToken({id}) --  {}",
                                comment_preview(fragment)
                            ));
                        } else {
                            // Text sharing a node with sentinels gets its
                            // own registered node carrying just this piece.
                            let synthetic = Node::detached(
                                Token::CharData(fragment.to_string()),
                                node.parent().as_ref(),
                            );
                            let new_id = self.register(&synthetic);
                            self.statement(format_args!(
                                "CharData({new_id}) --  {}",
                                comment_preview(fragment)
                            ));
                        }
                    }
                },
            }
        }

        Ok(())
    }

    fn finish(self) -> Result<Program, CompileError> {
        match self.state {
            BlockState::Char => Ok(Program { text: self.out, nodes: self.nodes }),
            BlockState::Code => Err(CompileError::UnterminatedBlock("code")),
            BlockState::Print => Err(CompileError::UnterminatedBlock("print")),
        }
    }
}

/// A short quoted preview of character data for program comments.
fn comment_preview(text: &str) -> String {
    let quoted = if text.chars().count() > 10 {
        let prefix: String = text.chars().take(10).collect();
        format!("\"{prefix}\"...")
    } else {
        format!("\"{text}\"")
    };
    quoted.replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmltree::parse;

    const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

    fn compile(doc: &str) -> Program {
        let tree = parse(doc.as_bytes()).unwrap();
        Program::compile(&tree).unwrap()
    }

    #[test]
    fn encodes_tree_as_program() {
        let doc = format!(
            "{XML_HEADER}\n<p1>\n  <p2 no=\"1\">Inside P2</p2>\n  <p2 no=\"2\">Inside P2 again</p2>\n  \
             <p2 no=\"3\"><p3>Inside P3</p3></p2>\n  <p2 no=\"4\" be=\"5\">Before P3 <p3>Inside P3</p3> after P3</p2>\n  \
             <!-- my comment :) -->\n  <p2 no=\"5\">[[ if (A) ]]Hallo [# A #]</p2>\n  <p2 no=\"6\">[[ endif ]]</p2>\n</p1>"
        );

        let want = concat!(
            " SetToken(1) -- Type: ProcInst\n",
            " SetToken(2) --  \"\\n\\n\"\n",
            " StartNode(3) --  p1\n",
            "  SetToken(4) --  \"\\n  \"\n",
            "  StartNode(5) --  p2\n",
            "   SetToken(6) --  \"Inside P2\"\n",
            "   EndNode(7) --  p2\n",
            "  SetToken(8) --  \"\\n  \"\n",
            "  StartNode(9) --  p2\n",
            "   SetToken(10) --  \"Inside P2 \"...\n",
            "   EndNode(11) --  p2\n",
            "  SetToken(12) --  \"\\n  \"\n",
            "  StartNode(13) --  p2\n",
            "   StartNode(14) --  p3\n",
            "    SetToken(15) --  \"Inside P3\"\n",
            "    EndNode(16) --  p3\n",
            "   EndNode(17) --  p2\n",
            "  SetToken(18) --  \"\\n  \"\n",
            "  StartNode(19) --  p2\n",
            "   SetToken(20) --  \"Before P3 \"\n",
            "   StartNode(21) --  p3\n",
            "    SetToken(22) --  \"Inside P3\"\n",
            "    EndNode(23) --  p3\n",
            "   SetToken(24) --  \" after P3\"\n",
            "   EndNode(25) --  p2\n",
            "  SetToken(26) --  \"\\n  \"\n",
            "  SetToken(27) -- Type: Comment\n",
            "  SetToken(28) --  \"\\n  \"\n",
            "  StartNode(29) --  p2\n",
            "    if (A)  -- CodeBlock\n",
            "   CharData(31) --  \"Hallo \"\n",
            "   Print( A ) -- PrintBlock\n",
            "   EndNode(32) --  p2\n",
            "  SetToken(33) --  \"\\n  \"\n",
            "  StartNode(34) --  p2\n",
            "    endif  -- CodeBlock\n",
            "   EndNode(36) --  p2\n",
            "  SetToken(37) --  \"\\n\"\n",
            "  EndNode(38) --  p1\n",
        );

        let program = compile(&doc);
        assert_eq!(program.text(), want);
        assert_eq!(program.len(), 39);
    }

    #[test]
    fn compilation_is_deterministic() {
        let doc = format!("{XML_HEADER}<p><ul><li>A[[ if x then ]]B[[ end ]]</li></ul></p>");
        let first = compile(&doc);
        let second = compile(&doc);
        assert_eq!(first.text(), second.text());
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn synthetic_fragments_reference_the_original_parent() {
        let program = compile("<p>A[[ x = 1 ]]B</p>");
        // 0 root, 1 <p>, 2 chardata, 3 "A", 4 "B", 5 </p>
        let fragment = program.node(3).unwrap();
        assert_eq!(fragment.token(), Some(&Token::CharData("A".to_string())));
        let parent = fragment.parent().unwrap();
        assert_eq!(parent.start_local(), Some("p"));
        assert!(Rc::ptr_eq(&parent, program.node(1).unwrap()));
    }

    #[test]
    fn elements_inside_a_block_are_inhibited_until_it_closes() {
        let program = compile("<p>[[ if true <span>then </span>]]X[[ end ]]</p>");
        let want = concat!(
            " StartNode(1) --  p\n",
            "   if true then  -- CodeBlock\n",
            "  StartNode(3) --  span\n",
            "   EndNode(5) --  span\n",
            "  CharData(7) --  \"X\"\n",
            "   end  -- CodeBlock\n",
            "  EndNode(8) --  p\n",
        );
        assert_eq!(program.text(), want);
    }

    #[test]
    fn closing_sentinel_without_opener_is_rejected() {
        let tree = parse(b"<p>oops ]] here</p>").unwrap();
        assert!(matches!(
            Program::compile(&tree),
            Err(CompileError::InvalidSentinel { found: "]]", .. })
        ));
    }

    #[test]
    fn print_terminator_without_opener_is_rejected() {
        let tree = parse(b"<p>oops #] here</p>").unwrap();
        assert!(matches!(
            Program::compile(&tree),
            Err(CompileError::InvalidSentinel { found: "#]", .. })
        ));
    }

    #[test]
    fn nested_block_opener_is_rejected() {
        let tree = parse(b"<p>[[ a [[ b ]]</p>").unwrap();
        assert!(matches!(
            Program::compile(&tree),
            Err(CompileError::InvalidSentinel { found: "[[", .. })
        ));
    }

    #[test]
    fn unterminated_block_is_rejected() {
        let tree = parse(b"<p>[[ if x then</p>").unwrap();
        assert!(matches!(
            Program::compile(&tree),
            Err(CompileError::UnterminatedBlock("code"))
        ));
    }

    #[test]
    fn block_state_carries_across_elements() {
        // The code block opens inside <p1> and closes inside <p2>; the
        // program must still be a single well-formed Lua `if`.
        let program = compile("<a><p1>x[[ if q then ]]</p1><p2>[[ end ]]y</p2></a>");
        assert!(program.text().contains("if q then"));
        assert!(program.text().contains("end"));
    }
}
