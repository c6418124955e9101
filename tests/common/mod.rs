use std::rc::Rc;

use folio::{parse, Engine, Program, Token};

pub const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Parses `doc`, compiles it and executes the engine without a model.
pub fn exec_template(doc: &str, init_script: &str) -> Engine {
    let tree = parse(doc.as_bytes()).expect("parsing test document");
    let program = Rc::new(Program::compile(&tree).expect("compiling test document"));
    let engine = Engine::new(program, None).expect("building engine");
    engine.exec(init_script).expect("executing template");
    engine
}

/// Serializes the engine's output path.
pub fn rendered(engine: &Engine) -> String {
    let mut out = Vec::new();
    engine.write_xml(&mut out).expect("serializing output");
    String::from_utf8(out).expect("output is UTF-8")
}

/// Asserts the balance invariant: every end element matches the innermost
/// unclosed start element, and nothing stays open at the end.
pub fn assert_well_formed(engine: &Engine) {
    let mut open: Vec<String> = Vec::new();
    for node in engine.output_path() {
        match node.token() {
            Some(Token::StartElement { name, .. }) => open.push(name.local.clone()),
            Some(Token::EndElement { name }) => {
                let innermost = open.pop().unwrap_or_else(|| {
                    panic!("</{}> without an open element", name.local)
                });
                assert_eq!(innermost, name.local, "mismatched end element");
            }
            _ => {}
        }
    }
    assert!(open.is_empty(), "elements left open: {open:?}");
}
