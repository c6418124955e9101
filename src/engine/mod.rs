//! Template execution.
//!
//! The engine embeds a Lua runtime, binds the compiled program's callbacks
//! as host functions, injects the data model as globals, and assembles the
//! output token stream. Each callback runs the iteration middleware and the
//! rebalancer before appending its node, so the output stays a prefix of a
//! well-formed XML token stream no matter what the template's control flow
//! does to the original element boundaries.

mod reach;
mod rebalance;
mod sandbox;

pub use rebalance::RebalanceError;

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::sync::Mutex;

use mlua::{Lua, LuaSerdeExt, MultiValue};
use thiserror::Error;

use self::reach::ReachCounter;
use self::rebalance::rebalance;
use crate::compiler::Program;
use crate::document::Model;
use crate::xmltree::writer::{self, SerializeError};
use crate::xmltree::{Node, Token};

/// The script raised an error. The runtime's message, which embeds the
/// chunk name and line, is preserved; `location` names the chunk that was
/// executing.
#[derive(Error, Debug)]
#[error("{location}: {message}")]
pub struct ScriptError {
    pub message: String,
    pub location: &'static str,
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Rebalance(#[from] RebalanceError),
}

/// Mutable state of a single `exec` run. Cleared on entry, retained for
/// read-only inspection after exit.
#[derive(Default)]
pub(crate) struct ExecState {
    /// The authoritative output stream.
    pub(crate) output_path: Vec<Rc<Node>>,
    /// Currently open start elements.
    pub(crate) open_stack: Vec<Rc<Node>>,
    /// One human-readable line per callback.
    pub(crate) trace: Vec<String>,
    pub(crate) reach: ReachCounter,
    /// Element local names that demarcate loop repetition.
    pub(crate) iteration_roots: Vec<String>,
}

/// Executes compiled template programs against a data model.
///
/// Not reentrant: `exec` calls on one engine are serialized by an internal
/// lock. Compiling other documents concurrently is fine.
pub struct Engine {
    lua: Lua,
    program: Rc<Program>,
    state: Rc<RefCell<ExecState>>,
    exec_lock: Mutex<()>,
}

impl Engine {
    /// Builds an engine for `program`, with the model's `data` entries
    /// bound as script globals and `metadata` bound under `metadata`.
    pub fn new(program: Rc<Program>, model: Option<&Model>) -> Result<Engine, ScriptError> {
        let lua = Lua::new();
        let state = Rc::new(RefCell::new(ExecState::default()));

        setup(&lua, &program, &state, model)
            .map_err(|err| ScriptError { message: err.to_string(), location: "engine setup" })?;

        Ok(Engine { lua, program, state, exec_lock: Mutex::new(()) })
    }

    /// Runs the init script, then the template program. State from any
    /// previous run is discarded on entry; on failure the state accumulated
    /// so far stays readable through [`Engine::trace`] and
    /// [`Engine::output_path`].
    pub fn exec(&self, init_script: &str) -> Result<(), ExecError> {
        let _guard = self.exec_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        {
            let mut state = self.state.borrow_mut();
            state.output_path.clear();
            state.open_stack.clear();
            state.trace.clear();
            state.reach.clear();
            state.iteration_roots.clear();
        }

        log::debug!(
            "executing template program: {} bytes, {} registered nodes",
            self.program.text().len(),
            self.program.len()
        );

        self.lua
            .load(init_script)
            .set_name("init")
            .exec()
            .map_err(|err| wrap_exec_error(err, "init script"))?;

        self.lua
            .load(self.program.text())
            .set_name("template")
            .exec()
            .map_err(|err| wrap_exec_error(err, "template program"))?;

        log::debug!(
            "template executed: {} output tokens",
            self.state.borrow().output_path.len()
        );

        Ok(())
    }

    /// The output stream accumulated by the last `exec`.
    pub fn output_path(&self) -> Vec<Rc<Node>> {
        self.state.borrow().output_path.clone()
    }

    /// One line per callback of the last `exec`.
    pub fn trace(&self) -> Vec<String> {
        self.state.borrow().trace.clone()
    }

    /// Serializes the output stream of the last `exec`.
    pub fn write_xml<W: Write>(&self, out: &mut W) -> Result<(), SerializeError> {
        writer::write_nodes(&self.state.borrow().output_path, out)
    }
}

fn setup(
    lua: &Lua,
    program: &Rc<Program>,
    state: &Rc<RefCell<ExecState>>,
    model: Option<&Model>,
) -> mlua::Result<()> {
    sandbox::restrict(lua)?;

    let globals = lua.globals();

    if let Some(model) = model {
        for (key, value) in &model.data {
            globals.set(key.as_str(), lua.to_value(value)?)?;
        }
        globals.set("metadata", lua.to_value(&model.metadata)?)?;
    }

    // SetToken(id): append the node as-is.
    {
        let state = Rc::clone(state);
        let program = Rc::clone(program);
        globals.set(
            "SetToken",
            lua.create_function(move |lua, id: u32| {
                let node = lookup(&program, id)?;
                enter_callback(lua, &state, Some(&node))?;
                let mut state = state.borrow_mut();
                rebalance(&mut state, &node).map_err(mlua::Error::external)?;
                state.output_path.push(Rc::clone(&node));
                state.trace.push(format!("SetToken({id})"));
                Ok(())
            })?,
        )?;
    }

    // StartNode(id): append and open the element.
    {
        let state = Rc::clone(state);
        let program = Rc::clone(program);
        globals.set(
            "StartNode",
            lua.create_function(move |lua, id: u32| {
                let node = lookup(&program, id)?;
                enter_callback(lua, &state, Some(&node))?;
                let mut state = state.borrow_mut();
                rebalance(&mut state, &node).map_err(mlua::Error::external)?;
                state.output_path.push(Rc::clone(&node));
                state.trace.push(format!("StartNode({id})"));
                state.open_stack.push(node);
                Ok(())
            })?,
        )?;
    }

    // EndNode(id): append and close the innermost open element.
    {
        let state = Rc::clone(state);
        let program = Rc::clone(program);
        globals.set(
            "EndNode",
            lua.create_function(move |lua, id: u32| {
                let node = lookup(&program, id)?;
                enter_callback(lua, &state, Some(&node))?;
                let mut state = state.borrow_mut();
                rebalance(&mut state, &node).map_err(mlua::Error::external)?;
                state.output_path.push(node);
                state.trace.push(format!("EndNode({id})"));
                if state.open_stack.pop().is_none() {
                    return Err(mlua::Error::external(RebalanceError(
                        "end tag with no open element".to_string(),
                    )));
                }
                Ok(())
            })?,
        )?;
    }

    // CharData(id): append a synthetic fragment node.
    {
        let state = Rc::clone(state);
        let program = Rc::clone(program);
        globals.set(
            "CharData",
            lua.create_function(move |lua, id: u32| {
                let node = lookup(&program, id)?;
                enter_callback(lua, &state, Some(&node))?;
                let mut state = state.borrow_mut();
                rebalance(&mut state, &node).map_err(mlua::Error::external)?;
                state.output_path.push(node);
                state.trace.push(format!("CharData({id})"));
                Ok(())
            })?,
        )?;
    }

    // Print(...): stringify the arguments and append them as character
    // data under the innermost open element.
    {
        let state = Rc::clone(state);
        globals.set(
            "Print",
            lua.create_function(move |lua, args: MultiValue| {
                enter_callback(lua, &state, None)?;

                let tostring: mlua::Function = lua.globals().get("tostring")?;
                let mut rendered = Vec::with_capacity(args.len());
                for value in args {
                    rendered.push(tostring.call::<_, String>(value)?);
                }

                let mut state = state.borrow_mut();
                let Some(parent) = state.open_stack.last().cloned() else {
                    return Err(mlua::Error::RuntimeError(
                        "Print called outside of any open element".to_string(),
                    ));
                };
                state.trace.push("Print(???)".to_string());
                let node = Node::detached(Token::CharData(rendered.join("\t")), Some(&parent));
                state.output_path.push(node);
                Ok(())
            })?,
        )?;
    }

    // SetIterationNodes({...}): declare the loop container elements.
    {
        let state = Rc::clone(state);
        globals.set(
            "SetIterationNodes",
            lua.create_function(move |_, roots: Vec<String>| {
                log::trace!("iteration roots set to {roots:?}");
                state.borrow_mut().iteration_roots = roots;
                Ok(())
            })?,
        )?;
    }

    Ok(())
}

fn lookup(program: &Rc<Program>, id: u32) -> mlua::Result<Rc<Node>> {
    program
        .node(id)
        .cloned()
        .ok_or_else(|| mlua::Error::RuntimeError(format!("unknown node id {id}")))
}

/// Iteration middleware, run before every node-appending callback.
///
/// The first execution at a given source line passes through. A repeated
/// execution is a loop re-entry: if one of the incoming node's ancestors
/// is a declared iteration root, the open stack is rebalanced to that
/// origin (closing it), so the following callbacks reopen it and each
/// loop pass gets a fresh container. The reach counter restarts at that
/// point so the rest of the pass counts as first visits.
fn enter_callback(
    lua: &Lua,
    state: &Rc<RefCell<ExecState>>,
    incoming: Option<&Rc<Node>>,
) -> mlua::Result<()> {
    let location = current_location(lua);
    let mut state = state.borrow_mut();

    if state.reach.add(&location) == 0 {
        return Ok(());
    }
    if state.iteration_roots.is_empty() {
        return Ok(());
    }

    // Scan the ancestors; the outermost declared root wins.
    let mut cursor = match incoming {
        Some(node) => node.parent(),
        // A Print node's parent will be the innermost open element.
        None => state.open_stack.last().cloned(),
    };
    let mut origin = None;
    while let Some(node) = cursor {
        if let Some(local) = node.start_local() {
            if state.iteration_roots.iter().any(|root| root == local) {
                origin = Some(Rc::clone(&node));
            }
        }
        cursor = node.parent();
    }

    // Not inside a declared iteration container: a plain re-entry, the
    // normal rebalancer will cope.
    let Some(origin) = origin else {
        return Ok(());
    };

    log::trace!(
        "loop re-entry at {location}, rebalancing to iteration origin <{}>",
        origin.start_local().unwrap_or_default()
    );
    rebalance(&mut state, &origin).map_err(mlua::Error::external)?;
    state.reach.clear();
    state.reach.add(&location);

    Ok(())
}

/// The `chunk:line` of the script statement that invoked the running
/// callback, used as the reach-counter key.
fn current_location(lua: &Lua) -> String {
    lua.inspect_stack(1)
        .map(|debug| {
            let source = debug
                .source()
                .short_src
                .map(|src| src.into_owned())
                .unwrap_or_default();
            format!("{source}:{}", debug.curr_line())
        })
        .unwrap_or_default()
}

fn wrap_exec_error(error: mlua::Error, location: &'static str) -> ExecError {
    if let Some(rebalance) = find_rebalance_error(&error) {
        return ExecError::Rebalance(rebalance);
    }
    ExecError::Script(ScriptError { message: error.to_string(), location })
}

fn find_rebalance_error(error: &mlua::Error) -> Option<RebalanceError> {
    match error {
        mlua::Error::CallbackError { cause, .. } => find_rebalance_error(cause),
        mlua::Error::ExternalError(external) => external.downcast_ref::<RebalanceError>().cloned(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Program;
    use crate::xmltree::parse;

    fn run(doc: &str, init: &str) -> Engine {
        let tree = parse(doc.as_bytes()).unwrap();
        let program = Rc::new(Program::compile(&tree).unwrap());
        let engine = Engine::new(program, None).unwrap();
        engine.exec(init).unwrap();
        engine
    }

    fn rendered(engine: &Engine) -> String {
        let mut out = Vec::new();
        engine.write_xml(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn exec_replays_a_plain_document() {
        let engine = run("<a><b>x</b></a>", "");
        assert_eq!(rendered(&engine), "<a><b>x</b></a>");
        assert_eq!(
            engine.trace(),
            vec!["StartNode(1)", "StartNode(2)", "SetToken(3)", "EndNode(4)", "EndNode(5)"]
        );
    }

    #[test]
    fn exec_clears_state_between_runs() {
        let engine = run("<a>x</a>", "");
        let first = engine.output_path().len();
        engine.exec("").unwrap();
        assert_eq!(engine.output_path().len(), first);
    }

    #[test]
    fn model_entries_become_globals() {
        let model: Model = serde_json::from_str(
            r#"{"data": {"greeting": "Hello", "count": 2}, "metadata": {"author": "me"}}"#,
        )
        .unwrap();
        let tree = parse(b"<a>[# greeting #]-[# count #]-[# metadata.author #]</a>").unwrap();
        let program = Rc::new(Program::compile(&tree).unwrap());
        let engine = Engine::new(program, Some(&model)).unwrap();
        engine.exec("").unwrap();
        let mut out = Vec::new();
        engine.write_xml(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "<a>Hello-2-me</a>");
    }

    #[test]
    fn print_joins_arguments_with_tabs() {
        let engine = run("<a>[# 1, \"x\" #]</a>", "");
        assert_eq!(rendered(&engine), "<a>1\tx</a>");
    }

    #[test]
    fn script_errors_keep_the_partial_trace() {
        let tree = parse(b"<a>x[[ nosuchfunction() ]]y</a>").unwrap();
        let program = Rc::new(Program::compile(&tree).unwrap());
        let engine = Engine::new(program, None).unwrap();
        let err = engine.exec("").unwrap_err();
        assert!(matches!(err, ExecError::Script(_)));
        // The callbacks before the failure are still visible.
        assert!(!engine.trace().is_empty());
        assert!(!engine.output_path().is_empty());
    }

    #[test]
    fn init_script_errors_name_the_init_chunk() {
        let tree = parse(b"<a>x</a>").unwrap();
        let program = Rc::new(Program::compile(&tree).unwrap());
        let engine = Engine::new(program, None).unwrap();
        let err = engine.exec("this is not lua").unwrap_err();
        match err {
            ExecError::Script(script) => assert_eq!(script.location, "init script"),
            other => panic!("expected script error, got {other:?}"),
        }
    }
}
