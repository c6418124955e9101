//! Restricted scripting environment.
//!
//! Templates only need iteration and formatting helpers. Everything else
//! the stock runtime ships (file access, process control, code loading,
//! the library tables) is removed from the global table before any
//! template code runs. The stock implementations of the survivors already
//! honor `__metatable`, `__pairs` and `__tostring`, so they are kept
//! rather than reimplemented.

use mlua::{Lua, Result, Value};

/// Globals that stay visible to template code.
const SAFE_GLOBALS: &[&str] = &[
    "next",
    "pairs",
    "ipairs",
    "tonumber",
    "tostring",
    "type",
    "getmetatable",
    "setmetatable",
];

/// Prunes the global table down to [`SAFE_GLOBALS`].
pub fn restrict(lua: &Lua) -> Result<()> {
    let globals = lua.globals();
    let mut doomed = Vec::new();

    for entry in globals.clone().pairs::<Value, Value>() {
        let (key, _) = entry?;
        if let Value::String(name) = &key {
            if SAFE_GLOBALS.contains(&name.to_str()?) {
                continue;
            }
        }
        doomed.push(key);
    }

    for key in doomed {
        globals.set(key, Value::Nil)?;
    }

    Ok(())
}
