//! Embedded scripting engine
//!
//! [`ScriptEngine`] is the narrow capability the environment builder and the
//! record executor need from an interpreter: evaluate text, look up a
//! global, check whether it can be called, and call it with string
//! arguments. [`LuaEngine`] implements it on top of a sandboxed Lua 5.4
//! state.

use anyhow::{Context, Result, bail};
use mlua::{Function, Lua, MultiValue, StdLib, Value};
use std::sync::{Arc, Mutex};

use super::stdlib::{FeedbackMessage, register_stdlib};

/// Capability interface over an embedded interpreter
pub trait ScriptEngine {
    /// Reference to a global value inside the engine
    type Handle;

    /// Evaluate a program text in the engine's global scope
    fn evaluate(&mut self, source: &str) -> Result<()>;

    /// Look up a global by name; `None` when unset
    fn get_global(&self, name: &str) -> Result<Option<Self::Handle>>;

    /// Whether the value can be invoked
    fn is_callable(&self, handle: &Self::Handle) -> bool;

    /// Call a value with string arguments.
    ///
    /// Returns `None` when the call yields nothing (nil or false).
    fn call(&self, handle: &Self::Handle, args: &[&str]) -> Result<Option<String>>;
}

/// Memory cap for a single script session
const MEMORY_LIMIT: usize = 256 * 1024 * 1024;

/// Chunk name used in Lua error messages
const CHUNK_NAME: &str = "=script";

/// A sandboxed Lua runtime for executing transform scripts
pub struct LuaEngine {
    lua: Lua,
    feedback: Arc<Mutex<Vec<FeedbackMessage>>>,
}

impl LuaEngine {
    /// Create a new sandboxed Lua runtime
    pub fn new() -> Result<Self> {
        // No io, os, debug or package: scripts only see data they are given
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            mlua::LuaOptions::default(),
        )
        .context("Failed to create Lua runtime")?;

        lua.set_memory_limit(MEMORY_LIMIT)?;

        let feedback = Arc::new(Mutex::new(Vec::new()));
        register_stdlib(&lua, feedback.clone()).context("Failed to register stdlib")?;

        Ok(LuaEngine { lua, feedback })
    }

    /// Drain feedback messages emitted by the script so far
    pub fn take_feedback(&self) -> Vec<FeedbackMessage> {
        self.feedback
            .lock()
            .map(|mut messages| std::mem::take(&mut *messages))
            .unwrap_or_default()
    }

    /// Get access to the underlying Lua instance
    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}

impl ScriptEngine for LuaEngine {
    type Handle = Value;

    fn evaluate(&mut self, source: &str) -> Result<()> {
        self.lua
            .load(source)
            .set_name(CHUNK_NAME)
            .exec()
            .context("Failed to evaluate script")
    }

    fn get_global(&self, name: &str) -> Result<Option<Value>> {
        let value: Value = self
            .lua
            .globals()
            .raw_get(name)
            .with_context(|| format!("Failed to read global '{}'", name))?;
        Ok(if value.is_nil() { None } else { Some(value) })
    }

    fn is_callable(&self, handle: &Value) -> bool {
        match handle {
            Value::Function(_) => true,
            Value::Table(t) => call_metamethod(t).is_some(),
            _ => false,
        }
    }

    fn call(&self, handle: &Value, args: &[&str]) -> Result<Option<String>> {
        let mut values = args
            .iter()
            .map(|a| self.lua.create_string(a).map(Value::String))
            .collect::<mlua::Result<Vec<_>>>()?;

        let result: Value = match handle {
            Value::Function(f) => f.call::<Value>(MultiValue::from_vec(values))?,
            Value::Table(t) => {
                let f = call_metamethod(t).context("Table has no __call metamethod")?;
                values.insert(0, Value::Table(t.clone()));
                f.call::<Value>(MultiValue::from_vec(values))?
            }
            other => bail!("Cannot call a {} value", other.type_name()),
        };

        match result {
            Value::Nil | Value::Boolean(false) => Ok(None),
            Value::Boolean(true) => Ok(Some("true".to_string())),
            Value::Integer(i) => Ok(Some(i.to_string())),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::String(s) => Ok(Some(s.to_str()?.to_string())),
            other => bail!("Call returned a {} value, expected a string", other.type_name()),
        }
    }
}

fn call_metamethod(table: &mlua::Table) -> Option<Function> {
    table
        .metatable()
        .and_then(|mt| mt.raw_get::<Option<Function>>("__call").ok().flatten())
}
