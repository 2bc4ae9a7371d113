//! Host functions available to scripts
//!
//! - `feedback.push_info(msg)`, `feedback.push_warning(msg)`,
//!   `feedback.report_error(msg)`: messages for the user, captured per
//!   session for the host to display
//! - `print(...)`: same as `feedback.push_info`, so scripts never write to
//!   the host's stdout
//! - `json.encode(value)`, `json.decode(text)`: JSON interchange used by the
//!   record dispatcher
//! - `json.null`: sentinel for a JSON `null` that must survive inside an
//!   array; decoded arrays keep their shape when re-encoded, even when empty

use mlua::{Function, Lua, MultiValue, Result as LuaResult, Table, Value};
use std::sync::{Arc, Mutex};

/// Message emitted by a script through the `feedback` table
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackMessage {
    Info(String),
    Warning(String),
    Error(String),
}

impl std::fmt::Display for FeedbackMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedbackMessage::Info(msg) => write!(f, "{}", msg),
            FeedbackMessage::Warning(msg) => write!(f, "warning: {}", msg),
            FeedbackMessage::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

type FeedbackSink = Arc<Mutex<Vec<FeedbackMessage>>>;

const ARRAY_METATABLE: &str = "luaproc.json_array";
const ARRAY_MARKER_KEY: &str = "__jsontype";

/// Register the `feedback` and `json` tables and replace `print`
pub fn register_stdlib(lua: &Lua, sink: FeedbackSink) -> LuaResult<()> {
    let feedback = lua.create_table()?;
    feedback.set("push_info", create_feedback_fn(lua, sink.clone(), FeedbackMessage::Info)?)?;
    feedback.set(
        "push_warning",
        create_feedback_fn(lua, sink.clone(), FeedbackMessage::Warning)?,
    )?;
    feedback.set(
        "report_error",
        create_feedback_fn(lua, sink.clone(), FeedbackMessage::Error)?,
    )?;
    lua.globals().set("feedback", feedback)?;

    lua.globals().set("print", create_print_fn(lua, sink)?)?;

    let json = lua.create_table()?;
    json.set("encode", create_json_encode_fn(lua)?)?;
    json.set("decode", create_json_decode_fn(lua)?)?;
    json.set("null", Value::NULL)?;
    lua.globals().set("json", json)?;

    Ok(())
}

/// Queue a message for the host; the log only sees it at debug level
fn push(sink: &FeedbackSink, message: FeedbackMessage) {
    log::debug!(target: "luaproc::script", "{}", message);
    if let Ok(mut messages) = sink.lock() {
        messages.push(message);
    }
}

/// feedback.push_info(msg) and friends
fn create_feedback_fn(
    lua: &Lua,
    sink: FeedbackSink,
    make: fn(String) -> FeedbackMessage,
) -> LuaResult<Function> {
    lua.create_function(move |_, msg: Value| {
        push(&sink, make(display_value(&msg)));
        Ok(())
    })
}

/// print(...) joins its arguments with tabs, like the stock version
fn create_print_fn(lua: &Lua, sink: FeedbackSink) -> LuaResult<Function> {
    lua.create_function(move |_, args: MultiValue| {
        let line = args
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join("\t");
        push(&sink, FeedbackMessage::Info(line));
        Ok(())
    })
}

/// json.encode(value) -> string
fn create_json_encode_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, value: Value| {
        let json = lua_to_json(value)?;
        serde_json::to_string(&json).map_err(mlua::Error::external)
    })
}

/// json.decode(text) -> value
fn create_json_decode_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, text: String| {
        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(mlua::Error::external)?;
        json_to_lua(lua, &json)
    })
}

/// Shared metatable tagging tables decoded from JSON arrays
fn array_metatable(lua: &Lua) -> LuaResult<Table> {
    if let Some(mt) = lua.named_registry_value::<Option<Table>>(ARRAY_METATABLE)? {
        return Ok(mt);
    }
    let mt = lua.create_table()?;
    mt.raw_set(ARRAY_MARKER_KEY, "array")?;
    lua.set_named_registry_value(ARRAY_METATABLE, &mt)?;
    Ok(mt)
}

fn is_marked_array(table: &Table) -> LuaResult<bool> {
    match table.metatable() {
        Some(mt) => {
            let marker: Option<String> = mt.raw_get(ARRAY_MARKER_KEY)?;
            Ok(marker.as_deref() == Some("array"))
        }
        None => Ok(false),
    }
}

/// Convert JSON value to Lua value.
///
/// `null` becomes `nil` as an object member (the key is absent) and
/// `json.null` as an array element, so array lengths are kept.
pub fn json_to_lua(lua: &Lua, value: &serde_json::Value) -> LuaResult<Value> {
    match value {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Number(f))
            } else {
                Ok(Value::Nil)
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(lua.create_string(s)?)),
        serde_json::Value::Array(arr) => {
            let table = lua.create_table()?;
            for (i, item) in arr.iter().enumerate() {
                let value = match item {
                    serde_json::Value::Null => Value::NULL,
                    other => json_to_lua(lua, other)?,
                };
                table.raw_set(i + 1, value)?;
            }
            table.set_metatable(Some(array_metatable(lua)?));
            Ok(Value::Table(table))
        }
        serde_json::Value::Object(obj) => {
            let table = lua.create_table()?;
            for (key, val) in obj {
                table.raw_set(key.as_str(), json_to_lua(lua, val)?)?;
            }
            Ok(Value::Table(table))
        }
    }
}

/// Convert Lua value to JSON.
///
/// A table is an array when its keys are exactly `1..=n`. An empty table
/// becomes an empty object unless it was decoded from a JSON array.
pub fn lua_to_json(value: Value) -> LuaResult<serde_json::Value> {
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(b)),
        Value::Integer(i) => Ok(serde_json::json!(i)),
        Value::Number(n) => Ok(serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)),
        Value::String(s) => Ok(serde_json::Value::String(s.to_str()?.to_string())),
        Value::Table(t) => {
            let len = t.raw_len();
            let pair_count = t.clone().pairs::<Value, Value>().count();

            if len == pair_count && (len > 0 || is_marked_array(&t)?) {
                let mut arr = Vec::with_capacity(len);
                for i in 1..=len {
                    arr.push(lua_to_json(t.raw_get::<Value>(i)?)?);
                }
                return Ok(serde_json::Value::Array(arr));
            }

            let mut obj = serde_json::Map::new();
            for pair in t.pairs::<Value, Value>() {
                let (k, v) = pair?;
                let key = match k {
                    Value::String(s) => s.to_str()?.to_string(),
                    Value::Integer(i) => i.to_string(),
                    _ => continue,
                };
                obj.insert(key, lua_to_json(v)?);
            }
            Ok(serde_json::Value::Object(obj))
        }
        Value::LightUserData(ud) if ud.0.is_null() => Ok(serde_json::Value::Null),
        Value::Function(_) | Value::Thread(_) | Value::UserData(_) | Value::LightUserData(_) => {
            Err(mlua::Error::runtime(format!(
                "cannot encode a {} value as JSON",
                value.type_name()
            )))
        }
        _ => Ok(serde_json::Value::Null),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        other => format!("<{}>", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_lua() -> (Lua, FeedbackSink) {
        let lua = Lua::new();
        let sink: FeedbackSink = Arc::new(Mutex::new(Vec::new()));
        register_stdlib(&lua, sink.clone()).unwrap();
        (lua, sink)
    }

    #[test]
    fn test_feedback_is_captured() {
        let (lua, sink) = make_lua();
        lua.load(
            r#"
            feedback.push_info("Processing started")
            feedback.push_warning("This is a warning")
            feedback.report_error("Bad value")
            print("a", 1, true)
            "#,
        )
        .exec()
        .unwrap();

        let messages = sink.lock().unwrap();
        assert_eq!(
            *messages,
            vec![
                FeedbackMessage::Info("Processing started".into()),
                FeedbackMessage::Warning("This is a warning".into()),
                FeedbackMessage::Error("Bad value".into()),
                FeedbackMessage::Info("a\t1\ttrue".into()),
            ]
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let (lua, _) = make_lua();

        let original = serde_json::json!({
            "name": "Test",
            "value": 42,
            "ratio": 0.5,
            "nested": {
                "array": [1, 2, 3],
                "boolean": true
            }
        });

        let lua_value = json_to_lua(&lua, &original).unwrap();
        let result = lua_to_json(lua_value).unwrap();

        assert_eq!(original, result);
    }

    #[test]
    fn test_json_functions_in_lua() {
        let (lua, _) = make_lua();
        let encoded: String = lua
            .load(r#"local v = json.decode('{"a":[1,2],"b":"x"}'); v.c = 3; return json.encode(v)"#)
            .eval()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, serde_json::json!({"a": [1, 2], "b": "x", "c": 3}));
    }

    #[test]
    fn test_nulls_and_empty_arrays_survive_roundtrip() {
        let (lua, _) = make_lua();
        let original = serde_json::json!({"a": [1, null, 3], "b": [], "c": {}});
        let lua_value = json_to_lua(&lua, &original).unwrap();
        assert_eq!(lua_to_json(lua_value).unwrap(), original);

        let encoded: String = lua
            .load(r#"local v = json.decode('{"a":[null,2],"b":[],"gone":null}'); return json.encode(v)"#)
            .eval()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, serde_json::json!({"a": [null, 2], "b": []}));
    }

    #[test]
    fn test_json_null_sentinel() {
        let (lua, _) = make_lua();
        let encoded: String = lua
            .load("return json.encode({ json.null, 1, { x = json.null } })")
            .eval()
            .unwrap();
        assert_eq!(encoded, r#"[null,1,{"x":null}]"#);

        let length: i64 = lua.load("return #json.decode('[null, null]')").eval().unwrap();
        assert_eq!(length, 2);
    }

    #[test]
    fn test_mixed_table_is_object() {
        let (lua, _) = make_lua();
        let value: Value = lua.load("return { 10, 20, key = 'v' }").eval().unwrap();
        let json = lua_to_json(value).unwrap();
        assert_eq!(json, serde_json::json!({"1": 10, "2": 20, "key": "v"}));
    }

    #[test]
    fn test_decode_invalid_json_errors() {
        let (lua, _) = make_lua();
        assert!(lua.load("json.decode('{not json')").exec().is_err());
    }

    #[test]
    fn test_encode_function_errors() {
        let (lua, _) = make_lua();
        assert!(lua.load("json.encode({ f = function() end })").exec().is_err());
    }
}
