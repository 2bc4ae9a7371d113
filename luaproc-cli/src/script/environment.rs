//! Execution environment builder
//!
//! Turns a parsed [`ScriptDefinition`] plus the host's bound parameter values
//! into a ready-to-run [`ExecutionContext`]: a program text made of one
//! assignment per input parameter, the record dispatcher and the transform
//! body is evaluated in a fresh engine, then the entry point is validated.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use super::codec::{Crs, Fields, InterchangeCodec};
use super::declaration::{BindingStyle, ParameterDeclaration, ParameterKind};
use super::engine::{LuaEngine, ScriptEngine};
use super::executor::RecordTransformer;
use super::parser::ScriptDefinition;

/// Global name of the user's per-record function
pub const ENTRY_POINT: &str = "func";

/// Global name of the generated JSON bridge
pub const DISPATCHER: &str = "__luaproc_dispatch";

const DISPATCHER_SOURCE: &str = r#"function __luaproc_dispatch(record)
  local result = func(json.decode(record))
  if not result then
    return nil
  end
  return json.encode(result)
end
"#;

const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Runtime value supplied by the host for one parameter
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl BoundValue {
    /// Text form used for string-like parameters
    pub fn as_text(&self) -> Option<String> {
        match self {
            BoundValue::Null => None,
            BoundValue::Text(s) => Some(s.clone()),
            BoundValue::Number(n) => Some(n.to_string()),
            BoundValue::Bool(b) => Some(b.to_string()),
        }
    }

    /// Numeric form; text is parsed as a double
    pub fn as_double(&self) -> Option<f64> {
        match self {
            BoundValue::Number(n) => Some(*n),
            BoundValue::Text(s) => s.trim().parse().ok(),
            BoundValue::Null | BoundValue::Bool(_) => None,
        }
    }
}

impl std::fmt::Display for BoundValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundValue::Null => write!(f, "null"),
            BoundValue::Text(s) => write!(f, "{}", s),
            BoundValue::Number(n) => write!(f, "{}", n),
            BoundValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Parameter name → bound value
pub type Bindings = HashMap<String, BoundValue>;

/// Values for parameters whose header declares a default.
///
/// The builder itself never applies defaults; hosts start from this map and
/// overlay what the user supplied.
pub fn default_bindings(definition: &ScriptDefinition) -> Bindings {
    definition
        .parameters()
        .iter()
        .filter_map(|p| {
            let value = match &p.kind {
                ParameterKind::String { default: Some(d) } => BoundValue::Text(d.clone()),
                ParameterKind::Number { default: Some(d), .. } => BoundValue::Number(*d),
                ParameterKind::Crs { default: Some(d) } => BoundValue::Text(d.clone()),
                ParameterKind::Boolean { default } => BoundValue::Bool(*default),
                _ => return None,
            };
            Some((p.name.clone(), value))
        })
        .collect()
}

/// Fatal failure while preparing an execution session
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// The definition carries a held header error
    InvalidScript(String),
    /// A bound value does not fit its parameter kind
    InvalidBinding { name: String, value: String },
    /// The engine could not be created or queried
    Engine(String),
    /// The composed program failed to evaluate
    Evaluation(String),
    NoEntryPoint,
    EntryPointNotCallable,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::InvalidScript(msg) => write!(f, "script is not runnable: {}", msg),
            BuildError::InvalidBinding { name, value } => {
                write!(f, "parameter '{}' expects a number, got '{}'", name, value)
            }
            BuildError::Engine(msg) => write!(f, "engine error: {}", msg),
            BuildError::Evaluation(msg) => write!(f, "failed to evaluate script: {}", msg),
            BuildError::NoEntryPoint => write!(f, "no entry point function detected"),
            BuildError::EntryPointNotCallable => write!(f, "entry point is not callable"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Compose the full program text: parameter assignments, dispatcher, body
pub fn compose_program(
    definition: &ScriptDefinition,
    bindings: &Bindings,
) -> Result<String, BuildError> {
    let mut program = String::new();

    for param in definition.parameters() {
        if param.kind.is_destination() {
            continue;
        }
        if let Some(statement) = binding_statement(param, bindings.get(&param.name))? {
            program.push_str(&statement);
            program.push('\n');
        }
    }

    program.push_str(DISPATCHER_SOURCE);
    program.push_str(definition.body());
    Ok(program)
}

fn binding_statement(
    param: &ParameterDeclaration,
    value: Option<&BoundValue>,
) -> Result<Option<String>, BuildError> {
    let literal = match (param.kind.binding_style(), value) {
        (_, None | Some(BoundValue::Null)) => "nil".to_string(),
        (BindingStyle::PassThrough, Some(_)) => {
            log::debug!(
                "Parameter '{}' ({}) is not bound directly",
                param.name,
                param.kind.keyword()
            );
            return Ok(None);
        }
        (BindingStyle::Text, Some(value)) => {
            lua_string_literal(&value.as_text().unwrap_or_default())
        }
        (BindingStyle::Number, Some(value)) => {
            let number = value.as_double().ok_or_else(|| BuildError::InvalidBinding {
                name: param.name.clone(),
                value: value.to_string(),
            })?;
            lua_number_literal(number)
        }
    };

    Ok(Some(format!("{} = {}", assignment_target(&param.name), literal)))
}

fn assignment_target(name: &str) -> String {
    if IDENTIFIER_RE.is_match(name) && !LUA_KEYWORDS.contains(&name) {
        name.to_string()
    } else {
        format!("_G[{}]", lua_string_literal(name))
    }
}

/// Quoted Lua string literal
pub fn lua_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_control() => out.push_str(&format!("\\{:03}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn lua_number_literal(value: f64) -> String {
    if value.is_nan() {
        "(0/0)".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "math.huge" } else { "-math.huge" }.to_string()
    } else {
        format!("{:?}", value)
    }
}

/// Prepares execution sessions for scripts
#[derive(Debug, Clone, Default)]
pub struct EnvironmentBuilder {
    target_crs: Crs,
}

impl EnvironmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference system records are exported in (default `EPSG:4326`)
    pub fn with_target_crs(mut self, crs: Crs) -> Self {
        self.target_crs = crs;
        self
    }

    /// Evaluate the composed program in `engine` and validate the entry point.
    ///
    /// `engine` must be freshly created; the returned context owns it.
    pub fn build<E: ScriptEngine>(
        &self,
        definition: &ScriptDefinition,
        bindings: &Bindings,
        mut engine: E,
    ) -> Result<ExecutionContext<E>, BuildError> {
        if let Some(error) = definition.error() {
            return Err(BuildError::InvalidScript(error.to_string()));
        }

        log::debug!("Building execution environment for '{}'", definition.id());

        let program = compose_program(definition, bindings)?;
        engine
            .evaluate(&program)
            .map_err(|e| BuildError::Evaluation(format!("{:#}", e)))?;

        let entry_point = engine
            .get_global(ENTRY_POINT)
            .map_err(|e| BuildError::Engine(format!("{:#}", e)))?
            .ok_or(BuildError::NoEntryPoint)?;
        if !engine.is_callable(&entry_point) {
            return Err(BuildError::EntryPointNotCallable);
        }

        let dispatcher = engine
            .get_global(DISPATCHER)
            .map_err(|e| BuildError::Engine(format!("{:#}", e)))?
            .filter(|d| engine.is_callable(d))
            .ok_or_else(|| BuildError::Engine("record dispatcher was overwritten".to_string()))?;

        Ok(ExecutionContext {
            engine,
            dispatcher,
            target_crs: self.target_crs.clone(),
            script_id: definition.id().to_string(),
        })
    }

    /// Build with a new sandboxed Lua engine
    pub fn build_lua(
        &self,
        definition: &ScriptDefinition,
        bindings: &Bindings,
    ) -> Result<ExecutionContext<LuaEngine>, BuildError> {
        let engine = LuaEngine::new().map_err(|e| BuildError::Engine(format!("{:#}", e)))?;
        self.build(definition, bindings, engine)
    }
}

/// One execution session: engine, dispatcher and export reference system
pub struct ExecutionContext<E: ScriptEngine> {
    engine: E,
    dispatcher: E::Handle,
    target_crs: Crs,
    script_id: String,
}

impl<E: ScriptEngine> ExecutionContext<E> {
    /// Pass one JSON-encoded record through the dispatcher
    pub fn dispatch(&self, record: &str) -> anyhow::Result<Option<String>> {
        self.engine.call(&self.dispatcher, &[record])
    }

    pub fn target_crs(&self) -> &Crs {
        &self.target_crs
    }

    pub fn script_id(&self) -> &str {
        &self.script_id
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Per-record executor for records in `source_crs`, decoding results
    /// with the output `fields`
    pub fn transformer(&self, source_crs: Crs, fields: Fields) -> RecordTransformer<'_, E> {
        let codec = InterchangeCodec::new(source_crs, self.target_crs.clone(), fields);
        RecordTransformer::new(self, codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Engine double recording what it was asked to evaluate
    #[derive(Default)]
    struct StubEngine {
        evaluated: Vec<String>,
        entry_point: Option<bool>,
    }

    impl ScriptEngine for StubEngine {
        type Handle = bool;

        fn evaluate(&mut self, source: &str) -> anyhow::Result<()> {
            self.evaluated.push(source.to_string());
            Ok(())
        }

        fn get_global(&self, name: &str) -> anyhow::Result<Option<bool>> {
            Ok(match name {
                ENTRY_POINT => self.entry_point,
                DISPATCHER => Some(true),
                _ => None,
            })
        }

        fn is_callable(&self, handle: &bool) -> bool {
            *handle
        }

        fn call(&self, _handle: &bool, args: &[&str]) -> anyhow::Result<Option<String>> {
            Ok(args.first().map(|a| a.to_string()))
        }
    }

    const SCRIPT: &str = "--#road_name=string Main St\n\
                          --#lanes=number 2;1;8\n\
                          --#layer=vector line\n\
                          --#result=output vector\n\
                          --#column=field layer\n\
                          function func(feature)\n\
                          \x20 return feature\n\
                          end";

    fn bindings(pairs: &[(&str, BoundValue)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_compose_program_layout() {
        let def = ScriptDefinition::from_source(SCRIPT);
        let program = compose_program(
            &def,
            &bindings(&[
                ("road_name", BoundValue::Text("Main \"St\"".into())),
                ("layer", BoundValue::Text("ignored".into())),
            ]),
        )
        .unwrap();

        let road = program.find("road_name = \"Main \\\"St\\\"\"").unwrap();
        let lanes = program.find("lanes = nil").unwrap();
        let column = program.find("column = nil").unwrap();
        let dispatcher = program.find("function __luaproc_dispatch").unwrap();
        let body = program.find("function func(feature)").unwrap();

        assert!(road < lanes && lanes < column && column < dispatcher && dispatcher < body);
        assert!(!program.contains("\nlayer ="));
        assert!(!program.contains("\nresult ="));
    }

    #[test]
    fn test_unbound_parameters_are_nil() {
        let def = ScriptDefinition::from_source(SCRIPT);
        let program = compose_program(&def, &Bindings::new()).unwrap();
        assert!(program.starts_with("road_name = nil\n"));
        assert!(program.contains("\nlayer = nil\n"));
        assert!(program.contains("\ncolumn = nil\n"));
        assert!(!program.contains("\nresult ="));

        let program =
            compose_program(&def, &bindings(&[("layer", BoundValue::Null)])).unwrap();
        assert!(program.contains("\nlayer = nil\n"));
    }

    #[test]
    fn test_number_binding_from_text() {
        let def = ScriptDefinition::from_source(SCRIPT);
        let program =
            compose_program(&def, &bindings(&[("lanes", BoundValue::Text(" 3 ".into()))])).unwrap();
        assert!(program.contains("lanes = 3.0\n"));

        let err = compose_program(&def, &bindings(&[("lanes", BoundValue::Text("wide".into()))]))
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::InvalidBinding {
                name: "lanes".into(),
                value: "wide".into()
            }
        );
    }

    #[test]
    fn test_lua_string_literal_escapes() {
        assert_eq!(lua_string_literal("plain"), "\"plain\"");
        assert_eq!(lua_string_literal("a\\b\n\"c\""), "\"a\\\\b\\n\\\"c\\\"\"");
        assert_eq!(lua_string_literal("\u{1}"), "\"\\001\"");
    }

    #[test]
    fn test_lua_number_literal() {
        assert_eq!(lua_number_literal(2.0), "2.0");
        assert_eq!(lua_number_literal(-0.25), "-0.25");
        assert_eq!(lua_number_literal(f64::INFINITY), "math.huge");
        assert_eq!(lua_number_literal(f64::NAN), "(0/0)");
    }

    #[test]
    fn test_non_identifier_names_use_globals_table() {
        assert_eq!(assignment_target("speed"), "speed");
        assert_eq!(assignment_target("end"), "_G[\"end\"]");
        assert_eq!(assignment_target("max-speed"), "_G[\"max-speed\"]");
    }

    #[test]
    fn test_build_with_stub_engine() {
        let def = ScriptDefinition::from_source(SCRIPT);
        let engine = StubEngine {
            entry_point: Some(true),
            ..Default::default()
        };

        let context = EnvironmentBuilder::new()
            .build(&def, &Bindings::new(), engine)
            .unwrap();

        assert_eq!(context.engine().evaluated.len(), 1);
        assert!(context.engine().evaluated[0].ends_with("end"));
        assert_eq!(context.target_crs(), &Crs::wgs84());
        assert_eq!(context.dispatch("{}").unwrap(), Some("{}".to_string()));
    }

    #[test]
    fn test_entry_point_validation_with_stub_engine() {
        let def = ScriptDefinition::from_source(SCRIPT);
        let builder = EnvironmentBuilder::new();

        let missing = StubEngine::default();
        assert_eq!(
            builder.build(&def, &Bindings::new(), missing).err(),
            Some(BuildError::NoEntryPoint)
        );

        let not_callable = StubEngine {
            entry_point: Some(false),
            ..Default::default()
        };
        assert_eq!(
            builder.build(&def, &Bindings::new(), not_callable).err(),
            Some(BuildError::EntryPointNotCallable)
        );
    }

    #[test]
    fn test_held_error_refuses_build() {
        let def = ScriptDefinition::from_source("--#broken line\nfunction func(f) return f end");
        let err = EnvironmentBuilder::new()
            .build(&def, &Bindings::new(), StubEngine::default())
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::InvalidScript(_)));
    }

    #[test]
    fn test_build_lua_binds_parameters() {
        let def = ScriptDefinition::from_source(
            "--#road_name=string\n\
             --#lanes=number\n\
             function func(feature)\n\
               feature.properties.name = road_name\n\
               feature.properties.lanes = lanes * 2\n\
               return feature\n\
             end",
        );
        let context = EnvironmentBuilder::new()
            .build_lua(
                &def,
                &bindings(&[
                    ("road_name", BoundValue::Text("Kerkstraat".into())),
                    ("lanes", BoundValue::Number(1.5)),
                ]),
            )
            .unwrap();

        let out = context
            .dispatch(r#"{"type":"Feature","properties":{"id":1}}"#)
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["properties"]["name"], "Kerkstraat");
        assert_eq!(value["properties"]["lanes"], serde_json::json!(3.0));
        assert_eq!(value["properties"]["id"], 1);
    }

    #[test]
    fn test_build_lua_without_entry_point() {
        let def = ScriptDefinition::from_source("x = 1");
        assert_eq!(
            EnvironmentBuilder::new()
                .build_lua(&def, &Bindings::new())
                .err(),
            Some(BuildError::NoEntryPoint)
        );

        let def = ScriptDefinition::from_source("func = 5");
        assert_eq!(
            EnvironmentBuilder::new()
                .build_lua(&def, &Bindings::new())
                .err(),
            Some(BuildError::EntryPointNotCallable)
        );
    }

    #[test]
    fn test_build_lua_syntax_error() {
        let def = ScriptDefinition::from_source("function func(");
        let err = EnvironmentBuilder::new()
            .build_lua(&def, &Bindings::new())
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Evaluation(_)));
    }

    #[test]
    fn test_falsy_result_dispatches_to_none() {
        let def = ScriptDefinition::from_source("function func(feature) return nil end");
        let context = EnvironmentBuilder::new()
            .build_lua(&def, &Bindings::new())
            .unwrap();
        assert_eq!(context.dispatch("{}").unwrap(), None);
    }

    #[test]
    fn test_default_bindings() {
        let def = ScriptDefinition::from_source(SCRIPT);
        let defaults = default_bindings(&def);
        assert_eq!(
            defaults.get("road_name"),
            Some(&BoundValue::Text("Main St".into()))
        );
        assert_eq!(defaults.get("lanes"), Some(&BoundValue::Number(2.0)));
        assert!(!defaults.contains_key("layer"));
    }
}
