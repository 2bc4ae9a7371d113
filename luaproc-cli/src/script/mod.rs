//! Lua per-record transform scripts
//!
//! A script is a Lua file whose `--#` comment header declares typed
//! parameters and outputs, followed by a global `func(feature)` that maps one
//! GeoJSON feature to zero or more features.
//!
//! # Example Script
//!
//! ```lua
//! --#Rename roads=name
//! --#Sample scripts=group
//! --#new_road_name=string
//! --#minimum_lanes=number 1;0;10
//! --#kind=enum motorway;primary;residential
//!
//! function func(feature)
//!     if feature.properties.lanes < minimum_lanes then
//!         return nil
//!     end
//!     feature.properties.ROAD_NAME = new_road_name
//!     return feature
//! end
//! ```
//!
//! # Lifecycle
//!
//! 1. [`ScriptDefinition`] parses the header once at load time. Header
//!    errors are held on the definition, not returned.
//! 2. [`EnvironmentBuilder`] binds parameter values, evaluates the script in
//!    a fresh [`LuaEngine`] and validates the entry point.
//! 3. [`RecordTransformer`] runs the transform once per record.
//!
//! # Host Functions
//!
//! - `feedback.push_info(msg)`, `feedback.push_warning(msg)`,
//!   `feedback.report_error(msg)` - Messages for the user
//! - `json.encode(value)`, `json.decode(text)`, `json.null` - JSON helpers
//! - `print(...)` - Same as `feedback.push_info`

mod builtin;
mod codec;
mod declaration;
mod discovery;
mod engine;
mod environment;
mod executor;
mod help;
mod parser;
mod stdlib;

pub use codec::{
    Crs, Field, FieldType, Fields, InterchangeCodec, Record, feature_collection, read_features,
    reproject_geometry,
};
pub use declaration::{
    BindingStyle, Declaration, DeclarationError, GeometryFilter, LayerType, OutputDeclaration,
    OutputKind, ParameterDeclaration, ParameterKind, resolve_line,
};
pub use discovery::{builtin_scripts, discover_all, discover_scripts, find_script};
pub use engine::{LuaEngine, ScriptEngine};
pub use environment::{
    Bindings, BoundValue, BuildError, EnvironmentBuilder, ExecutionContext, compose_program,
    default_bindings,
};
pub use executor::{RecordError, RecordTransformer, RunReport};
pub use help::{HelpMap, load_help};
pub use parser::{METADATA_MARKER, ScriptDefinition, ScriptOrigin};
pub use stdlib::FeedbackMessage;
