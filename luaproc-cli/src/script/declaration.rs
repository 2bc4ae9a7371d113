//! Header declarations
//!
//! Decodes a single `token=type` header line into either an output
//! declaration or an input-parameter declaration. Output resolution is tried
//! first; parameter resolution runs through an ordered table of per-kind
//! decoders until one claims the type keyword.

use serde::Serialize;

/// Geometry restriction on a vector layer parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryFilter {
    #[default]
    Any,
    Point,
    Line,
    Polygon,
}

impl GeometryFilter {
    /// Parse from constraint text (case-insensitive, empty means any)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "any" => Some(GeometryFilter::Any),
            "point" => Some(GeometryFilter::Point),
            "line" => Some(GeometryFilter::Line),
            "polygon" => Some(GeometryFilter::Polygon),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GeometryFilter::Any => "any",
            GeometryFilter::Point => "point",
            GeometryFilter::Line => "line",
            GeometryFilter::Polygon => "polygon",
        }
    }
}

/// Layer type accepted by a multiple-layer parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    #[default]
    Vector,
    Raster,
}

impl LayerType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "vector" => Some(LayerType::Vector),
            "raster" => Some(LayerType::Raster),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LayerType::Vector => "vector",
            LayerType::Raster => "raster",
        }
    }
}

/// Kind-specific part of a parameter declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    Raster,
    Vector { geometry: GeometryFilter },
    Extent,
    Crs { default: Option<String> },
    Field { parent: Option<String> },
    String { default: Option<String> },
    File { extension: Option<String> },
    Number {
        default: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
    },
    Enum { choices: Vec<String> },
    Boolean { default: bool },
    MultipleLayers { layer_type: LayerType },
    RasterDestination,
    VectorDestination,
    FileDestination { extension: Option<String> },
}

/// How a parameter's runtime value is injected into the script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStyle {
    /// Bound as a quoted string literal
    Text,
    /// Bound as an unquoted double
    Number,
    /// Not bound directly
    PassThrough,
}

impl ParameterKind {
    /// Header keyword for this kind
    pub fn keyword(&self) -> &'static str {
        match self {
            ParameterKind::Raster => "raster",
            ParameterKind::Vector { .. } => "vector",
            ParameterKind::Extent => "extent",
            ParameterKind::Crs { .. } => "crs",
            ParameterKind::Field { .. } => "field",
            ParameterKind::String { .. } => "string",
            ParameterKind::File { .. } => "file",
            ParameterKind::Number { .. } => "number",
            ParameterKind::Enum { .. } => "enum",
            ParameterKind::Boolean { .. } => "boolean",
            ParameterKind::MultipleLayers { .. } => "multiple",
            ParameterKind::RasterDestination => "output raster",
            ParameterKind::VectorDestination => "output vector",
            ParameterKind::FileDestination { .. } => "output file",
        }
    }

    /// Whether this parameter names a destination rather than an input
    pub fn is_destination(&self) -> bool {
        matches!(
            self,
            ParameterKind::RasterDestination
                | ParameterKind::VectorDestination
                | ParameterKind::FileDestination { .. }
        )
    }

    pub fn binding_style(&self) -> BindingStyle {
        match self {
            ParameterKind::Field { .. } | ParameterKind::String { .. } | ParameterKind::File { .. } => {
                BindingStyle::Text
            }
            ParameterKind::Number { .. } => BindingStyle::Number,
            _ => BindingStyle::PassThrough,
        }
    }
}

/// A typed input parameter decoded from one header line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDeclaration {
    /// Internal name (token before `=`)
    pub name: String,
    /// Human label (name with underscores replaced by spaces)
    pub description: String,
    pub optional: bool,
    #[serde(flatten)]
    pub kind: ParameterKind,
}

/// Kind of a pure output declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Number,
    String,
    Html,
}

impl OutputKind {
    pub fn label(&self) -> &'static str {
        match self {
            OutputKind::Number => "number",
            OutputKind::String => "string",
            OutputKind::Html => "html",
        }
    }
}

/// A declared output value produced by the script
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputDeclaration {
    pub name: String,
    pub description: String,
    pub kind: OutputKind,
}

/// Result of resolving one header line
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Parameter(ParameterDeclaration),
    Output(OutputDeclaration),
}

impl Declaration {
    pub fn name(&self) -> &str {
        match self {
            Declaration::Parameter(p) => &p.name,
            Declaration::Output(o) => &o.name,
        }
    }
}

/// Failure to decode a header line
#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationError {
    /// The line has no `=` separator
    MissingSeparator,
    /// Nothing before the `=`
    EmptyName,
    /// Neither an output nor a parameter type
    UnknownType(String),
    /// Type recognised but its constraint text is invalid
    InvalidConstraint { keyword: String, message: String },
    /// Name collides with a global the runtime defines
    ReservedName(String),
}

impl std::fmt::Display for DeclarationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeclarationError::MissingSeparator => write!(f, "missing '=' separator"),
            DeclarationError::EmptyName => write!(f, "declaration has no name"),
            DeclarationError::UnknownType(t) => write!(f, "unknown declaration type '{}'", t),
            DeclarationError::InvalidConstraint { keyword, message } => {
                write!(f, "invalid {} constraint: {}", keyword, message)
            }
            DeclarationError::ReservedName(name) => {
                write!(f, "'{}' is reserved by the script runtime", name)
            }
        }
    }
}

impl std::error::Error for DeclarationError {}

/// Globals defined by the runtime that a declaration may not shadow
pub const RESERVED_NAMES: &[&str] = &["func", "json", "feedback", "print", "__luaproc_dispatch"];

/// Split a header line on its first `=` into `(token, type_spec)`
pub fn split_tokens(line: &str) -> Result<(&str, &str), DeclarationError> {
    line.split_once('=')
        .ok_or(DeclarationError::MissingSeparator)
}

/// Label shown for a declaration name
pub fn create_descriptive_name(name: &str) -> String {
    name.replace('_', " ")
}

/// Resolve one header line (without the metadata marker)
pub fn resolve_line(line: &str) -> Result<Declaration, DeclarationError> {
    let (token, type_spec) = split_tokens(line)?;
    let name = token.trim();
    if name.is_empty() {
        return Err(DeclarationError::EmptyName);
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(DeclarationError::ReservedName(name.to_string()));
    }

    let spec = TypeSpec::parse(type_spec);

    if let Some(declaration) = resolve_output(name, &spec)? {
        return Ok(declaration);
    }

    let spec = spec.upgrade_legacy();
    let kind = resolve_parameter_kind(&spec)?;

    Ok(Declaration::Parameter(ParameterDeclaration {
        name: name.to_string(),
        description: create_descriptive_name(name),
        optional: spec.optional,
        kind,
    }))
}

/// Parsed right-hand side of a header line
#[derive(Debug, Clone, PartialEq)]
struct TypeSpec {
    optional: bool,
    keyword: String,
    constraints: String,
}

impl TypeSpec {
    fn parse(type_spec: &str) -> Self {
        let (keyword, rest) = split_keyword(type_spec.trim());
        if keyword == "optional" && !rest.is_empty() {
            let (keyword, rest) = split_keyword(rest);
            return TypeSpec {
                optional: true,
                keyword,
                constraints: rest.to_string(),
            };
        }
        TypeSpec {
            optional: false,
            keyword,
            constraints: rest.to_string(),
        }
    }

    /// Rewrite deprecated type keywords to their current spelling
    fn upgrade_legacy(mut self) -> Self {
        if self.keyword == "selection" {
            self.keyword = "enum".to_string();
        }
        self
    }
}

/// Split leading keyword from its constraint text.
///
/// The keyword is the leading run of alphanumerics/underscores, lowercased.
/// One `:` or whitespace run separates it from the constraints.
fn split_keyword(text: &str) -> (String, &str) {
    let end = text
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    let keyword = text[..end].to_lowercase();
    let rest = &text[end..];
    let rest = rest.strip_prefix(':').unwrap_or(rest);
    (keyword, rest.trim())
}

fn resolve_output(name: &str, spec: &TypeSpec) -> Result<Option<Declaration>, DeclarationError> {
    if spec.keyword != "output" {
        return Ok(None);
    }

    let (kind, extra) = split_keyword(&spec.constraints);
    let description = create_descriptive_name(name);
    let destination = |kind: ParameterKind| {
        Declaration::Parameter(ParameterDeclaration {
            name: name.to_string(),
            description: description.clone(),
            optional: spec.optional,
            kind,
        })
    };
    let output = |kind: OutputKind| {
        Declaration::Output(OutputDeclaration {
            name: name.to_string(),
            description: description.clone(),
            kind,
        })
    };

    let declaration = match kind.as_str() {
        "raster" => destination(ParameterKind::RasterDestination),
        "vector" => destination(ParameterKind::VectorDestination),
        "file" => destination(ParameterKind::FileDestination {
            extension: non_empty(extra),
        }),
        "number" => output(OutputKind::Number),
        "string" => output(OutputKind::String),
        "html" => output(OutputKind::Html),
        _ => return Ok(None),
    };
    Ok(Some(declaration))
}

type DecodeFn = fn(&str) -> Result<ParameterKind, String>;

/// One entry in the parameter decoder table
struct KindDecoder {
    keyword: &'static str,
    decode: DecodeFn,
}

const PARAMETER_DECODERS: &[KindDecoder] = &[
    KindDecoder { keyword: "raster", decode: decode_raster },
    KindDecoder { keyword: "vector", decode: decode_vector },
    KindDecoder { keyword: "extent", decode: decode_extent },
    KindDecoder { keyword: "crs", decode: decode_crs },
    KindDecoder { keyword: "field", decode: decode_field },
    KindDecoder { keyword: "string", decode: decode_string },
    KindDecoder { keyword: "file", decode: decode_file },
    KindDecoder { keyword: "number", decode: decode_number },
    KindDecoder { keyword: "enum", decode: decode_enum },
    KindDecoder { keyword: "boolean", decode: decode_boolean },
    KindDecoder { keyword: "multiple", decode: decode_multiple },
];

fn resolve_parameter_kind(spec: &TypeSpec) -> Result<ParameterKind, DeclarationError> {
    let decoder = PARAMETER_DECODERS
        .iter()
        .find(|d| d.keyword == spec.keyword)
        .ok_or_else(|| DeclarationError::UnknownType(spec.keyword.clone()))?;

    (decoder.decode)(&spec.constraints).map_err(|message| DeclarationError::InvalidConstraint {
        keyword: decoder.keyword.to_string(),
        message,
    })
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

fn decode_raster(_: &str) -> Result<ParameterKind, String> {
    Ok(ParameterKind::Raster)
}

fn decode_vector(constraints: &str) -> Result<ParameterKind, String> {
    let geometry = GeometryFilter::from_str(constraints)
        .ok_or_else(|| format!("unknown geometry type '{}'", constraints))?;
    Ok(ParameterKind::Vector { geometry })
}

fn decode_extent(_: &str) -> Result<ParameterKind, String> {
    Ok(ParameterKind::Extent)
}

fn decode_crs(constraints: &str) -> Result<ParameterKind, String> {
    Ok(ParameterKind::Crs {
        default: non_empty(constraints),
    })
}

fn decode_field(constraints: &str) -> Result<ParameterKind, String> {
    Ok(ParameterKind::Field {
        parent: non_empty(constraints),
    })
}

fn decode_string(constraints: &str) -> Result<ParameterKind, String> {
    Ok(ParameterKind::String {
        default: non_empty(constraints),
    })
}

fn decode_file(constraints: &str) -> Result<ParameterKind, String> {
    Ok(ParameterKind::File {
        extension: non_empty(constraints),
    })
}

fn decode_number(constraints: &str) -> Result<ParameterKind, String> {
    let parts: Vec<&str> = if constraints.trim().is_empty() {
        Vec::new()
    } else {
        constraints.split(';').collect()
    };
    if parts.len() > 3 {
        return Err("expected at most default;min;max".to_string());
    }

    let parse = |idx: usize| -> Result<Option<f64>, String> {
        match parts.get(idx).map(|p| p.trim()) {
            None | Some("") => Ok(None),
            Some(text) => text
                .parse::<f64>()
                .map(Some)
                .map_err(|_| format!("'{}' is not a number", text)),
        }
    };

    let default = parse(0)?;
    let min = parse(1)?;
    let max = parse(2)?;

    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            return Err(format!("minimum {} exceeds maximum {}", lo, hi));
        }
    }

    Ok(ParameterKind::Number { default, min, max })
}

fn decode_enum(constraints: &str) -> Result<ParameterKind, String> {
    let choices: Vec<String> = constraints
        .split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if choices.is_empty() {
        return Err("at least one choice is required".to_string());
    }
    Ok(ParameterKind::Enum { choices })
}

fn decode_boolean(constraints: &str) -> Result<ParameterKind, String> {
    let default = match constraints.trim().to_lowercase().as_str() {
        "" | "false" => false,
        "true" => true,
        other => return Err(format!("'{}' is not true or false", other)),
    };
    Ok(ParameterKind::Boolean { default })
}

fn decode_multiple(constraints: &str) -> Result<ParameterKind, String> {
    let layer_type = LayerType::from_str(constraints)
        .ok_or_else(|| format!("unknown layer type '{}'", constraints))?;
    Ok(ParameterKind::MultipleLayers { layer_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameter(line: &str) -> ParameterDeclaration {
        match resolve_line(line).unwrap() {
            Declaration::Parameter(p) => p,
            other => panic!("expected parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_split_tokens_on_first_separator() {
        assert_eq!(split_tokens("a=string x=y").unwrap(), ("a", "string x=y"));
        assert_eq!(split_tokens("no separator"), Err(DeclarationError::MissingSeparator));
    }

    #[test]
    fn test_descriptive_name() {
        assert_eq!(create_descriptive_name("a B_4324_asd"), "a B 4324 asd");
    }

    #[test]
    fn test_string_parameter() {
        let p = parameter("new_road_name=string Main street");
        assert_eq!(p.name, "new_road_name");
        assert_eq!(p.description, "new road name");
        assert!(!p.optional);
        assert_eq!(
            p.kind,
            ParameterKind::String {
                default: Some("Main street".to_string())
            }
        );
    }

    #[test]
    fn test_colon_separated_constraints() {
        let p = parameter("threshold=number:5;0;10");
        assert_eq!(
            p.kind,
            ParameterKind::Number {
                default: Some(5.0),
                min: Some(0.0),
                max: Some(10.0)
            }
        );
    }

    #[test]
    fn test_number_partial_constraints() {
        let p = parameter("distance=number ;1");
        assert_eq!(
            p.kind,
            ParameterKind::Number {
                default: None,
                min: Some(1.0),
                max: None
            }
        );
    }

    #[test]
    fn test_number_rejects_bad_bounds() {
        assert!(matches!(
            resolve_line("x=number abc"),
            Err(DeclarationError::InvalidConstraint { .. })
        ));
        assert!(matches!(
            resolve_line("x=number 1;10;2"),
            Err(DeclarationError::InvalidConstraint { .. })
        ));
    }

    #[test]
    fn test_selection_is_normalized_to_enum() {
        let legacy = parameter("mode=selection fast;slow;off");
        let current = parameter("mode=enum fast;slow;off");
        assert_eq!(legacy, current);
        assert_eq!(
            legacy.kind,
            ParameterKind::Enum {
                choices: vec!["fast".into(), "slow".into(), "off".into()]
            }
        );
    }

    #[test]
    fn test_optional_prefix() {
        let p = parameter("label=optional field layer");
        assert!(p.optional);
        assert_eq!(
            p.kind,
            ParameterKind::Field {
                parent: Some("layer".to_string())
            }
        );
    }

    #[test]
    fn test_keyword_is_case_insensitive() {
        let p = parameter("flag=Boolean TRUE");
        assert_eq!(p.kind, ParameterKind::Boolean { default: true });
    }

    #[test]
    fn test_vector_geometry_filter() {
        let p = parameter("roads=vector line");
        assert_eq!(
            p.kind,
            ParameterKind::Vector {
                geometry: GeometryFilter::Line
            }
        );
        assert!(resolve_line("roads=vector blob").is_err());
    }

    #[test]
    fn test_output_destination_is_parameter() {
        let p = parameter("result=output vector");
        assert_eq!(p.kind, ParameterKind::VectorDestination);
        assert!(p.kind.is_destination());
    }

    #[test]
    fn test_pure_output() {
        match resolve_line("count=output number").unwrap() {
            Declaration::Output(o) => {
                assert_eq!(o.name, "count");
                assert_eq!(o.kind, OutputKind::Number);
            }
            other => panic!("expected output, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            resolve_line("x=colour"),
            Err(DeclarationError::UnknownType("colour".to_string()))
        );
        assert!(matches!(
            resolve_line("x=output colour"),
            Err(DeclarationError::UnknownType(_))
        ));
    }

    #[test]
    fn test_empty_name() {
        assert_eq!(resolve_line(" =string"), Err(DeclarationError::EmptyName));
    }

    #[test]
    fn test_runtime_globals_are_reserved() {
        for name in ["json", "func", "feedback", "print", "__luaproc_dispatch"] {
            assert_eq!(
                resolve_line(&format!("{}=string", name)),
                Err(DeclarationError::ReservedName(name.to_string()))
            );
        }
        assert_eq!(
            resolve_line("func=output string"),
            Err(DeclarationError::ReservedName("func".to_string()))
        );
        assert!(resolve_line("json_path=string").is_ok());
    }

    #[test]
    fn test_binding_styles() {
        assert_eq!(parameter("a=field").kind.binding_style(), BindingStyle::Text);
        assert_eq!(parameter("a=file csv").kind.binding_style(), BindingStyle::Text);
        assert_eq!(parameter("a=number").kind.binding_style(), BindingStyle::Number);
        assert_eq!(parameter("a=extent").kind.binding_style(), BindingStyle::PassThrough);
    }
}
