//! Record interchange codec
//!
//! Records travel to and from scripts as GeoJSON. Export turns a [`Record`]
//! into a Feature with its geometry reprojected to the session's target
//! reference system; decoding accepts a Feature, a FeatureCollection, or an
//! array of Features and fits each one to the session's output [`Fields`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::executor::RecordError;

/// Mean Earth radius used by spherical mercator (EPSG:3857)
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the spherical mercator projection
const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

/// Coordinate reference system, identified by its authority id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(String);

impl Crs {
    /// Parse an authority id such as `EPSG:4326` (case-insensitive)
    pub fn parse(authid: &str) -> Option<Self> {
        let authid = authid.trim();
        let (authority, code) = authid.split_once(':')?;
        if authority.is_empty() || code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Crs(format!("{}:{}", authority.to_uppercase(), code)))
    }

    /// WGS 84 geographic coordinates
    pub fn wgs84() -> Self {
        Crs("EPSG:4326".to_string())
    }

    /// Spherical (web) mercator
    pub fn web_mercator() -> Self {
        Crs("EPSG:3857".to_string())
    }

    pub fn authid(&self) -> &str {
        &self.0
    }
}

impl Default for Crs {
    fn default() -> Self {
        Crs::wgs84()
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attribute type of an output field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Double,
    Boolean,
}

impl FieldType {
    /// Parse a type name (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "string" | "text" => Some(FieldType::String),
            "integer" | "int" => Some(FieldType::Integer),
            "double" | "number" | "real" => Some(FieldType::Double),
            "boolean" | "bool" => Some(FieldType::Boolean),
            _ => None,
        }
    }

    /// Guess a field type from a sample JSON value
    pub fn infer(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(FieldType::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(FieldType::Integer),
            Value::Number(_) => Some(FieldType::Double),
            _ => Some(FieldType::String),
        }
    }

    /// Coerce a value to this type; values that do not convert become null
    pub fn coerce(&self, value: &Value) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,

            (FieldType::String, Value::String(s)) => Value::String(s.clone()),
            (FieldType::String, Value::Number(n)) => Value::String(n.to_string()),
            (FieldType::String, Value::Bool(b)) => Value::String(b.to_string()),
            (FieldType::String, other) => Value::String(other.to_string()),

            (FieldType::Integer, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64))
                .map(|i| json!(i))
                .unwrap_or(Value::Null),
            (FieldType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(|i| json!(i))
                .unwrap_or(Value::Null),
            (FieldType::Integer, Value::Bool(b)) => json!(*b as i64),

            (FieldType::Double, Value::Number(n)) => {
                n.as_f64().map(|f| json!(f)).unwrap_or(Value::Null)
            }
            (FieldType::Double, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),

            (FieldType::Boolean, Value::Bool(b)) => Value::Bool(*b),
            (FieldType::Boolean, Value::Number(n)) => {
                Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))
            }
            (FieldType::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Value::Bool(true),
                "false" | "0" | "no" => Value::Bool(false),
                _ => Value::Null,
            },

            _ => Value::Null,
        }
    }
}

/// One attribute column of the output schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Field {
            name: name.into(),
            field_type,
        }
    }

    /// Parse a `name:type` field spec
    pub fn parse(spec: &str) -> Option<Self> {
        let (name, field_type) = spec.rsplit_once(':')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Field::new(name, FieldType::from_str(field_type)?))
    }
}

/// Ordered output field schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fields(Vec<Field>);

impl Fields {
    pub fn new(fields: Vec<Field>) -> Self {
        Fields(fields)
    }

    /// Schema inferred from record attributes, in first-seen order.
    ///
    /// A field's type comes from its first non-null value; fields that are
    /// null everywhere become strings.
    pub fn infer<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut fields: Vec<(String, Option<FieldType>)> = Vec::new();
        for record in records {
            for (name, value) in &record.attributes {
                match fields.iter_mut().find(|(n, _)| n == name) {
                    Some((_, ty @ None)) => *ty = FieldType::infer(value),
                    Some(_) => {}
                    None => fields.push((name.clone(), FieldType::infer(value))),
                }
            }
        }
        Fields(
            fields
                .into_iter()
                .map(|(name, ty)| Field::new(name, ty.unwrap_or(FieldType::String)))
                .collect(),
        )
    }

    /// Add a field, or retype the existing field of the same name
    pub fn insert(&mut self, field: Field) {
        match self.0.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => existing.field_type = field.field_type,
            None => self.0.push(field),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Attributes fitted to this schema: every field present, coerced,
    /// nothing else
    pub fn project(&self, attributes: &Map<String, Value>) -> Map<String, Value> {
        self.0
            .iter()
            .map(|field| {
                let value = attributes
                    .get(&field.name)
                    .map(|v| field.field_type.coerce(v))
                    .unwrap_or(Value::Null);
                (field.name.clone(), value)
            })
            .collect()
    }
}

/// A single feature flowing through a transform
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// Feature id (number or string)
    pub id: Option<Value>,
    /// GeoJSON geometry object
    pub geometry: Option<Value>,
    pub attributes: Map<String, Value>,
}

impl Record {
    /// Build a record from a GeoJSON Feature object
    pub fn from_feature(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| format!("expected a Feature object, got {}", json_kind(value)))?;

        match obj.get("type").and_then(Value::as_str) {
            Some("Feature") => {}
            Some(other) => return Err(format!("expected type 'Feature', got '{}'", other)),
            None => return Err("feature has no 'type' member".to_string()),
        }

        let geometry = match obj.get("geometry") {
            None | Some(Value::Null) => None,
            Some(g @ Value::Object(_)) => Some(g.clone()),
            Some(other) => return Err(format!("geometry must be an object, got {}", json_kind(other))),
        };

        let attributes = match obj.get("properties") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(props)) => props.clone(),
            Some(other) => {
                return Err(format!("properties must be an object, got {}", json_kind(other)));
            }
        };

        Ok(Record {
            id: obj.get("id").filter(|v| !v.is_null()).cloned(),
            geometry,
            attributes,
        })
    }

    /// GeoJSON Feature for this record, geometry as stored
    pub fn to_feature(&self) -> Value {
        let mut feature = Map::new();
        feature.insert("type".to_string(), json!("Feature"));
        if let Some(id) = &self.id {
            feature.insert("id".to_string(), id.clone());
        }
        feature.insert(
            "geometry".to_string(),
            self.geometry.clone().unwrap_or(Value::Null),
        );
        feature.insert(
            "properties".to_string(),
            Value::Object(self.attributes.clone()),
        );
        Value::Object(feature)
    }
}

/// Parse a FeatureCollection (or a single Feature) into records
pub fn read_features(text: &str) -> anyhow::Result<Vec<Record>> {
    let value: Value = serde_json::from_str(text)?;
    features_from_value(&value).map_err(|e| anyhow::anyhow!(e))
}

/// FeatureCollection document holding the given records
pub fn feature_collection(records: &[Record]) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": records.iter().map(Record::to_feature).collect::<Vec<_>>(),
    })
}

fn features_from_value(value: &Value) -> Result<Vec<Record>, String> {
    match value {
        Value::Array(items) => items.iter().map(Record::from_feature).collect(),
        Value::Object(obj) => match obj.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => match obj.get("features") {
                Some(Value::Array(items)) => items.iter().map(Record::from_feature).collect(),
                // an empty Lua table encodes as an object
                Some(Value::Object(o)) if o.is_empty() => Ok(Vec::new()),
                None => Ok(Vec::new()),
                Some(other) => Err(format!("features must be an array, got {}", json_kind(other))),
            },
            _ => Record::from_feature(value).map(|r| vec![r]),
        },
        other => Err(format!(
            "expected a Feature, FeatureCollection or array, got {}",
            json_kind(other)
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Record ⇄ JSON conversion for one execution session
#[derive(Debug, Clone)]
pub struct InterchangeCodec {
    source_crs: Crs,
    target_crs: Crs,
    fields: Fields,
}

impl InterchangeCodec {
    pub fn new(source_crs: Crs, target_crs: Crs, fields: Fields) -> Self {
        InterchangeCodec {
            source_crs,
            target_crs,
            fields,
        }
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn target_crs(&self) -> &Crs {
        &self.target_crs
    }

    /// Feature JSON text for a record, in the target reference system
    pub fn export(&self, record: &Record) -> Result<String, RecordError> {
        let mut exported = record.clone();
        if let Some(geometry) = &record.geometry {
            exported.geometry = Some(reproject_geometry(
                geometry,
                &self.source_crs,
                &self.target_crs,
            )?);
        }
        serde_json::to_string(&exported.to_feature())
            .map_err(|e| RecordError::Export(e.to_string()))
    }

    /// Records decoded from a script result, fitted to the output fields.
    ///
    /// Empty payloads (`""`, `null`, `[]`, `{}`) decode to no records.
    pub fn decode(&self, text: &str) -> Result<Vec<Record>, RecordError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let value: Value =
            serde_json::from_str(text).map_err(|e| RecordError::MalformedResult(e.to_string()))?;

        let is_empty = match &value {
            Value::Null => true,
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            _ => false,
        };
        if is_empty {
            return Ok(Vec::new());
        }

        let records = features_from_value(&value).map_err(RecordError::UnexpectedShape)?;

        Ok(records
            .into_iter()
            .map(|mut record| {
                record.attributes = self.fields.project(&record.attributes);
                record
            })
            .collect())
    }
}

/// Reproject a GeoJSON geometry between two reference systems.
///
/// Supports the identity transform and EPSG:4326 ⇄ EPSG:3857.
pub fn reproject_geometry(geometry: &Value, from: &Crs, to: &Crs) -> Result<Value, RecordError> {
    if from == to {
        return Ok(geometry.clone());
    }

    let transform: fn(f64, f64) -> (f64, f64) = if *from == Crs::wgs84() && *to == Crs::web_mercator()
    {
        wgs84_to_mercator
    } else if *from == Crs::web_mercator() && *to == Crs::wgs84() {
        mercator_to_wgs84
    } else {
        return Err(RecordError::Reprojection {
            from: from.clone(),
            to: to.clone(),
        });
    };

    Ok(transform_geometry(geometry, transform))
}

fn transform_geometry(geometry: &Value, transform: fn(f64, f64) -> (f64, f64)) -> Value {
    let mut out = geometry.clone();
    if let Some(obj) = out.as_object_mut() {
        if let Some(coords) = obj.get_mut("coordinates") {
            transform_coordinates(coords, transform);
        }
        if let Some(Value::Array(parts)) = obj.get_mut("geometries") {
            for part in parts.iter_mut() {
                *part = transform_geometry(part, transform);
            }
        }
    }
    out
}

/// Walk nested coordinate arrays; an array starting with a number is a position
fn transform_coordinates(coords: &mut Value, transform: fn(f64, f64) -> (f64, f64)) {
    let Value::Array(items) = coords else {
        return;
    };

    if items.first().is_some_and(Value::is_number) {
        if let (Some(x), Some(y)) = (
            items.first().and_then(Value::as_f64),
            items.get(1).and_then(Value::as_f64),
        ) {
            let (tx, ty) = transform(x, y);
            items[0] = json!(tx);
            items[1] = json!(ty);
        }
        return;
    }

    for item in items.iter_mut() {
        transform_coordinates(item, transform);
    }
}

fn wgs84_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}
