use std::collections::BTreeMap;
use std::fmt;

use geo::Coord;
use serde::{Deserialize, Serialize};

/// Property name the source `id` is stored under.
pub const OSM_ID: &str = "osm_id";
pub const LON: &str = "lon";
pub const LAT: &str = "lat";

/// Attributes whose meaning is fixed by the source format. Tags may not override them.
pub const STRUCTURAL_FIELDS: &[&str] = &[
    "id",
    OSM_ID,
    LON,
    LAT,
    "version",
    "changeset",
    "uid",
    "visible",
    "timestamp",
    "user",
];

/// A single property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats only; integers are not widened implicitly.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Boolean(v) => serde_json::Value::Bool(*v),
            Scalar::Integer(v) => serde_json::Value::from(*v),
            Scalar::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Scalar::String(v) => serde_json::Value::String(v.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Boolean(v) => write!(f, "{}", v),
            Scalar::Integer(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::String(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

/// How a raw source attribute is converted into a [`Scalar`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Identifier,
    Coordinate,
    Integer,
    Boolean,
    Text,
}

impl FieldKind {
    pub fn of(attribute: &str) -> Self {
        match attribute {
            "id" | "ref" => FieldKind::Identifier,
            LON | LAT => FieldKind::Coordinate,
            "version" | "changeset" | "uid" => FieldKind::Integer,
            "visible" => FieldKind::Boolean,
            _ => FieldKind::Text,
        }
    }

    /// Returns `None` when the raw text does not fit the kind.
    pub fn parse(self, raw: &str) -> Option<Scalar> {
        match self {
            FieldKind::Identifier | FieldKind::Integer => {
                raw.trim().parse::<i64>().ok().map(Scalar::Integer)
            }
            FieldKind::Coordinate => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Scalar::Float),
            FieldKind::Boolean => match raw.trim() {
                "true" => Some(Scalar::Boolean(true)),
                "false" => Some(Scalar::Boolean(false)),
                _ => None,
            },
            FieldKind::Text => Some(Scalar::String(raw.to_string())),
        }
    }
}

pub fn is_structural(key: &str) -> bool {
    STRUCTURAL_FIELDS.contains(&key)
}

/// Flat, ordered key -> scalar map attached to graph nodes and edges.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySet(BTreeMap<String, Scalar>);

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Option<Scalar> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.0.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Scalar::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Scalar::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Scalar::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Scalar> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.0.iter()
    }

    pub fn osm_id(&self) -> Option<i64> {
        self.get_i64(OSM_ID)
    }

    /// WGS84 coordinate built from the `lon`/`lat` float properties.
    pub fn coordinate(&self) -> Option<Coord<f64>> {
        Some(Coord {
            x: self.get_f64(LON)?,
            y: self.get_f64(LAT)?,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Scalar)> for PropertySet {
    fn from_iter<T: IntoIterator<Item = (String, Scalar)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PropertySet {
    type Item = (&'a String, &'a Scalar);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Scalar>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_fields_parse_to_their_declared_types() {
        assert_eq!(FieldKind::of("id").parse("65354557"), Some(Scalar::Integer(65354557)));
        assert_eq!(
            FieldKind::of("lon").parse("-122.3964163"),
            Some(Scalar::Float(-122.3964163))
        );
        assert_eq!(FieldKind::of("version").parse("1"), Some(Scalar::Integer(1)));
        assert_eq!(FieldKind::of("visible").parse("true"), Some(Scalar::Boolean(true)));
        assert_eq!(
            FieldKind::of("timestamp").parse("2019-09-26T05:29:41Z"),
            Some(Scalar::String("2019-09-26T05:29:41Z".to_string()))
        );
    }

    #[test]
    fn invalid_structural_values_are_rejected() {
        assert_eq!(FieldKind::of("id").parse("abc"), None);
        assert_eq!(FieldKind::of("lat").parse("NaN"), None);
        assert_eq!(FieldKind::of("visible").parse("yes"), None);
    }

    #[test]
    fn text_fields_are_never_coerced() {
        assert_eq!(FieldKind::of("maxspeed").parse("25"), Some(Scalar::from("25")));
    }

    #[test]
    fn coordinate_requires_float_lon_and_lat() {
        let mut props = PropertySet::new();
        props.insert(LON, -122.5);
        assert_eq!(props.coordinate(), None);
        props.insert(LAT, 37.75);
        assert_eq!(props.coordinate(), Some(Coord { x: -122.5, y: 37.75 }));

        let mut integers = PropertySet::new();
        integers.insert(LON, 1i64);
        integers.insert(LAT, 2i64);
        assert_eq!(integers.coordinate(), None);
    }

    #[test]
    fn json_round_trip_keeps_scalar_variants() {
        let mut props = PropertySet::new();
        props.insert(OSM_ID, 8920510i64);
        props.insert("highway", "residential");
        props.insert("length", 12.5);
        props.insert("visible", true);

        let json = props.to_json();
        assert_eq!(json["osm_id"], serde_json::json!(8920510));
        assert_eq!(json["highway"], serde_json::json!("residential"));

        let decoded: PropertySet = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, props);
    }
}
