//! Decoded feature model.
//!
//! The one output type of every tile decoder. Geometry is already projected
//! to lon/lat so consumers never see tile-local coordinates.

use std::collections::BTreeMap;

use serde::Serialize;

/// Bytes charged per feature by [`FeatureSet::estimated_bytes`].
pub const BYTES_PER_FEATURE: usize = 64;
/// Bytes charged per coordinate pair.
pub const BYTES_PER_COORD: usize = 16;
/// Bytes charged per property.
pub const BYTES_PER_PROPERTY: usize = 48;

/// A `(lon, lat)` pair.
pub type LonLat = (f64, f64);

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Float(f32),
    Double(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

impl PropertyValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(f64::from(*v)),
            PropertyValue::Double(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::UInt(v) => Some(*v as f64),
            PropertyValue::String(_) | PropertyValue::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Feature geometry in lon/lat.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    /// One or more points.
    Points(Vec<LonLat>),
    /// One or more line strings.
    Lines(Vec<Vec<LonLat>>),
    /// Polygon rings, exterior rings followed by their holes.
    Polygons(Vec<Vec<LonLat>>),
}

impl Geometry {
    /// Number of coordinate pairs.
    pub fn coord_count(&self) -> usize {
        match self {
            Geometry::Points(points) => points.len(),
            Geometry::Lines(parts) | Geometry::Polygons(parts) => parts.iter().map(Vec::len).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    pub id: Option<u64>,
    pub geometry: Geometry,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Feature {
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }
}

/// Features decoded from one tile layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureSet {
    pub layer: String,
    pub features: Vec<Feature>,
}

impl FeatureSet {
    pub fn new(layer: impl Into<String>, features: Vec<Feature>) -> Self {
        Self {
            layer: layer.into(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Conservative in-memory size estimate.
    pub fn estimated_bytes(&self) -> usize {
        self.features
            .iter()
            .map(|f| {
                BYTES_PER_FEATURE
                    + f.geometry.coord_count() * BYTES_PER_COORD
                    + f.properties.len() * BYTES_PER_PROPERTY
            })
            .sum()
    }

    /// Size charged to a cache: the larger of the encoded size and the
    /// estimate, so dense tiles are never undercounted.
    pub fn approx_bytes(&self, encoded_len: Option<usize>) -> usize {
        encoded_len.unwrap_or(0).max(self.estimated_bytes())
    }
}
