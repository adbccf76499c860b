//! Mapbox Vector Tile decoder.

use std::collections::BTreeMap;

use geozero::mvt::tile::{self, GeomType};
use geozero::mvt::{Message, Tile};
use tracing::trace;

use super::feature::{Feature, FeatureSet, Geometry, LonLat, PropertyValue};
use super::TileDecoder;
use crate::coord::TileCoord;
use crate::pmtiles::ArchiveError;

/// Extent assumed when a layer does not declare one.
pub const DEFAULT_EXTENT: u32 = 4096;

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

/// Decodes MVT payloads into [`FeatureSet`]s.
///
/// With a layer name set, only that layer is read; otherwise the features
/// of every layer are merged and the set is named after the first one.
#[derive(Debug, Clone, Default)]
pub struct MvtDecoder {
    layer: Option<String>,
}

impl MvtDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }
}

impl TileDecoder for MvtDecoder {
    fn decode(&self, coord: TileCoord, data: &[u8]) -> Result<FeatureSet, ArchiveError> {
        let tile = Tile::decode(data).map_err(|e| ArchiveError::Decode(e.to_string()))?;

        let mut set = FeatureSet::default();
        for layer in &tile.layers {
            if self.layer.as_deref().is_some_and(|name| name != layer.name) {
                continue;
            }
            if set.layer.is_empty() {
                set.layer = layer.name.clone();
            }
            let extent = f64::from(layer.extent.unwrap_or(DEFAULT_EXTENT));
            for feature in &layer.features {
                set.features.push(decode_feature(coord, layer, feature, extent)?);
            }
        }

        trace!(tile = %coord, layer = %set.layer, features = set.len(), "Decoded tile");
        Ok(set)
    }
}

fn decode_feature(
    coord: TileCoord,
    layer: &tile::Layer,
    feature: &tile::Feature,
    extent: f64,
) -> Result<Feature, ArchiveError> {
    let mut properties = BTreeMap::new();
    for pair in feature.tags.chunks(2) {
        let [key_idx, value_idx] = pair else {
            return Err(ArchiveError::Decode("odd number of feature tags".to_string()));
        };
        let key = layer
            .keys
            .get(*key_idx as usize)
            .ok_or_else(|| ArchiveError::Decode(format!("key index {} out of range", key_idx)))?;
        let value = layer.values.get(*value_idx as usize).ok_or_else(|| {
            ArchiveError::Decode(format!("value index {} out of range", value_idx))
        })?;
        if let Some(value) = property_value(value) {
            properties.insert(key.clone(), value);
        }
    }

    let paths = decode_paths(&feature.geometry)?
        .into_iter()
        .map(|path| {
            path.into_iter()
                .map(|(x, y)| coord.local_to_lon_lat(f64::from(x), f64::from(y), extent))
                .collect::<Vec<LonLat>>()
        })
        .collect::<Vec<_>>();

    let geometry = match feature.r#type.and_then(GeomType::from_i32) {
        Some(GeomType::Linestring) => Geometry::Lines(paths),
        Some(GeomType::Polygon) => Geometry::Polygons(paths),
        _ => Geometry::Points(paths.into_iter().flatten().collect()),
    };

    Ok(Feature {
        id: feature.id,
        geometry,
        properties,
    })
}

fn property_value(value: &tile::Value) -> Option<PropertyValue> {
    if let Some(s) = &value.string_value {
        return Some(PropertyValue::String(s.clone()));
    }
    value
        .float_value
        .map(PropertyValue::Float)
        .or(value.double_value.map(PropertyValue::Double))
        .or(value.int_value.map(PropertyValue::Int))
        .or(value.uint_value.map(PropertyValue::UInt))
        .or(value.sint_value.map(PropertyValue::Int))
        .or(value.bool_value.map(PropertyValue::Bool))
}

#[inline]
fn zigzag(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Decodes a geometry command stream into paths of tile-local points.
///
/// Each `MoveTo` starts a new path; `ClosePath` repeats the path's first
/// point so rings come out closed.
fn decode_paths(commands: &[u32]) -> Result<Vec<Vec<(i32, i32)>>, ArchiveError> {
    let mut paths: Vec<Vec<(i32, i32)>> = Vec::new();
    let (mut x, mut y) = (0i32, 0i32);
    let mut i = 0;

    while i < commands.len() {
        let header = commands[i];
        let (cmd, count) = (header & 0x7, (header >> 3) as usize);
        i += 1;

        match cmd {
            CMD_MOVE_TO | CMD_LINE_TO => {
                if i + 2 * count > commands.len() {
                    return Err(ArchiveError::Decode("truncated geometry".to_string()));
                }
                for n in 0..count {
                    x = x.wrapping_add(zigzag(commands[i + 2 * n]));
                    y = y.wrapping_add(zigzag(commands[i + 2 * n + 1]));
                    if cmd == CMD_MOVE_TO {
                        paths.push(vec![(x, y)]);
                    } else {
                        let path = paths.last_mut().ok_or_else(|| {
                            ArchiveError::Decode("LineTo before MoveTo".to_string())
                        })?;
                        path.push((x, y));
                    }
                }
                i += 2 * count;
            }
            CMD_CLOSE_PATH => {
                if let Some(path) = paths.last_mut() {
                    if let Some(first) = path.first().copied() {
                        path.push(first);
                    }
                }
            }
            other => {
                return Err(ArchiveError::Decode(format!(
                    "unknown geometry command {}",
                    other
                )))
            }
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(cmd: u32, count: u32) -> u32 {
        (count << 3) | cmd
    }

    fn zz(v: i32) -> u32 {
        ((v << 1) ^ (v >> 31)) as u32
    }

    fn point_tile() -> Vec<u8> {
        let layer = tile::Layer {
            version: 2,
            name: "humans".to_string(),
            keys: vec!["population".to_string(), "name".to_string()],
            values: vec![
                tile::Value {
                    uint_value: Some(1200),
                    ..Default::default()
                },
                tile::Value {
                    string_value: Some("Uruk".to_string()),
                    ..Default::default()
                },
            ],
            features: vec![tile::Feature {
                id: Some(7),
                tags: vec![0, 0, 1, 1],
                r#type: Some(GeomType::Point as i32),
                geometry: vec![command(CMD_MOVE_TO, 1), zz(2048), zz(2048)],
            }],
            extent: Some(4096),
        };
        Tile {
            layers: vec![layer],
        }
        .encode_to_vec()
    }

    fn single_feature_tile(geom_type: i32, geometry: Vec<u32>) -> Vec<u8> {
        Tile {
            layers: vec![tile::Layer {
                version: 2,
                name: "humans".to_string(),
                keys: vec![],
                values: vec![],
                features: vec![tile::Feature {
                    id: Some(1),
                    tags: vec![],
                    r#type: Some(geom_type),
                    geometry,
                }],
                extent: Some(4096),
            }],
        }
        .encode_to_vec()
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(1), -1);
        assert_eq!(zigzag(2), 1);
        assert_eq!(zigzag(3), -2);
    }

    #[test]
    fn test_decode_point_feature() {
        let set = MvtDecoder::new()
            .decode(TileCoord { z: 0, x: 0, y: 0 }, &point_tile())
            .unwrap();

        assert_eq!(set.layer, "humans");
        assert_eq!(set.len(), 1);
        let feature = &set.features[0];
        assert_eq!(feature.id, Some(7));
        assert_eq!(feature.property("population"), Some(&PropertyValue::UInt(1200)));
        assert_eq!(feature.property("name").and_then(|v| v.as_str()), Some("Uruk"));

        let Geometry::Points(points) = &feature.geometry else {
            panic!("expected points");
        };
        // Center of the world tile.
        assert!(points[0].0.abs() < 1e-9);
        assert!(points[0].1.abs() < 1e-9);
    }

    #[test]
    fn test_layer_filter_skips_other_layers() {
        let set = MvtDecoder::new()
            .with_layer("roads")
            .decode(TileCoord { z: 0, x: 0, y: 0 }, &point_tile())
            .unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_polygon_ring_closed() {
        let commands = vec![
            command(CMD_MOVE_TO, 1),
            zz(0),
            zz(0),
            command(CMD_LINE_TO, 2),
            zz(10),
            zz(0),
            zz(0),
            zz(10),
            command(CMD_CLOSE_PATH, 1),
        ];
        let paths = decode_paths(&commands).unwrap();
        assert_eq!(paths, vec![vec![(0, 0), (10, 0), (10, 10), (0, 0)]]);
    }

    #[test]
    fn test_geometry_kind_follows_feature_type() {
        let line = vec![
            command(CMD_MOVE_TO, 1),
            zz(0),
            zz(0),
            command(CMD_LINE_TO, 1),
            zz(4096),
            zz(4096),
        ];
        let ring = vec![
            command(CMD_MOVE_TO, 1),
            zz(0),
            zz(0),
            command(CMD_LINE_TO, 2),
            zz(2048),
            zz(0),
            zz(0),
            zz(2048),
            command(CMD_CLOSE_PATH, 1),
        ];
        let decode = |data: Vec<u8>| {
            MvtDecoder::new()
                .decode(TileCoord { z: 0, x: 0, y: 0 }, &data)
                .unwrap()
                .features
                .remove(0)
                .geometry
        };

        match decode(single_feature_tile(GeomType::Linestring as i32, line.clone())) {
            Geometry::Lines(lines) => assert_eq!(lines[0].len(), 2),
            other => panic!("expected lines, got {:?}", other),
        }
        match decode(single_feature_tile(GeomType::Polygon as i32, ring)) {
            Geometry::Polygons(rings) => assert_eq!(rings[0].len(), 4),
            other => panic!("expected polygons, got {:?}", other),
        }
        // Unknown geometry types fall back to points.
        match decode(single_feature_tile(42, line)) {
            Geometry::Points(points) => assert_eq!(points.len(), 2),
            other => panic!("expected points, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_geometry_rejected() {
        assert!(decode_paths(&[command(CMD_MOVE_TO, 2), zz(1), zz(1)]).is_err());
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let result = MvtDecoder::new().decode(TileCoord { z: 0, x: 0, y: 0 }, &[0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(ArchiveError::Decode(_))));
    }
}
