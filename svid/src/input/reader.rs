use std::path::Path;

use geo::{Geometry, Point};
use indexmap::IndexMap;

use crate::error::SvidError;
use crate::input::columns::standardize_column_names;
use crate::model::{LATITUDE, LONGITUDE};

/// one input feature: a geometry plus its (lowercased) attribute table.
#[derive(Debug, Clone)]
pub struct InputFeature {
    pub geometry: Geometry<f64>,
    pub properties: IndexMap<String, String>,
}

/// reads a coordinate CSV into point features. column names are
/// standardized first, so `LAT`/`lng`/`x`/`y` style headers all work.
pub fn read_csv_points(path: &Path) -> Result<Vec<InputFeature>, SvidError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| SvidError::csv(path, e))?;
    let raw_headers: Vec<String> = reader
        .headers()
        .map_err(|e| SvidError::csv(path, e))?
        .iter()
        .map(str::to_string)
        .collect();
    let headers = standardize_column_names(&raw_headers);
    let lat_idx = headers.iter().position(|h| h == LATITUDE);
    let lon_idx = headers.iter().position(|h| h == LONGITUDE);
    let (Some(lat_idx), Some(lon_idx)) = (lat_idx, lon_idx) else {
        return Err(SvidError::InvalidInput(format!(
            "csv file {path:?} has no recognizable latitude/longitude columns (got: {})",
            raw_headers.join(", ")
        )));
    };

    let mut features = vec![];
    for (row_idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| SvidError::csv(path, e))?;
        let latitude = parse_coordinate(record.get(lat_idx), LATITUDE, row_idx)?;
        let longitude = parse_coordinate(record.get(lon_idx), LONGITUDE, row_idx)?;
        let properties: IndexMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(i, _)| *i != lat_idx && *i != lon_idx)
            .map(|(_, (h, v))| (h.clone(), v.to_string()))
            .collect();
        features.push(InputFeature {
            geometry: Geometry::Point(Point::new(longitude, latitude)),
            properties,
        });
    }
    Ok(features)
}

fn parse_coordinate(value: Option<&str>, field: &str, row: usize) -> Result<f64, SvidError> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .ok_or_else(|| {
            SvidError::InvalidInput(format!("row {row} has no parseable {field} value"))
        })
}

/// reads a geospatial file into features, dispatching on extension:
/// `.shp` via the shapefile crate, `.geojson`/`.json` via the geojson
/// crate. coordinates are assumed WGS84.
pub fn read_geo_file(path: &Path) -> Result<Vec<InputFeature>, SvidError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "shp" => read_shapefile(path),
        "geojson" | "json" => read_geojson(path),
        other => Err(SvidError::InvalidInput(format!(
            "unsupported geospatial file extension '{other}' for {path:?}; expected .shp, .geojson or .json"
        ))),
    }
}

fn read_shapefile(path: &Path) -> Result<Vec<InputFeature>, SvidError> {
    let pairs = shapefile::read(path)
        .map_err(|e| SvidError::InvalidInput(format!("failure reading shapefile {path:?}: {e}")))?;
    let mut features = vec![];
    for (shape, record) in pairs {
        let geometry = Geometry::<f64>::try_from(shape).map_err(|e| {
            SvidError::InvalidInput(format!(
                "shapefile {path:?} contains an unconvertible shape: {e}"
            ))
        })?;
        let properties = record
            .into_iter()
            .map(|(name, value)| (name.to_lowercase(), field_value_to_string(value)))
            .collect();
        features.push(InputFeature {
            geometry,
            properties,
        });
    }
    Ok(features)
}

fn field_value_to_string(value: shapefile::dbase::FieldValue) -> String {
    use shapefile::dbase::FieldValue;
    match value {
        FieldValue::Character(v) => v.unwrap_or_default(),
        FieldValue::Numeric(v) => v.map(|n| n.to_string()).unwrap_or_default(),
        FieldValue::Float(v) => v.map(|n| n.to_string()).unwrap_or_default(),
        FieldValue::Integer(v) => v.to_string(),
        FieldValue::Logical(v) => v.map(|b| b.to_string()).unwrap_or_default(),
        FieldValue::Date(v) => v
            .map(|d| format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
            .unwrap_or_default(),
        other => format!("{other:?}"),
    }
}

fn read_geojson(path: &Path) -> Result<Vec<InputFeature>, SvidError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| SvidError::filesystem(path, e))?;
    let parsed: geojson::GeoJson = content.parse().map_err(|e| {
        SvidError::InvalidInput(format!("failure parsing geojson {path:?}: {e}"))
    })?;
    let mut features = vec![];
    match parsed {
        geojson::GeoJson::FeatureCollection(collection) => {
            for feature in collection.features {
                if let Some(geometry) = feature.geometry {
                    features.push(InputFeature {
                        geometry: convert_geojson(path, &geometry)?,
                        properties: json_properties(feature.properties),
                    });
                }
            }
        }
        geojson::GeoJson::Feature(feature) => {
            if let Some(geometry) = feature.geometry {
                features.push(InputFeature {
                    geometry: convert_geojson(path, &geometry)?,
                    properties: json_properties(feature.properties),
                });
            }
        }
        geojson::GeoJson::Geometry(geometry) => features.push(InputFeature {
            geometry: convert_geojson(path, &geometry)?,
            properties: IndexMap::new(),
        }),
    }
    Ok(features)
}

fn convert_geojson(path: &Path, geometry: &geojson::Geometry) -> Result<Geometry<f64>, SvidError> {
    Geometry::<f64>::try_from(&geometry.value).map_err(|e| {
        SvidError::InvalidInput(format!(
            "geojson {path:?} contains an unconvertible geometry: {e}"
        ))
    })
}

fn json_properties(
    properties: Option<geojson::JsonObject>,
) -> IndexMap<String, String> {
    let Some(properties) = properties else {
        return IndexMap::new();
    };
    properties
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (key.to_lowercase(), text)
        })
        .collect()
}
