use std::path::PathBuf;

use geo::{Geometry, Point, Polygon};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::SvidError;
use crate::input::buffer::buffer_geometry;
use crate::input::geocode::geocode_place;
use crate::input::reader::{read_csv_points, read_geo_file, InputFeature};
use crate::input::sampling::sample_geometry;
use crate::model::{PointTable, QueryPoint};
use crate::net::{client_for, ProxyEntry, UserAgentPool, METADATA_TIMEOUT};

/// the supported geospatial input forms. exactly one is given per run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum PointInput {
    Coordinate { latitude: f64, longitude: f64 },
    CsvFile { path: PathBuf },
    GeoFile { path: PathBuf },
    PlaceName { name: String },
}

/// knobs for turning an input into query points.
#[derive(Debug, Clone)]
pub struct InputOptions {
    /// user id columns (lowercased) to carry alongside each point.
    pub id_columns: Vec<String>,
    /// radial expansion in meters; 0 disables buffering.
    pub buffer_m: f64,
    /// boundary-walk spacing in meters.
    pub distance_m: f64,
    /// lattice sampling instead of boundary walks.
    pub grid: bool,
    /// lattice cell size in meters.
    pub grid_size_m: f64,
    /// when set, the resolved point table is cached here and reused
    /// verbatim by later runs.
    pub lat_lon_cache: Option<PathBuf>,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            id_columns: vec![],
            buffer_m: 0.0,
            distance_m: 1.0,
            grid: false,
            grid_size_m: 1.0,
            lat_lon_cache: None,
        }
    }
}

/// the normalized output of input resolution: the run's query point table
/// plus any input polygons, kept for the post-discovery membership filter.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub table: PointTable,
    pub polygons: Vec<Polygon<f64>>,
}

impl PointInput {
    /// normalizes this input into query points. geometric work always
    /// runs (the polygon filter needs it); the sampled point table itself
    /// is reused from `lat_lon_cache` when present.
    pub fn resolve(
        &self,
        runtime: &tokio::runtime::Runtime,
        user_agents: &UserAgentPool,
        opts: &InputOptions,
    ) -> Result<ResolvedInput, SvidError> {
        let mut features = self.features(runtime, user_agents)?;
        if features.is_empty() {
            return Err(SvidError::InvalidInput(String::from(
                "input contains no usable features",
            )));
        }
        if opts.buffer_m > 0.0 {
            for feature in features.iter_mut() {
                feature.geometry = buffer_geometry(&feature.geometry, opts.buffer_m)?;
            }
        }
        let polygons = collect_polygons(&features);

        if let Some(cache) = &opts.lat_lon_cache {
            if cache.exists() {
                log::info!("the lat and lon have been read from the cache at {cache:?}");
                let table = PointTable::read(cache)?;
                return Ok(ResolvedInput { table, polygons });
            }
        }

        let mut points = vec![];
        for feature in &features {
            let ids: IndexMap<String, String> = opts
                .id_columns
                .iter()
                .map(|column| {
                    (
                        column.clone(),
                        feature.properties.get(column).cloned().unwrap_or_default(),
                    )
                })
                .collect();
            for sampled in
                sample_geometry(&feature.geometry, opts.distance_m, opts.grid, opts.grid_size_m)?
            {
                points.push((sampled, ids.clone()));
            }
        }
        let points: Vec<QueryPoint> = points
            .into_iter()
            .enumerate()
            .map(|(index, (point, ids))| QueryPoint {
                latitude: point.y(),
                longitude: point.x(),
                lat_lon_id: index as u64 + 1,
                ids,
            })
            .collect();
        let table = PointTable::new(opts.id_columns.clone(), points);

        if let Some(cache) = &opts.lat_lon_cache {
            table.write(cache)?;
        }
        Ok(ResolvedInput { table, polygons })
    }

    fn features(
        &self,
        runtime: &tokio::runtime::Runtime,
        user_agents: &UserAgentPool,
    ) -> Result<Vec<InputFeature>, SvidError> {
        match self {
            PointInput::Coordinate {
                latitude,
                longitude,
            } => Ok(vec![InputFeature {
                geometry: Geometry::Point(Point::new(*longitude, *latitude)),
                properties: IndexMap::new(),
            }]),
            PointInput::CsvFile { path } => read_csv_points(path),
            PointInput::GeoFile { path } => read_geo_file(path),
            PointInput::PlaceName { name } => {
                log::info!("geocoding the input place name '{name}'");
                let client = client_for(&ProxyEntry::Direct, user_agents.sample(), METADATA_TIMEOUT)?;
                let geometry = runtime.block_on(geocode_place(&client, name))?;
                Ok(vec![InputFeature {
                    geometry,
                    properties: IndexMap::new(),
                }])
            }
        }
    }
}

fn collect_polygons(features: &[InputFeature]) -> Vec<Polygon<f64>> {
    let mut polygons = vec![];
    for feature in features {
        match &feature.geometry {
            Geometry::Polygon(p) => polygons.push(p.clone()),
            Geometry::MultiPolygon(mp) => polygons.extend(mp.0.iter().cloned()),
            Geometry::GeometryCollection(gc) => {
                for geometry in &gc.0 {
                    match geometry {
                        Geometry::Polygon(p) => polygons.push(p.clone()),
                        Geometry::MultiPolygon(mp) => polygons.extend(mp.0.iter().cloned()),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    polygons
}
