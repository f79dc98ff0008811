use geo::{BooleanOps, Destination, Geometry, Haversine, LineString, MultiPolygon, Point, Polygon};

use crate::error::SvidError;

/// meters per degree of latitude on the WGS84 sphere, also used to scale
/// planar buffer distances. longitude steps additionally divide by
/// cos(latitude).
pub(crate) const METERS_PER_DEGREE: f64 = 111_320.0;

const CIRCLE_SEGMENTS: usize = 32;

/// radially expands a geometry by `meters`, returning a polygonal
/// geometry. points become ~circular polygons sampled with haversine
/// destinations; polygons are offset in degree space with `geo-buffer`.
/// the degree-space offset is an approximation that skews at high
/// latitudes; inputs here are street-level extents where that error is
/// well below the provider search radius.
pub fn buffer_geometry(geometry: &Geometry<f64>, meters: f64) -> Result<Geometry<f64>, SvidError> {
    if meters <= 0.0 {
        return Err(SvidError::InvalidInput(format!(
            "buffer must be positive, got {meters}"
        )));
    }
    let buffered = match geometry {
        Geometry::Point(point) => {
            MultiPolygon(vec![circle_polygon(*point, meters, CIRCLE_SEGMENTS)])
        }
        Geometry::MultiPoint(points) => union_all(
            points
                .iter()
                .map(|p| circle_polygon(*p, meters, CIRCLE_SEGMENTS)),
        ),
        Geometry::LineString(line) => buffer_linestring(line, meters),
        Geometry::MultiLineString(lines) => union_all(
            lines
                .iter()
                .flat_map(|l| buffer_linestring(l, meters).0),
        ),
        Geometry::Polygon(polygon) => {
            geo_buffer::buffer_polygon(polygon, meters / METERS_PER_DEGREE)
        }
        Geometry::MultiPolygon(polygons) => {
            geo_buffer::buffer_multi_polygon(polygons, meters / METERS_PER_DEGREE)
        }
        Geometry::GeometryCollection(collection) => {
            let mut parts = vec![];
            for geometry in &collection.0 {
                match buffer_geometry(geometry, meters)? {
                    Geometry::MultiPolygon(mp) => parts.extend(mp.0),
                    Geometry::Polygon(p) => parts.push(p),
                    _ => {}
                }
            }
            union_all(parts.into_iter())
        }
        other => {
            return Err(SvidError::InvalidInput(format!(
                "cannot buffer geometry type {other:?}"
            )))
        }
    };
    Ok(Geometry::MultiPolygon(buffered))
}

/// an approximately circular polygon of geodesic radius `radius_m` around
/// `center`.
pub fn circle_polygon(center: Point<f64>, radius_m: f64, segments: usize) -> Polygon<f64> {
    let mut coords = vec![];
    for i in 0..segments {
        let bearing = 360.0 * i as f64 / segments as f64;
        let vertex = Haversine.destination(center, bearing, radius_m);
        coords.push(vertex.0);
    }
    if let Some(first) = coords.first().copied() {
        coords.push(first);
    }
    Polygon::new(LineString::from(coords), vec![])
}

/// buffers a line by unioning circles planted along it at half-radius
/// stride.
fn buffer_linestring(line: &LineString<f64>, meters: f64) -> MultiPolygon<f64> {
    let stride = (meters / 2.0).max(1.0);
    let anchors = match super::sampling::points_along_linestring(line, stride) {
        Ok(points) => points,
        Err(_) => line.points().collect(),
    };
    union_all(
        anchors
            .into_iter()
            .map(|p| circle_polygon(p, meters, CIRCLE_SEGMENTS)),
    )
}

fn union_all(polygons: impl Iterator<Item = Polygon<f64>>) -> MultiPolygon<f64> {
    let mut result = MultiPolygon::<f64>(vec![]);
    for polygon in polygons {
        let addition = MultiPolygon(vec![polygon]);
        if result.0.is_empty() {
            result = addition;
        } else {
            result = result.union(&addition);
        }
    }
    result
}
