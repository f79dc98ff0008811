use geo::line_measures::LengthMeasurable;
use geo::{BoundingRect, Contains, Geometry, Haversine, InterpolatableLine, LineString, Point, Polygon};

use crate::error::SvidError;
use crate::input::buffer::METERS_PER_DEGREE;

/// hard cap on lattice candidates, so a tiny `grid_size` over a large
/// polygon fails loudly instead of allocating without bound.
const MAX_LATTICE_CANDIDATES: u64 = 5_000_000;

/// densifies a geometry into query points. point features pass through;
/// lines are walked at `distance_m` spacing; polygons are either walked
/// along their boundary rings (`grid == false`) or covered with a regular
/// lattice of `grid_size_m` cells clipped to the polygon (`grid == true`).
pub fn sample_geometry(
    geometry: &Geometry<f64>,
    distance_m: f64,
    grid: bool,
    grid_size_m: f64,
) -> Result<Vec<Point<f64>>, SvidError> {
    match geometry {
        Geometry::Point(point) => Ok(vec![*point]),
        Geometry::MultiPoint(points) => Ok(points.iter().copied().collect()),
        Geometry::Line(line) => {
            points_along_linestring(&LineString::from(vec![line.start, line.end]), distance_m)
        }
        Geometry::LineString(line) => points_along_linestring(line, distance_m),
        Geometry::MultiLineString(lines) => {
            let mut points = vec![];
            for line in &lines.0 {
                points.extend(points_along_linestring(line, distance_m)?);
            }
            Ok(points)
        }
        Geometry::Polygon(polygon) => {
            if grid {
                lattice_points(polygon, grid_size_m)
            } else {
                boundary_points(polygon, distance_m)
            }
        }
        Geometry::MultiPolygon(polygons) => {
            let mut points = vec![];
            for polygon in &polygons.0 {
                points.extend(sample_geometry(
                    &Geometry::Polygon(polygon.clone()),
                    distance_m,
                    grid,
                    grid_size_m,
                )?);
            }
            Ok(points)
        }
        Geometry::Rect(rect) => sample_geometry(
            &Geometry::Polygon(rect.to_polygon()),
            distance_m,
            grid,
            grid_size_m,
        ),
        Geometry::Triangle(triangle) => sample_geometry(
            &Geometry::Polygon(triangle.to_polygon()),
            distance_m,
            grid,
            grid_size_m,
        ),
        Geometry::GeometryCollection(collection) => {
            let mut points = vec![];
            for geometry in &collection.0 {
                points.extend(sample_geometry(geometry, distance_m, grid, grid_size_m)?);
            }
            Ok(points)
        }
    }
}

/// walks a linestring emitting a point every `stride_m` meters of
/// haversine length. lines shorter than one stride contribute their two
/// endpoints.
pub fn points_along_linestring(
    line: &LineString<f64>,
    stride_m: f64,
) -> Result<Vec<Point<f64>>, SvidError> {
    if stride_m <= 0.0 {
        return Err(SvidError::InvalidInput(format!(
            "sampling distance must be positive, got {stride_m}"
        )));
    }
    let length_m = line.length(&Haversine);
    if length_m < stride_m {
        match (line.points().next(), line.points().next_back()) {
            (Some(first), Some(last)) => Ok(vec![first, last]),
            _ => Err(SvidError::InvalidInput(format!(
                "invalid linestring, should have at least two points: {line:?}"
            ))),
        }
    } else {
        let n_strides = (length_m / stride_m).ceil() as u64;
        let mut points = vec![];
        for stride_index in 0..=n_strides {
            let fraction = ((stride_index as f64 * stride_m) / length_m).min(1.0);
            let point = line
                .point_at_ratio_from_start(&Haversine, fraction)
                .ok_or_else(|| {
                    SvidError::InternalError(format!(
                        "unable to interpolate {:.1}% into linestring with length {length_m}m",
                        fraction * 100.0
                    ))
                })?;
            points.push(point);
        }
        Ok(points)
    }
}

fn boundary_points(polygon: &Polygon<f64>, distance_m: f64) -> Result<Vec<Point<f64>>, SvidError> {
    let mut points = points_along_linestring(polygon.exterior(), distance_m)?;
    for interior in polygon.interiors() {
        points.extend(points_along_linestring(interior, distance_m)?);
    }
    Ok(points)
}

fn lattice_points(polygon: &Polygon<f64>, cell_m: f64) -> Result<Vec<Point<f64>>, SvidError> {
    if cell_m <= 0.0 {
        return Err(SvidError::InvalidInput(format!(
            "grid size must be positive, got {cell_m}"
        )));
    }
    let bbox = polygon.bounding_rect().ok_or_else(|| {
        SvidError::InvalidInput(String::from("cannot grid a degenerate polygon"))
    })?;
    let lat_step = cell_m / METERS_PER_DEGREE;
    let mid_lat = (bbox.min().y + bbox.max().y) / 2.0;
    // longitude degrees shrink with latitude; clamp the cosine so polar
    // junk input cannot divide by zero
    let lon_step = cell_m / (METERS_PER_DEGREE * mid_lat.to_radians().cos().max(1e-6));

    let n_rows = ((bbox.max().y - bbox.min().y) / lat_step).ceil() as u64 + 1;
    let n_cols = ((bbox.max().x - bbox.min().x) / lon_step).ceil() as u64 + 1;
    if n_rows.saturating_mul(n_cols) > MAX_LATTICE_CANDIDATES {
        return Err(SvidError::InvalidInput(format!(
            "grid of {cell_m}m cells over this extent would produce more than {MAX_LATTICE_CANDIDATES} candidate points; increase grid_size"
        )));
    }

    let mut points = vec![];
    for row in 0..n_rows {
        for col in 0..n_cols {
            let point = Point::new(
                bbox.min().x + col as f64 * lon_step,
                bbox.min().y + row as f64 * lat_step,
            );
            if polygon.contains(&point) {
                points.push(point);
            }
        }
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::buffer::circle_polygon;
    use geo::polygon;

    #[test]
    fn test_line_shorter_than_stride_keeps_endpoints() {
        let line = LineString::from(vec![(103.0, 1.0), (103.0001, 1.0)]);
        let points = points_along_linestring(&line, 1000.0).unwrap();
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn test_stride_controls_point_count() {
        // ~1.1km of line, sampled at 100m and at 50m
        let line = LineString::from(vec![(103.0, 1.0), (103.01, 1.0)]);
        let coarse = points_along_linestring(&line, 100.0).unwrap();
        let fine = points_along_linestring(&line, 50.0).unwrap();
        assert!(coarse.len() >= 11);
        assert!(fine.len() > coarse.len());
    }

    #[test]
    fn test_lattice_points_fall_inside_polygon() {
        let polygon = circle_polygon(Point::new(103.8, 1.35), 500.0, 32);
        let points = lattice_points(&polygon, 100.0).unwrap();
        assert!(!points.is_empty());
        for point in &points {
            assert!(polygon.contains(point));
        }
    }

    #[test]
    fn test_grid_flag_switches_sampling_mode() {
        let polygon: Polygon<f64> = polygon![
            (x: 103.80, y: 1.30),
            (x: 103.82, y: 1.30),
            (x: 103.82, y: 1.32),
            (x: 103.80, y: 1.32),
            (x: 103.80, y: 1.30),
        ];
        let geometry = Geometry::Polygon(polygon);
        let boundary = sample_geometry(&geometry, 100.0, false, 100.0).unwrap();
        let lattice = sample_geometry(&geometry, 100.0, true, 100.0).unwrap();
        // the lattice covers the interior, the walk only the rings
        assert!(lattice.len() > boundary.len());
    }

    #[test]
    fn test_degenerate_grid_size_is_rejected() {
        let polygon = circle_polygon(Point::new(0.0, 0.0), 100.0, 8);
        assert!(lattice_points(&polygon, 0.0).is_err());
    }
}
