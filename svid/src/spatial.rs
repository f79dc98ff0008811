use geo::{BoundingRect, Contains, Point, Polygon};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

use crate::error::SvidError;

type IndexedPolygon = GeomWithData<Rectangle<(f64, f64)>, Polygon<f64>>;

/// R-tree backed point-in-polygon index over the (possibly buffered)
/// input polygons. membership tests compare bounding boxes first and the
/// precise polygon only for envelope hits, keeping batched lookups near
/// linear in the number of points.
#[derive(Debug)]
pub struct PolygonIndex {
    tree: RTree<IndexedPolygon>,
    len: usize,
}

impl PolygonIndex {
    pub fn new(polygons: Vec<Polygon<f64>>) -> Result<Self, SvidError> {
        let len = polygons.len();
        let mut entries = vec![];
        for polygon in polygons {
            let bbox = polygon.bounding_rect().ok_or_else(|| {
                SvidError::InvalidInput(String::from(
                    "cannot build spatial index over a degenerate polygon",
                ))
            })?;
            let envelope = Rectangle::from_corners(bbox.min().x_y(), bbox.max().x_y());
            entries.push(GeomWithData::new(envelope, polygon));
        }
        Ok(Self {
            tree: RTree::bulk_load(entries),
            len,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// whether `(lon, lat)` falls inside at least one indexed polygon.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let probe = AABB::from_point((lon, lat));
        self.tree
            .locate_in_envelope_intersecting(&probe)
            .any(|entry| entry.data.contains(&Point::new(lon, lat)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn unit_square(x0: f64, y0: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + 1.0, y: y0),
            (x: x0 + 1.0, y: y0 + 1.0),
            (x: x0, y: y0 + 1.0),
            (x: x0, y: y0),
        ]
    }

    #[test]
    fn test_contains_inside_and_outside() {
        let index = PolygonIndex::new(vec![unit_square(0.0, 0.0)]).unwrap();
        assert!(index.contains(0.5, 0.5));
        assert!(!index.contains(1.5, 0.5));
    }

    #[test]
    fn test_multiple_polygons_any_match_counts() {
        let index = PolygonIndex::new(vec![unit_square(0.0, 0.0), unit_square(10.0, 10.0)]).unwrap();
        assert!(index.contains(10.5, 10.5));
        assert!(!index.contains(5.0, 5.0));
    }

    #[test]
    fn test_envelope_hit_but_precise_miss() {
        // a triangle whose bbox covers the probe but whose interior does not
        let triangle = polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ];
        let index = PolygonIndex::new(vec![triangle]).unwrap();
        assert!(index.contains(0.2, 0.2));
        assert!(!index.contains(0.9, 0.9));
    }

    #[test]
    fn test_empty_index() {
        let index = PolygonIndex::new(vec![]).unwrap();
        assert!(index.is_empty());
        assert!(!index.contains(0.0, 0.0));
    }
}
