use std::path::Path;

use indexmap::IndexMap;

use crate::error::SvidError;

pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const LAT_LON_ID: &str = "lat_lon_id";

/// one location to probe for panoramas. `lat_lon_id` is the 1-based key
/// that joins provider records back to their query point within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub lat_lon_id: u64,
    /// user-supplied id columns (lowercased), preserved for downstream joins.
    pub ids: IndexMap<String, String>,
}

/// the resolved point table of a run, persisted to `lat_lon.csv` in the
/// cache directory so interrupted runs skip input re-computation.
#[derive(Debug, Clone, Default)]
pub struct PointTable {
    pub id_columns: Vec<String>,
    pub points: Vec<QueryPoint>,
}

impl PointTable {
    pub fn new(id_columns: Vec<String>, points: Vec<QueryPoint>) -> Self {
        Self { id_columns, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn write(&self, path: &Path) -> Result<(), SvidError> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| SvidError::csv(path, e))?;
        let mut header = vec![LATITUDE, LONGITUDE, LAT_LON_ID];
        header.extend(self.id_columns.iter().map(String::as_str));
        writer
            .write_record(&header)
            .map_err(|e| SvidError::csv(path, e))?;
        for point in &self.points {
            let mut record = vec![
                point.latitude.to_string(),
                point.longitude.to_string(),
                point.lat_lon_id.to_string(),
            ];
            for column in &self.id_columns {
                record.push(point.ids.get(column).cloned().unwrap_or_default());
            }
            writer
                .write_record(&record)
                .map_err(|e| SvidError::csv(path, e))?;
        }
        writer.flush().map_err(|e| SvidError::filesystem(path, e))?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, SvidError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| SvidError::csv(path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| SvidError::csv(path, e))?
            .clone();
        let id_columns: Vec<String> = headers
            .iter()
            .filter(|h| *h != LATITUDE && *h != LONGITUDE && *h != LAT_LON_ID)
            .map(|h| h.to_string())
            .collect();
        let mut points = vec![];
        for record in reader.records() {
            let record = record.map_err(|e| SvidError::csv(path, e))?;
            let mut latitude = None;
            let mut longitude = None;
            let mut lat_lon_id = None;
            let mut ids = IndexMap::new();
            for (header, value) in headers.iter().zip(record.iter()) {
                match header {
                    LATITUDE => latitude = value.parse::<f64>().ok(),
                    LONGITUDE => longitude = value.parse::<f64>().ok(),
                    LAT_LON_ID => lat_lon_id = value.parse::<u64>().ok(),
                    _ => {
                        ids.insert(header.to_string(), value.to_string());
                    }
                }
            }
            match (latitude, longitude, lat_lon_id) {
                (Some(latitude), Some(longitude), Some(lat_lon_id)) => points.push(QueryPoint {
                    latitude,
                    longitude,
                    lat_lon_id,
                    ids,
                }),
                _ => {
                    return Err(SvidError::Corruption {
                        path: path.to_path_buf(),
                        message: String::from(
                            "point table row missing latitude, longitude or lat_lon_id",
                        ),
                    })
                }
            }
        }
        Ok(Self { id_columns, points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lat_lon.csv");
        let points = vec![
            QueryPoint {
                latitude: 1.342425,
                longitude: 103.721523,
                lat_lon_id: 1,
                ids: IndexMap::from([(String::from("site"), String::from("jurong"))]),
            },
            QueryPoint {
                latitude: 1.35,
                longitude: 103.73,
                lat_lon_id: 2,
                ids: IndexMap::from([(String::from("site"), String::from("bukit"))]),
            },
        ];
        let table = PointTable::new(vec![String::from("site")], points.clone());
        table.write(&path).unwrap();
        let read = PointTable::read(&path).unwrap();
        assert_eq!(read.id_columns, vec!["site"]);
        assert_eq!(read.points, points);
    }

    #[test]
    fn test_point_table_read_rejects_missing_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lat_lon.csv");
        std::fs::write(&path, "latitude,longitude,lat_lon_id\n1.0,,1\n").unwrap();
        assert!(matches!(
            PointTable::read(&path),
            Err(SvidError::Corruption { .. })
        ));
    }
}
