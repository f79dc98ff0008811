use svid::table::Row;
use svid::SvidError;

const GRAPH_URL: &str = "https://graph.mapillary.com";

/// half-width of the bounding box the image search spans around a query
/// point, in meters.
pub const DEFAULT_SEARCH_RADIUS_M: f64 = 100.0;

const SEARCH_FIELDS: &str = "id,captured_at,compass_angle,is_pano,organization_id,sequence,geometry";
const SEARCH_LIMIT: u32 = 2000;

const METERS_PER_DEGREE: f64 = 111_320.0;

/// server-side filters forwarded to the image search.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilters {
    /// search half-width in meters; defaults to
    /// [`DEFAULT_SEARCH_RADIUS_M`].
    pub radius_m: Option<f64>,
    /// restrict to panoramic or flat imagery.
    pub image_type: Option<ImageType>,
    /// capture-time bounds in milliseconds since the epoch.
    pub min_captured_at: Option<i64>,
    pub max_captured_at: Option<i64>,
    /// restrict to imagery owned by these organizations.
    pub organization_id: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Pano,
    Flat,
    All,
}

/// searches the graph API for images inside a bbox around a coordinate,
/// returning one row per image in the pid table's vocabulary.
pub async fn images_near(
    client: &reqwest::Client,
    api_key: &str,
    lat: f64,
    lon: f64,
    filters: &DiscoveryFilters,
) -> Result<Vec<Row>, SvidError> {
    let radius = filters.radius_m.unwrap_or(DEFAULT_SEARCH_RADIUS_M);
    let d_lat = radius / METERS_PER_DEGREE;
    let d_lon = radius / (METERS_PER_DEGREE * lat.to_radians().cos().max(1e-6));
    let bbox = format!(
        "{},{},{},{}",
        lon - d_lon,
        lat - d_lat,
        lon + d_lon,
        lat + d_lat
    );

    let mut query: Vec<(&str, String)> = vec![
        ("access_token", api_key.to_string()),
        ("fields", SEARCH_FIELDS.to_string()),
        ("bbox", bbox),
        ("limit", SEARCH_LIMIT.to_string()),
    ];
    match filters.image_type {
        Some(ImageType::Pano) => query.push(("is_pano", String::from("true"))),
        Some(ImageType::Flat) => query.push(("is_pano", String::from("false"))),
        Some(ImageType::All) | None => {}
    }
    if let Some(min) = filters.min_captured_at {
        query.push(("min_captured_at", min.to_string()));
    }
    if let Some(max) = filters.max_captured_at {
        query.push(("max_captured_at", max.to_string()));
    }
    if !filters.organization_id.is_empty() {
        query.push(("organization_id", filters.organization_id.join(",")));
    }

    let response = client
        .get(format!("{GRAPH_URL}/images"))
        .query(&query)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SvidError::RemoteRejection {
            status: status.as_u16(),
            message: format!("image search rejected query at ({lat}, {lon})"),
        });
    }
    let payload: serde_json::Value = response
        .json()
        .await
        .map_err(|e| SvidError::Protocol(format!("image search reply is not JSON: {e}")))?;
    parse_images_reply(&payload)
}

pub fn parse_images_reply(payload: &serde_json::Value) -> Result<Vec<Row>, SvidError> {
    let items = payload
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            SvidError::Protocol(String::from("image search reply has no 'data' array"))
        })?;
    Ok(items.iter().filter_map(image_row).collect())
}

/// flattens one graph API image object into a pid row. images without an
/// id or a point geometry are dropped.
fn image_row(item: &serde_json::Value) -> Option<Row> {
    let id = scalar_string(item.get("id")?)?;
    let coordinates = item
        .get("geometry")
        .and_then(|g| g.get("coordinates"))
        .and_then(|c| c.as_array())?;
    let lon = coordinates.first().and_then(|v| v.as_f64())?;
    let lat = coordinates.get(1).and_then(|v| v.as_f64())?;

    let mut row = Row::new();
    row.insert(String::from("id"), id);
    row.insert(
        String::from("captured_at"),
        item.get("captured_at")
            .and_then(scalar_string)
            .unwrap_or_default(),
    );
    row.insert(
        String::from("compass_angle"),
        item.get("compass_angle")
            .and_then(scalar_string)
            .unwrap_or_default(),
    );
    row.insert(
        String::from("is_pano"),
        item.get("is_pano")
            .and_then(scalar_string)
            .unwrap_or_default(),
    );
    row.insert(
        String::from("organization_id"),
        item.get("organization_id")
            .and_then(scalar_string)
            .unwrap_or_default(),
    );
    row.insert(
        String::from("sequence_id"),
        item.get("sequence")
            .and_then(scalar_string)
            .unwrap_or_default(),
    );
    row.insert(String::from("lon"), lon.to_string());
    row.insert(String::from("lat"), lat.to_string());
    Some(row)
}

fn scalar_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// resolves the thumbnail URL of one image at the requested resolution.
pub async fn image_thumbnail_url(
    client: &reqwest::Client,
    api_key: &str,
    image_id: &str,
    resolution: u32,
) -> Result<String, SvidError> {
    let field = thumb_field(resolution)?;
    let response = client
        .get(format!("{GRAPH_URL}/{image_id}"))
        .query(&[("access_token", api_key), ("fields", field.as_str())])
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SvidError::RemoteRejection {
            status: status.as_u16(),
            message: format!("thumbnail lookup rejected image '{image_id}'"),
        });
    }
    let payload: serde_json::Value = response
        .json()
        .await
        .map_err(|e| SvidError::Protocol(format!("thumbnail reply is not JSON: {e}")))?;
    payload
        .get(&field)
        .and_then(|u| u.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            SvidError::Protocol(format!(
                "thumbnail reply for '{image_id}' has no {field} field"
            ))
        })
}

/// the graph API exposes thumbnails at fixed resolutions only.
pub fn thumb_field(resolution: u32) -> Result<String, SvidError> {
    match resolution {
        256 | 1024 | 2048 => Ok(format!("thumb_{resolution}_url")),
        other => Err(SvidError::InvalidInput(format!(
            "unsupported thumbnail resolution {other}, expected 256, 1024 or 2048"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_images_reply_flattens_features() {
        let payload = json!({
            "data": [
                {
                    "id": "497149605748293",
                    "captured_at": 1585667162000i64,
                    "compass_angle": 243.2,
                    "is_pano": true,
                    "organization_id": "1805883732926354",
                    "sequence": "xyz123",
                    "geometry": {"type": "Point", "coordinates": [13.146558, 11.8275756]}
                }
            ]
        });
        let rows = parse_images_reply(&payload).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("id").map(String::as_str), Some("497149605748293"));
        assert_eq!(
            row.get("captured_at").map(String::as_str),
            Some("1585667162000")
        );
        assert_eq!(row.get("is_pano").map(String::as_str), Some("true"));
        assert_eq!(row.get("sequence_id").map(String::as_str), Some("xyz123"));
        assert_eq!(row.get("lon").map(String::as_str), Some("13.146558"));
    }

    #[test]
    fn test_images_without_geometry_are_dropped() {
        let payload = json!({"data": [{"id": "1"}]});
        let rows = parse_images_reply(&payload).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_missing_data_array_is_protocol_error() {
        let payload = json!({"error": {"message": "invalid token"}});
        assert!(matches!(
            parse_images_reply(&payload),
            Err(SvidError::Protocol(_))
        ));
    }

    #[test]
    fn test_thumb_field_rejects_odd_resolutions() {
        assert_eq!(thumb_field(1024).unwrap(), "thumb_1024_url");
        assert!(thumb_field(512).is_err());
    }
}
