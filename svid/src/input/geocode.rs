use geo::Geometry;

use crate::error::SvidError;

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

/// resolves a place name to its polygon through the Nominatim search
/// endpoint. the first match wins; a place without results is an input
/// error, not a transport one.
pub async fn geocode_place(client: &reqwest::Client, name: &str) -> Result<Geometry<f64>, SvidError> {
    let response = client
        .get(NOMINATIM_URL)
        .query(&[
            ("q", name),
            ("format", "geojson"),
            ("polygon_geojson", "1"),
            ("limit", "1"),
        ])
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SvidError::RemoteRejection {
            status: status.as_u16(),
            message: format!("geocoder rejected query for '{name}'"),
        });
    }
    let body = response.text().await?;
    parse_geocoder_response(name, &body)
}

fn parse_geocoder_response(name: &str, body: &str) -> Result<Geometry<f64>, SvidError> {
    let parsed: geojson::GeoJson = body
        .parse()
        .map_err(|e| SvidError::Protocol(format!("geocoder returned non-geojson payload: {e}")))?;
    let geojson::GeoJson::FeatureCollection(collection) = parsed else {
        return Err(SvidError::Protocol(String::from(
            "geocoder returned something other than a feature collection",
        )));
    };
    let geometry = collection
        .features
        .into_iter()
        .find_map(|feature| feature.geometry)
        .ok_or_else(|| {
            SvidError::InvalidInput(format!(
                "place name '{name}' was not found, please try another place name"
            ))
        })?;
    Geometry::<f64>::try_from(&geometry.value)
        .map_err(|e| SvidError::Protocol(format!("geocoder returned an unusable geometry: {e}")))
}
