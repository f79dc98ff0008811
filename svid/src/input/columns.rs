use crate::model::{LATITUDE, LONGITUDE};

const LONGITUDE_VARIANTS: [&str; 5] = ["longitude", "long", "lon", "lng", "x"];
const LATITUDE_VARIANTS: [&str; 4] = ["latitude", "lat", "lt", "y"];

/// maps a column name to its canonical form: any recognized longitude or
/// latitude variant (case-insensitive) becomes `longitude`/`latitude`,
/// everything else is lowercased. idempotent.
pub fn standardize_column_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    if LONGITUDE_VARIANTS.contains(&lowered.as_str()) {
        String::from(LONGITUDE)
    } else if LATITUDE_VARIANTS.contains(&lowered.as_str()) {
        String::from(LATITUDE)
    } else {
        lowered
    }
}

pub fn standardize_column_names(headers: &[String]) -> Vec<String> {
    headers
        .iter()
        .map(|h| standardize_column_name(h))
        .collect()
}
