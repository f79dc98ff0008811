use std::sync::LazyLock;

use regex::Regex;

use svid::table::Row;
use svid::SvidError;

const SEARCH_URL: &str =
    "https://maps.googleapis.com/maps/api/js/GeoPhotoService.SingleImageSearch";

/// search radius the pano lookup asks for, in meters.
pub const SEARCH_RADIUS_M: u32 = 50;

/// the pano lookup replies with a javascript-ish payload rather than
/// clean JSON; pano ids and their search coordinates are scraped out of
/// it positionally.
static PANO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[[0-9]+,"(.+?)"\].+?\[\[null,null,(-?[0-9]+\.[0-9]+),(-?[0-9]+\.[0-9]+)"#)
        .unwrap()
});
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]?[0-9]?[0-9])?,?\[(20[0-9][0-9]),([0-9]+)\]").unwrap());

/// one panorama reported by the unofficial lookup. capture dates are only
/// present for the newest pano and the trailing historical entries; the
/// rest are filled by metadata augmentation.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPano {
    pub panoid: String,
    pub lat: f64,
    pub lon: f64,
    pub year: Option<u32>,
    pub month: Option<u32>,
}

impl DiscoveredPano {
    pub fn into_row(self) -> Row {
        let mut row = Row::new();
        row.insert(String::from("panoid"), self.panoid);
        row.insert(String::from("lat"), self.lat.to_string());
        row.insert(String::from("lon"), self.lon.to_string());
        row.insert(
            String::from("year"),
            self.year.map(|y| y.to_string()).unwrap_or_default(),
        );
        row.insert(
            String::from("month"),
            self.month.map(|m| m.to_string()).unwrap_or_default(),
        );
        row
    }
}

/// queries the unofficial pano lookup for panoramas around a coordinate.
pub async fn panoids_near(
    client: &reqwest::Client,
    lat: f64,
    lon: f64,
) -> Result<Vec<DiscoveredPano>, SvidError> {
    let pb = search_pb(lat, lon, SEARCH_RADIUS_M);
    let response = client
        .get(SEARCH_URL)
        .query(&[("pb", pb.as_str())])
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SvidError::RemoteRejection {
            status: status.as_u16(),
            message: format!("pano lookup rejected query at ({lat}, {lon})"),
        });
    }
    let text = response.text().await?;
    Ok(parse_search_response(&text))
}

/// assembles the `pb` protobuf-ish query string the lookup endpoint
/// expects. the magic segments mirror what the maps frontend sends for a
/// `SingleImageSearch`.
fn search_pb(lat: f64, lon: f64, radius_m: u32) -> String {
    let mut pb = String::new();
    pb.push_str("!1m5!1sapiv3!5sUS!11m2!1m1!1b0");
    pb.push_str(&format!("!2m4!1m2!3d{lat:.7}!4d{lon:.7}!2d{radius_m}"));
    pb.push_str("!3m10!2m2!1sen!2sGB!9m1!1e2!11m4!1m3!1e2!2b1!3e2");
    pb.push_str("!4m10!1e1!1e2!1e3!1e4!1e8!1e6!5m1!1e2!6m1!1e2");
    pb
}

/// scrapes panoramas and capture dates out of the lookup payload. the
/// payload lists dates separately: the last date belongs to the first
/// (newest) pano, and the remaining dates apply in reverse order to the
/// trailing historical panos.
pub fn parse_search_response(text: &str) -> Vec<DiscoveredPano> {
    let mut panos: Vec<DiscoveredPano> = vec![];
    for captures in PANO_RE.captures_iter(text) {
        let (Some(panoid), Some(lat), Some(lon)) =
            (captures.get(1), captures.get(2), captures.get(3))
        else {
            continue;
        };
        let (Ok(lat), Ok(lon)) = (lat.as_str().parse::<f64>(), lon.as_str().parse::<f64>())
        else {
            continue;
        };
        let panoid = panoid.as_str().to_string();
        if panos.iter().any(|p| p.panoid == panoid) {
            continue;
        }
        panos.push(DiscoveredPano {
            panoid,
            lat,
            lon,
            year: None,
            month: None,
        });
    }
    if panos.is_empty() {
        return panos;
    }

    let mut dates: Vec<(u32, u32)> = vec![];
    for captures in DATE_RE.captures_iter(text) {
        let (Some(year), Some(month)) = (captures.get(2), captures.get(3)) else {
            continue;
        };
        let (Ok(year), Ok(month)) = (year.as_str().parse::<u32>(), month.as_str().parse::<u32>())
        else {
            continue;
        };
        if (1..=12).contains(&month) {
            dates.push((year, month));
        }
    }
    if let Some((year, month)) = dates.pop() {
        panos[0].year = Some(year);
        panos[0].month = Some(month);
    }
    dates.reverse();
    let n_panos = panos.len();
    for (offset, (year, month)) in dates.into_iter().enumerate() {
        let Some(pano) = n_panos
            .checked_sub(offset + 1)
            .filter(|i| *i > 0)
            .and_then(|i| panos.get_mut(i))
        else {
            break;
        };
        pano.year = Some(year);
        pano.month = Some(month);
    }
    panos
}

#[cfg(test)]
mod tests {
    use super::*;

    // a trimmed-down lookup payload: three panos, two dated entries
    // (the newest and the oldest historical one)
    const SAMPLE: &str = concat!(
        r#"[1,"AAA111AAA111AAA111AAAA"],null,[[null,null,1.3424251,103.7215232]"#,
        r#"[2,"BBB222BBB222BBB222BBBB"],null,[[null,null,1.3424260,103.7215250]"#,
        r#"[3,"CCC333CCC333CCC333CCCC"],null,[[null,null,1.3424270,103.7215260]"#,
        r#",[2014,7],188,[2022,3]"#,
    );

    #[test]
    fn test_parse_extracts_panos_and_coordinates() {
        let panos = parse_search_response(SAMPLE);
        assert_eq!(panos.len(), 3);
        assert_eq!(panos[0].panoid, "AAA111AAA111AAA111AAAA");
        assert!((panos[0].lat - 1.3424251).abs() < 1e-9);
        assert!((panos[0].lon - 103.7215232).abs() < 1e-9);
    }

    #[test]
    fn test_last_date_belongs_to_newest_pano() {
        let panos = parse_search_response(SAMPLE);
        assert_eq!(panos[0].year, Some(2022));
        assert_eq!(panos[0].month, Some(3));
        // the remaining date applies to the last historical pano
        assert_eq!(panos[2].year, Some(2014));
        assert_eq!(panos[2].month, Some(7));
        assert_eq!(panos[1].year, None);
    }

    #[test]
    fn test_duplicate_panoids_are_dropped() {
        let doubled = format!("{SAMPLE}{SAMPLE}");
        let panos = parse_search_response(&doubled);
        assert_eq!(panos.len(), 3);
    }

    #[test]
    fn test_months_out_of_range_are_ignored() {
        let payload = concat!(
            r#"[1,"AAA111AAA111AAA111AAAA"],null,[[null,null,1.0,103.0]"#,
            r#",[2020,13]"#,
        );
        let panos = parse_search_response(payload);
        assert_eq!(panos[0].year, None);
    }

    #[test]
    fn test_empty_payload_yields_no_panos() {
        assert!(parse_search_response("callback( [null] )").is_empty());
    }

    #[test]
    fn test_into_row_renders_missing_dates_as_empty() {
        let pano = DiscoveredPano {
            panoid: String::from("X"),
            lat: 1.0,
            lon: 103.0,
            year: None,
            month: None,
        };
        let row = pano.into_row();
        assert_eq!(row.get("year").map(String::as_str), Some(""));
        assert_eq!(row.get("panoid").map(String::as_str), Some("X"));
    }

    #[test]
    fn test_search_pb_embeds_coordinates_and_radius() {
        let pb = search_pb(1.342425, 103.721523, 50);
        assert!(pb.contains("!3d1.3424250"));
        assert!(pb.contains("!4d103.7215230"));
        assert!(pb.contains("!2d50"));
    }
}
