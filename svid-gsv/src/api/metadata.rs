use svid::SvidError;

const METADATA_URL: &str = "https://maps.googleapis.com/maps/api/streetview/metadata";

/// fetches the official capture date for a pano and splits it into
/// `(year, month)`. a reply with `status != "OK"` or without a parseable
/// `date` yields `(None, None)`; only HTTP-level failures are errors.
pub async fn fetch_year_month(
    client: &reqwest::Client,
    panoid: &str,
    api_key: &str,
) -> Result<(Option<String>, Option<String>), SvidError> {
    let response = client
        .get(METADATA_URL)
        .query(&[("pano", panoid), ("key", api_key)])
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SvidError::RemoteRejection {
            status: status.as_u16(),
            message: format!("metadata endpoint rejected pano '{panoid}'"),
        });
    }
    let payload: serde_json::Value = response.json().await.map_err(|e| {
        SvidError::Protocol(format!("metadata reply for '{panoid}' is not JSON: {e}"))
    })?;
    Ok(parse_metadata_reply(&payload))
}

pub fn parse_metadata_reply(payload: &serde_json::Value) -> (Option<String>, Option<String>) {
    if payload.get("status").and_then(|s| s.as_str()) != Some("OK") {
        return (None, None);
    }
    let Some(date) = payload.get("date").and_then(|d| d.as_str()) else {
        return (None, None);
    };
    let mut parts = date.splitn(2, '-');
    match (parts.next(), parts.next()) {
        (Some(year), Some(month)) if !year.is_empty() && !month.is_empty() => {
            (Some(year.to_string()), Some(month.to_string()))
        }
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_reply_splits_date() {
        let payload = json!({"status": "OK", "date": "2019-07", "pano_id": "abc"});
        assert_eq!(
            parse_metadata_reply(&payload),
            (Some(String::from("2019")), Some(String::from("07")))
        );
    }

    #[test]
    fn test_non_ok_status_yields_nulls() {
        let payload = json!({"status": "ZERO_RESULTS"});
        assert_eq!(parse_metadata_reply(&payload), (None, None));
    }

    #[test]
    fn test_ok_without_date_yields_nulls() {
        let payload = json!({"status": "OK", "pano_id": "abc"});
        assert_eq!(parse_metadata_reply(&payload), (None, None));
    }

    #[test]
    fn test_year_only_date_yields_nulls() {
        let payload = json!({"status": "OK", "date": "2019"});
        assert_eq!(parse_metadata_reply(&payload), (None, None));
    }
}
