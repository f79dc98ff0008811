use svid::SvidError;

const TILE_URL: &str = "https://streetviewpixels-pa.googleapis.com/v1/tile";

/// nominal edge length of one Street View tile in pixels.
pub const TILE_SIZE: u32 = 512;

/// fetches one JPEG tile of a panorama's tile grid.
pub async fn fetch_tile(
    client: &reqwest::Client,
    panoid: &str,
    x: u32,
    y: u32,
    zoom: u32,
) -> Result<Vec<u8>, SvidError> {
    let response = client
        .get(TILE_URL)
        .query(&[
            ("cbp", "1"),
            ("panoid", panoid),
            ("x", x.to_string().as_str()),
            ("y", y.to_string().as_str()),
            ("zoom", zoom.to_string().as_str()),
        ])
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SvidError::RemoteRejection {
            status: status.as_u16(),
            message: format!("tile endpoint rejected ({x}, {y}) @ zoom {zoom} for '{panoid}'"),
        });
    }
    Ok(response.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // hits the live tile endpoint
    fn test_fetch_one_tile() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let client = reqwest::Client::new();
        let bytes = runtime
            .block_on(fetch_tile(&client, "z1BcVUWnjTD9SumnJzXkPw", 0, 0, 2))
            .unwrap();
        assert!(!bytes.is_empty());
    }
}
