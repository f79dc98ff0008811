use image::{imageops, RgbImage};

use svid::SvidError;

/// decodes one fetched tile. the tile endpoint occasionally answers with
/// an HTML error page under a 200, which surfaces here as a decode
/// failure.
pub fn decode_tile(panoid: &str, bytes: &[u8]) -> Result<RgbImage, SvidError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| {
            SvidError::Protocol(format!("undecodable tile payload for '{panoid}': {e}"))
        })
}

/// composes an `h_tiles x v_tiles` grid of tiles into one panorama in
/// row-major order. all tiles must share the dimensions of the first.
pub fn stitch_tiles(
    tiles: &[(u32, u32, RgbImage)],
    h_tiles: u32,
    v_tiles: u32,
) -> Result<RgbImage, SvidError> {
    let Some((_, _, first)) = tiles.first() else {
        return Err(SvidError::InternalError(String::from(
            "cannot stitch an empty tile set",
        )));
    };
    let (tile_w, tile_h) = first.dimensions();
    let mut canvas = RgbImage::new(h_tiles * tile_w, v_tiles * tile_h);
    for (x, y, tile) in tiles {
        if tile.dimensions() != (tile_w, tile_h) {
            return Err(SvidError::Protocol(format!(
                "tile ({x}, {y}) has dimensions {:?}, expected {:?}",
                tile.dimensions(),
                (tile_w, tile_h)
            )));
        }
        if *x >= h_tiles || *y >= v_tiles {
            return Err(SvidError::InternalError(format!(
                "tile ({x}, {y}) is outside the {h_tiles}x{v_tiles} grid"
            )));
        }
        imageops::replace(
            &mut canvas,
            tile,
            (*x * tile_w) as i64,
            (*y * tile_h) as i64,
        );
    }
    Ok(canvas)
}

/// keeps only the upper half of the panorama (sky and facades; the lower
/// half is mostly road surface and the capture vehicle).
pub fn crop_top_half(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let half = (height / 2).max(1);
    imageops::crop_imm(image, 0, 0, width, half).to_image()
}

/// trims the black right/bottom padding lower zoom levels leave on
/// non-power-of-two panoramas.
pub fn trim_black_borders(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let is_black = |x: u32, y: u32| {
        let pixel = image.get_pixel(x, y);
        pixel.0[0] as u16 + pixel.0[1] as u16 + pixel.0[2] as u16 <= 10
    };
    let mut max_x = 0;
    let mut max_y = 0;
    for y in 0..height {
        for x in 0..width {
            if !is_black(x, y) {
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
    }
    if max_x == 0 && max_y == 0 {
        return image.clone();
    }
    imageops::crop_imm(image, 0, 0, max_x + 1, max_y + 1).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid_tile(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn test_stitch_dimensions_match_grid() {
        let tiles: Vec<(u32, u32, RgbImage)> = (0..2u32)
            .flat_map(|y| (0..4u32).map(move |x| (x, y, solid_tile(512, 512, 128))))
            .collect();
        let stitched = stitch_tiles(&tiles, 4, 2).unwrap();
        assert_eq!(stitched.dimensions(), (2048, 1024));
    }

    #[test]
    fn test_stitch_places_tiles_row_major() {
        let tiles = vec![
            (0u32, 0u32, solid_tile(2, 2, 10)),
            (1, 0, solid_tile(2, 2, 20)),
            (0, 1, solid_tile(2, 2, 30)),
            (1, 1, solid_tile(2, 2, 40)),
        ];
        let stitched = stitch_tiles(&tiles, 2, 2).unwrap();
        assert_eq!(stitched.get_pixel(0, 0).0[0], 10);
        assert_eq!(stitched.get_pixel(2, 0).0[0], 20);
        assert_eq!(stitched.get_pixel(0, 2).0[0], 30);
        assert_eq!(stitched.get_pixel(3, 3).0[0], 40);
    }

    #[test]
    fn test_mismatched_tile_dimensions_are_rejected() {
        let tiles = vec![
            (0u32, 0u32, solid_tile(2, 2, 10)),
            (1, 0, solid_tile(3, 2, 20)),
        ];
        assert!(stitch_tiles(&tiles, 2, 1).is_err());
    }

    #[test]
    fn test_crop_top_half_halves_height() {
        let image = solid_tile(2048, 1024, 99);
        let cropped = crop_top_half(&image);
        assert_eq!(cropped.dimensions(), (2048, 512));
    }

    #[test]
    fn test_trim_black_borders() {
        let mut image = RgbImage::new(10, 10);
        for y in 0..6 {
            for x in 0..8 {
                image.put_pixel(x, y, Rgb([200, 200, 200]));
            }
        }
        let trimmed = trim_black_borders(&image);
        assert_eq!(trimmed.dimensions(), (8, 6));
    }

    #[test]
    fn test_all_black_image_is_left_alone() {
        let image = RgbImage::new(4, 4);
        let trimmed = trim_black_borders(&image);
        assert_eq!(trimmed.dimensions(), (4, 4));
    }

    #[test]
    fn test_decode_tile_rejects_html_error_pages() {
        let result = decode_tile("abc", b"<html>tile not found</html>");
        assert!(matches!(result, Err(SvidError::Protocol(_))));
    }
}
