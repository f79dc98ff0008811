use std::path::PathBuf;

use svid::batch::DEFAULT_BATCH_SIZE;

/// construction-time settings for [`crate::GsvDownloader`].
#[derive(Debug, Clone, Default)]
pub struct GsvConfig {
    /// Google Maps API key; only required for metadata augmentation.
    pub api_key: Option<String>,
    /// failure log destination (one pano id per line, append-only).
    pub log_path: Option<PathBuf>,
    /// boundary-walk spacing in meters for polygonal inputs.
    pub distance: Option<f64>,
    /// lattice sampling instead of boundary walks.
    pub grid: bool,
    /// lattice cell size in meters.
    pub grid_size: Option<f64>,
    /// worker bound per batch; defaults to the task-runtime heuristic.
    pub max_workers: Option<usize>,
}

/// per-call options for [`crate::GsvDownloader::download_svi`].
#[derive(Debug, Clone)]
pub struct GsvOptions {
    /// user id columns to carry through to the pid table (lowercased).
    pub id_columns: Vec<String>,
    /// radial expansion of the input in meters; 0 disables.
    pub buffer: f64,
    /// re-run discovery even when a final pid table already exists.
    pub update_pids: bool,
    /// inclusive ISO `YYYY-MM-DD` capture date bounds.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// resolve capture year/month per pano via the official metadata
    /// endpoint (requires an API key).
    pub augment_metadata: bool,
    pub batch_size: usize,
    /// tile grid shape. zoom 1: 2x1, zoom 2: 4x2, zoom 3: 8x4,
    /// zoom 5: 26x13.
    pub zoom: u32,
    pub h_tiles: u32,
    pub v_tiles: u32,
    /// keep only the upper half of each stitched panorama.
    pub cropped: bool,
    /// keep the full canvas; when false, black borders are trimmed.
    pub full: bool,
}

impl Default for GsvOptions {
    fn default() -> Self {
        Self {
            id_columns: vec![],
            buffer: 0.0,
            update_pids: false,
            start_date: None,
            end_date: None,
            augment_metadata: false,
            batch_size: DEFAULT_BATCH_SIZE,
            zoom: 2,
            h_tiles: 4,
            v_tiles: 2,
            cropped: false,
            full: true,
        }
    }
}
