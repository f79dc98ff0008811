use std::path::PathBuf;

use svid::batch::DEFAULT_BATCH_SIZE;

use crate::api::graph::DiscoveryFilters;

/// construction-time settings for [`crate::MlyDownloader`]. the access
/// token is mandatory; every graph API call carries it.
#[derive(Debug, Clone, Default)]
pub struct MlyConfig {
    pub api_key: String,
    /// failure log destination (one image id per line, append-only).
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

/// per-call options for [`crate::MlyDownloader::download_svi`].
#[derive(Debug, Clone)]
pub struct MlyOptions {
    /// user id columns to carry through to the pid table (lowercased).
    pub id_columns: Vec<String>,
    /// radial expansion of the input in meters; 0 disables.
    pub buffer: f64,
    /// re-run discovery even when a final pid table already exists.
    pub update_pids: bool,
    /// inclusive ISO `YYYY-MM-DD` capture date bounds.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// thumbnail resolution (256, 1024 or 2048).
    pub resolution: u32,
    /// keep only the upper half of each image.
    pub cropped: bool,
    pub batch_size: usize,
    /// stop after writing the pid table.
    pub metadata_only: bool,
    /// server-side discovery filters forwarded to the graph API.
    pub filters: DiscoveryFilters,
}

impl Default for MlyOptions {
    fn default() -> Self {
        Self {
            id_columns: vec![],
            buffer: 0.0,
            update_pids: false,
            start_date: None,
            end_date: None,
            resolution: 1024,
            cropped: false,
            batch_size: DEFAULT_BATCH_SIZE,
            metadata_only: false,
            filters: DiscoveryFilters::default(),
        }
    }
}
