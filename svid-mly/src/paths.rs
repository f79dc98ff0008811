use std::path::{Path, PathBuf};

use svid::SvidError;

pub(crate) const CACHE_DIR: &str = "cache_svid";

/// the on-disk layout of one Mapillary run.
#[derive(Debug, Clone)]
pub(crate) struct MlyPaths {
    pub dir_output: PathBuf,
    pub dir_cache: PathBuf,
    pub cache_lat_lon: PathBuf,
    pub cache_pids_raw: PathBuf,
    pub path_pid: PathBuf,
    pub pids_urls: PathBuf,
    pub panorama_output: PathBuf,
}

impl MlyPaths {
    pub fn new(dir_output: &Path) -> Self {
        let dir_cache = dir_output.join(CACHE_DIR);
        Self {
            dir_output: dir_output.to_path_buf(),
            cache_lat_lon: dir_cache.join("lat_lon.csv"),
            cache_pids_raw: dir_cache.join("pids_raw.csv"),
            path_pid: dir_output.join("mly_pids.csv"),
            pids_urls: dir_output.join("pids_urls.csv"),
            panorama_output: dir_output.join("mly_svi"),
            dir_cache,
        }
    }

    pub fn create(&self) -> Result<(), SvidError> {
        std::fs::create_dir_all(&self.dir_output)
            .map_err(|e| SvidError::filesystem(&self.dir_output, e))?;
        std::fs::create_dir_all(&self.dir_cache)
            .map_err(|e| SvidError::filesystem(&self.dir_cache, e))
    }

    pub fn remove_cache(&self) -> Result<(), SvidError> {
        if self.dir_cache.exists() {
            std::fs::remove_dir_all(&self.dir_cache)
                .map_err(|e| SvidError::filesystem(&self.dir_cache, e))?;
            log::info!("the cache directory has been deleted");
        }
        Ok(())
    }
}
