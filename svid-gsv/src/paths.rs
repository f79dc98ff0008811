use std::path::{Path, PathBuf};

use svid::SvidError;

pub(crate) const CACHE_DIR: &str = "cache_svid";

/// the on-disk layout of one Street View run.
#[derive(Debug, Clone)]
pub(crate) struct GsvPaths {
    pub dir_output: PathBuf,
    pub dir_cache: PathBuf,
    pub cache_lat_lon: PathBuf,
    pub cache_pids_raw: PathBuf,
    /// historical spelling kept so caches written by older tooling
    /// still resume.
    pub cache_pids_augmented: PathBuf,
    pub path_pid: PathBuf,
    pub panorama_output: PathBuf,
}

impl GsvPaths {
    pub fn new(dir_output: &Path) -> Self {
        let dir_cache = dir_output.join(CACHE_DIR);
        Self {
            dir_output: dir_output.to_path_buf(),
            cache_lat_lon: dir_cache.join("lat_lon.csv"),
            cache_pids_raw: dir_cache.join("pids_raw.csv"),
            cache_pids_augmented: dir_cache.join("pids_augemented.csv"),
            path_pid: dir_output.join("gsv_pids.csv"),
            panorama_output: dir_output.join("gsv_panorama"),
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
