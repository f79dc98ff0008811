use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kdam::tqdm;

use svid::batch::{self, StageOptions, INPUT_LATITUDE, INPUT_LONGITUDE};
use svid::checkpoint::CheckpointStore;
use svid::completion;
use svid::dates::DateRange;
use svid::faillog::FailureLog;
use svid::input::{InputOptions, PointInput};
use svid::model::LAT_LON_ID;
use svid::net::{
    client_for, with_rotation, ProxyPool, RetryPolicy, UserAgentPool, IMAGE_TIMEOUT,
    METADATA_TIMEOUT,
};
use svid::spatial::PolygonIndex;
use svid::table::{self, Row};
use svid::SvidError;

use crate::api;
use crate::error::GsvError;
use crate::options::{GsvConfig, GsvOptions};
use crate::paths::GsvPaths;
use crate::stitch;

const PANOID: &str = "panoid";

/// Google Street View downloader: discovers pano ids around the input,
/// optionally augments capture dates through the official metadata
/// endpoint, and fetches tile-stitched panoramas.
pub struct GsvDownloader {
    api_key: Option<String>,
    faillog: Arc<FailureLog>,
    distance: f64,
    grid: bool,
    grid_size: f64,
    max_workers: usize,
    proxies: Arc<ProxyPool>,
    user_agents: Arc<UserAgentPool>,
    retry: RetryPolicy,
}

impl GsvDownloader {
    pub fn new(config: GsvConfig) -> Result<Self, GsvError> {
        if config.api_key.is_none() {
            log::warn!(
                "no Street View API key provided; metadata augmentation will be unavailable"
            );
        }
        let proxies = Arc::new(ProxyPool::packaged()?);
        let user_agents = Arc::new(UserAgentPool::packaged()?);
        Ok(Self {
            api_key: config.api_key,
            faillog: Arc::new(FailureLog::new(config.log_path)),
            distance: config.distance.unwrap_or(1.0),
            grid: config.grid,
            grid_size: config.grid_size.unwrap_or(1.0),
            max_workers: config.max_workers.unwrap_or_else(batch::default_max_workers),
            proxies,
            user_agents,
            retry: RetryPolicy::default(),
        })
    }

    /// runs the full pipeline against `dir_output`: pid table, then
    /// panorama tiles into `gsv_panorama/batch_{N}/`. the scratch
    /// directory survives failures for resume and is removed on success.
    pub fn download_svi(
        &self,
        dir_output: &Path,
        input: &PointInput,
        opts: &GsvOptions,
    ) -> Result<(), GsvError> {
        let dates = DateRange::parse(opts.start_date.as_deref(), opts.end_date.as_deref())
            .map_err(GsvError::Pipeline)?;
        validate_options(opts)?;
        if opts.augment_metadata && self.api_key.is_none() {
            return Err(GsvError::Pipeline(SvidError::MissingCredential(
                String::from("metadata augmentation requires a Street View API key"),
            )));
        }

        let paths = GsvPaths::new(dir_output);
        paths.create()?;
        let runtime = batch::build_runtime()?;

        self.ensure_pid_table(&runtime, &paths, input, opts)?;
        self.fetch_images(&runtime, &paths, opts, &dates)?;

        paths.remove_cache()?;
        Ok(())
    }

    fn ensure_pid_table(
        &self,
        runtime: &tokio::runtime::Runtime,
        paths: &GsvPaths,
        input: &PointInput,
        opts: &GsvOptions,
    ) -> Result<(), GsvError> {
        if paths.path_pid.exists() && !opts.update_pids {
            log::info!(
                "update_pids is set to false, reusing the pid table at {:?}",
                paths.path_pid
            );
            return Ok(());
        }
        if paths.cache_pids_augmented.exists() {
            std::fs::copy(&paths.cache_pids_augmented, &paths.path_pid)
                .map_err(|e| SvidError::filesystem(&paths.path_pid, e))?;
            log::info!("the augmented panorama IDs have been read from the cache");
            return Ok(());
        }

        let id_columns: Vec<String> = opts.id_columns.iter().map(|c| c.to_lowercase()).collect();
        let rows = self.discover(runtime, paths, input, opts, &id_columns)?;
        let columns = table::preferred_columns(
            &[
                PANOID,
                "lat",
                "lon",
                "year",
                "month",
                INPUT_LATITUDE,
                INPUT_LONGITUDE,
            ],
            &rows,
        );
        table::write_rows_with_columns(&paths.path_pid, &columns, &rows)
            .map_err(GsvError::Pipeline)?;
        log::info!("the panorama IDs have been saved to {:?}", paths.path_pid);
        Ok(())
    }

    fn discover(
        &self,
        runtime: &tokio::runtime::Runtime,
        paths: &GsvPaths,
        input: &PointInput,
        opts: &GsvOptions,
        id_columns: &[String],
    ) -> Result<Vec<Row>, GsvError> {
        let resolved = input.resolve(
            runtime,
            &self.user_agents,
            &InputOptions {
                id_columns: id_columns.to_vec(),
                buffer_m: opts.buffer,
                distance_m: self.distance,
                grid: self.grid,
                grid_size_m: self.grid_size,
                lat_lon_cache: Some(paths.cache_lat_lon.clone()),
            },
        )?;
        let stage = StageOptions {
            batch_size: opts.batch_size,
            max_workers: self.max_workers,
        };

        let mut rows = if paths.cache_pids_raw.exists() {
            log::info!("the raw panorama IDs have been read from the cache");
            table::read_rows(&paths.cache_pids_raw)?
        } else {
            let store = CheckpointStore::open(paths.dir_cache.join("raw_pids"))?;
            let proxies = self.proxies.clone();
            let agents = self.user_agents.clone();
            let retry = self.retry;
            batch::run_discovery(runtime, &store, &resolved.table, &stage, move |point| {
                let proxies = proxies.clone();
                let agents = agents.clone();
                let (lat, lon) = (point.latitude, point.longitude);
                async move {
                    let panos =
                        with_rotation(&retry, &proxies, &agents, METADATA_TIMEOUT, |client| {
                            async move { api::search::panoids_near(&client, lat, lon).await }
                        })
                        .await?;
                    Ok(panos.into_iter().map(|p| p.into_row()).collect())
                }
            })?;
            let mut dedup_keys = vec![String::from(PANOID)];
            dedup_keys.extend(id_columns.iter().cloned());
            store.finalize(&dedup_keys, &[LAT_LON_ID], &paths.cache_pids_raw)?
        };

        if !resolved.polygons.is_empty() {
            let index = PolygonIndex::new(resolved.polygons)?;
            let total = rows.len();
            let filtered: Vec<Row> = tqdm!(
                rows.into_iter(),
                total = total,
                desc = "checking points within polygons"
            )
            .filter(|row| {
                let lon = row.get("lon").and_then(|v| v.parse::<f64>().ok());
                let lat = row.get("lat").and_then(|v| v.parse::<f64>().ok());
                matches!((lon, lat), (Some(lon), Some(lat)) if index.contains(lon, lat))
            })
            .collect();
            eprintln!();
            rows = filtered;
        }

        if opts.augment_metadata {
            rows = self.augment(runtime, paths, rows, opts, id_columns)?;
        }
        Ok(rows)
    }

    fn augment(
        &self,
        runtime: &tokio::runtime::Runtime,
        paths: &GsvPaths,
        rows: Vec<Row>,
        opts: &GsvOptions,
        id_columns: &[String],
    ) -> Result<Vec<Row>, GsvError> {
        let Some(api_key) = self.api_key.clone() else {
            return Err(GsvError::Pipeline(SvidError::MissingCredential(
                String::from("metadata augmentation requires a Street View API key"),
            )));
        };
        let stage = StageOptions {
            batch_size: opts.batch_size,
            max_workers: self.max_workers,
        };
        let store = CheckpointStore::open(paths.dir_cache.join("augmented_pids"))?;
        let proxies = self.proxies.clone();
        let agents = self.user_agents.clone();
        let retry = self.retry;
        batch::run_keyed_stage(
            runtime,
            &store,
            rows,
            PANOID,
            &stage,
            "augmenting metadata",
            move |mut row: Row| {
                let proxies = proxies.clone();
                let agents = agents.clone();
                let api_key = api_key.clone();
                async move {
                    let panoid = row.get(PANOID).cloned().unwrap_or_default();
                    let outcome =
                        with_rotation(&retry, &proxies, &agents, METADATA_TIMEOUT, |client| {
                            let panoid = panoid.clone();
                            let api_key = api_key.clone();
                            async move {
                                api::metadata::fetch_year_month(&client, &panoid, &api_key).await
                            }
                        })
                        .await;
                    match outcome {
                        Ok((year, month)) => {
                            row.insert(String::from("year"), year.unwrap_or_default());
                            row.insert(String::from("month"), month.unwrap_or_default());
                            Ok(row)
                        }
                        Err(e) if e.is_transport() => Err(e),
                        Err(e) => {
                            // remote said no; record the pano with empty
                            // fields rather than failing the batch
                            log::debug!("metadata rejected for '{panoid}': {e}");
                            row.insert(String::from("year"), String::new());
                            row.insert(String::from("month"), String::new());
                            Ok(row)
                        }
                    }
                }
            },
            |row| {
                let mut replacement = row.clone();
                replacement.insert(String::from("year"), String::new());
                replacement.insert(String::from("month"), String::new());
                Some(replacement)
            },
        )?;
        let mut dedup_keys = vec![String::from(PANOID)];
        dedup_keys.extend(id_columns.iter().cloned());
        let rows = store.finalize(&dedup_keys, &[], &paths.cache_pids_augmented)?;
        // the augmented cache supersedes the earlier stage caches
        for stale in [&paths.cache_lat_lon, &paths.cache_pids_raw] {
            if stale.exists() {
                std::fs::remove_file(stale).map_err(|e| SvidError::filesystem(stale, e))?;
            }
        }
        Ok(rows)
    }

    fn fetch_images(
        &self,
        runtime: &tokio::runtime::Runtime,
        paths: &GsvPaths,
        opts: &GsvOptions,
        dates: &DateRange,
    ) -> Result<(), GsvError> {
        let rows = table::read_rows(&paths.path_pid)?;
        let mut seen = HashSet::new();
        let mut work = vec![];
        for row in rows {
            let Some(panoid) = row.get(PANOID).cloned().filter(|p| !p.is_empty()) else {
                continue;
            };
            if !seen.insert(panoid) {
                continue;
            }
            let year = row.get("year").cloned().unwrap_or_default();
            let month = row.get("month").cloned().unwrap_or_default();
            if !dates.contains_year_month(&year, &month) {
                continue;
            }
            work.push(row);
        }
        if work.is_empty() {
            log::info!("there is no panorama ID to download");
            return Ok(());
        }

        std::fs::create_dir_all(&paths.panorama_output)
            .map_err(|e| SvidError::filesystem(&paths.panorama_output, e))?;
        let downloaded = completion::downloaded_stems(&paths.panorama_output)?;
        let work: Vec<Row> = work
            .into_iter()
            .filter(|row| {
                row.get(PANOID)
                    .map(|p| !downloaded.contains(p))
                    .unwrap_or(false)
            })
            .collect();
        if work.is_empty() {
            log::info!("all images have been downloaded");
            return Ok(());
        }

        let stage = StageOptions {
            batch_size: opts.batch_size,
            max_workers: self.max_workers,
        };
        let (zoom, h_tiles, v_tiles) = (opts.zoom, opts.h_tiles, opts.v_tiles);
        let (cropped, full) = (opts.cropped, opts.full);
        let proxies = self.proxies.clone();
        let agents = self.user_agents.clone();
        batch::run_image_fetch(
            runtime,
            &paths.panorama_output,
            work,
            PANOID,
            &stage,
            &self.faillog,
            move |row: Row, batch_dir: PathBuf| {
                let proxies = proxies.clone();
                let agents = agents.clone();
                async move {
                    let panoid = row.get(PANOID).cloned().unwrap_or_default();
                    let client = client_for(proxies.sample(), agents.sample(), IMAGE_TIMEOUT)?;
                    let mut tiles = Vec::with_capacity((h_tiles * v_tiles) as usize);
                    for y in 0..v_tiles {
                        for x in 0..h_tiles {
                            let bytes =
                                api::tiles::fetch_tile(&client, &panoid, x, y, zoom).await?;
                            tiles.push((x, y, stitch::decode_tile(&panoid, &bytes)?));
                        }
                    }
                    let mut image = stitch::stitch_tiles(&tiles, h_tiles, v_tiles)?;
                    if !full {
                        image = stitch::trim_black_borders(&image);
                    }
                    if cropped {
                        image = stitch::crop_top_half(&image);
                    }
                    let path = batch_dir.join(format!("{panoid}.jpg"));
                    image.save(&path).map_err(|e| {
                        SvidError::InternalError(format!("failure writing image {path:?}: {e}"))
                    })?;
                    Ok(())
                }
            },
        )?;
        Ok(())
    }
}

fn validate_options(opts: &GsvOptions) -> Result<(), GsvError> {
    if opts.h_tiles == 0 || opts.v_tiles == 0 {
        return Err(GsvError::Configuration(String::from(
            "h_tiles and v_tiles must be at least 1",
        )));
    }
    if opts.zoom > 5 {
        return Err(GsvError::Configuration(format!(
            "zoom {} is out of range, expected 0-5",
            opts.zoom
        )));
    }
    if opts.batch_size == 0 {
        return Err(GsvError::Configuration(String::from(
            "batch_size must be at least 1",
        )));
    }
    Ok(())
}
