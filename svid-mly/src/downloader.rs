use std::collections::{HashMap, HashSet};
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

use crate::api::graph::{self, thumb_field};
use crate::error::MlyError;
use crate::options::{MlyConfig, MlyOptions};
use crate::paths::MlyPaths;

const IMAGE_ID: &str = "id";

/// Mapillary downloader: discovers image ids around the input through the
/// graph API, resolves per-image thumbnail URLs, and fetches the images.
pub struct MlyDownloader {
    api_key: String,
    faillog: Arc<FailureLog>,
    distance: f64,
    grid: bool,
    grid_size: f64,
    max_workers: usize,
    proxies: Arc<ProxyPool>,
    user_agents: Arc<UserAgentPool>,
    retry: RetryPolicy,
}

impl MlyDownloader {
    pub fn new(config: MlyConfig) -> Result<Self, MlyError> {
        if config.api_key.trim().is_empty() {
            return Err(MlyError::Pipeline(SvidError::MissingCredential(
                String::from("a Mapillary access token is required"),
            )));
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

    /// runs the full pipeline against `dir_output`: pid table, thumbnail
    /// URL table, then images into `mly_svi/batch_{N}/`. the scratch
    /// directory survives failures for resume and is removed on success.
    pub fn download_svi(
        &self,
        dir_output: &Path,
        input: &PointInput,
        opts: &MlyOptions,
    ) -> Result<(), MlyError> {
        let dates = DateRange::parse(opts.start_date.as_deref(), opts.end_date.as_deref())
            .map_err(MlyError::Pipeline)?;
        validate_options(opts)?;

        let paths = MlyPaths::new(dir_output);
        paths.create()?;
        let runtime = batch::build_runtime()?;

        self.ensure_pid_table(&runtime, &paths, input, opts)?;
        if opts.metadata_only {
            paths.remove_cache()?;
            return Ok(());
        }
        self.resolve_urls(&runtime, &paths, opts)?;
        self.fetch_images(&runtime, &paths, opts, &dates)?;

        paths.remove_cache()?;
        Ok(())
    }

    fn ensure_pid_table(
        &self,
        runtime: &tokio::runtime::Runtime,
        paths: &MlyPaths,
        input: &PointInput,
        opts: &MlyOptions,
    ) -> Result<(), MlyError> {
        if paths.path_pid.exists() && !opts.update_pids {
            log::info!(
                "update_pids is set to false, reusing the pid table at {:?}",
                paths.path_pid
            );
            return Ok(());
        }

        let id_columns: Vec<String> = opts.id_columns.iter().map(|c| c.to_lowercase()).collect();
        let rows = self.discover(runtime, paths, input, opts, &id_columns)?;
        let columns = table::preferred_columns(
            &[
                IMAGE_ID,
                "captured_at",
                "compass_angle",
                "is_pano",
                "organization_id",
                "sequence_id",
                INPUT_LATITUDE,
                INPUT_LONGITUDE,
                "lon",
                "lat",
            ],
            &rows,
        );
        table::write_rows_with_columns(&paths.path_pid, &columns, &rows)
            .map_err(MlyError::Pipeline)?;
        log::info!("the panorama IDs have been saved to {:?}", paths.path_pid);
        Ok(())
    }

    fn discover(
        &self,
        runtime: &tokio::runtime::Runtime,
        paths: &MlyPaths,
        input: &PointInput,
        opts: &MlyOptions,
        id_columns: &[String],
    ) -> Result<Vec<Row>, MlyError> {
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
            let api_key = self.api_key.clone();
            let filters = opts.filters.clone();
            batch::run_discovery(runtime, &store, &resolved.table, &stage, move |point| {
                let proxies = proxies.clone();
                let agents = agents.clone();
                let api_key = api_key.clone();
                let filters = filters.clone();
                let (lat, lon) = (point.latitude, point.longitude);
                async move {
                    with_rotation(&retry, &proxies, &agents, METADATA_TIMEOUT, |client| {
                        let api_key = api_key.clone();
                        let filters = filters.clone();
                        async move {
                            graph::images_near(&client, &api_key, lat, lon, &filters).await
                        }
                    })
                    .await
                }
            })?;
            let mut dedup_keys = vec![String::from(IMAGE_ID)];
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
        Ok(rows)
    }

    fn resolve_urls(
        &self,
        runtime: &tokio::runtime::Runtime,
        paths: &MlyPaths,
        opts: &MlyOptions,
    ) -> Result<(), MlyError> {
        if paths.pids_urls.exists() {
            log::info!("the panorama URLs have been read from the cache");
            return Ok(());
        }
        let rows = table::read_rows(&paths.path_pid)?;
        let mut seen = HashSet::new();
        let items: Vec<Row> = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.get(IMAGE_ID).cloned().filter(|v| !v.is_empty())?;
                seen.insert(id.clone()).then(|| {
                    let mut item = Row::new();
                    item.insert(String::from(IMAGE_ID), id);
                    item
                })
            })
            .collect();
        if items.is_empty() {
            log::info!("there is no panorama ID to download");
            return Ok(());
        }

        let stage = StageOptions {
            batch_size: opts.batch_size,
            max_workers: self.max_workers,
        };
        let store = CheckpointStore::open(paths.dir_cache.join("urls"))?;
        let proxies = self.proxies.clone();
        let agents = self.user_agents.clone();
        let retry = self.retry;
        let api_key = self.api_key.clone();
        let resolution = opts.resolution;
        let faillog = self.faillog.clone();
        batch::run_keyed_stage(
            runtime,
            &store,
            items,
            IMAGE_ID,
            &stage,
            "getting urls",
            move |mut row: Row| {
                let proxies = proxies.clone();
                let agents = agents.clone();
                let api_key = api_key.clone();
                async move {
                    let id = row.get(IMAGE_ID).cloned().unwrap_or_default();
                    let url = with_rotation(&retry, &proxies, &agents, METADATA_TIMEOUT, |client| {
                        let api_key = api_key.clone();
                        let id = id.clone();
                        async move {
                            graph::image_thumbnail_url(&client, &api_key, &id, resolution).await
                        }
                    })
                    .await?;
                    row.insert(String::from("url"), url);
                    Ok(row)
                }
            },
            move |row| {
                // the thumbnail could not be resolved; record the id and
                // move on
                if let Some(id) = row.get(IMAGE_ID) {
                    faillog.append(id);
                }
                None
            },
        )?;
        store.finalize(&[String::from(IMAGE_ID)], &[], &paths.pids_urls)?;
        Ok(())
    }

    fn fetch_images(
        &self,
        runtime: &tokio::runtime::Runtime,
        paths: &MlyPaths,
        opts: &MlyOptions,
        dates: &DateRange,
    ) -> Result<(), MlyError> {
        if !paths.pids_urls.exists() {
            log::info!("there is no panorama URL table, skipping image download");
            return Ok(());
        }
        let urls: HashMap<String, String> = table::read_rows(&paths.pids_urls)?
            .into_iter()
            .filter_map(|row| Some((row.get(IMAGE_ID)?.clone(), row.get("url")?.clone())))
            .collect();

        let rows = table::read_rows(&paths.path_pid)?;
        let mut seen = HashSet::new();
        let mut work = vec![];
        for mut row in rows {
            let Some(id) = row.get(IMAGE_ID).cloned().filter(|v| !v.is_empty()) else {
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            if !dates.is_unbounded() {
                let captured_at = row
                    .get("captured_at")
                    .and_then(|v| v.parse::<i64>().ok());
                match captured_at {
                    Some(ms) if dates.contains_epoch_ms(ms) => {}
                    _ => continue,
                }
            }
            let Some(url) = urls.get(&id) else {
                continue;
            };
            row.insert(String::from("url"), url.clone());
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
                row.get(IMAGE_ID)
                    .map(|id| !downloaded.contains(id))
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
        let cropped = opts.cropped;
        let proxies = self.proxies.clone();
        let agents = self.user_agents.clone();
        batch::run_image_fetch(
            runtime,
            &paths.panorama_output,
            work,
            IMAGE_ID,
            &stage,
            &self.faillog,
            move |row: Row, batch_dir: PathBuf| {
                let proxies = proxies.clone();
                let agents = agents.clone();
                async move {
                    let id = row.get(IMAGE_ID).cloned().unwrap_or_default();
                    let url = row.get("url").cloned().unwrap_or_default();
                    let client = client_for(proxies.sample(), agents.sample(), IMAGE_TIMEOUT)?;
                    let response = client.get(url.as_str()).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(SvidError::RemoteRejection {
                            status: status.as_u16(),
                            message: format!("image endpoint rejected '{id}'"),
                        });
                    }
                    let bytes = response.bytes().await?;
                    let path = batch_dir.join(format!("{id}.png"));
                    if cropped {
                        let image = image::load_from_memory(&bytes)
                            .map_err(|e| {
                                SvidError::Protocol(format!(
                                    "undecodable image payload for '{id}': {e}"
                                ))
                            })?
                            .to_rgb8();
                        let (width, height) = image.dimensions();
                        let half = (height / 2).max(1);
                        let top = image::imageops::crop_imm(&image, 0, 0, width, half).to_image();
                        top.save(&path).map_err(|e| {
                            SvidError::InternalError(format!(
                                "failure writing image {path:?}: {e}"
                            ))
                        })?;
                    } else {
                        std::fs::write(&path, &bytes)
                            .map_err(|e| SvidError::filesystem(&path, e))?;
                    }
                    Ok(())
                }
            },
        )?;
        Ok(())
    }
}

fn validate_options(opts: &MlyOptions) -> Result<(), MlyError> {
    thumb_field(opts.resolution)
        .map_err(|_| {
            MlyError::Configuration(format!(
                "unsupported thumbnail resolution {}, expected 256, 1024 or 2048",
                opts.resolution
            ))
        })?;
    if opts.batch_size == 0 {
        return Err(MlyError::Configuration(String::from(
            "batch_size must be at least 1",
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader() -> MlyDownloader {
        MlyDownloader::new(MlyConfig {
            api_key: String::from("MLY|test|token"),
            ..Default::default()
        })
        .unwrap()
    }

    fn coordinate() -> PointInput {
        PointInput::Coordinate {
            latitude: 11.8275756,
            longitude: 13.146558,
        }
    }

    #[test]
    fn test_empty_access_token_is_missing_credential() {
        let result = MlyDownloader::new(MlyConfig::default());
        assert!(matches!(
            result,
            Err(MlyError::Pipeline(SvidError::MissingCredential(_)))
        ));
    }

    #[test]
    fn test_malformed_end_date_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let opts = MlyOptions {
            end_date: Some(String::from("31-12-2020")),
            ..Default::default()
        };
        let result = downloader().download_svi(dir.path(), &coordinate(), &opts);
        assert!(matches!(
            result,
            Err(MlyError::Pipeline(SvidError::InvalidInput(_)))
        ));
    }

    #[test]
    fn test_unsupported_resolution_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let opts = MlyOptions {
            resolution: 512,
            ..Default::default()
        };
        let result = downloader().download_svi(dir.path(), &coordinate(), &opts);
        assert!(matches!(result, Err(MlyError::Configuration(_))));
    }

    #[test]
    fn test_metadata_only_reuses_pid_table_offline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mly_pids.csv"),
            "id,captured_at,compass_angle,is_pano,organization_id,sequence_id,input_latitude,input_longitude,lon,lat\n\
             497149605748293,1585667162000,243.2,true,,xyz,11.82,13.14,13.146558,11.8275756\n",
        )
        .unwrap();
        let opts = MlyOptions {
            metadata_only: true,
            ..Default::default()
        };
        downloader()
            .download_svi(dir.path(), &coordinate(), &opts)
            .unwrap();
        assert!(!dir.path().join("cache_svid").exists());
        assert!(!dir.path().join("mly_svi").exists());
    }

    #[test]
    fn test_existing_tables_and_full_output_is_a_no_op() {
        // property: re-running image fetch over a fully populated output
        // directory issues no network requests
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mly_pids.csv"),
            "id,captured_at,lon,lat\n497149605748293,1585667162000,13.146558,11.8275756\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("pids_urls.csv"),
            "id,url\n497149605748293,https://example.test/thumb.jpg\n",
        )
        .unwrap();
        let batch_dir = dir.path().join("mly_svi").join("batch_1");
        std::fs::create_dir_all(&batch_dir).unwrap();
        std::fs::write(batch_dir.join("497149605748293.png"), b"png").unwrap();

        downloader()
            .download_svi(dir.path(), &coordinate(), &MlyOptions::default())
            .unwrap();
        assert!(!dir.path().join("cache_svid").exists());
        assert!(!dir.path().join("mly_svi").join("batch_2").exists());
    }

    #[test]
    fn test_date_filter_excludes_out_of_range_captures_offline() {
        let dir = tempfile::tempdir().unwrap();
        // captured 2020-03-31; the window asks for 2021 only
        std::fs::write(
            dir.path().join("mly_pids.csv"),
            "id,captured_at,lon,lat\n497149605748293,1585667162000,13.146558,11.8275756\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("pids_urls.csv"),
            "id,url\n497149605748293,https://example.test/thumb.jpg\n",
        )
        .unwrap();
        let opts = MlyOptions {
            start_date: Some(String::from("2021-01-01")),
            end_date: Some(String::from("2021-12-31")),
            ..Default::default()
        };
        downloader()
            .download_svi(dir.path(), &coordinate(), &opts)
            .unwrap();
        // everything is date-filtered, so no image tree appears
        assert!(!dir.path().join("mly_svi").exists());
    }

    #[test]
    #[ignore] // hits the live Mapillary graph API; set MLY_API_KEY
    fn test_download_svi_point_end_to_end() {
        let api_key = match std::env::var("MLY_API_KEY") {
            Ok(key) => key,
            Err(_) => return,
        };
        let dir = tempfile::tempdir().unwrap();
        let downloader = MlyDownloader::new(MlyConfig {
            api_key,
            log_path: Some(dir.path().join("log.log")),
            ..Default::default()
        })
        .unwrap();
        let opts = MlyOptions {
            buffer: 100.0,
            ..Default::default()
        };
        downloader
            .download_svi(dir.path(), &coordinate(), &opts)
            .unwrap();
        assert!(dir.path().join("mly_pids.csv").exists());
        assert!(dir.path().join("pids_urls.csv").exists());
        let stems = completion::downloaded_stems(&dir.path().join("mly_svi")).unwrap();
        assert!(!stems.is_empty());
    }
}
