use std::future::Future;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use itertools::Itertools;
use kdam::{tqdm, Bar, BarExt};

use crate::checkpoint::CheckpointStore;
use crate::completion;
use crate::error::SvidError;
use crate::faillog::FailureLog;
use crate::model::{PointTable, QueryPoint, LAT_LON_ID};
use crate::table::Row;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

pub const INPUT_LATITUDE: &str = "input_latitude";
pub const INPUT_LONGITUDE: &str = "input_longitude";

/// per-stage batching knobs. the worker bound applies within a batch;
/// batches themselves run sequentially with a full barrier between them.
#[derive(Debug, Clone, Copy)]
pub struct StageOptions {
    pub batch_size: usize,
    pub max_workers: usize,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: default_max_workers(),
        }
    }
}

/// the default worker bound: min(32, cpus + 4), the usual thread-pool
/// sizing for network-bound work.
pub fn default_max_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (cpus + 4).min(32)
}

/// the async runtime every `download_svi` call drives its stages on.
pub fn build_runtime() -> Result<tokio::runtime::Runtime, SvidError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            SvidError::InternalError(format!("failure creating async rust tokio runtime: {e}"))
        })
}

fn into_batches<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let chunks = items.into_iter().chunks(batch_size);
    chunks.into_iter().map(|chunk| chunk.collect()).collect()
}

/// runs the panorama discovery stage: one provider call per query point,
/// fanned out over a bounded worker pool batch by batch, with one
/// checkpoint shard per completed batch and a single end-of-stage retry
/// sweep over failed points. provider rows get the query point's
/// back-references (`input_latitude`, `input_longitude`, `lat_lon_id`
/// and user id columns) attached here.
pub fn run_discovery<F, Fut>(
    runtime: &tokio::runtime::Runtime,
    store: &CheckpointStore,
    table: &PointTable,
    opts: &StageOptions,
    fetch: F,
) -> Result<(), SvidError>
where
    F: Fn(QueryPoint) -> Fut + Clone,
    Fut: Future<Output = Result<Vec<Row>, SvidError>>,
{
    let completed = store.completed_values(LAT_LON_ID);
    let remaining: Vec<QueryPoint> = table
        .points
        .iter()
        .filter(|p| !completed.contains(&p.lat_lon_id.to_string()))
        .cloned()
        .collect();
    if !completed.is_empty() {
        log::info!(
            "resuming discovery: {} of {} query points already checkpointed",
            table.len() - remaining.len(),
            table.len()
        );
    }
    if remaining.is_empty() {
        return Ok(());
    }

    let shard_start = store.shard_count();
    let batches = into_batches(remaining, opts.batch_size);
    let n_batches = batches.len();
    let mut failed: Vec<QueryPoint> = vec![];

    let batch_iter = tqdm!(
        batches.into_iter().enumerate(),
        total = n_batches,
        desc = format!("getting pids by batch size {}", opts.batch_size)
    );
    for (batch_index, batch) in batch_iter {
        let (rows, batch_failed) = run_point_batch(runtime, batch, opts.max_workers, &fetch)?;
        store.write_shard(shard_start + batch_index + 1, &rows)?;
        failed.extend(batch_failed);
    }
    eprintln!();

    if !failed.is_empty() {
        log::info!("retrying {} failed query points", failed.len());
        let (rows, still_failed) = run_point_batch(runtime, failed, opts.max_workers, &fetch)?;
        store.write_retry_shard(&rows)?;
        for point in &still_failed {
            log::warn!(
                "query point {} failed again and was skipped",
                point.lat_lon_id
            );
        }
    }
    Ok(())
}

fn run_point_batch<F, Fut>(
    runtime: &tokio::runtime::Runtime,
    points: Vec<QueryPoint>,
    max_workers: usize,
    fetch: &F,
) -> Result<(Vec<Row>, Vec<QueryPoint>), SvidError>
where
    F: Fn(QueryPoint) -> Fut + Clone,
    Fut: Future<Output = Result<Vec<Row>, SvidError>>,
{
    let mut bar = Bar::builder()
        .total(points.len())
        .desc("querying panoramas")
        .build()
        .map_err(SvidError::InternalError)?;
    let outcomes = runtime.block_on(async {
        stream::iter(points.into_iter().map(|point| {
            let fetch = fetch.clone();
            async move {
                let result = fetch(point.clone()).await;
                (point, result)
            }
        }))
        .buffer_unordered(max_workers.max(1))
        .map(|outcome| {
            let _ = bar.update(1);
            outcome
        })
        .collect::<Vec<_>>()
        .await
    });
    eprintln!();

    let mut rows = vec![];
    let mut failed = vec![];
    for (point, result) in outcomes {
        match result {
            Ok(point_rows) => {
                for mut row in point_rows {
                    row.insert(INPUT_LATITUDE.to_string(), point.latitude.to_string());
                    row.insert(INPUT_LONGITUDE.to_string(), point.longitude.to_string());
                    row.insert(LAT_LON_ID.to_string(), point.lat_lon_id.to_string());
                    for (column, value) in &point.ids {
                        row.insert(column.clone(), value.clone());
                    }
                    rows.push(row);
                }
            }
            Err(e) => {
                log::warn!("discovery failed for query point {}: {e}", point.lat_lon_id);
                failed.push(point);
            }
        }
    }
    Ok((rows, failed))
}

/// runs a per-pano enrichment stage (metadata augmentation, URL
/// resolution): one task per input row, checkpointed by the row's
/// `key_column`. tasks that still fail after the end-of-stage retry sweep
/// are handed to `fallback`, which may produce a replacement row (e.g. a
/// metadata row with empty fields) or drop the item.
#[allow(clippy::too_many_arguments)]
pub fn run_keyed_stage<F, Fut, G>(
    runtime: &tokio::runtime::Runtime,
    store: &CheckpointStore,
    items: Vec<Row>,
    key_column: &str,
    opts: &StageOptions,
    desc: &str,
    task: F,
    fallback: G,
) -> Result<(), SvidError>
where
    F: Fn(Row) -> Fut + Clone,
    Fut: Future<Output = Result<Row, SvidError>>,
    G: Fn(&Row) -> Option<Row>,
{
    let completed = store.completed_values(key_column);
    let remaining: Vec<Row> = items
        .into_iter()
        .filter(|row| {
            row.get(key_column)
                .map(|key| !completed.contains(key))
                .unwrap_or(false)
        })
        .collect();
    if remaining.is_empty() {
        return Ok(());
    }

    let shard_start = store.shard_count();
    let batches = into_batches(remaining, opts.batch_size);
    let n_batches = batches.len();
    let mut failed: Vec<Row> = vec![];

    let batch_iter = tqdm!(
        batches.into_iter().enumerate(),
        total = n_batches,
        desc = format!("{desc} by batch size {}", opts.batch_size)
    );
    for (batch_index, batch) in batch_iter {
        let (rows, batch_failed) = run_row_batch(runtime, batch, key_column, opts.max_workers, &task)?;
        store.write_shard(shard_start + batch_index + 1, &rows)?;
        failed.extend(batch_failed);
    }
    eprintln!();

    if !failed.is_empty() {
        log::info!("retrying {} failed rows", failed.len());
        let (mut rows, still_failed) =
            run_row_batch(runtime, failed, key_column, opts.max_workers, &task)?;
        for row in &still_failed {
            if let Some(replacement) = fallback(row) {
                rows.push(replacement);
            }
        }
        store.write_retry_shard(&rows)?;
    }
    Ok(())
}

fn run_row_batch<F, Fut>(
    runtime: &tokio::runtime::Runtime,
    rows: Vec<Row>,
    key_column: &str,
    max_workers: usize,
    task: &F,
) -> Result<(Vec<Row>, Vec<Row>), SvidError>
where
    F: Fn(Row) -> Fut + Clone,
    Fut: Future<Output = Result<Row, SvidError>>,
{
    let mut bar = Bar::builder()
        .total(rows.len())
        .desc("processing rows")
        .build()
        .map_err(SvidError::InternalError)?;
    let outcomes = runtime.block_on(async {
        stream::iter(rows.into_iter().map(|row| {
            let task = task.clone();
            async move {
                let result = task(row.clone()).await;
                (row, result)
            }
        }))
        .buffer_unordered(max_workers.max(1))
        .map(|outcome| {
            let _ = bar.update(1);
            outcome
        })
        .collect::<Vec<_>>()
        .await
    });
    eprintln!();

    let mut done = vec![];
    let mut failed = vec![];
    for (row, result) in outcomes {
        match result {
            Ok(produced) => done.push(produced),
            Err(e) => {
                let key = row.get(key_column).cloned().unwrap_or_default();
                log::warn!("task failed for '{key}': {e}");
                failed.push(row);
            }
        }
    }
    Ok((done, failed))
}

/// runs the image fetch stage: partitions the work set into `batch_{N}`
/// sub-directories continuing the existing numbering, fans each batch out
/// over the worker pool, and logs failed pano ids to the failure log.
/// single attempt per pano per run; a re-run picks failures up again
/// because only on-disk images are subtracted from the work set.
pub fn run_image_fetch<F, Fut>(
    runtime: &tokio::runtime::Runtime,
    out_root: &Path,
    work: Vec<Row>,
    key_column: &str,
    opts: &StageOptions,
    faillog: &FailureLog,
    fetch: F,
) -> Result<usize, SvidError>
where
    F: Fn(Row, PathBuf) -> Fut + Clone,
    Fut: Future<Output = Result<(), SvidError>>,
{
    std::fs::create_dir_all(out_root).map_err(|e| SvidError::filesystem(out_root, e))?;
    let batch_start = completion::max_batch_number(out_root);
    let batches = into_batches(work, opts.batch_size);
    let n_batches = batches.len();
    let mut downloaded = 0usize;

    let batch_iter = tqdm!(
        batches.into_iter().enumerate(),
        total = n_batches,
        desc = format!("downloading images by batch size {}", opts.batch_size)
    );
    for (batch_index, batch) in batch_iter {
        let batch_dir = out_root.join(format!("batch_{}", batch_start + batch_index as u64 + 1));
        std::fs::create_dir_all(&batch_dir).map_err(|e| SvidError::filesystem(&batch_dir, e))?;

        let mut bar = Bar::builder()
            .total(batch.len())
            .desc("downloading images")
            .build()
            .map_err(SvidError::InternalError)?;
        let outcomes = runtime.block_on(async {
            stream::iter(batch.into_iter().map(|row| {
                let fetch = fetch.clone();
                let batch_dir = batch_dir.clone();
                async move {
                    let key = row.get(key_column).cloned().unwrap_or_default();
                    let result = fetch(row, batch_dir).await;
                    (key, result)
                }
            }))
            .buffer_unordered(opts.max_workers.max(1))
            .map(|outcome| {
                let _ = bar.update(1);
                outcome
            })
            .collect::<Vec<_>>()
            .await
        });
        eprintln!();

        for (key, result) in outcomes {
            match result {
                Ok(()) => downloaded += 1,
                Err(e) => {
                    log::warn!("image fetch failed for '{key}': {e}");
                    faillog.append(&key);
                }
            }
        }
    }
    eprintln!();
    Ok(downloaded)
}
