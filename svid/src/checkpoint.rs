use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::SvidError;
use crate::table::{self, Row};

/// per-stage shard store under the run's cache directory. each completed
/// batch appends one `checkpoint_batch_{N}.csv`; finalization concatenates
/// the shards into the stage's canonical file and removes the directory.
/// a crashed run leaves its shards behind, and the next run counts them to
/// continue the numbering and skip completed work.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SvidError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| SvidError::filesystem(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn shard_paths(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return vec![];
        };
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        paths.sort();
        paths
    }

    /// the number of existing shard files; batch numbering continues from
    /// here.
    pub fn shard_count(&self) -> usize {
        self.shard_paths().len()
    }

    /// all rows across all shards. empty or unreadable shards are skipped
    /// with a warning rather than aborting the stage.
    pub fn read_rows(&self) -> Vec<Row> {
        let mut rows = vec![];
        for path in self.shard_paths() {
            match table::read_rows(&path) {
                Ok(shard_rows) => rows.extend(shard_rows),
                Err(e) => log::warn!("skipping unreadable checkpoint shard {path:?}: {e}"),
            }
        }
        rows
    }

    /// the distinct values of `column` across all shards; used to subtract
    /// completed work items on resume.
    pub fn completed_values(&self, column: &str) -> HashSet<String> {
        self.read_rows()
            .into_iter()
            .filter_map(|mut row| row.shift_remove(column))
            .filter(|v| !v.is_empty())
            .collect()
    }

    /// writes one batch shard. empty batches write nothing, mirroring the
    /// per-batch-atomic contract: a shard only exists once its batch fully
    /// reduced to rows.
    pub fn write_shard(&self, batch_number: usize, rows: &[Row]) -> Result<(), SvidError> {
        if rows.is_empty() {
            return Ok(());
        }
        let path = self.dir.join(format!("checkpoint_batch_{batch_number}.csv"));
        table::write_rows(&path, rows)
    }

    /// writes the end-of-stage retry sweep results.
    pub fn write_retry_shard(&self, rows: &[Row]) -> Result<(), SvidError> {
        if rows.is_empty() {
            return Ok(());
        }
        let path = self.dir.join("checkpoint_retry.csv");
        table::write_rows(&path, rows)
    }

    /// concatenates all shards, drops `drop_cols`, deduplicates on
    /// `dedup_keys` (first occurrence wins), writes the canonical stage
    /// file and deletes the shard directory.
    pub fn finalize(
        self,
        dedup_keys: &[String],
        drop_cols: &[&str],
        dest: &Path,
    ) -> Result<Vec<Row>, SvidError> {
        let mut rows = self.read_rows();
        table::drop_columns(&mut rows, drop_cols);
        let rows = if dedup_keys.is_empty() {
            rows
        } else {
            table::dedup_rows(rows, dedup_keys)
        };
        table::write_rows(dest, &rows)?;
        std::fs::remove_dir_all(&self.dir).map_err(|e| SvidError::filesystem(&self.dir, e))?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_shard_numbering_continues_from_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("raw_pids")).unwrap();
        assert_eq!(store.shard_count(), 0);
        store
            .write_shard(1, &[row(&[("panoid", "a"), ("lat_lon_id", "1")])])
            .unwrap();
        store
            .write_shard(2, &[row(&[("panoid", "b"), ("lat_lon_id", "2")])])
            .unwrap();
        // a fresh handle over the same directory sees the prior shards
        let resumed = CheckpointStore::open(dir.path().join("raw_pids")).unwrap();
        assert_eq!(resumed.shard_count(), 2);
        assert_eq!(
            resumed.completed_values("lat_lon_id"),
            HashSet::from([String::from("1"), String::from("2")])
        );
    }

    #[test]
    fn test_empty_batches_write_no_shard() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("raw_pids")).unwrap();
        store.write_shard(1, &[]).unwrap();
        assert_eq!(store.shard_count(), 0);
    }

    #[test]
    fn test_corrupt_shard_is_skipped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("raw_pids")).unwrap();
        store
            .write_shard(1, &[row(&[("panoid", "a")])])
            .unwrap();
        // a truncated shard with a broken quoted field
        std::fs::write(
            store.dir().join("checkpoint_batch_2.csv"),
            "panoid\n\"unterminated",
        )
        .unwrap();
        let rows = store.read_rows();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_finalize_dedups_and_removes_shard_dir() {
        let dir = tempfile::tempdir().unwrap();
        let shard_dir = dir.path().join("raw_pids");
        let store = CheckpointStore::open(&shard_dir).unwrap();
        store
            .write_shard(
                1,
                &[
                    row(&[("panoid", "a"), ("lat_lon_id", "1")]),
                    row(&[("panoid", "b"), ("lat_lon_id", "2")]),
                ],
            )
            .unwrap();
        store
            .write_retry_shard(&[row(&[("panoid", "a"), ("lat_lon_id", "3")])])
            .unwrap();
        let dest = dir.path().join("pids_raw.csv");
        let rows = store
            .finalize(&[String::from("panoid")], &["lat_lon_id"], &dest)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.get("lat_lon_id").is_none()));
        assert!(dest.exists());
        assert!(!shard_dir.exists());
    }

    #[test]
    fn test_finalize_round_trip_equals_dedup_of_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("stage")).unwrap();
        let shard_a = vec![row(&[("id", "1")]), row(&[("id", "2")])];
        let shard_b = vec![row(&[("id", "2")]), row(&[("id", "3")])];
        store.write_shard(1, &shard_a).unwrap();
        store.write_shard(2, &shard_b).unwrap();
        let dest = dir.path().join("final.csv");
        store.finalize(&[String::from("id")], &[], &dest).unwrap();
        let rows = crate::table::read_rows(&dest).unwrap();
        let ids: Vec<&str> = rows
            .iter()
            .filter_map(|r| r.get("id").map(String::as_str))
            .collect();
        let expected: HashSet<&str> = HashSet::from(["1", "2", "3"]);
        assert_eq!(ids.iter().copied().collect::<HashSet<_>>(), expected);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_completed_values_ignores_blank_cells() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("stage")).unwrap();
        let mut blank = IndexMap::new();
        blank.insert(String::from("id"), String::new());
        store
            .write_shard(1, &[row(&[("id", "1")]), blank])
            .unwrap();
        assert_eq!(
            store.completed_values("id"),
            HashSet::from([String::from("1")])
        );
    }
}
