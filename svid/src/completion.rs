use std::collections::HashSet;
use std::path::Path;

use crate::error::SvidError;

/// recursively collects the filename stems under the output image tree.
/// stems are pano ids, so the result is the set of already-downloaded
/// panoramas a resumed run can skip.
pub fn downloaded_stems(dir: &Path) -> Result<HashSet<String>, SvidError> {
    let mut stems = HashSet::new();
    if !dir.exists() {
        return Ok(stems);
    }
    collect_stems(dir, &mut stems)?;
    Ok(stems)
}

fn collect_stems(dir: &Path, stems: &mut HashSet<String>) -> Result<(), SvidError> {
    let entries = std::fs::read_dir(dir).map_err(|e| SvidError::filesystem(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SvidError::filesystem(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_stems(&path, stems)?;
        } else if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.insert(stem.to_string());
        }
    }
    Ok(())
}

/// the highest existing `batch_{N}` number under the output image tree,
/// or 0 when none exist. new batches continue from here so resumed runs
/// never reuse a batch directory.
pub fn max_batch_number(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            name.strip_prefix("batch_")?.parse::<u64>().ok()
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downloaded_stems_walks_batch_directories() {
        let dir = tempfile::tempdir().unwrap();
        let batch_1 = dir.path().join("batch_1");
        let batch_2 = dir.path().join("batch_2");
        std::fs::create_dir_all(&batch_1).unwrap();
        std::fs::create_dir_all(&batch_2).unwrap();
        std::fs::write(batch_1.join("abc123.jpg"), b"x").unwrap();
        std::fs::write(batch_2.join("def456.png"), b"x").unwrap();
        let stems = downloaded_stems(dir.path()).unwrap();
        assert_eq!(
            stems,
            HashSet::from([String::from("abc123"), String::from("def456")])
        );
    }

    #[test]
    fn test_missing_directory_yields_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let stems = downloaded_stems(&dir.path().join("nope")).unwrap();
        assert!(stems.is_empty());
    }

    #[test]
    fn test_max_batch_number_ignores_unrelated_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("batch_2")).unwrap();
        std::fs::create_dir_all(dir.path().join("batch_11")).unwrap();
        std::fs::create_dir_all(dir.path().join("other")).unwrap();
        assert_eq!(max_batch_number(dir.path()), 11);
    }

    #[test]
    fn test_max_batch_number_of_missing_dir_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(max_batch_number(&dir.path().join("nope")), 0);
    }
}
