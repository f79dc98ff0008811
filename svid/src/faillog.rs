use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// append-only log of failed pano ids, one id per line. many workers
/// append concurrently, so writes are serialized behind a mutex. a
/// downloader constructed without a log path swallows appends.
#[derive(Debug)]
pub struct FailureLog {
    path: Option<PathBuf>,
    guard: Mutex<()>,
}

impl FailureLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            guard: Mutex::new(()),
        }
    }

    pub fn append(&self, pano_id: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let Ok(_lock) = self.guard.lock() else {
            return;
        };
        let opened = OpenOptions::new().create(true).append(true).open(path);
        match opened {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{pano_id}") {
                    log::warn!("failure appending '{pano_id}' to log {path:?}: {e}");
                }
            }
            Err(e) => log::warn!("failure opening failure log {path:?}: {e}"),
        }
    }
}
